use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;

use tokio::net::{TcpListener, TcpSocket};
use tracing::info;

use crate::cache::FileCache;
use crate::config::Config;
use crate::http::connection::Connection;

/// The listening socket plus the file cache shared by its connections.
///
/// Everything runs on one cooperative executor, so connection tasks are
/// spawned locally and the cache needs no lock.
pub struct Server {
    listener: TcpListener,
    cache: Rc<RefCell<FileCache>>,
}

impl Server {
    /// Binds an IPv4 listening socket with `SO_REUSEADDR` and prepares the
    /// cache for the configured root.
    pub fn bind(config: &Config) -> anyhow::Result<Server> {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

        let socket = TcpSocket::new_v4()?;
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(libc::SOMAXCONN as u32)?;

        let cache = FileCache::new(&config.root)?;

        Ok(Server {
            listener,
            cache: Rc::new(RefCell::new(cache)),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop; one cooperative task per connection.
    pub async fn serve(self) -> anyhow::Result<()> {
        info!("Listening on {}", self.listener.local_addr()?);

        loop {
            let (stream, peer) = self.listener.accept().await?;
            tracing::debug!(%peer, "accepted connection");

            let cache = Rc::clone(&self.cache);
            tokio::task::spawn_local(async move {
                if let Err(e) = Connection::new(stream, cache).run().await {
                    tracing::error!(error = %e, "connection failed");
                }
            });
        }
    }
}

pub async fn run(config: &Config) -> anyhow::Result<()> {
    Server::bind(config)?.serve().await
}
