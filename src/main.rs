use palisade::config::Config;
use palisade::server;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_max_level(tracing::Level::INFO)
        .init();

    let cfg = Config::load();

    // Single-threaded cooperative scheduling: every connection task shares
    // this executor, which is what lets the file cache go unlocked.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let local = tokio::task::LocalSet::new();

    local.block_on(&runtime, async {
        tokio::select! {
            res = server::listener::run(&cfg) => {
                res
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
        }
    })
}
