use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use tokio::net::TcpStream;

use crate::cache::{FileCache, FileError};
use crate::http::parser::{ReceiveError, RequestParser};
use crate::http::request::Request;
use crate::http::response::{Response, ResponseBuilder, StatusCode};
use crate::http::writer::ResponseWriter;

/// Inline document served for `/` and `/index.html`.
const WELCOME_DOCUMENT: &str = concat!(
    "<!DOCTYPE html>",
    "<html lang=\"en\">",
    "<head>",
    "<meta charset=\"utf-8\" />",
    "<title>HTTP Server</title>",
    "</head>",
    "<body>",
    "<h1>Hello from my HTTP server</h1>",
    "</body>",
    "</html>",
);

/// Handles a single client connection: one request in, one response out,
/// then close.
///
/// The parser (and its receive ring) lives for exactly this connection; the
/// file cache is shared across all connections on the executor and borrowed
/// only for the synchronous lookup.
pub struct Connection {
    stream: TcpStream,
    cache: Rc<RefCell<FileCache>>,
}

impl Connection {
    pub fn new(stream: TcpStream, cache: Rc<RefCell<FileCache>>) -> Self {
        Self { stream, cache }
    }

    /// Receives the request, dispatches it, and writes the response. The
    /// socket is closed when the connection drops, on every exit path.
    pub async fn run(self) -> anyhow::Result<()> {
        let start = Instant::now();
        let (read_half, mut write_half) = self.stream.into_split();

        let received = match RequestParser::new(read_half) {
            Ok(parser) => parser.receive().await,
            Err(e) => {
                tracing::error!(error = %e, "failed to set up the request parser");
                Err(ReceiveError::ServerError)
            }
        };

        let (request, response) = match received {
            Ok(request) => {
                let response = dispatch(&self.cache, &request);
                (Some(request), response)
            }
            Err(error) => (None, Response::error(receive_error_status(error))),
        };

        let status = response.status.as_u16();
        ResponseWriter::new(&response)
            .write_to_stream(&mut write_half)
            .await?;

        let duration_ms = start.elapsed().as_millis() as u64;
        match &request {
            Some(req) => tracing::info!(
                method = ?req.method,
                path = %req.path,
                status,
                duration_ms,
                "request completed"
            ),
            None => tracing::info!(status, duration_ms, "request rejected"),
        }

        Ok(())
    }
}

fn dispatch(cache: &Rc<RefCell<FileCache>>, request: &Request) -> Response {
    if request.path == "/" || request.path == "/index.html" {
        return ResponseBuilder::new(StatusCode::Ok)
            .header("Content-Type", "text/html")
            .body(WELCOME_DOCUMENT)
            .build();
    }

    let lookup = cache.borrow_mut().get_or_read(&request.path);
    match lookup {
        Ok(file) => ResponseBuilder::new(StatusCode::Ok)
            .header("Content-Type", file.mime_type)
            .last_modified(file.last_write)
            .body(file.contents.clone())
            .build(),
        Err(error) => {
            if let FileError::Io(e) = &error {
                tracing::error!(path = %request.path, error = %e, "file read failed");
            }
            Response::error(file_error_status(error))
        }
    }
}

fn receive_error_status(error: ReceiveError) -> StatusCode {
    match error {
        ReceiveError::ServerError => StatusCode::InternalServerError,
        ReceiveError::UnknownMethod => StatusCode::NotImplemented,
        ReceiveError::UnsupportedHttpVersion => StatusCode::HttpVersionNotSupported,
        ReceiveError::BadRequest => StatusCode::BadRequest,
        ReceiveError::PayloadTooLarge => StatusCode::PayloadTooLarge,
    }
}

fn file_error_status(error: FileError) -> StatusCode {
    match error {
        FileError::InvalidUri => StatusCode::BadRequest,
        FileError::NotFound => StatusCode::NotFound,
        FileError::Io(_) => StatusCode::InternalServerError,
    }
}
