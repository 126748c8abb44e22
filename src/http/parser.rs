//! Streaming HTTP/1.1 request parser.
//!
//! The parser is not a buffered line reader: it keeps two cursors over a
//! mirror-mapped ring buffer and pulls bytes from the connection only when
//! the token it is currently scanning runs out of data. Tokens come back as
//! string slices pointing straight into the receive buffer; the mirror
//! mapping keeps them contiguous even when they span the wrap boundary, so
//! nothing is copied until a token is stored into the [`Request`].
//!
//! A returned token slice stays valid until the next parser call, which may
//! re-normalise the cursors or receive new bytes over the pages behind it.

use std::collections::HashMap;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::http::request::{Method, Request};
use crate::ring::RingBuffer;

/// Longest single token (method, request target, header name or field) the
/// parser accepts before failing with `PayloadTooLarge`.
pub const MAX_TOKEN_LENGTH: usize = 8 * 1024;
/// Smallest usable ring: a maximal token plus one read-ahead chunk.
pub const MIN_BUFFER_LENGTH: usize = 2 * MAX_TOKEN_LENGTH;
/// How many bytes each socket read asks for.
pub const RECEIVE_CHUNK_SIZE: usize = MAX_TOKEN_LENGTH;

const HTTP_VERSION_1_1: &str = "HTTP/1.1";

/// Errors that can occur while receiving and parsing a request.
///
/// Each maps to one HTTP status: 500, 501, 505, 400 and 413 respectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveError {
    /// Transport failure or internal error
    ServerError,
    /// The method token is not one of the nine known methods
    UnknownMethod,
    /// The version token is not exactly `HTTP/1.1`
    UnsupportedHttpVersion,
    /// Malformed request line or headers, or the peer closed mid-request
    BadRequest,
    /// A single token outgrew the ring
    PayloadTooLarge,
}

fn is_whitespace(c: u8) -> bool {
    c == b' ' || c == b'\t'
}

fn is_whitespace_or_line_break(c: u8) -> bool {
    is_whitespace(c) || c == b'\r' || c == b'\n'
}

/// Cursor state over the ring plus the receive source that refills it.
///
/// Invariants: `p <= end`, `end - p <= N`, and when a token is in progress
/// `token_start <= p` with `end - token_start <= N`.
pub struct RequestParser<R> {
    source: R,
    buf: RingBuffer,
    p: usize,
    end: usize,
    token_start: Option<usize>,
}

impl<R: AsyncRead + Unpin> RequestParser<R> {
    pub fn new(source: R) -> std::io::Result<Self> {
        Ok(Self {
            source,
            buf: RingBuffer::create(MIN_BUFFER_LENGTH)?,
            p: 0,
            end: 0,
            token_start: None,
        })
    }

    /// Receives one full request: request line, then headers until the empty
    /// line. Consumes the parser; the ring is released with it.
    pub async fn receive(mut self) -> Result<Request, ReceiveError> {
        // Tolerate clients that open with a spurious blank line.
        self.maybe_read_newline().await?;

        let method_token = self.read_until_whitespace().await?;
        let Some(method) = Method::from_str(method_token) else {
            return Err(ReceiveError::UnknownMethod);
        };

        self.eat_whitespace().await?;
        let path = decode_request_target(self.read_until_whitespace().await?);

        self.eat_whitespace().await?;
        if self.read_until_whitespace().await? != HTTP_VERSION_1_1 {
            return Err(ReceiveError::UnsupportedHttpVersion);
        }

        if !self.maybe_read_newline().await? {
            return Err(ReceiveError::BadRequest);
        }

        let mut headers = HashMap::new();
        loop {
            if self.maybe_read_newline().await? {
                break;
            }

            let name = self.read_header_name().await?.to_string();
            self.eat_whitespace().await?;
            let field = self.read_header_field().await?;
            // A repeated header keeps the value sent last.
            headers.insert(name, field.to_string());
        }

        Ok(Request {
            method,
            path,
            headers,
        })
    }

    /// Guarantees `length` more bytes are readable at `p`, receiving chunks
    /// from the source as needed.
    async fn ensure_data(&mut self, length: usize) -> Result<(), ReceiveError> {
        if self.p + length <= self.end {
            return Ok(());
        }

        let mut total_received = 0usize;
        while total_received < length {
            let write_at = self.end + total_received;
            if !self.buf.is_in_range(write_at + RECEIVE_CHUNK_SIZE - 1) {
                return Err(ReceiveError::PayloadTooLarge);
            }

            let received = self
                .source
                .read(self.buf.slice_mut(write_at, RECEIVE_CHUNK_SIZE))
                .await
                .map_err(|e| match e.kind() {
                    std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::UnexpectedEof => ReceiveError::BadRequest,
                    _ => ReceiveError::ServerError,
                })?;
            if received == 0 {
                return Err(ReceiveError::BadRequest);
            }
            total_received += received;
        }

        // The bytes that just landed past `end` must not have clobbered the
        // pages of a live token. Reduced mod N, the write covers
        // (n_end, n_new_end]; the token is lost if that range crosses its
        // start. This is what bounds a token to at most N bytes.
        if let Some(token_start) = self.token_start {
            if self.end > token_start {
                let n_start = self.buf.normalized_index(token_start);
                let n_end = self.buf.normalized_index(self.end);
                let n_new_end = self.buf.normalized_index(self.end + total_received);
                let end_wrapped = n_new_end <= n_end;

                let overwritten = if n_start <= n_end {
                    end_wrapped && n_start < n_new_end
                } else {
                    end_wrapped || n_start < n_new_end
                };
                if overwritten {
                    return Err(ReceiveError::PayloadTooLarge);
                }
            }
        }

        self.end += total_received;
        if self.token_start.is_none() {
            self.normalize();
        }
        Ok(())
    }

    /// Reduces the cursors mod N. Only legal while no token is in progress:
    /// an outstanding token slice depends on the absolute offsets.
    fn normalize(&mut self) {
        let was_empty = self.p == self.end;

        self.p = self.buf.normalized_index(self.p);
        self.end = self.buf.normalized_index(self.end);

        if !was_empty && self.end == 0 {
            self.end = self.buf.len();
        }
        if self.end < self.p {
            self.end += self.buf.len();
        }
        debug_assert!(self.p <= self.end);
    }

    /// Ends the in-progress token, consumes `terminator` bytes after it, and
    /// returns the token as a slice into the ring.
    fn take_current_token(&mut self, terminator: usize) -> Result<&str, ReceiveError> {
        let Some(start) = self.token_start.take() else {
            return Ok("");
        };
        let length = self.p - start;

        self.p += terminator;
        self.normalize();

        std::str::from_utf8(self.buf.slice(start, length)).map_err(|_| ReceiveError::BadRequest)
    }

    /// Advances past spaces and tabs.
    async fn eat_whitespace(&mut self) -> Result<(), ReceiveError> {
        loop {
            self.ensure_data(1).await?;
            if !is_whitespace(self.buf[self.p]) {
                return Ok(());
            }
            self.p += 1;
        }
    }

    /// Consumes a `\r\n` pair if one is next; leaves the cursor otherwise.
    async fn maybe_read_newline(&mut self) -> Result<bool, ReceiveError> {
        self.ensure_data(2).await?;

        if self.buf[self.p] == b'\r' && self.buf[self.p + 1] == b'\n' {
            self.p += 2;
            return Ok(true);
        }
        Ok(false)
    }

    /// Reads up to (excluding) the next space, tab, CR or LF.
    async fn read_until_whitespace(&mut self) -> Result<&str, ReceiveError> {
        self.token_start = Some(self.p);

        loop {
            self.ensure_data(1).await?;
            if is_whitespace_or_line_break(self.buf[self.p]) {
                break;
            }
            self.p += 1;
        }

        self.take_current_token(0)
    }

    /// Reads up to a `\r\n` pair, consuming it but excluding it from the
    /// returned token.
    async fn read_line(&mut self) -> Result<&str, ReceiveError> {
        self.token_start = Some(self.p);

        loop {
            self.ensure_data(2).await?;
            if self.buf[self.p] == b'\r' && self.buf[self.p + 1] == b'\n' {
                break;
            }
            self.p += 1;
        }

        self.take_current_token(2)
    }

    /// Reads a header name up to the `:`, which is consumed. An empty name
    /// or whitespace before the colon is malformed.
    async fn read_header_name(&mut self) -> Result<&str, ReceiveError> {
        self.token_start = Some(self.p);

        loop {
            self.ensure_data(1).await?;
            if self.buf[self.p] == b':' {
                break;
            }
            self.p += 1;
        }

        let token = self.take_current_token(1)?;
        if token.is_empty() || token.ends_with(|c: char| matches!(c, ' ' | '\t' | '\r' | '\n')) {
            return Err(ReceiveError::BadRequest);
        }
        Ok(token)
    }

    /// Reads a header field value up to the line end, right-trimmed. An
    /// empty value is malformed.
    async fn read_header_field(&mut self) -> Result<&str, ReceiveError> {
        let line = self.read_line().await?;

        let field = line.trim_end_matches(|c| c == ' ' || c == '\t');
        if field.is_empty() {
            return Err(ReceiveError::BadRequest);
        }
        Ok(field)
    }
}

/// Extracts the path from a request target: everything from the first `/` up
/// to the query string, with `%HH` escapes decoded and `%%` kept as a
/// literal `%`. A target without a `/`, one with a malformed escape, or one
/// whose decoded bytes are not valid UTF-8 yields `"/"` rather than an
/// error.
pub fn decode_request_target(target: &str) -> String {
    let Some(slash) = target.find('/') else {
        return "/".to_string();
    };

    // Escapes are decoded into raw bytes: a multi-byte UTF-8 character
    // arrives as one escape per byte, so the path is assembled as bytes and
    // validated once at the end.
    let mut path = vec![b'/'];
    let mut rest = target[slash + 1..].chars();

    while let Some(c) = rest.next() {
        match c {
            '?' => break,
            '%' => {
                let Some(first) = rest.next() else {
                    return "/".to_string();
                };
                if first == '%' {
                    path.push(b'%');
                    continue;
                }
                let Some(second) = rest.next() else {
                    return "/".to_string();
                };
                let (Some(high), Some(low)) = (first.to_digit(16), second.to_digit(16)) else {
                    return "/".to_string();
                };

                path.push((high * 16 + low) as u8);
            }
            _ => {
                let mut utf8 = [0u8; 4];
                path.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
            }
        }
    }

    String::from_utf8(path).unwrap_or_else(|_| "/".to_string())
}
