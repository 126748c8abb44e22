use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::response::Response;

const HTTP_VERSION: &str = "HTTP/1.1";

fn serialize_header(resp: &Response) -> BytesMut {
    let mut buf = BytesMut::with_capacity(256);

    let status_line = format!(
        "{} {} {}\r\n",
        HTTP_VERSION,
        resp.status.as_u16(),
        resp.status.reason_phrase()
    );
    buf.extend_from_slice(status_line.as_bytes());

    for (k, v) in &resp.headers {
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(v.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    buf.extend_from_slice(b"\r\n");

    buf
}

/// Serializes a response and writes it out, header and body chained into a
/// single write pass. The body bytes are shared with the cache entry, not
/// copied.
pub struct ResponseWriter {
    header: BytesMut,
    body: Bytes,
}

impl ResponseWriter {
    pub fn new(response: &Response) -> Self {
        Self {
            header: serialize_header(response),
            body: response.body.clone(),
        }
    }

    pub async fn write_to_stream<W>(self, stream: &mut W) -> anyhow::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut buf = self.header.freeze().chain(self.body);

        while buf.has_remaining() {
            let written = stream.write_buf(&mut buf).await?;
            if written == 0 {
                return Err(anyhow::anyhow!("connection closed while writing"));
            }
        }
        stream.flush().await?;

        Ok(())
    }
}
