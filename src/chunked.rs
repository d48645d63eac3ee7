//! A single chunked-transfer-encoding reader used for decoding the
//! *upstream* response body. Unifies what used to be two parallel chunked
//! reading paths into one: every chunked response is read through this type.

use crate::error::ProxyError;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

pub struct ChunkedReader<R> {
    inner: R,
    finished: bool,
}

impl<R: AsyncBufRead + Unpin> ChunkedReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            finished: false,
        }
    }

    /// Read the next decoded chunk body. Returns `None` once the terminating
    /// zero-length chunk and trailer section have been consumed.
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, ProxyError> {
        if self.finished {
            return Ok(None);
        }

        let mut size_line = String::new();
        let n = self.inner.read_line(&mut size_line).await?;
        if n == 0 {
            return Err(ProxyError::UpstreamProtocolError(
                "connection closed mid-chunk".into(),
            ));
        }

        let size_str = size_line.trim().split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_str, 16).map_err(|_| {
            ProxyError::UpstreamProtocolError(format!("bad chunk size: {:?}", size_line))
        })?;

        if size == 0 {
            // Drain trailer headers up to the blank line.
            loop {
                let mut trailer_line = String::new();
                let n = self.inner.read_line(&mut trailer_line).await?;
                if n == 0 || trailer_line.trim_end_matches(['\r', '\n']).is_empty() {
                    break;
                }
            }
            self.finished = true;
            return Ok(None);
        }

        let mut buf = vec![0u8; size];
        self.inner.read_exact(&mut buf).await?;

        // Consume the trailing CRLF after the chunk body.
        let mut crlf = [0u8; 2];
        self.inner.read_exact(&mut crlf).await?;

        Ok(Some(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn decodes_chunks_and_terminates() {
        let raw = b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
        let reader = BufReader::new(Cursor::new(&raw[..]));
        let mut chunked = ChunkedReader::new(reader);

        let mut collected = Vec::new();
        while let Some(chunk) = chunked.next_chunk().await.unwrap() {
            collected.extend_from_slice(&chunk);
        }
        assert_eq!(collected, b"Wikipedia");
    }

    #[tokio::test]
    async fn trailer_headers_are_drained() {
        let raw = b"3\r\nfoo\r\n0\r\nX-Trailer: x\r\n\r\n";
        let reader = BufReader::new(Cursor::new(&raw[..]));
        let mut chunked = ChunkedReader::new(reader);

        assert_eq!(chunked.next_chunk().await.unwrap(), Some(b"foo".to_vec()));
        assert_eq!(chunked.next_chunk().await.unwrap(), None);
    }
}
