//! Debug dump (§6.3): when `ProxyOptions::snoop_dir` is set, the raw bytes
//! of a request and its response are written to `<dir>/<RequestId>.txt`,
//! separated by the two marker lines.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Monotonic per-process request id used to name snoop files.
pub fn next_request_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Accumulates the raw bytes observed for one request/response pair and
/// flushes them to disk on `finish`.
pub struct SnoopRecorder {
    path: PathBuf,
    request: Vec<u8>,
    response: Vec<u8>,
}

impl SnoopRecorder {
    pub fn new(dir: &Path, request_id: u64) -> Self {
        Self {
            path: dir.join(format!("{request_id}.txt")),
            request: Vec::new(),
            response: Vec::new(),
        }
    }

    pub fn record_request(&mut self, bytes: &[u8]) {
        self.request.extend_from_slice(bytes);
    }

    pub fn record_response(&mut self, bytes: &[u8]) {
        self.response.extend_from_slice(bytes);
    }

    pub fn finish(self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::File::create(&self.path)?;
        file.write_all(b"***** REQUEST *****\r\n")?;
        file.write_all(&self.request)?;
        file.write_all(b"***** RESPONSE *****\r\n")?;
        file.write_all(&self.response)?;
        Ok(())
    }
}

pub type TeeBuffer = Arc<Mutex<Vec<u8>>>;

/// Transparent `AsyncRead`/`AsyncWrite` wrapper that copies every byte that
/// passes through it into a shared buffer, used to capture the exact bytes a
/// bridge sent or received for a snoop dump without touching the framing
/// logic that reads/writes through it.
pub struct Tee<T> {
    inner: T,
    sink: Option<TeeBuffer>,
}

impl<T> Tee<T> {
    pub fn new(inner: T, sink: Option<TeeBuffer>) -> Self {
        Self { inner, sink }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for Tee<T> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let this = self.get_mut();
        let res = Pin::new(&mut this.inner).poll_read(cx, buf);
        if res.is_ready() {
            if let Some(sink) = &this.sink {
                let data = &buf.filled()[before..];
                if !data.is_empty() {
                    sink.lock().unwrap().extend_from_slice(data);
                }
            }
        }
        res
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for Tee<T> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        let res = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = res {
            if let Some(sink) = &this.sink {
                sink.lock().unwrap().extend_from_slice(&buf[..n]);
            }
        }
        res
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_writes_markers_and_sections() {
        let dir = std::env::temp_dir().join(format!("proxy-snoop-test-{}", next_request_id()));
        let id = next_request_id();
        let mut rec = SnoopRecorder::new(&dir, id);
        rec.record_request(b"GET / HTTP/1.1\r\n\r\n");
        rec.record_response(b"HTTP/1.1 200 OK\r\n\r\nok");
        rec.finish().unwrap();

        let content = std::fs::read(dir.join(format!("{id}.txt"))).unwrap();
        let content = String::from_utf8(content).unwrap();
        assert!(content.starts_with("***** REQUEST *****\r\nGET / HTTP/1.1\r\n\r\n"));
        assert!(content.contains("***** RESPONSE *****\r\nHTTP/1.1 200 OK\r\n\r\nok"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn next_request_id_is_monotonic() {
        let a = next_request_id();
        let b = next_request_id();
        assert!(b > a);
    }

    #[tokio::test]
    async fn tee_copies_written_bytes_into_sink() {
        use tokio::io::AsyncWriteExt;

        let sink: TeeBuffer = Arc::new(Mutex::new(Vec::new()));
        let mut tee = Tee::new(Vec::<u8>::new(), Some(sink.clone()));
        tee.write_all(b"hello").await.unwrap();
        assert_eq!(sink.lock().unwrap().as_slice(), b"hello");
        assert_eq!(tee.into_inner().as_slice(), b"hello");
    }
}
