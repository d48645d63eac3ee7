//! Response-line parsing and header-section reading off a raw upstream stream.

use crate::error::ProxyError;
use http::{HeaderMap, HeaderName, HeaderValue};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use std::time::Duration;

/// Parsed `HTTP/x.y CODE TEXT` status line.
#[derive(Debug, Clone)]
pub struct ResponseLine {
    pub version: String,
    pub code: u16,
    pub text: String,
}

/// Signal distinguishing "upstream closed before sending anything" (a retry
/// opportunity on pooled bridges) from an actual protocol violation.
pub enum HeadReadOutcome {
    Head {
        line: ResponseLine,
        headers: HeaderMap,
    },
    Eof,
}

/// Parse a single status line: must start with `HTTP/`, contain at least two
/// spaces, and have an integer status code.
pub fn parse_response_line(line: &str) -> Result<ResponseLine, ProxyError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if !line.starts_with("HTTP/") {
        return Err(ProxyError::UpstreamProtocolError(format!(
            "status line does not start with HTTP/: {:?}",
            line
        )));
    }

    let mut parts = line.splitn(3, ' ');
    let version_token = parts
        .next()
        .ok_or_else(|| ProxyError::UpstreamProtocolError("empty status line".into()))?;
    let code_token = parts
        .next()
        .ok_or_else(|| ProxyError::UpstreamProtocolError("missing status code".into()))?;
    let text = parts.next().unwrap_or("").to_string();

    let version = version_token.trim_start_matches("HTTP/").to_string();
    let code: u16 = code_token
        .parse()
        .map_err(|_| ProxyError::UpstreamProtocolError(format!("bad status code: {:?}", code_token)))?;

    Ok(ResponseLine {
        version,
        code,
        text,
    })
}

/// Read the status line plus header section (terminated by a blank line) off
/// an async buffered reader, applying `network_timeout` per line read.
///
/// Returns `HeadReadOutcome::Eof` when the stream closes before any bytes are
/// read at all — this is the "stale pooled bridge" signal, distinct from a
/// malformed line partway through (a genuine protocol error).
pub async fn read_response_head<R>(
    reader: &mut R,
    network_timeout: Duration,
) -> Result<HeadReadOutcome, ProxyError>
where
    R: AsyncBufRead + Unpin,
{
    let mut first_line = String::new();
    let n = tokio::time::timeout(network_timeout, reader.read_line(&mut first_line))
        .await
        .map_err(|_| ProxyError::UpstreamProtocolError("timed out reading status line".into()))??;

    if n == 0 {
        return Ok(HeadReadOutcome::Eof);
    }

    let line = parse_response_line(&first_line)?;
    let headers = read_header_section(reader, network_timeout).await?;

    Ok(HeadReadOutcome::Head { line, headers })
}

/// Read CRLF-delimited header lines until an empty line.
async fn read_header_section<R>(
    reader: &mut R,
    network_timeout: Duration,
) -> Result<HeaderMap, ProxyError>
where
    R: AsyncBufRead + Unpin,
{
    let mut headers = HeaderMap::new();

    loop {
        let mut line = String::new();
        let n = tokio::time::timeout(network_timeout, reader.read_line(&mut line))
            .await
            .map_err(|_| ProxyError::UpstreamProtocolError("timed out reading headers".into()))??;

        if n == 0 {
            return Err(ProxyError::UpstreamProtocolError(
                "connection closed mid-headers".into(),
            ));
        }

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }

        let (name, value) = trimmed.split_once(':').ok_or_else(|| {
            ProxyError::UpstreamProtocolError(format!("malformed header line: {:?}", trimmed))
        })?;

        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|e| ProxyError::UpstreamProtocolError(e.to_string()))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|e| ProxyError::UpstreamProtocolError(e.to_string()))?;
        headers.append(name, value);
    }

    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_status_line() {
        let rl = parse_response_line("HTTP/1.1 200 OK\r\n").unwrap();
        assert_eq!(rl.version, "1.1");
        assert_eq!(rl.code, 200);
        assert_eq!(rl.text, "OK");
    }

    #[test]
    fn rejects_non_http_line() {
        assert!(parse_response_line("garbage\r\n").is_err());
    }

    #[test]
    fn joins_multi_word_reason() {
        let rl = parse_response_line("HTTP/1.1 404 Not Found\r\n").unwrap();
        assert_eq!(rl.text, "Not Found");
    }

    #[tokio::test]
    async fn reads_head_and_stops_at_blank_line() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\nX-Foo: bar\r\n\r\nabc";
        let mut reader = tokio::io::BufReader::new(Cursor::new(&raw[..]));
        let outcome = read_response_head(&mut reader, Duration::from_secs(1))
            .await
            .unwrap();
        match outcome {
            HeadReadOutcome::Head { line, headers } => {
                assert_eq!(line.code, 200);
                assert_eq!(headers.get("content-length").unwrap(), "3");
                assert_eq!(headers.get("x-foo").unwrap(), "bar");
            }
            HeadReadOutcome::Eof => panic!("expected head"),
        }
    }

    #[tokio::test]
    async fn empty_stream_is_eof() {
        let mut reader = tokio::io::BufReader::new(Cursor::new(&b""[..]));
        let outcome = read_response_head(&mut reader, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(matches!(outcome, HeadReadOutcome::Eof));
    }

    #[tokio::test]
    async fn malformed_header_line_is_protocol_error() {
        let raw = b"HTTP/1.1 200 OK\r\nnocolon\r\n\r\n";
        let mut reader = tokio::io::BufReader::new(Cursor::new(&raw[..]));
        let outcome = read_response_head(&mut reader, Duration::from_secs(1)).await;
        assert!(outcome.is_err());
    }
}
