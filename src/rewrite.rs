//! Body rewriter (component G): buffer, decompress, decode, substitute,
//! re-encode, recompress. Only runs when `requires_full_response_buffering`
//! is set and the body looks like text.

use crate::error::ProxyError;
use crate::options::ProxyOptions;
use tokio::io::{AsyncReadExt, BufReader};

/// Hard cap on buffered response length (§4.G step 1).
pub const MAX_BUFFERED_BODY: usize = 50 * 1024 * 1024;

/// Result of the rewrite pipeline: new body bytes plus the headers that must
/// be updated on the outgoing response.
pub struct RewrittenBody {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
}

/// From a `Content-Type` value, decide whether the body is plausibly text and
/// extract a declared charset if present.
pub fn plausibly_text(content_type: &str) -> Option<Option<String>> {
    let lower = content_type.to_ascii_lowercase();

    let charset = lower
        .split(';')
        .skip(1)
        .find_map(|param| param.trim().strip_prefix("charset=").map(|c| c.trim().to_string()));

    let media_type = lower.split(';').next().unwrap_or("").trim();
    if charset.is_some() || media_type.starts_with("text/") || media_type == "application/json"
        || media_type == "application/xml"
    {
        Some(charset)
    } else {
        None
    }
}

/// Run the full rewrite pipeline against a buffered response body.
pub async fn rewrite_body(
    raw: Vec<u8>,
    content_type: &str,
    content_encoding: Option<&str>,
    client_accept_encoding: Option<&str>,
    opts: &ProxyOptions,
) -> Result<RewrittenBody, ProxyError> {
    let charset_hint = plausibly_text(content_type);
    let declared_charset = match charset_hint {
        Some(c) => c,
        None => {
            // Not plausibly text — caller should not have invoked us, but be defensive.
            return Ok(RewrittenBody {
                bytes: raw,
                content_type: Some(content_type.to_string()),
                content_encoding: content_encoding.map(|s| s.to_string()),
            });
        }
    };

    let decompressed = match content_encoding {
        Some(codec) if is_known_codec(codec) => decompress(raw, codec).await?,
        Some(_unknown) => {
            // Unknown codec: skip rewriting entirely.
            return Ok(RewrittenBody {
                bytes: raw,
                content_type: Some(content_type.to_string()),
                content_encoding: content_encoding.map(|s| s.to_string()),
            });
        }
        None => raw,
    };

    let encoding = declared_charset
        .as_deref()
        .and_then(encoding_rs::Encoding::for_label)
        .unwrap_or_else(|| sniff_encoding(&decompressed));

    let (text, used_encoding, _had_errors) = encoding.decode(&decompressed);
    let mut text = text.into_owned();

    for sub in &opts.hostname_substitutions {
        text = replace_hostname_bounded(&text, &sub.from, &sub.to);
    }
    for repl in &opts.regex_replacements {
        text = repl.pattern.replace_all(&text, repl.replacement.as_str()).into_owned();
    }

    let (encoded, _, _) = used_encoding.encode(&text);
    let new_content_type = replace_charset(content_type, used_encoding.name());

    let recompress_codec = client_accept_encoding.and_then(negotiate_encoding);
    let (final_bytes, new_content_encoding) = match recompress_codec {
        Some(codec) => (compress(encoded.into_owned(), codec).await?, Some(codec.to_string())),
        None => (encoded.into_owned(), None),
    };

    metrics::counter!("proxy_body_rewrites_total").increment(1);

    Ok(RewrittenBody {
        bytes: final_bytes,
        content_type: Some(new_content_type),
        content_encoding: new_content_encoding,
    })
}

fn is_known_codec(codec: &str) -> bool {
    matches!(codec, "gzip" | "deflate" | "br")
}

/// Boundary character set from §4.G step 5: a match is only replaced when
/// bounded on both sides (or at a string edge) by a character outside
/// letters/digits/`.@-_`.
fn is_boundary_char(c: char) -> bool {
    !(c.is_ascii_alphanumeric() || matches!(c, '.' | '@' | '-' | '_'))
}

/// Replace every case-insensitive, boundary-delimited occurrence of `from`
/// with `to`. Prevents replacing inside longer hostnames, emails, or
/// mid-identifier substrings.
pub fn replace_hostname_bounded(haystack: &str, from: &str, to: &str) -> String {
    if from.is_empty() {
        return haystack.to_string();
    }

    let hay_lower = haystack.to_ascii_lowercase();
    let from_lower = from.to_ascii_lowercase();
    let chars: Vec<char> = haystack.chars().collect();
    let hay_lower_chars: Vec<char> = hay_lower.chars().collect();
    let from_len = from_lower.chars().count();

    let mut out = String::with_capacity(haystack.len());
    let mut i = 0usize;
    while i < chars.len() {
        let matches_here = hay_lower_chars[i..].iter().collect::<String>().starts_with(&from_lower);
        if matches_here {
            let before_ok = i == 0 || is_boundary_char(chars[i - 1]);
            let after_idx = i + from_len;
            let after_ok = after_idx >= chars.len() || is_boundary_char(chars[after_idx]);
            if before_ok && after_ok {
                out.push_str(to);
                i = after_idx;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

fn sniff_encoding(bytes: &[u8]) -> &'static encoding_rs::Encoding {
    let (enc, _len) = encoding_rs::Encoding::for_bom(bytes).unwrap_or((encoding_rs::UTF_8, 0));
    enc
}

fn replace_charset(content_type: &str, charset: &str) -> String {
    let base = content_type.split(';').next().unwrap_or(content_type).trim();
    format!("{}; charset={}", base, charset.to_ascii_lowercase())
}

/// Negotiate the best codec from an `Accept-Encoding` header, preferring
/// brotli, then gzip, then deflate.
pub fn negotiate_encoding(accept_encoding: &str) -> Option<&'static str> {
    let mut br_ok = false;
    let mut gzip_ok = false;
    let mut deflate_ok = false;

    for part in accept_encoding.split(',') {
        let part = part.trim();
        let mut tokens = part.splitn(2, ';');
        let encoding = tokens.next().unwrap_or("").trim().to_ascii_lowercase();
        let q: f32 = tokens
            .next()
            .and_then(|params| {
                params.split(';').find_map(|p| {
                    p.trim().strip_prefix("q=").and_then(|v| v.trim().parse::<f32>().ok())
                })
            })
            .unwrap_or(1.0);

        if q <= 0.0 {
            continue;
        }

        match encoding.as_str() {
            "br" => br_ok = true,
            "gzip" => gzip_ok = true,
            "deflate" => deflate_ok = true,
            "*" => {
                br_ok = true;
                gzip_ok = true;
                deflate_ok = true;
            }
            _ => {}
        }
    }

    if br_ok {
        Some("br")
    } else if gzip_ok {
        Some("gzip")
    } else if deflate_ok {
        Some("deflate")
    } else {
        None
    }
}

async fn decompress(bytes: Vec<u8>, codec: &str) -> Result<Vec<u8>, ProxyError> {
    let reader = BufReader::new(std::io::Cursor::new(bytes));
    let mut out = Vec::new();
    match codec {
        "gzip" => {
            async_compression::tokio::bufread::GzipDecoder::new(reader)
                .read_to_end(&mut out)
                .await?;
        }
        "deflate" => {
            async_compression::tokio::bufread::ZlibDecoder::new(reader)
                .read_to_end(&mut out)
                .await?;
        }
        "br" => {
            async_compression::tokio::bufread::BrotliDecoder::new(reader)
                .read_to_end(&mut out)
                .await?;
        }
        other => {
            return Err(ProxyError::UpstreamProtocolError(format!(
                "unknown content-encoding: {}",
                other
            )))
        }
    }
    Ok(out)
}

async fn compress(bytes: Vec<u8>, codec: &str) -> Result<Vec<u8>, ProxyError> {
    let reader = BufReader::new(std::io::Cursor::new(bytes));
    let mut out = Vec::new();
    match codec {
        "gzip" => {
            async_compression::tokio::bufread::GzipEncoder::new(reader)
                .read_to_end(&mut out)
                .await?;
        }
        "deflate" => {
            async_compression::tokio::bufread::ZlibEncoder::new(reader)
                .read_to_end(&mut out)
                .await?;
        }
        "br" => {
            async_compression::tokio::bufread::BrotliEncoder::with_quality(
                reader,
                async_compression::Level::Fastest,
            )
            .read_to_end(&mut out)
            .await?;
        }
        other => {
            return Err(ProxyError::UpstreamProtocolError(format!(
                "unknown recompression codec: {}",
                other
            )))
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_boundary_excludes_subdomain() {
        let result = replace_hostname_bounded("see http://foo.com/ and sub.foo.com", "foo.com", "bar.com");
        assert_eq!(result, "see http://bar.com/ and sub.foo.com");
    }

    #[test]
    fn hostname_replaces_at_string_edges() {
        let result = replace_hostname_bounded("foo.com", "foo.com", "bar.com");
        assert_eq!(result, "bar.com");
    }

    #[test]
    fn hostname_case_insensitive() {
        let result = replace_hostname_bounded("visit FOO.COM today", "foo.com", "bar.com");
        assert_eq!(result, "visit bar.com today");
    }

    #[test]
    fn plausibly_text_extracts_charset() {
        assert_eq!(
            plausibly_text("text/html; charset=iso-8859-1"),
            Some(Some("iso-8859-1".to_string()))
        );
        assert_eq!(plausibly_text("application/json"), Some(None));
        assert_eq!(plausibly_text("image/png"), None);
    }

    #[test]
    fn negotiate_prefers_brotli() {
        assert_eq!(negotiate_encoding("gzip;q=1, br;q=0.5"), Some("br"));
        assert_eq!(negotiate_encoding("br;q=0"), None);
    }

    #[tokio::test]
    async fn gzip_round_trip() {
        let original = b"hello world hello world".to_vec();
        let compressed = compress(original.clone(), "gzip").await.unwrap();
        let decompressed = decompress(compressed, "gzip").await.unwrap();
        assert_eq!(decompressed, original);
    }
}
