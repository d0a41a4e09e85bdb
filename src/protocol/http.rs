//! HTTP client construction, headers, and SSE line streaming.

use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};

use crate::error::DuplexError;

const USER_AGENT_VALUE: &str = concat!("duplex/", env!("CARGO_PKG_VERSION"));

/// Build the HTTP client for one model endpoint.
pub fn build_client(proxy: Option<&str>) -> Result<reqwest::Client, DuplexError> {
    let mut builder = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(120))
        .pool_max_idle_per_host(10);
    if let Some(proxy) = proxy {
        let proxy = reqwest::Proxy::all(proxy)
            .map_err(|e| DuplexError::Configuration(format!("Invalid proxy URL: {e}")))?;
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|e| DuplexError::Configuration(format!("Failed to build HTTP client: {e}")))
}

/// Default headers for a Bearer-token API.
pub fn bearer_headers(api_key: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
    if let Ok(val) = HeaderValue::from_str(&format!("Bearer {api_key}")) {
        headers.insert(AUTHORIZATION, val);
    }
    headers
}

/// Map an HTTP error status to the matching error variant.
///
/// The full status line and raw body travel in one message so the host
/// can log or display them verbatim.
pub fn status_to_error(status: reqwest::StatusCode, body: &str) -> DuplexError {
    let message = format!(
        "{} {}: {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown"),
        body
    );
    match status.as_u16() {
        401 | 403 => DuplexError::Authentication(message),
        429 => DuplexError::RateLimited {
            retry_after_ms: extract_retry_after(body),
        },
        code => DuplexError::api(code, message),
    }
}

fn extract_retry_after(body: &str) -> Option<u64> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("retry_after"))
                .and_then(|r| r.as_f64())
                .map(|s| (s * 1000.0) as u64)
        })
}

/// Split a streaming response body into SSE lines.
///
/// Lines are trimmed of the trailing carriage return; blank lines are
/// forwarded so parsers can treat them as frame separators if they care.
pub fn sse_lines(resp: reqwest::Response) -> BoxStream<'static, Result<String, reqwest::Error>> {
    let byte_stream = resp.bytes_stream();
    let stream = async_stream::stream! {
        let mut buffer = String::new();
        futures::pin_mut!(byte_stream);

        while let Some(chunk_result) = byte_stream.next().await {
            let chunk = match chunk_result {
                Ok(c) => c,
                Err(e) => {
                    yield Err(e);
                    break;
                }
            };

            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(line_end) = buffer.find('\n') {
                let line = buffer[..line_end].trim_end_matches('\r').to_string();
                buffer = buffer[line_end + 1..].to_string();
                yield Ok(line);
            }
        }

        if !buffer.is_empty() {
            yield Ok(buffer.trim_end_matches('\r').to_string());
        }
    };
    Box::pin(stream)
}
