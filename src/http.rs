//! HTTP retry policy shared by the embedding and completion clients.
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;

/// Send the request produced by `build`, retrying transient failures.
///
/// `build` is called once per attempt because a sent `RequestBuilder` is
/// consumed. Returns the first successful response, or a description of the
/// last failure.
pub async fn send_with_retry<F>(
    label: &str,
    max_retries: u32,
    build: F,
) -> Result<reqwest::Response, String>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1u64 << (attempt - 1).min(5));
            tracing::warn!(
                endpoint = label,
                attempt,
                delay_secs = delay.as_secs(),
                "retrying request"
            );
            tokio::time::sleep(delay).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response);
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(format!("{} API error {}: {}", label, status, body_text));
                    continue;
                }
                return Err(format!("{} API error {}: {}", label, status, body_text));
            }
            Err(e) => {
                last_err = Some(format!("{} connection error: {}", label, e));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| format!("{} request failed after retries", label)))
}

/// Join a base URL and a path without doubling slashes.
pub fn endpoint(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_join() {
        assert_eq!(
            endpoint("https://api.openai.com/v1/", "/embeddings"),
            "https://api.openai.com/v1/embeddings"
        );
        assert_eq!(
            endpoint("http://localhost:11434", "api/chat"),
            "http://localhost:11434/api/chat"
        );
    }

    #[tokio::test]
    async fn test_connection_error_without_retries() {
        let client = reqwest::Client::new();
        let err = send_with_retry("test", 0, || client.get("http://127.0.0.1:9/unreachable"))
            .await
            .unwrap_err();
        assert!(err.contains("connection error"));
    }
}
