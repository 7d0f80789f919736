use std::time::Duration;

use labbot_core::{errors::Error, Result};
use reqwest::{RequestBuilder, Response, StatusCode};
use tracing::warn;

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_millis(500);

pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Config(format!("http client build failed: {e}")))
}

pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}

fn retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Sends the request built by `build`, retrying rate limits, server errors and
/// transport failures with exponential backoff. Non-success responses become
/// `Error::External` carrying the start of the body.
pub(crate) async fn send_with_retry<F>(what: &str, build: F) -> Result<Response>
where
    F: Fn() -> Result<RequestBuilder>,
{
    let mut attempt = 0u32;
    loop {
        let outcome = build()?.send().await;
        let retry_reason = match outcome {
            Ok(resp) if resp.status().is_success() => return Ok(resp),
            Ok(resp) if retryable(resp.status()) && attempt < MAX_RETRIES => {
                resp.status().to_string()
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(Error::External(format!(
                    "{what} failed: {status} {}",
                    body.chars().take(200).collect::<String>()
                )));
            }
            Err(e) if attempt < MAX_RETRIES && (e.is_timeout() || e.is_connect()) => e.to_string(),
            Err(e) => return Err(Error::External(format!("{what} request error: {e}"))),
        };

        let delay = BASE_BACKOFF * 2u32.pow(attempt);
        attempt += 1;
        warn!(what, attempt, reason = %retry_reason, delay_ms = delay.as_millis() as u64, "retrying");
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_without_double_slash() {
        assert_eq!(
            endpoint("https://api.groq.com/openai/v1/", "/chat/completions"),
            "https://api.groq.com/openai/v1/chat/completions"
        );
        assert_eq!(endpoint("http://x", "a"), "http://x/a");
    }

    #[test]
    fn only_throttling_and_server_errors_retry() {
        assert!(retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(retryable(StatusCode::BAD_GATEWAY));
        assert!(!retryable(StatusCode::BAD_REQUEST));
        assert!(!retryable(StatusCode::UNAUTHORIZED));
    }
}
