use reqwest::StatusCode;
use std::time::Duration;
use tracing::warn;

const MAX_DELAY: Duration = Duration::from_secs(60);

/// Run a request closure, retrying with exponential backoff starting at
/// `initial_delay` and capped at one minute.
///
/// Network errors, 429 (honouring `Retry-After`) and 5xx are retried up to
/// `max_retries` times. Any other status comes back as-is, as does the last
/// error response once retries run out.
pub async fn request_with_backoff<F, Fut>(
    mut task: F,
    max_retries: u32,
    initial_delay: Duration,
) -> Result<reqwest::Response, String>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let mut attempt = 0;
    let mut delay = initial_delay;

    loop {
        attempt += 1;
        match task().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response);
                }

                // Out of retries: hand the error response back for the caller to parse
                if attempt > max_retries {
                    return Ok(response);
                }

                if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                    let retry_delay = response
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok())
                        .map(Duration::from_secs)
                        .unwrap_or(delay);

                    warn!(
                        target: "http",
                        %status,
                        ?retry_delay,
                        attempt,
                        max_retries,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(retry_delay).await;
                    delay = std::cmp::min(delay * 2, MAX_DELAY);
                    continue;
                }

                // Other client errors (400, 401, 404) are likely permanent
                return Ok(response);
            }
            Err(e) => {
                if attempt > max_retries {
                    return Err(format!(
                        "Network request failed after {} attempts: {}",
                        attempt, e
                    ));
                }
                warn!(
                    target: "http",
                    error = %e,
                    ?delay,
                    attempt,
                    max_retries,
                    "Network error, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, MAX_DELAY);
            }
        }
    }
}
