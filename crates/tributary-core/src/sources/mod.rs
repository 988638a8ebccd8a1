//! Concrete upstream source clients.

pub mod github;

use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::error::SourceError;

/// Issue an HTTP call with retry/backoff for rate limits and server errors.
/// Returns the response for any success status; everything that exhausts the
/// retry budget maps into the transient/permanent taxonomy.
pub(crate) async fn call_with_backoff<F>(
    source: &str,
    mut builder_fn: F,
) -> Result<reqwest::Response, SourceError>
where
    F: FnMut() -> reqwest::RequestBuilder,
{
    let mut retries = 0;
    let mut delay = Duration::from_secs(1);
    let max_retries = 8;

    loop {
        let response = builder_fn().send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        if status.as_u16() == 429 {
            if retries >= max_retries {
                return Err(SourceError::transient(format!(
                    "{source}: rate limited after {retries} retries"
                )));
            }

            let wait = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(delay);

            warn!(source, ?wait, "rate limited, backing off");
            sleep(wait).await;

            retries += 1;
            delay = std::cmp::min(delay * 2, Duration::from_secs(60));
            continue;
        }

        if status.is_server_error() {
            if retries >= 3 {
                return Err(SourceError::transient(format!(
                    "{source}: HTTP {status} after {retries} retries"
                )));
            }
            warn!(source, %status, "server error, retrying");
            sleep(delay).await;
            retries += 1;
            delay *= 2;
            continue;
        }

        return Err(SourceError::permanent(format!(
            "{source}: HTTP {status} - {}",
            response.text().await.unwrap_or_default()
        )));
    }
}
