//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap outbound calls with the configured upstream deadline
//! - Report elapsed deadlines as `UpstreamTimeout`, never as a generic failure
//!
//! # Design Decisions
//! - The deadline covers the time to the destination's response head; a body
//!   buffered for rewriting shares the same budget, streamed bodies get none,
//!   and upgraded relays are bounded by their maximum lifetime
//! - Always shorter than the inbound request timeout (enforced by config
//!   validation) so a hung destination is reported as such instead of tripping
//!   the client-facing limit

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{ProxyError, Result};

/// Run `fut` with a deadline, mapping elapsed deadlines to `UpstreamTimeout`.
pub async fn with_deadline<T, F>(destination: &str, deadline: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    with_budget(destination, Instant::now(), deadline, fut).await
}

/// Run `fut` within what is left of `budget` counted from `started`, so several
/// steps of one exchange can share a single deadline.
pub async fn with_budget<T, F>(
    destination: &str,
    started: Instant,
    budget: Duration,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout_at(started + budget, fut).await {
        Ok(Err(ProxyError::UpstreamTimeout { destination, .. })) => {
            Err(ProxyError::UpstreamTimeout {
                destination,
                after: budget,
            })
        }
        Ok(result) => result,
        Err(_) => Err(ProxyError::UpstreamTimeout {
            destination: destination.to_string(),
            after: budget,
        }),
    }
}
