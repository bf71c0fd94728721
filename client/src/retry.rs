//! Retry utility with exponential backoff, bounded by a deadline

use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Upper bound for the delay between attempts
pub const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Returned when the deadline passes before any attempt succeeds
#[derive(Debug)]
pub struct DeadlineExceeded<E> {
    pub attempts: u32,
    /// Error of the last completed attempt; `None` when the only attempt was cut short
    pub last_error: Option<E>,
}

impl<E: fmt::Display> fmt::Display for DeadlineExceeded<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deadline exceeded after {} attempts", self.attempts)?;
        if let Some(e) = &self.last_error {
            write!(f, ": {}", e)?;
        }
        Ok(())
    }
}

/// Retry an async operation with exponential backoff until `deadline`.
///
/// Every attempt is itself cut off at the deadline. Delays: `initial_delay`,
/// `2 * initial_delay`, ... capped at [`MAX_BACKOFF`] and at the time left.
pub async fn retry_until<F, Fut, T, E>(
    operation_name: &str,
    deadline: Instant,
    initial_delay: Duration,
    mut f: F,
) -> Result<T, DeadlineExceeded<E>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let mut delay = initial_delay;
    let mut attempts = 0;
    let mut last_error = None;

    loop {
        attempts += 1;
        match tokio::time::timeout_at(deadline, f()).await {
            Ok(Ok(val)) => return Ok(val),
            Ok(Err(e)) => {
                debug!("{} failed (attempt {}): {}", operation_name, attempts, e);
                last_error = Some(e);
            }
            Err(_) => {
                return Err(DeadlineExceeded {
                    attempts,
                    last_error,
                })
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(DeadlineExceeded {
                attempts,
                last_error,
            });
        }
        tokio::time::sleep(delay.min(deadline - now)).await;
        delay = (delay * 2).min(MAX_BACKOFF);
    }
}
