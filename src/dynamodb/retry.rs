use std::future::Future;

use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use crate::dynamodb::{BatchRequest, Error, Item};

/// Backoff settings for partial-failure batch submissions.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    /// Giving up happens once the computed (pre-jitter) delay exceeds this.
    pub max_delay: Duration,
    pub time_multiplier: f64,
    pub use_jitter: bool,
    /// Skip sleeping between attempts. Budgets are still enforced.
    pub disable_delay: bool,
    /// Source of uniform randomness in `[0, 1)` for jitter.
    pub random: fn() -> f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(3500),
            time_multiplier: 2.0,
            use_jitter: false,
            disable_delay: false,
            random: rand::random::<f64>,
        }
    }
}

impl RetryConfig {
    /// Delay before the attempt that follows `attempt`: `initial * multiplier^attempt`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.time_multiplier.powi(attempt as i32);
        Duration::from_nanos((self.initial_delay.as_nanos() as f64 * factor).round() as u64)
    }

    /// The time actually waited for a computed delay.
    pub fn wait_for(&self, delay: Duration) -> Duration {
        if !self.use_jitter {
            return delay;
        }
        let millis = ((self.random)() * delay.as_millis() as f64).round();
        Duration::from_millis(millis as u64)
    }
}

/// Why a batch run stopped without finishing.
#[derive(Debug)]
pub enum RetryError<R> {
    /// The retry budget ran out; `remaining` was never processed.
    Exhausted { attempts: u32, remaining: Vec<R> },
    /// A submission failed with an error outside the retryable set.
    Submit(Error),
}

impl From<RetryError<BatchRequest>> for Error {
    fn from(err: RetryError<BatchRequest>) -> Self {
        match err {
            RetryError::Exhausted {
                attempts,
                remaining,
            } => Error::BatchExhausted {
                attempts,
                remaining,
            },
            RetryError::Submit(err) => err,
        }
    }
}

/// Batch reads retry bare keys; exhausted keys are reported as reads.
impl From<RetryError<Item>> for Error {
    fn from(err: RetryError<Item>) -> Self {
        match err {
            RetryError::Exhausted {
                attempts,
                remaining,
            } => Error::BatchExhausted {
                attempts,
                remaining: remaining.into_iter().map(BatchRequest::Get).collect(),
            },
            RetryError::Submit(err) => err,
        }
    }
}

/// Submits `requests` until the store reports nothing unprocessed.
///
/// `submit` receives the full pending list each time and returns whatever the
/// store left unprocessed. A retryable error resubmits the whole pending list;
/// any other error is returned at once. Chunking is up to the caller.
pub async fn run<R, F, Fut>(
    mut submit: F,
    requests: Vec<R>,
    config: &RetryConfig,
) -> Result<(), RetryError<R>>
where
    R: Clone,
    F: FnMut(Vec<R>) -> Fut,
    Fut: Future<Output = Result<Vec<R>, Error>>,
{
    let mut pending = requests;
    let mut attempt: u32 = 1;

    loop {
        match submit(pending.clone()).await {
            Ok(unprocessed) if unprocessed.is_empty() => return Ok(()),
            Ok(unprocessed) => {
                info!(
                    "{} of {} request(s) unprocessed after attempt {attempt}",
                    unprocessed.len(),
                    pending.len()
                );
                pending = unprocessed;
            }
            Err(e) if e.is_retryable() => {
                warn!("Batch submission throttled on attempt {attempt}: {e}");
            }
            Err(e) => return Err(RetryError::Submit(e)),
        }

        let delay = config.delay_after(attempt);
        if attempt > config.max_retries || delay > config.max_delay {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                remaining: pending,
            });
        }

        if !config.disable_delay {
            let wait = config.wait_for(delay);
            info!(
                "Retrying in {:?} (attempt {}/{})",
                wait,
                attempt + 1,
                config.max_retries + 1
            );
            sleep(wait).await;
        }
        attempt += 1;
    }
}
