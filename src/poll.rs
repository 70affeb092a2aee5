use std::future::Future;
use std::time::Duration;

use log::debug;

use crate::error::Result;

/// Suspension point between poll iterations. All waiting in the relay goes
/// through this, keeping the scheduling model cooperative and interval-based.
pub async fn sleep(interval: Duration) {
    tokio::time::sleep(interval).await;
}

/// Generic retry poller: invokes an async operation until it succeeds,
/// sleeping `interval` between attempts, up to `max_tries` attempts.
///
/// The last error is returned when every attempt fails.
pub struct Poller {
    interval: Duration,
    max_tries: u32,
}

impl Poller {
    pub fn new(interval: Duration, max_tries: u32) -> Self {
        Self {
            interval,
            max_tries,
        }
    }

    pub async fn poll<T, F, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut try_count = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    try_count += 1;
                    if try_count >= self.max_tries {
                        return Err(error);
                    }
                    debug!(
                        "Poll attempt {}/{} failed: {}. Retrying...",
                        try_count, self.max_tries, error
                    );
                    sleep(self.interval).await;
                }
            }
        }
    }
}
