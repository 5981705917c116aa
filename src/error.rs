//! Bounded retry with exponential backoff, shared by the ingestor and the
//! stream processor's sink writes.

use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug)]
pub struct ExponentialBackoff {
    initial_delay_ms: u64,
    max_delay_ms: u64,
    max_retries: u32,
    current_attempt: u32,
}

#[derive(Debug)]
pub struct MaxRetriesExceeded;

impl std::fmt::Display for MaxRetriesExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Maximum retry attempts exceeded")
    }
}

impl std::error::Error for MaxRetriesExceeded {}

impl ExponentialBackoff {
    pub fn new(initial_ms: u64, max_ms: u64, retries: u32) -> Self {
        Self {
            initial_delay_ms: initial_ms,
            max_delay_ms: max_ms,
            max_retries: retries,
            current_attempt: 0,
        }
    }

    /// Backoff for queue publish and sink write retries: 250ms initial,
    /// 5s cap, 5 attempts.
    pub fn for_sink_writes() -> Self {
        Self::new(250, 5_000, 5)
    }

    pub async fn sleep(&mut self) -> Result<(), MaxRetriesExceeded> {
        if self.current_attempt >= self.max_retries {
            return Err(MaxRetriesExceeded);
        }

        let delay = std::cmp::min(
            self.initial_delay_ms * 2_u64.pow(self.current_attempt),
            self.max_delay_ms,
        );

        log::warn!(
            "⏳ Retry attempt {} of {} in {}ms",
            self.current_attempt + 1,
            self.max_retries,
            delay
        );

        sleep(Duration::from_millis(delay)).await;
        self.current_attempt += 1;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }

    /// Delay that the next `sleep` call would apply, without sleeping.
    pub fn next_delay_ms(&self) -> u64 {
        std::cmp::min(
            self.initial_delay_ms * 2_u64.pow(self.current_attempt),
            self.max_delay_ms,
        )
    }
}
