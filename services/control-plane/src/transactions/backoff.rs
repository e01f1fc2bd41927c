use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Attempts for a write that moves a record into a terminal state
pub const TERMINAL_WRITE_ATTEMPTS: u32 = 5;

/// Delay schedule between send attempts: `min(cap, base * 2^n)` spread by
/// up to `±jitter` of itself, never above the cap.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    cap: Duration,
    jitter: f64,
    attempt: u32,
}

impl ExponentialBackoff {
    /// `jitter` is a fraction of the delay, clamped to `0.0..=1.0`
    pub fn new(base: Duration, cap: Duration, jitter: f64) -> Self {
        Self {
            base,
            cap,
            jitter: jitter.clamp(0.0, 1.0),
            attempt: 0,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let exponential = self.base.saturating_mul(2u32.saturating_pow(self.attempt));
        let capped = exponential.min(self.cap).as_secs_f64();

        let spread = capped * self.jitter;
        let offset = if spread > 0.0 {
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0.0
        };

        self.attempt = self.attempt.saturating_add(1);

        let secs = (capped + offset).clamp(0.0, self.cap.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    /// Delays handed out so far
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Schedule between terminal write attempts
pub fn terminal_write_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(2), 0.2)
}

/// Run `op` until it succeeds or `attempts` are used up, sleeping on
/// `backoff` in between. The last error is returned.
pub async fn retry_with_backoff<T, E, F, Fut>(
    mut backoff: ExponentialBackoff,
    attempts: u32,
    what: &str,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                let delay = backoff.next_delay();
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "{} failed, retrying: {}",
                    what,
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
