//! Token-bucket rate limiting shared by every fetch of one engine instance

use crate::config::EngineSettings;
use rand::Rng;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    last_request: Option<Instant>,
}

/// Paces requests with a token bucket, a minimum spacing and optional jitter
///
/// The bucket holds `burst` tokens and refills at `rps` tokens per second.
/// The internal lock is held while sleeping, so concurrent callers are paced
/// one after another rather than woken together.
#[derive(Debug)]
pub struct RateLimiter {
    rps: Option<f64>,
    burst: u32,
    min_delay: Duration,
    jitter: Duration,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    /// Creates a limiter; `rps` of `None` or `<= 0` disables the bucket
    pub fn new(rps: Option<f64>, burst: u32, min_delay: Duration, jitter: Duration) -> Self {
        let burst = burst.max(1);
        Self {
            rps: rps.filter(|r| r.is_finite() && *r > 0.0),
            burst,
            min_delay,
            jitter,
            state: Mutex::new(BucketState {
                tokens: f64::from(burst),
                last_refill: Instant::now(),
                last_request: None,
            }),
        }
    }

    /// A limiter that never waits
    pub fn unlimited() -> Self {
        Self::new(None, 1, Duration::ZERO, Duration::ZERO)
    }

    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self::new(
            settings.rps,
            settings.burst,
            Duration::from_millis(settings.min_delay_ms),
            Duration::from_millis(settings.jitter_ms),
        )
    }

    /// Returns true when the token bucket is active
    pub fn is_throttled(&self) -> bool {
        self.rps.is_some()
    }

    /// Waits until a request may be sent and returns how long that took
    pub async fn wait(&self) -> Duration {
        let started = Instant::now();
        let mut state = self.state.lock().await;

        if let Some(rps) = self.rps {
            self.refill(&mut state, rps);
            if state.tokens < 1.0 {
                let deficit = 1.0 - state.tokens;
                sleep(Duration::from_secs_f64(deficit / rps)).await;
                self.refill(&mut state, rps);
            }
            state.tokens = (state.tokens - 1.0).max(0.0);
        }

        if !self.min_delay.is_zero() {
            if let Some(last) = state.last_request {
                let since = last.elapsed();
                if since < self.min_delay {
                    sleep(self.min_delay - since).await;
                }
            }
        }

        if !self.jitter.is_zero() {
            let max_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
            let extra = rand::thread_rng().gen_range(0..=max_ms);
            sleep(Duration::from_millis(extra)).await;
        }

        state.last_request = Some(Instant::now());
        started.elapsed()
    }

    fn refill(&self, state: &mut BucketState, rps: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * rps).min(f64::from(self.burst));
        state.last_refill = now;
    }
}
