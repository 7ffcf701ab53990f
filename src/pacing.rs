// src/pacing.rs
use std::time::Duration;

/// Fixed spacing between consecutive outbound calls of one stage.
/// The first `wait` returns immediately; every later one sleeps `delay`.
#[derive(Debug, Clone)]
pub struct Pacer {
    delay: Duration,
    started: bool,
}

impl Pacer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            started: false,
        }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    pub async fn wait(&mut self) {
        if self.started && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.started = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_call_is_free_then_spaced() {
        let mut p = Pacer::from_millis(1_000);
        let t0 = tokio::time::Instant::now();
        p.wait().await;
        assert_eq!(t0.elapsed(), Duration::ZERO);
        p.wait().await;
        p.wait().await;
        assert!(t0.elapsed() >= Duration::from_millis(2_000));
    }
}
