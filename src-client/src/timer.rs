//! Single-shot recovery timer used by both backends.

use std::time::Duration;

use tokio::time::{sleep_until, Instant};

/// A one-shot timer with at most one pending deadline.
///
/// Meant to be polled from a driver task's `select!` loop via [`fired`].
///
/// [`fired`]: ReconnectTimer::fired
#[derive(Debug, Default)]
pub struct ReconnectTimer {
    deadline: Option<Instant>,
}

impl ReconnectTimer {
    pub fn new() -> Self {
        Self { deadline: None }
    }

    /// Arm the timer. Returns `false` without changing anything if a deadline
    /// is already pending.
    pub fn schedule(&mut self, delay: Duration) -> bool {
        if self.deadline.is_some() {
            return false;
        }
        self.deadline = Some(Instant::now() + delay);
        true
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolves when the pending deadline passes, disarming the timer.
    /// Never resolves while nothing is scheduled.
    pub async fn fired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                sleep_until(deadline).await;
                self.deadline = None;
            }
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_second_schedule_is_noop() {
        let mut timer = ReconnectTimer::new();
        assert!(timer.schedule(Duration::from_secs(3)));
        assert!(!timer.schedule(Duration::from_millis(10)));

        let started = Instant::now();
        timer.fired().await;
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(!timer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_disarms() {
        let mut timer = ReconnectTimer::new();
        timer.schedule(Duration::from_secs(1));
        timer.cancel();
        assert!(!timer.is_pending());

        let fired = tokio::time::timeout(Duration::from_secs(5), timer.fired()).await;
        assert!(fired.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_can_rearm_after_firing() {
        let mut timer = ReconnectTimer::new();
        timer.schedule(Duration::from_millis(100));
        timer.fired().await;
        assert!(timer.schedule(Duration::from_millis(100)));
        assert!(timer.is_pending());
    }
}
