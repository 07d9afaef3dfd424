use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Polling,
}

/// Fixed-period ticker that only runs while a capture session is active.
///
/// The poller does no work itself; its owner awaits [`Poller::tick`] in the
/// same loop that handles every other session event, so at most one poll is
/// ever in flight.
#[derive(Debug)]
pub struct Poller {
    period: Duration,
    interval: Option<Interval>,
}

impl Poller {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            interval: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn state(&self) -> PollerState {
        if self.interval.is_some() {
            PollerState::Polling
        } else {
            PollerState::Idle
        }
    }

    pub fn is_polling(&self) -> bool {
        self.interval.is_some()
    }

    /// Idle -> Polling. The first tick lands one full period from now.
    /// Starting an already polling poller keeps the running schedule.
    pub fn start(&mut self) {
        if self.interval.is_some() {
            return;
        }
        let mut interval = tokio::time::interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.interval = Some(interval);
        debug!(
            target = "smartcart::poller",
            period_ms = self.period.as_millis() as u64,
            "polling started"
        );
    }

    /// Polling -> Idle. The timer is dropped, so no tick follows.
    pub fn stop(&mut self) {
        if self.interval.take().is_some() {
            debug!(target = "smartcart::poller", "polling stopped");
        }
    }

    /// Resolves at the next tick; never resolves while idle.
    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: Duration = Duration::from_millis(2_000);

    async fn ticked_within(poller: &mut Poller, window: Duration) -> bool {
        tokio::time::timeout(window, poller.tick()).await.is_ok()
    }

    fn assert_elapsed(started: Instant, expected: Duration) {
        let elapsed = started.elapsed();
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_millis(2),
            "elapsed {elapsed:?}, expected {expected:?}"
        );
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn first_tick_waits_one_period() {
        let mut poller = Poller::new(PERIOD);
        poller.start();
        assert_eq!(poller.state(), PollerState::Polling);

        let started = Instant::now();
        poller.tick().await;
        assert_elapsed(started, PERIOD);
        poller.tick().await;
        assert_elapsed(started, PERIOD * 2);
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn idle_poller_never_ticks() {
        let mut poller = Poller::new(PERIOD);
        assert!(!ticked_within(&mut poller, Duration::from_secs(60)).await);
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn no_tick_after_stop() {
        let mut poller = Poller::new(PERIOD);
        poller.start();
        poller.tick().await;

        poller.stop();
        assert_eq!(poller.state(), PollerState::Idle);
        assert!(!ticked_within(&mut poller, PERIOD * 10).await);
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn start_while_polling_keeps_schedule() {
        let mut poller = Poller::new(PERIOD);
        let started = Instant::now();
        poller.start();
        tokio::time::advance(Duration::from_millis(1_500)).await;
        poller.start();
        poller.tick().await;
        assert_elapsed(started, PERIOD);
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn missed_ticks_are_skipped() {
        let mut poller = Poller::new(PERIOD);
        let started = Instant::now();
        poller.start();
        tokio::time::advance(Duration::from_millis(7_000)).await;

        // One late tick, then back on the period grid rather than a burst.
        poller.tick().await;
        assert_elapsed(started, Duration::from_millis(7_000));
        poller.tick().await;
        assert_elapsed(started, Duration::from_millis(8_000));
    }
}
