use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

/// The two independently counted failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// `GET /prompt`, the scan-detection feed.
    ScanFeed,
    /// `GET /cart`, the authoritative refresh.
    CartFetch,
}

impl FailureClass {
    pub fn label(self) -> &'static str {
        match self {
            FailureClass::ScanFeed => "scan_feed",
            FailureClass::CartFetch => "cart_fetch",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Consecutive-failure counters sharing one ceiling.
///
/// A class at its ceiling stays there until that class succeeds again or
/// [`FailureTracker::reset`] is called on a new capture session.
#[derive(Debug, Clone)]
pub struct FailureTracker {
    ceiling: u32,
    scan_feed: u32,
    cart_fetch: u32,
}

impl FailureTracker {
    pub fn new(ceiling: u32) -> Self {
        Self {
            ceiling: ceiling.max(1),
            scan_feed: 0,
            cart_fetch: 0,
        }
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    pub fn count(&self, class: FailureClass) -> u32 {
        match class {
            FailureClass::ScanFeed => self.scan_feed,
            FailureClass::CartFetch => self.cart_fetch,
        }
    }

    /// Records one failure; returns `true` when this failure reached the ceiling.
    pub fn record_failure(&mut self, class: FailureClass) -> bool {
        let ceiling = self.ceiling;
        let counter = self.counter_mut(class);
        let before = *counter;
        *counter = counter.saturating_add(1).min(ceiling);
        before < ceiling && *counter == ceiling
    }

    pub fn record_success(&mut self, class: FailureClass) {
        *self.counter_mut(class) = 0;
    }

    pub fn tripped(&self, class: FailureClass) -> bool {
        self.count(class) >= self.ceiling
    }

    /// The first class at its ceiling, if any.
    pub fn tripped_class(&self) -> Option<FailureClass> {
        [FailureClass::ScanFeed, FailureClass::CartFetch]
            .into_iter()
            .find(|class| self.tripped(*class))
    }

    pub fn reset(&mut self) {
        self.scan_feed = 0;
        self.cart_fetch = 0;
    }

    fn counter_mut(&mut self, class: FailureClass) -> &mut u32 {
        match class {
            FailureClass::ScanFeed => &mut self.scan_feed,
            FailureClass::CartFetch => &mut self.cart_fetch,
        }
    }
}

/// Lets one notice through per window; used to keep an outage from turning
/// into a notification storm.
#[derive(Debug, Clone)]
pub struct NoticeLimiter {
    window: Duration,
    last: Option<Instant>,
}

impl NoticeLimiter {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    pub fn allow(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.window => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}
