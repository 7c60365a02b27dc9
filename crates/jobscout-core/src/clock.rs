use chrono::{DateTime, Utc};

/// Source of "now" for anything that compares timestamps.
///
/// The cache uses this to decide expiry; tests swap in a manual clock.
pub trait Clock: Send + Sync + Clone + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
