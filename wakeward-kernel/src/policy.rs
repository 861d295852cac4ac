use crate::models::RestrictedHours;
use chrono::{DateTime, Local, Timelike};

/// Wall clock, injectable so the restricted-hours gate can be tested.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Whether a power-on request must be denied right now.
pub fn in_restricted_hours(clock: &dyn Clock, window: &RestrictedHours) -> bool {
    window.contains(clock.now().hour())
}
