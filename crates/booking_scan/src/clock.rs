use chrono::{FixedOffset, NaiveDateTime, Utc};

/// Source of the current site-local wall-clock time
pub trait Clock: Send + Sync {
    /// Current wall-clock time at the site
    fn now(&self) -> NaiveDateTime;
}

/// System clock viewed in the booking site's timezone
#[derive(Debug, Clone)]
pub struct SiteClock {
    offset: FixedOffset,
}

impl SiteClock {
    /// Clock for a site at `offset` from UTC
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }
}

impl Clock for SiteClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.offset).naive_local()
    }
}
