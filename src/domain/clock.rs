use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, Utc};

/// Produces `Moment`s in campus-local time.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    offset: FixedOffset,
}

impl Clock {
    pub fn new(utc_offset_minutes: i32) -> Self {
        let offset = FixedOffset::east_opt(utc_offset_minutes * 60).unwrap_or(Utc.fix());
        Self { offset }
    }

    pub fn now(&self) -> Moment {
        self.at(Utc::now())
    }

    pub fn at(&self, utc: DateTime<Utc>) -> Moment {
        Moment {
            utc,
            local: utc.with_timezone(&self.offset).naive_local(),
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new(480)
    }
}

/// A point in time as seen from the counter: the UTC instant plus the
/// campus wall clock. Every state transition receives one explicitly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Moment {
    pub utc: DateTime<Utc>,
    pub local: NaiveDateTime,
}

impl Moment {
    pub fn today(&self) -> NaiveDate {
        self.local.date()
    }

    pub fn time_of_day(&self) -> NaiveTime {
        self.local.time()
    }
}
