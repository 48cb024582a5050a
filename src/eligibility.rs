use chrono::{Datelike, Local, NaiveDate, Weekday};

/// Source of "today" in the server's local calendar.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Wall clock in local time.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Pinned date, for tests and replays.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

/// Today counts as future.
pub fn is_future_date(date: NaiveDate, today: NaiveDate) -> bool {
    date >= today
}

pub fn is_weekday(date: NaiveDate, work_days: &[Weekday]) -> bool {
    work_days.contains(&date.weekday())
}

/// Both checks; a failing date resolves to an empty slot list upstream.
pub fn is_bookable(date: NaiveDate, today: NaiveDate, work_days: &[Weekday]) -> bool {
    is_future_date(date, today) && is_weekday(date, work_days)
}
