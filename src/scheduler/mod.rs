mod availability;
mod booking;
mod error;

pub use availability::mark_taken;
pub use error::SchedulerError;

use std::sync::Arc;

use chrono::NaiveDate;

use crate::cache::SlotCache;
use crate::config::SlotGridConfig;
use crate::eligibility::{self, Clock, LocalClock};
use crate::notify::BookingNotifier;
use crate::store::BookingStore;

/// Read and write paths over one booking store.
///
/// Cheap to share behind an `Arc`; all mutable state lives in the store and
/// the cache.
pub struct Scheduler {
    grid: SlotGridConfig,
    /// Grid times, computed once. The config is immutable.
    template: Arc<Vec<String>>,
    store: Arc<dyn BookingStore>,
    cache: SlotCache,
    notifier: Arc<dyn BookingNotifier>,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    pub fn new(
        grid: SlotGridConfig,
        store: Arc<dyn BookingStore>,
        cache: SlotCache,
        notifier: Arc<dyn BookingNotifier>,
    ) -> Self {
        let template = Arc::new(crate::grid::generate_daily_slots(&grid));
        Self {
            grid,
            template,
            store,
            cache,
            notifier,
            clock: Arc::new(LocalClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn cache(&self) -> &SlotCache {
        &self.cache
    }

    /// Today or later, and on a configured work day.
    pub fn is_bookable(&self, date: NaiveDate) -> bool {
        eligibility::is_bookable(date, self.clock.today(), &self.grid.work_days)
    }

    pub fn is_grid_time(&self, time: &str) -> bool {
        self.template.iter().any(|t| t == time)
    }
}
