use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::cache::{cache_key, CachedSlots};
use crate::grid::display_label;
use crate::model::TimeSlot;
use crate::observability;
use crate::store::StoreError;

use super::{Scheduler, SchedulerError};

/// Label the day's grid; a time is unavailable iff an active booking holds it.
pub fn mark_taken(template: &[String], taken: &HashSet<String>) -> Vec<TimeSlot> {
    template
        .iter()
        .map(|time| TimeSlot {
            time: time.clone(),
            label: display_label(time),
            available: !taken.contains(time),
        })
        .collect()
}

impl Scheduler {
    /// Slots for one property on one day.
    ///
    /// Ineligible dates return an empty list without touching the cache or
    /// the store. Everything else is served cache-aside; concurrent misses on
    /// one `(property, date)` share a single store read.
    pub async fn resolve_availability(
        &self,
        property_id: &str,
        date: NaiveDate,
    ) -> Result<CachedSlots, SchedulerError> {
        if !self.is_bookable(date) {
            metrics::counter!(observability::AVAILABILITY_REQUESTS_TOTAL, "outcome" => "ineligible")
                .increment(1);
            return Ok(Arc::new(Vec::new()));
        }

        let store = self.store.clone();
        let template = self.template.clone();
        let property = property_id.to_string();
        let result = self
            .cache
            .get_or_load(cache_key(property_id, date), async move {
                let times = store.active_times(&property, date).await?;
                let taken: HashSet<String> = times.into_iter().collect();
                Ok::<_, StoreError>(mark_taken(&template, &taken))
            })
            .await;

        match result {
            Ok(slots) => {
                metrics::counter!(
                    observability::AVAILABILITY_REQUESTS_TOTAL,
                    "outcome" => "eligible"
                )
                .increment(1);
                Ok(slots)
            }
            Err(e) => {
                metrics::counter!(observability::AVAILABILITY_REQUESTS_TOTAL, "outcome" => "error")
                    .increment(1);
                tracing::error!(property_id, %date, "availability load failed: {e}");
                Err(SchedulerError::Store((*e).clone()))
            }
        }
    }
}
