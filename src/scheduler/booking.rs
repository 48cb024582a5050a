use std::sync::Arc;
use std::time::Instant;

use ulid::Ulid;

use crate::cache::cache_key;
use crate::model::{BookingRecord, BookingStatus, NewBooking};
use crate::notify::BookingNotifier;
use crate::observability;
use crate::store::StoreError;

use super::{Scheduler, SchedulerError};

enum Notice {
    Created,
    StatusChanged,
}

impl Scheduler {
    /// Book one slot.
    ///
    /// 1. Reject dates that are not bookable and times off the grid.
    /// 2. Pre-check for an active booking at the slot. Errors here fail open.
    /// 3. Insert; the store's uniqueness constraint is the real guard.
    /// 4. Invalidate the day's cached availability.
    /// 5. Notify operators on a detached task.
    pub async fn create_booking(
        &self,
        booking: NewBooking,
    ) -> Result<BookingRecord, SchedulerError> {
        let start = Instant::now();
        let result = self.create_booking_inner(booking).await;
        let outcome = match &result {
            Ok(_) => "created",
            Err(SchedulerError::SlotTaken(_)) => "slot_taken",
            Err(SchedulerError::Validation(_)) => "invalid",
            Err(_) => "failed",
        };
        metrics::counter!(observability::BOOKINGS_TOTAL, "outcome" => outcome).increment(1);
        metrics::histogram!(observability::BOOKING_DURATION_SECONDS)
            .record(start.elapsed().as_secs_f64());
        result
    }

    async fn create_booking_inner(
        &self,
        booking: NewBooking,
    ) -> Result<BookingRecord, SchedulerError> {
        if !self.is_bookable(booking.visit_date) {
            return Err(SchedulerError::Validation(
                "Visits can only be booked on upcoming business days".into(),
            ));
        }
        if !self.is_grid_time(&booking.visit_time) {
            return Err(SchedulerError::Validation(
                "Requested time is not a valid visit slot".into(),
            ));
        }

        let key = booking.slot_key();
        match self.store.find_active(&key).await {
            Ok(Some(existing)) => {
                tracing::debug!(slot = %key, holder = %existing.id, "slot taken (precheck)");
                return Err(SchedulerError::SlotTaken(key));
            }
            Ok(None) => {}
            Err(e) => {
                metrics::counter!(observability::PRECHECK_FAILOPEN_TOTAL).increment(1);
                tracing::warn!(slot = %key, "conflict precheck failed, continuing: {e}");
            }
        }

        let record = match self.store.insert(booking).await {
            Ok(record) => record,
            Err(StoreError::UniqueViolation(key)) => {
                tracing::debug!(slot = %key, "slot taken (constraint)");
                return Err(SchedulerError::SlotTaken(key));
            }
            Err(e) => {
                tracing::error!(slot = %key, "booking insert failed: {e}");
                return Err(SchedulerError::Store(e));
            }
        };

        // A load already in flight may still cache the old view; it expires with the TTL.
        self.cache
            .invalidate(&cache_key(&record.property_id, record.visit_date))
            .await;
        tracing::info!(
            id = %record.id,
            property_id = %record.property_id,
            visit_date = %record.visit_date,
            visit_time = %record.visit_time,
            "visit booked"
        );
        self.dispatch(Notice::Created, &record);
        Ok(record)
    }

    /// Moderation transition. Re-activating onto a slot someone else now holds
    /// is `SlotTaken`.
    pub async fn update_status(
        &self,
        id: Ulid,
        status: BookingStatus,
    ) -> Result<BookingRecord, SchedulerError> {
        let before = self.store.get(id).await?;
        let record = self.store.set_status(id, status).await?;
        self.cache
            .invalidate(&cache_key(&record.property_id, record.visit_date))
            .await;
        if before.status != record.status {
            tracing::info!(
                %id,
                from = %before.status,
                to = %record.status,
                "visit status changed"
            );
            self.dispatch(Notice::StatusChanged, &record);
        }
        Ok(record)
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<BookingRecord, SchedulerError> {
        Ok(self.store.get(id).await?)
    }

    fn dispatch(&self, notice: Notice, record: &BookingRecord) {
        let notifier: Arc<dyn BookingNotifier> = self.notifier.clone();
        let record = record.clone();
        tokio::spawn(async move {
            let result = match notice {
                Notice::Created => notifier.booking_created(&record).await,
                Notice::StatusChanged => notifier.status_changed(&record).await,
            };
            if let Err(e) = result {
                metrics::counter!(observability::NOTIFY_FAILURES_TOTAL).increment(1);
                tracing::warn!(id = %record.id, "notification failed: {e}");
            }
        });
    }
}
