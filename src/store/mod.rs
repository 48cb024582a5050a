mod wal_store;

pub use wal_store::{PropertyState, SharedPropertyState, WalStore};

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;
use ulid::Ulid;

use crate::model::{BookingRecord, BookingStatus, Ms, NewBooking, SlotKey};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The `(property, date, time, active)` uniqueness constraint rejected the write.
    #[error("active booking already exists for {0}")]
    UniqueViolation(SlotKey),
    #[error("booking not found: {0}")]
    NotFound(Ulid),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// The booking table the scheduler reads and writes.
///
/// Implementations must make `insert` and `set_status` atomic with respect to
/// the active-slot uniqueness constraint; the scheduler's own pre-check is only
/// a fast path.
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Active (pending/confirmed) booking at the exact slot, if any.
    async fn find_active(&self, key: &SlotKey) -> StoreResult<Option<BookingRecord>>;

    /// `visit_time` of every active booking for the property on `date`.
    async fn active_times(&self, property_id: &str, date: NaiveDate) -> StoreResult<Vec<String>>;

    /// Insert as `pending`. Fails with `UniqueViolation` if the slot is already active.
    async fn insert(&self, booking: NewBooking) -> StoreResult<BookingRecord>;

    async fn get(&self, id: Ulid) -> StoreResult<BookingRecord>;

    /// Re-activating a booking whose slot was taken meanwhile fails with `UniqueViolation`.
    async fn set_status(&self, id: Ulid, status: BookingStatus) -> StoreResult<BookingRecord>;
}

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}
