use thiserror::Error;
use ulid::Ulid;

use crate::model::SlotKey;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Input the scheduler will not accept. The message is client-safe.
    #[error("{0}")]
    Validation(String),
    #[error("slot already taken: {0}")]
    SlotTaken(SlotKey),
    #[error("booking not found: {0}")]
    NotFound(Ulid),
    /// Any other store failure. Detail is for logs only.
    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for SchedulerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UniqueViolation(key) => SchedulerError::SlotTaken(key),
            StoreError::NotFound(id) => SchedulerError::NotFound(id),
            other => SchedulerError::Store(other),
        }
    }
}
