use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::model::BookingRecord;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification dispatch failed: {0}")]
    Dispatch(String),
}

/// What operators hear about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BookingNotice {
    Created { booking: BookingRecord },
    StatusChanged { booking: BookingRecord },
}

/// Outbound side of a new booking (email, chat, admin dashboards).
/// Called off the request path; failures are logged and never undo the booking.
#[async_trait]
pub trait BookingNotifier: Send + Sync {
    async fn booking_created(&self, booking: &BookingRecord) -> Result<(), NotifyError>;

    async fn status_changed(&self, _booking: &BookingRecord) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// In-process broadcast feed for operator consumers.
pub struct NotifyHub {
    sender: broadcast::Sender<BookingNotice>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            sender: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BookingNotice> {
        self.sender.subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, notice: BookingNotice) {
        let _ = self.sender.send(notice);
    }
}

#[async_trait]
impl BookingNotifier for NotifyHub {
    async fn booking_created(&self, booking: &BookingRecord) -> Result<(), NotifyError> {
        self.send(BookingNotice::Created {
            booking: booking.clone(),
        });
        Ok(())
    }

    async fn status_changed(&self, booking: &BookingRecord) -> Result<(), NotifyError> {
        self.send(BookingNotice::StatusChanged {
            booking: booking.clone(),
        });
        Ok(())
    }
}
