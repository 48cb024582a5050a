use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds.
pub type Ms = i64;

/// One bookable time of day. Computed per resolution, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    /// Canonical `HH:MM`, 24-hour.
    pub time: String,
    pub label: String,
    pub available: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
    Assigned,
}

impl BookingStatus {
    /// Only pending and confirmed visits occupy a slot.
    pub fn is_active(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
            BookingStatus::Assigned => "assigned",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            "completed" => Ok(BookingStatus::Completed),
            "assigned" => Ok(BookingStatus::Assigned),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

/// Natural key of a visit: `(property, date, time)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub property_id: String,
    pub visit_date: NaiveDate,
    pub visit_time: String,
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} {}", self.property_id, self.visit_date, self.visit_time)
    }
}

/// Raw booking payload as submitted by a visitor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VisitRequest {
    pub property_id: String,
    pub visit_date: String,
    pub visit_time: String,
    pub visitor_name: String,
    pub visitor_email: String,
    pub visitor_phone: String,
    pub message: Option<String>,
}

/// A validated booking ready for the writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub property_id: String,
    pub visit_date: NaiveDate,
    pub visit_time: String,
    pub visitor_name: String,
    pub visitor_email: String,
    pub visitor_phone: String,
    pub message: Option<String>,
}

impl NewBooking {
    pub fn slot_key(&self) -> SlotKey {
        SlotKey {
            property_id: self.property_id.clone(),
            visit_date: self.visit_date,
            visit_time: self.visit_time.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRecord {
    pub id: Ulid,
    pub property_id: String,
    pub visit_date: NaiveDate,
    pub visit_time: String,
    pub visitor_name: String,
    pub visitor_email: String,
    pub visitor_phone: String,
    pub message: Option<String>,
    pub status: BookingStatus,
    pub created_at: Ms,
}

impl BookingRecord {
    pub fn from_new(id: Ulid, booking: NewBooking, created_at: Ms) -> Self {
        Self {
            id,
            property_id: booking.property_id,
            visit_date: booking.visit_date,
            visit_time: booking.visit_time,
            visitor_name: booking.visitor_name,
            visitor_email: booking.visitor_email,
            visitor_phone: booking.visitor_phone,
            message: booking.message,
            status: BookingStatus::Pending,
            created_at,
        }
    }

    pub fn slot_key(&self) -> SlotKey {
        SlotKey {
            property_id: self.property_id.clone(),
            visit_date: self.visit_date,
            visit_time: self.visit_time.clone(),
        }
    }

    pub fn occupies(&self, date: NaiveDate, time: &str) -> bool {
        self.status.is_active() && self.visit_date == date && self.visit_time == time
    }
}

/// The WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    VisitBooked {
        record: BookingRecord,
    },
    VisitStatusChanged {
        id: Ulid,
        property_id: String,
        status: BookingStatus,
    },
}

impl Event {
    pub fn property_id(&self) -> &str {
        match self {
            Event::VisitBooked { record } => &record.property_id,
            Event::VisitStatusChanged { property_id, .. } => property_id,
        }
    }
}
