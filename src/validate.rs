//! Visit payload checks. The first failing field wins and its message goes
//! back to the client verbatim.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::limits::*;
use crate::model::{NewBooking, VisitRequest};

static PROPERTY_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static regex"));
static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}$").expect("static regex"));
static TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([01][0-9]|2[0-3]):[0-5][0-9]$").expect("static regex"));
static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("static regex"));
static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9+\s()\-]+$").expect("static regex"));

pub fn validate_property_id(property_id: &str) -> Result<(), String> {
    if property_id.is_empty() {
        return Err("Property is required".into());
    }
    if property_id.len() > MAX_PROPERTY_ID_LEN || !PROPERTY_ID_RE.is_match(property_id) {
        return Err("Invalid property".into());
    }
    Ok(())
}

/// `YYYY-MM-DD` that names a real calendar day.
pub fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    if !DATE_RE.is_match(raw) {
        return Err("Date must be in YYYY-MM-DD format".into());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| "Invalid date".to_string())
}

pub fn validate_time(raw: &str) -> Result<(), String> {
    if TIME_RE.is_match(raw) {
        Ok(())
    } else {
        Err("Time must be in HH:MM format".into())
    }
}

pub fn validate_visit(req: &VisitRequest) -> Result<NewBooking, String> {
    let property_id = req.property_id.trim();
    validate_property_id(property_id)?;
    let visit_date = parse_date(req.visit_date.trim())?;
    let visit_time = req.visit_time.trim();
    validate_time(visit_time)?;

    let name = req.visitor_name.trim();
    let name_len = name.chars().count();
    if name_len < MIN_VISITOR_NAME_LEN {
        return Err(format!(
            "Name must be at least {MIN_VISITOR_NAME_LEN} characters"
        ));
    }
    if name_len > MAX_VISITOR_NAME_LEN {
        return Err(format!(
            "Name must be at most {MAX_VISITOR_NAME_LEN} characters"
        ));
    }

    let email = req.visitor_email.trim();
    if email.len() > MAX_EMAIL_LEN || !EMAIL_RE.is_match(email) {
        return Err("Invalid email address".into());
    }

    let phone = req.visitor_phone.trim();
    let phone_len = phone.chars().count();
    if !(MIN_PHONE_LEN..=MAX_PHONE_LEN).contains(&phone_len) || !PHONE_RE.is_match(phone) {
        return Err("Invalid phone number".into());
    }

    let message = match req.message.as_deref().map(str::trim) {
        Some(m) if m.chars().count() > MAX_MESSAGE_LEN => {
            return Err(format!(
                "Message must be at most {MAX_MESSAGE_LEN} characters"
            ));
        }
        Some("") | None => None,
        Some(m) => Some(m.to_string()),
    };

    Ok(NewBooking {
        property_id: property_id.to_string(),
        visit_date,
        visit_time: visit_time.to_string(),
        visitor_name: name.to_string(),
        visitor_email: email.to_string(),
        visitor_phone: phone.to_string(),
        message,
    })
}
