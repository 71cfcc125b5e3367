use chrono::NaiveDateTime;

use crate::limits::*;
use crate::model::{Booking, BookingRequest, Session};

use super::{EngineConfig, EngineError};

/// Minimum lead time for a self-service cancellation.
pub const CANCELLATION_WINDOW_HOURS: i64 = 72;
/// Cancellations inside this lead time flag the host for notification.
pub const NOTIFICATION_WINDOW_HOURS: i64 = 168;

/// Signed seconds from `now` to the session's start instant. Negative
/// once the session has started.
pub(crate) fn seconds_until(session: &Session, now: NaiveDateTime) -> i64 {
    (session.starts_at() - now).num_seconds()
}

pub(crate) fn check_cancellation_window(seconds_until: i64) -> Result<(), EngineError> {
    if seconds_until < CANCELLATION_WINDOW_HOURS * 3600 {
        return Err(EngineError::PolicyViolation);
    }
    Ok(())
}

/// A cancellation within one week of the session start needs the host
/// alerted. Boundary inclusive: exactly 168h out still notifies.
pub(crate) fn needs_notification(seconds_until: i64) -> bool {
    seconds_until <= NOTIFICATION_WINDOW_HOURS * 3600
}

pub(crate) fn is_past(seconds_until: i64) -> bool {
    seconds_until < 0
}

/// Uniqueness key for session creation: (date, time, session_type).
/// `None == None`, so untyped sessions collide on the (date, time) pair.
pub(crate) fn duplicate_exists(
    sessions: &[Session],
    date: chrono::NaiveDate,
    time: chrono::NaiveTime,
    session_type: &Option<String>,
) -> bool {
    sessions
        .iter()
        .any(|s| s.date == date && s.time == time && s.session_type == *session_type)
}

/// First booking matching (first, last) case-insensitively.
pub(crate) fn find_by_name(bookings: &[Booking], first: &str, last: &str) -> Option<usize> {
    bookings.iter().position(|b| b.matches_name(first, last))
}

pub(crate) fn validate_session_fields(
    session_type: &Option<String>,
    duration_min: u32,
    capacity: u32,
    config: &EngineConfig,
) -> Result<(), EngineError> {
    if config.session_type_required && session_type.as_deref().is_none_or(|t| t.trim().is_empty()) {
        return Err(EngineError::Invalid("session type is required"));
    }
    if let Some(t) = session_type
        && t.len() > MAX_SESSION_TYPE_LEN
    {
        return Err(EngineError::LimitExceeded("session type too long"));
    }
    if capacity == 0 {
        return Err(EngineError::Invalid("capacity must be positive"));
    }
    if capacity > MAX_CAPACITY {
        return Err(EngineError::LimitExceeded("capacity too large"));
    }
    if duration_min == 0 {
        return Err(EngineError::Invalid("duration must be positive"));
    }
    if duration_min > MAX_DURATION_MIN {
        return Err(EngineError::LimitExceeded("duration too long"));
    }
    Ok(())
}

pub(crate) fn validate_participant(req: &BookingRequest) -> Result<(), EngineError> {
    if req.first_name.trim().is_empty() || req.last_name.trim().is_empty() {
        return Err(EngineError::Invalid("participant name is required"));
    }
    if req.first_name.len() > MAX_NAME_LEN || req.last_name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("participant name too long"));
    }
    if req.notes.len() > MAX_NOTES_LEN {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    Ok(())
}

pub(crate) fn validate_email(email: &str) -> Result<(), EngineError> {
    if email.trim().is_empty() {
        return Err(EngineError::Invalid("email is required"));
    }
    if email.len() > MAX_EMAIL_LEN {
        return Err(EngineError::LimitExceeded("email too long"));
    }
    Ok(())
}
