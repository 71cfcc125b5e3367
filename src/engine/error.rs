use chrono::{NaiveDate, NaiveTime};

#[derive(Debug)]
pub enum EngineError {
    /// Session, booking, or waitlist entry referenced by id/index/match
    /// does not exist. Carries a short description of what was looked up.
    NotFound(String),
    /// Booking or batch would exceed the session's capacity.
    CapacityExceeded { capacity: u32, spots_left: usize },
    /// A session with this date/time(/type) already exists.
    DuplicateSession { date: NaiveDate, time: NaiveTime },
    /// Email already on this session's waitlist.
    DuplicateWaitlistEntry(String),
    /// The named person already holds a confirmed booking.
    AlreadyBooked(String),
    /// Cancellation attempted inside the 72-hour window.
    PolicyViolation,
    /// Cancellation attempted after the session's start instant.
    PastSession,
    /// Input exceeds a configured cap (see `limits`).
    LimitExceeded(&'static str),
    /// Semantically invalid input.
    Invalid(&'static str),
    /// The storage collaborator failed; surfaced unchanged.
    Store(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(what) => write!(f, "not found: {what}"),
            EngineError::CapacityExceeded { capacity, spots_left } => {
                write!(f, "capacity {capacity} exceeded: only {spots_left} spot(s) available")
            }
            EngineError::DuplicateSession { date, time } => {
                write!(f, "a session already exists at {date} {time}")
            }
            EngineError::DuplicateWaitlistEntry(email) => {
                write!(f, "{email} is already on the waitlist for this session")
            }
            EngineError::AlreadyBooked(name) => {
                write!(f, "{name} is already booked for this session")
            }
            EngineError::PolicyViolation => {
                write!(f, "cancellations must be made at least 72 hours before the session")
            }
            EngineError::PastSession => write!(f, "this session has already occurred"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Invalid(msg) => write!(f, "invalid: {msg}"),
            EngineError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Store(e.to_string())
    }
}
