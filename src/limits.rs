//! Hard caps on inputs and collection sizes. Exceeding any of these is a
//! `LimitExceeded` engine error, not a fault.

pub const MAX_VENUES: usize = 64;
pub const MAX_VENUE_NAME_LEN: usize = 256;

pub const MAX_SESSIONS_PER_VENUE: usize = 10_000;
pub const MAX_SESSION_TYPE_LEN: usize = 60;
pub const MAX_CAPACITY: u32 = 500;
/// Longest bookable slot: one full day.
pub const MAX_DURATION_MIN: u32 = 24 * 60;

pub const MAX_NAME_LEN: usize = 120;
pub const MAX_NOTES_LEN: usize = 1_000;
pub const MAX_EMAIL_LEN: usize = 254;

/// Largest multi-seat booking accepted in one statement.
pub const MAX_BATCH_SIZE: usize = 32;
pub const MAX_WAITLIST_PER_SESSION: usize = 200;
