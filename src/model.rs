use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// A scheduled, capacity-limited slot that participants book into.
///
/// `bookings` keeps insertion order; `waitlist` is FIFO with the head at
/// index 0. Invariant after any successful mutation:
/// `bookings.len() <= capacity as usize`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: Ulid,
    /// Optional classification tag (free text), display/grouping only.
    pub session_type: Option<String>,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration_min: u32,
    pub capacity: u32,
    pub bookings: Vec<Booking>,
    pub waitlist: Vec<WaitlistEntry>,
    pub created_at: NaiveDateTime,
}

impl Session {
    /// Start instant: calendar date + local time-of-day combined.
    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.time)
    }

    pub fn spots_left(&self) -> usize {
        (self.capacity as usize).saturating_sub(self.bookings.len())
    }

    pub fn is_full(&self) -> bool {
        self.bookings.len() >= self.capacity as usize
    }
}

/// One reserved seat, held by a named participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub first_name: String,
    pub last_name: String,
    /// Empty when the participant left none.
    pub notes: String,
    /// Guest bookings only; stored lowercased.
    pub email: Option<String>,
    /// Guest bookings only; sole credential for self-service cancellation.
    pub cancellation_token: Option<String>,
    pub is_guest: bool,
    pub booked_at: NaiveDateTime,
}

impl Booking {
    /// Case-insensitive exact match on (first, last), the lookup key for
    /// name-based cancellation.
    pub fn matches_name(&self, first_name: &str, last_name: &str) -> bool {
        self.first_name.to_lowercase() == first_name.to_lowercase()
            && self.last_name.to_lowercase() == last_name.to_lowercase()
    }
}

/// FIFO waitlist entry; at most one per email per session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub added_at: NaiveDateTime,
}

/// Participant identity for a booking request; shared by the single and
/// batch booking paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub first_name: String,
    pub last_name: String,
    pub notes: String,
}

/// Shallow-merge patch for `update_session`. Only `Some` fields are
/// applied; `session_type` is double-wrapped so it can be set to NULL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionPatch {
    pub session_type: Option<Option<String>>,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
    pub duration_min: Option<u32>,
    pub capacity: Option<u32>,
}

impl SessionPatch {
    pub fn is_empty(&self) -> bool {
        self.session_type.is_none()
            && self.date.is_none()
            && self.time.is_none()
            && self.duration_min.is_none()
            && self.capacity.is_none()
    }

    /// Apply the provided fields onto an existing session. No uniqueness
    /// or capacity re-validation happens here — callers must not use
    /// this to bypass the booking gate.
    pub fn apply_to(&self, session: &mut Session) {
        if let Some(ref st) = self.session_type {
            session.session_type = st.clone();
        }
        if let Some(date) = self.date {
            session.date = date;
        }
        if let Some(time) = self.time {
            session.time = time;
        }
        if let Some(duration) = self.duration_min {
            session.duration_min = duration;
        }
        if let Some(capacity) = self.capacity {
            session.capacity = capacity;
        }
    }
}

/// What both cancellation paths hand to the notification collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancellationOutcome {
    pub session: Session,
    pub cancelled: Booking,
    /// Cancellation landed within one week of the session start — the
    /// host should be alerted.
    pub needs_notification: bool,
    /// Head of the waitlist at cancellation time, if any. The engine
    /// does not auto-promote; offering the freed spot is the caller's
    /// explicit step.
    pub next_on_waitlist: Option<WaitlistEntry>,
}

/// Change notifications published after every successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    SessionCreated { id: Ulid },
    SessionUpdated { id: Ulid },
    SessionDeleted { id: Ulid },
    SessionPurged { id: Ulid },
    /// `position` is the 0-based index the booking landed at.
    BookingAdded { session_id: Ulid, position: usize },
    BookingRemoved { session_id: Ulid, position: usize },
    BookingCancelled { session_id: Ulid, needs_notification: bool },
    /// `position` is 1-based, as reported back to the joiner.
    WaitlistJoined { session_id: Ulid, position: usize },
    WaitlistRemoved { session_id: Ulid },
}

impl Event {
    /// Session the event concerns, for channel routing.
    pub fn session_id(&self) -> Ulid {
        match self {
            Event::SessionCreated { id }
            | Event::SessionUpdated { id }
            | Event::SessionDeleted { id }
            | Event::SessionPurged { id } => *id,
            Event::BookingAdded { session_id, .. }
            | Event::BookingRemoved { session_id, .. }
            | Event::BookingCancelled { session_id, .. }
            | Event::WaitlistJoined { session_id, .. }
            | Event::WaitlistRemoved { session_id } => *session_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn t(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M").unwrap()
    }

    fn session(capacity: u32) -> Session {
        Session {
            id: Ulid::new(),
            session_type: Some("rookie".into()),
            date: d("2026-09-01"),
            time: t("18:30"),
            duration_min: 60,
            capacity,
            bookings: Vec::new(),
            waitlist: Vec::new(),
            created_at: d("2026-08-01").and_time(t("12:00")),
        }
    }

    fn booking(first: &str, last: &str) -> Booking {
        Booking {
            first_name: first.into(),
            last_name: last.into(),
            notes: String::new(),
            email: None,
            cancellation_token: None,
            is_guest: false,
            booked_at: d("2026-08-01").and_time(t("12:00")),
        }
    }

    #[test]
    fn starts_at_combines_date_and_time() {
        let s = session(4);
        assert_eq!(s.starts_at(), d("2026-09-01").and_time(t("18:30")));
    }

    #[test]
    fn spots_left_and_full() {
        let mut s = session(2);
        assert_eq!(s.spots_left(), 2);
        assert!(!s.is_full());
        s.bookings.push(booking("Alice", "Ash"));
        s.bookings.push(booking("Bob", "Birch"));
        assert_eq!(s.spots_left(), 0);
        assert!(s.is_full());
    }

    #[test]
    fn spots_left_saturates_when_over_capacity() {
        // update_session may shrink capacity below the booking count
        let mut s = session(1);
        s.bookings.push(booking("Alice", "Ash"));
        s.bookings.push(booking("Bob", "Birch"));
        assert_eq!(s.spots_left(), 0);
    }

    #[test]
    fn name_match_is_case_insensitive() {
        let b = booking("Alice", "Ash");
        assert!(b.matches_name("alice", "ASH"));
        assert!(b.matches_name("Alice", "Ash"));
        assert!(!b.matches_name("Alice", "Birch"));
    }

    #[test]
    fn patch_applies_only_provided_fields() {
        let mut s = session(4);
        let patch = SessionPatch {
            capacity: Some(8),
            session_type: Some(None),
            ..Default::default()
        };
        patch.apply_to(&mut s);
        assert_eq!(s.capacity, 8);
        assert_eq!(s.session_type, None);
        assert_eq!(s.duration_min, 60); // untouched
    }

    #[test]
    fn empty_patch_is_empty() {
        assert!(SessionPatch::default().is_empty());
        let p = SessionPatch {
            duration_min: Some(90),
            ..Default::default()
        };
        assert!(!p.is_empty());
    }

    #[test]
    fn session_serialization_roundtrip() {
        let mut s = session(3);
        s.bookings.push(Booking {
            email: Some("guest@example.com".into()),
            cancellation_token: Some("cancel_01arz3ndektsv4rrffq69g5fav".into()),
            is_guest: true,
            ..booking("Carol", "Cedar")
        });
        s.waitlist.push(WaitlistEntry {
            email: "dan@example.com".into(),
            first_name: "Dan".into(),
            last_name: "Drift".into(),
            added_at: s.created_at,
        });
        let bytes = bincode::serialize(&s).unwrap();
        let decoded: Session = bincode::deserialize(&bytes).unwrap();
        assert_eq!(s, decoded);
    }

    #[test]
    fn event_routes_to_session() {
        let id = Ulid::new();
        assert_eq!(Event::SessionCreated { id }.session_id(), id);
        assert_eq!(
            Event::BookingAdded {
                session_id: id,
                position: 0
            }
            .session_id(),
            id
        );
    }
}
