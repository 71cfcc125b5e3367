use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::policy::{
    check_cancellation_window, duplicate_exists, find_by_name, is_past, needs_notification,
    seconds_until, validate_email, validate_participant, validate_session_fields,
};
use super::{Engine, EngineError};

impl Engine {
    /// Create a session slot. Uniqueness is on (date, time, session_type);
    /// an untyped session collides with another untyped one at the same
    /// date and time.
    pub async fn create_session(
        &self,
        session_type: Option<String>,
        date: NaiveDate,
        time: NaiveTime,
        duration_min: u32,
        capacity: u32,
    ) -> Result<Session, EngineError> {
        validate_session_fields(&session_type, duration_min, capacity, &self.config)?;

        let _guard = self.write_lock.lock().await;
        let mut sessions = self.load().await?;
        if sessions.len() >= MAX_SESSIONS_PER_VENUE {
            return Err(EngineError::LimitExceeded("too many sessions"));
        }
        if duplicate_exists(&sessions, date, time, &session_type) {
            return Err(EngineError::DuplicateSession { date, time });
        }

        let session = Session {
            id: self.ident().session_id(),
            session_type,
            date,
            time,
            duration_min,
            capacity,
            bookings: Vec::new(),
            waitlist: Vec::new(),
            created_at: self.now(),
        };
        sessions.push(session.clone());
        self.commit(&sessions, &[Event::SessionCreated { id: session.id }])
            .await?;
        Ok(session)
    }

    /// Shallow-merge `patch` into the session. No uniqueness or capacity
    /// re-validation: shrinking capacity below the booking count is
    /// allowed and only gates future bookings.
    pub async fn update_session(
        &self,
        id: Ulid,
        patch: SessionPatch,
    ) -> Result<(), EngineError> {
        let _guard = self.write_lock.lock().await;
        let mut sessions = self.load().await?;
        let session = sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| EngineError::NotFound(format!("session {id}")))?;
        patch.apply_to(session);
        self.commit(&sessions, &[Event::SessionUpdated { id }]).await
    }

    /// Remove a session unconditionally. Idempotent: an absent id is a
    /// no-op, not an error. Returns whether anything was removed.
    pub async fn delete_session(&self, id: Ulid) -> Result<bool, EngineError> {
        let _guard = self.write_lock.lock().await;
        let mut sessions = self.load().await?;
        let before = sessions.len();
        sessions.retain(|s| s.id != id);
        if sessions.len() == before {
            return Ok(false);
        }
        self.commit(&sessions, &[Event::SessionDeleted { id }]).await?;
        self.drop_channel(&id);
        Ok(true)
    }

    /// Remove every session whose start instant is strictly before `now`.
    /// Returns the purged ids. Deterministic given the clock.
    pub async fn purge_past_sessions(&self) -> Result<Vec<Ulid>, EngineError> {
        let now = self.now();
        let _guard = self.write_lock.lock().await;
        let mut sessions = self.load().await?;
        let purged: Vec<Ulid> = sessions
            .iter()
            .filter(|s| s.starts_at() < now)
            .map(|s| s.id)
            .collect();
        if purged.is_empty() {
            return Ok(purged);
        }
        sessions.retain(|s| s.starts_at() >= now);
        let events: Vec<Event> = purged.iter().map(|&id| Event::SessionPurged { id }).collect();
        self.commit(&sessions, &events).await?;
        for id in &purged {
            self.drop_channel(id);
        }
        Ok(purged)
    }

    /// Book one seat. The capacity gate is checked at call time; there is
    /// no hold or reservation concept. A guest booking (flag + email)
    /// gets the email stored lowercased and a minted cancellation token.
    /// Returns the 0-based position and the created booking.
    pub async fn add_booking(
        &self,
        session_id: Ulid,
        request: BookingRequest,
        email: Option<String>,
        is_guest: bool,
    ) -> Result<(usize, Booking), EngineError> {
        validate_participant(&request)?;
        if let Some(ref e) = email {
            validate_email(e)?;
        }

        let _guard = self.write_lock.lock().await;
        let mut sessions = self.load().await?;
        let session = sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| EngineError::NotFound(format!("session {session_id}")))?;
        if session.is_full() {
            return Err(EngineError::CapacityExceeded {
                capacity: session.capacity,
                spots_left: 0,
            });
        }

        let booking = self.make_booking(request, if is_guest { email } else { None });
        session.bookings.push(booking.clone());
        let position = session.bookings.len() - 1;
        self.commit(&sessions, &[Event::BookingAdded { session_id, position }])
            .await?;
        Ok((position, booking))
    }

    /// Book several seats at once, all-or-nothing: `spots_left` is
    /// computed once and the whole batch fails if it doesn't fit. All
    /// bookings share the submitter's email; each gets its own token.
    pub async fn add_multiple_bookings(
        &self,
        session_id: Ulid,
        requests: Vec<BookingRequest>,
        email: Option<String>,
    ) -> Result<Vec<Booking>, EngineError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        if requests.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        for request in &requests {
            validate_participant(request)?;
        }
        let shared_email = match email {
            Some(e) if !e.trim().is_empty() => {
                validate_email(&e)?;
                Some(e)
            }
            _ => None,
        };

        let _guard = self.write_lock.lock().await;
        let mut sessions = self.load().await?;
        let session = sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| EngineError::NotFound(format!("session {session_id}")))?;

        let spots_left = session.spots_left();
        if requests.len() > spots_left {
            return Err(EngineError::CapacityExceeded {
                capacity: session.capacity,
                spots_left,
            });
        }

        let first_position = session.bookings.len();
        let mut added = Vec::with_capacity(requests.len());
        for request in requests {
            let booking = self.make_booking(request, shared_email.clone());
            session.bookings.push(booking.clone());
            added.push(booking);
        }

        let events: Vec<Event> = (0..added.len())
            .map(|i| Event::BookingAdded {
                session_id,
                position: first_position + i,
            })
            .collect();
        self.commit(&sessions, &events).await?;
        Ok(added)
    }

    /// Host-side removal by positional index. No policy window applies;
    /// authorization is the caller's concern, not checked here.
    pub async fn remove_booking(
        &self,
        session_id: Ulid,
        position: usize,
    ) -> Result<Booking, EngineError> {
        let _guard = self.write_lock.lock().await;
        let mut sessions = self.load().await?;
        let session = sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| EngineError::NotFound(format!("session {session_id}")))?;
        if position >= session.bookings.len() {
            return Err(EngineError::NotFound(format!("booking at position {position}")));
        }
        let removed = session.bookings.remove(position);
        self.commit(&sessions, &[Event::BookingRemoved { session_id, position }])
            .await?;
        Ok(removed)
    }

    /// Self-service cancellation by participant name. The policy window
    /// is checked before the booking lookup, so a too-late cancellation
    /// reports `PolicyViolation` even when no such booking exists.
    pub async fn cancel_user_booking(
        &self,
        session_id: Ulid,
        first_name: &str,
        last_name: &str,
    ) -> Result<CancellationOutcome, EngineError> {
        let now = self.now();
        let _guard = self.write_lock.lock().await;
        let mut sessions = self.load().await?;
        let session = sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| EngineError::NotFound(format!("session {session_id}")))?;

        let secs = seconds_until(session, now);
        check_cancellation_window(secs)?;

        let position = find_by_name(&session.bookings, first_name, last_name).ok_or_else(|| {
            EngineError::NotFound(format!("booking for {first_name} {last_name}"))
        })?;
        let cancelled = session.bookings.remove(position);
        let outcome = CancellationOutcome {
            needs_notification: needs_notification(secs),
            next_on_waitlist: session.waitlist.first().cloned(),
            session: session.clone(),
            cancelled,
        };
        self.commit(
            &sessions,
            &[Event::BookingCancelled {
                session_id,
                needs_notification: outcome.needs_notification,
            }],
        )
        .await?;
        Ok(outcome)
    }

    /// Guest self-service cancellation by token. Unlike the name path,
    /// a session already in the past gets its own distinct error before
    /// the policy window applies.
    pub async fn cancel_booking_by_token(
        &self,
        token: &str,
    ) -> Result<CancellationOutcome, EngineError> {
        let now = self.now();
        let _guard = self.write_lock.lock().await;
        let mut sessions = self.load().await?;

        let (session_index, position) = sessions
            .iter()
            .enumerate()
            .find_map(|(si, s)| {
                s.bookings
                    .iter()
                    .position(|b| b.cancellation_token.as_deref() == Some(token))
                    .map(|bi| (si, bi))
            })
            .ok_or_else(|| EngineError::NotFound("booking for this cancellation token".into()))?;

        let session = &mut sessions[session_index];
        let secs = seconds_until(session, now);
        if is_past(secs) {
            return Err(EngineError::PastSession);
        }
        check_cancellation_window(secs)?;

        let cancelled = session.bookings.remove(position);
        let session_id = session.id;
        let outcome = CancellationOutcome {
            needs_notification: needs_notification(secs),
            next_on_waitlist: session.waitlist.first().cloned(),
            session: session.clone(),
            cancelled,
        };
        self.commit(
            &sessions,
            &[Event::BookingCancelled {
                session_id,
                needs_notification: outcome.needs_notification,
            }],
        )
        .await?;
        Ok(outcome)
    }

    /// Join the FIFO waitlist. No fullness check: whether joining makes
    /// sense for a non-full session is caller policy. Returns the
    /// 1-based position.
    pub async fn join_waitlist(
        &self,
        session_id: Ulid,
        email: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<usize, EngineError> {
        validate_email(email)?;
        validate_participant(&BookingRequest {
            first_name: first_name.into(),
            last_name: last_name.into(),
            notes: String::new(),
        })?;

        let _guard = self.write_lock.lock().await;
        let mut sessions = self.load().await?;
        let session = sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| EngineError::NotFound(format!("session {session_id}")))?;

        let email_lower = email.to_lowercase();
        if session
            .waitlist
            .iter()
            .any(|w| w.email.to_lowercase() == email_lower)
        {
            return Err(EngineError::DuplicateWaitlistEntry(email_lower));
        }
        if find_by_name(&session.bookings, first_name, last_name).is_some() {
            return Err(EngineError::AlreadyBooked(format!("{first_name} {last_name}")));
        }
        if session.waitlist.len() >= MAX_WAITLIST_PER_SESSION {
            return Err(EngineError::LimitExceeded("waitlist full"));
        }

        session.waitlist.push(WaitlistEntry {
            email: email_lower,
            first_name: first_name.into(),
            last_name: last_name.into(),
            added_at: self.now(),
        });
        let position = session.waitlist.len();
        self.commit(&sessions, &[Event::WaitlistJoined { session_id, position }])
            .await?;
        Ok(position)
    }

    /// Remove all waitlist entries matching the email (expected: at most
    /// one). Returns whether anything was removed; nothing is persisted
    /// when no entry matched.
    pub async fn remove_from_waitlist(
        &self,
        session_id: Ulid,
        email: &str,
    ) -> Result<bool, EngineError> {
        let _guard = self.write_lock.lock().await;
        let mut sessions = self.load().await?;
        let session = sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| EngineError::NotFound(format!("session {session_id}")))?;

        let email_lower = email.to_lowercase();
        let before = session.waitlist.len();
        session
            .waitlist
            .retain(|w| w.email.to_lowercase() != email_lower);
        if session.waitlist.len() == before {
            return Ok(false);
        }
        self.commit(&sessions, &[Event::WaitlistRemoved { session_id }])
            .await?;
        Ok(true)
    }

    fn make_booking(&self, request: BookingRequest, email: Option<String>) -> Booking {
        let mut booking = Booking {
            first_name: request.first_name,
            last_name: request.last_name,
            notes: if self.config.allow_notes {
                request.notes
            } else {
                String::new()
            },
            email: None,
            cancellation_token: None,
            is_guest: false,
            booked_at: self.now(),
        };
        if self.config.allow_guest_bookings
            && let Some(e) = email.filter(|e| !e.trim().is_empty())
        {
            booking.email = Some(e.to_lowercase());
            booking.cancellation_token = Some(self.ident().cancellation_token());
            booking.is_guest = true;
        }
        booking
    }
}
