use ulid::Ulid;

use crate::model::{Booking, Session, WaitlistEntry};

use super::{Engine, EngineError};

impl Engine {
    /// Full collection in store order (creation order for the local
    /// backend).
    pub async fn list_sessions(&self) -> Result<Vec<Session>, EngineError> {
        self.load().await
    }

    pub async fn get_session(&self, id: Ulid) -> Result<Option<Session>, EngineError> {
        Ok(self.load().await?.into_iter().find(|s| s.id == id))
    }

    /// Bookings of a session; empty when the session is absent.
    pub async fn get_bookings(&self, session_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        Ok(self
            .get_session(session_id)
            .await?
            .map(|s| s.bookings)
            .unwrap_or_default())
    }

    /// Waitlist of a session; empty when the session is absent.
    pub async fn get_waitlist(
        &self,
        session_id: Ulid,
    ) -> Result<Vec<WaitlistEntry>, EngineError> {
        Ok(self
            .get_session(session_id)
            .await?
            .map(|s| s.waitlist)
            .unwrap_or_default())
    }

    /// Read-only peek at the waitlist head — next to be offered a freed
    /// spot. `None` when empty or the session is absent.
    pub async fn next_on_waitlist(
        &self,
        session_id: Ulid,
    ) -> Result<Option<WaitlistEntry>, EngineError> {
        Ok(self
            .get_session(session_id)
            .await?
            .and_then(|s| s.waitlist.into_iter().next()))
    }
}
