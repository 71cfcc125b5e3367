mod error;
mod mutations;
mod policy;
mod queries;

pub use error::EngineError;
pub use policy::{CANCELLATION_WINDOW_HOURS, NOTIFICATION_WINDOW_HOURS};

use std::sync::Arc;

use tokio::sync::broadcast;
use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::ident::{Ident, UlidIdent};
use crate::model::{Event, Session};
use crate::notify::NotifyHub;
use crate::store::SessionStore;

/// One conceptual engine, parameterized instead of forked per deployment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Mint cancellation tokens for email-carrying bookings.
    pub allow_guest_bookings: bool,
    /// Keep free-text notes on bookings; stripped when off.
    pub allow_notes: bool,
    /// Reject session creation without a classification tag.
    pub session_type_required: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            allow_guest_bookings: true,
            allow_notes: true,
            session_type_required: false,
        }
    }
}

/// Booking-state engine. Every mutation is read-entire-collection →
/// mutate-in-memory → write-entire-collection against the injected
/// store; `write_lock` serializes mutations within this process, while
/// concurrent writers elsewhere remain last-writer-wins.
pub struct Engine {
    store: Arc<dyn SessionStore>,
    ident: Arc<dyn Ident>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    notify: Arc<NotifyHub>,
    write_lock: tokio::sync::Mutex<()>,
}

impl Engine {
    pub fn new(store: Arc<dyn SessionStore>, notify: Arc<NotifyHub>) -> Self {
        Self::with_deps(
            store,
            Arc::new(UlidIdent),
            Arc::new(SystemClock),
            EngineConfig::default(),
            notify,
        )
    }

    pub fn with_deps(
        store: Arc<dyn SessionStore>,
        ident: Arc<dyn Ident>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
        notify: Arc<NotifyHub>,
    ) -> Self {
        Self {
            store,
            ident,
            clock,
            config,
            notify,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subscribe to change notifications for one session.
    pub fn subscribe(&self, session_id: Ulid) -> broadcast::Receiver<Event> {
        self.notify.subscribe(session_id)
    }

    pub(super) fn ident(&self) -> &dyn Ident {
        self.ident.as_ref()
    }

    pub(super) fn now(&self) -> chrono::NaiveDateTime {
        self.clock.now()
    }

    pub(super) async fn load(&self) -> Result<Vec<Session>, EngineError> {
        Ok(self.store.load().await?)
    }

    /// Persist the full collection, then publish the change events.
    /// Events only go out once the store accepted the write.
    pub(super) async fn commit(
        &self,
        sessions: &[Session],
        events: &[Event],
    ) -> Result<(), EngineError> {
        let save_start = std::time::Instant::now();
        self.store.save_all(sessions).await?;
        metrics::histogram!(crate::observability::STORE_SAVE_DURATION_SECONDS)
            .record(save_start.elapsed().as_secs_f64());
        metrics::histogram!(crate::observability::STORE_SAVE_SESSIONS)
            .record(sessions.len() as f64);
        for event in events {
            self.notify.send(event);
        }
        Ok(())
    }

    pub(super) fn drop_channel(&self, session_id: &Ulid) {
        self.notify.remove(session_id);
    }
}
