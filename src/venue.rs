use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::engine::{Engine, EngineConfig};
use crate::limits::*;
use crate::notify::NotifyHub;
use crate::reaper;
use crate::store::LocalStore;

/// Manages per-venue engines. Each venue gets its own engine + data
/// file + purge sweep. Venue = database name from the pgwire connection.
pub struct VenueManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    purge_interval_secs: u64,
    config: EngineConfig,
}

impl VenueManager {
    pub fn new(data_dir: PathBuf, purge_interval_secs: u64, config: EngineConfig) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            purge_interval_secs,
            config,
        }
    }

    /// Get or lazily create an engine for the given venue.
    pub fn get_or_create(&self, venue: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(venue) {
            return Ok(engine.value().clone());
        }
        if venue.len() > MAX_VENUE_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "venue name too long",
            ));
        }
        if self.engines.len() >= MAX_VENUES {
            return Err(std::io::Error::other("too many venues"));
        }

        // Sanitize venue name to prevent path traversal
        let safe_name: String = venue
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty venue name",
            ));
        }

        let store = Arc::new(LocalStore::new(
            self.data_dir.join(format!("{safe_name}.sessions")),
        ));
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::with_deps(
            store,
            Arc::new(crate::ident::UlidIdent),
            Arc::new(crate::clock::SystemClock),
            self.config.clone(),
            notify,
        ));

        // Spawn the purge sweep for this venue
        let purge_engine = engine.clone();
        let interval = self.purge_interval_secs;
        tokio::spawn(async move {
            reaper::run_purge(purge_engine, interval).await;
        });

        self.engines.insert(venue.to_string(), engine.clone());
        metrics::gauge!(crate::observability::VENUES_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDateTime};
    use std::fs;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotd_test_venue").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn far_future() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2026-08-06 12:00:00", "%Y-%m-%d %H:%M:%S").unwrap()
            + Duration::days(3650)
    }

    #[tokio::test]
    async fn venue_isolation() {
        let dir = test_data_dir("isolation");
        let vm = VenueManager::new(dir, 3600, EngineConfig::default());

        let eng_a = vm.get_or_create("venue_a").unwrap();
        let eng_b = vm.get_or_create("venue_b").unwrap();

        let start = far_future();
        eng_a
            .create_session(Some("rookie".into()), start.date(), start.time(), 60, 8)
            .await
            .unwrap();

        assert_eq!(eng_a.list_sessions().await.unwrap().len(), 1);
        assert!(eng_b.list_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn venue_lazy_creation() {
        let dir = test_data_dir("lazy");
        let vm = VenueManager::new(dir.clone(), 3600, EngineConfig::default());

        let eng = vm.get_or_create("my_venue").unwrap();
        let start = far_future();
        eng.create_session(None, start.date(), start.time(), 60, 4)
            .await
            .unwrap();

        // Data file appears once the first write lands
        assert!(dir.join("my_venue.sessions").exists());
    }

    #[tokio::test]
    async fn venue_same_engine_returned() {
        let dir = test_data_dir("same_eng");
        let vm = VenueManager::new(dir, 3600, EngineConfig::default());

        let eng1 = vm.get_or_create("foo").unwrap();
        let eng2 = vm.get_or_create("foo").unwrap();
        assert!(Arc::ptr_eq(&eng1, &eng2));
    }

    #[tokio::test]
    async fn venue_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let vm = VenueManager::new(dir.clone(), 3600, EngineConfig::default());

        let eng = vm.get_or_create("../evil").unwrap();
        let start = far_future();
        eng.create_session(None, start.date(), start.time(), 60, 4)
            .await
            .unwrap();
        // Writes land in "evil.sessions", not outside the data dir
        assert!(dir.join("evil.sessions").exists());

        // Empty after sanitization
        assert!(vm.get_or_create("../..").is_err());
    }

    #[tokio::test]
    async fn venue_name_too_long() {
        let dir = test_data_dir("name_too_long");
        let vm = VenueManager::new(dir, 3600, EngineConfig::default());

        let long_name = "x".repeat(MAX_VENUE_NAME_LEN + 1);
        let err = vm.get_or_create(&long_name).err().unwrap();
        assert!(err.to_string().contains("venue name too long"));
    }

    #[tokio::test]
    async fn venue_count_limit() {
        let dir = test_data_dir("count_limit");
        let vm = VenueManager::new(dir, 3600, EngineConfig::default());

        for i in 0..MAX_VENUES {
            vm.get_or_create(&format!("v{i}")).unwrap();
        }
        let err = vm.get_or_create("one_more").err().unwrap();
        assert!(err.to_string().contains("too many venues"));
    }
}
