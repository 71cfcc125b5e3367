use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::model::Session;

/// Storage collaborator. The engine always reads the full current
/// collection before mutating and writes the full collection back; it
/// never assumes incremental persistence. Concurrent writers race as
/// last-writer-wins — serializing mutations is the engine's job, not
/// the store's.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self) -> io::Result<Vec<Session>>;
    async fn save_all(&self, sessions: &[Session]) -> io::Result<()>;
}

/// Encode a single session to `[len][bincode][crc32]` format.
fn encode_session(writer: &mut impl Write, session: &Session) -> io::Result<()> {
    let payload =
        bincode::serialize(session).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// File-backed session store.
///
/// Format per record: `[u32: len][bincode: Session][u32: crc32]`.
/// Every save rewrites the whole collection to a temp file, fsyncs, and
/// renames it over the data file, so a crash leaves either the old or
/// the new collection. A truncated or CRC-corrupt tail on load is
/// discarded; the valid prefix survives.
pub struct LocalStore {
    path: PathBuf,
}

impl LocalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(path: &Path) -> io::Result<Vec<Session>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut sessions = Vec::new();

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            let len = u32::from_le_bytes(len_buf) as usize;

            let mut payload = vec![0u8; len];
            match reader.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // truncated
                Err(e) => return Err(e),
            }

            let mut crc_buf = [0u8; 4];
            match reader.read_exact(&mut crc_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // truncated
                Err(e) => return Err(e),
            }
            let stored_crc = u32::from_le_bytes(crc_buf);
            if stored_crc != crc32fast::hash(&payload) {
                tracing::warn!("session store: corrupt record, dropping tail");
                break;
            }

            match bincode::deserialize::<Session>(&payload) {
                Ok(session) => sessions.push(session),
                Err(_) => {
                    tracing::warn!("session store: undecodable record, dropping tail");
                    break;
                }
            }
        }

        Ok(sessions)
    }

    fn write_all(path: &Path, sessions: &[Session]) -> io::Result<()> {
        let tmp_path = path.with_extension("sessions.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for session in sessions {
            encode_session(&mut writer, session)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for LocalStore {
    async fn load(&self) -> io::Result<Vec<Session>> {
        Self::read_all(&self.path)
    }

    async fn save_all(&self, sessions: &[Session]) -> io::Result<()> {
        Self::write_all(&self.path, sessions)
    }
}

/// In-memory store for tests and embedding. `fail_saves` lets tests
/// observe how the engine surfaces a storage fault.
#[derive(Default)]
pub struct MemoryStore {
    sessions: Mutex<Vec<Session>>,
    fail_saves: std::sync::atomic::AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load(&self) -> io::Result<Vec<Session>> {
        Ok(self.sessions.lock().unwrap().clone())
    }

    async fn save_all(&self, sessions: &[Session]) -> io::Result<()> {
        if self.fail_saves.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(io::Error::other("store unavailable"));
        }
        *self.sessions.lock().unwrap() = sessions.to_vec();
        Ok(())
    }
}
