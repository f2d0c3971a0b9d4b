use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::rooms::{ClientId, Room};

/// How long a cached session stays usable after its last save.
pub const SESSION_MAX_AGE: Duration = Duration::from_secs(30 * 60);

/// Health of the change-feed subscription, not the pairing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Reconnecting,
    Disconnected,
    Closed,
    Error,
}

/// Per-participant session state owned by one lifecycle manager.
/// `room` is a hint for resuming, never an authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub client_id: ClientId,
    pub room: Option<Room>,
    pub connection: ConnectionStatus,
}

impl SessionContext {
    pub fn fresh() -> Self {
        Self {
            client_id: ClientId::new(),
            room: None,
            connection: ConnectionStatus::Disconnected,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedSession {
    #[serde(with = "time::serde::rfc3339")]
    saved_at: OffsetDateTime,
    context: SessionContext,
}

impl CachedSession {
    fn fresh_enough(self, max_age: Duration) -> Option<SessionContext> {
        (OffsetDateTime::now_utc() - self.saved_at < max_age).then_some(self.context)
    }
}

/// Short-lived, tab-scoped storage for resuming a session after a reload.
pub trait SessionCache: Send {
    fn load(&self) -> Option<SessionContext>;
    fn save(&self, context: &SessionContext) -> anyhow::Result<()>;
    fn clear(&self) -> anyhow::Result<()>;
}

/// Clones share the same slot, the way tabs of one page share storage.
#[derive(Debug, Clone)]
pub struct MemorySessionCache {
    slot: Arc<Mutex<Option<CachedSession>>>,
    max_age: Duration,
}

impl Default for MemorySessionCache {
    fn default() -> Self {
        Self::new(SESSION_MAX_AGE)
    }
}

impl MemorySessionCache {
    pub fn new(max_age: Duration) -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            max_age,
        }
    }
}

impl SessionCache for MemorySessionCache {
    fn load(&self) -> Option<SessionContext> {
        let slot = self.slot.lock().ok()?;
        slot.clone()?.fresh_enough(self.max_age)
    }

    fn save(&self, context: &SessionContext) -> anyhow::Result<()> {
        let mut slot = self.slot.lock().map_err(|_| anyhow::anyhow!("session cache poisoned"))?;
        *slot = Some(CachedSession {
            saved_at: OffsetDateTime::now_utc(),
            context: context.clone(),
        });
        Ok(())
    }

    fn clear(&self) -> anyhow::Result<()> {
        let mut slot = self.slot.lock().map_err(|_| anyhow::anyhow!("session cache poisoned"))?;
        *slot = None;
        Ok(())
    }
}

/// JSON file holding one session.
#[derive(Debug, Clone)]
pub struct FileSessionCache {
    path: PathBuf,
    max_age: Duration,
}

impl FileSessionCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_age: SESSION_MAX_AGE,
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }
}

impl SessionCache for FileSessionCache {
    fn load(&self) -> Option<SessionContext> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        let cached: CachedSession = serde_json::from_str(&raw).ok()?;
        cached.fresh_enough(self.max_age)
    }

    fn save(&self, context: &SessionContext) -> anyhow::Result<()> {
        let cached = CachedSession {
            saved_at: OffsetDateTime::now_utc(),
            context: context.clone(),
        };
        let json = serde_json::to_string(&cached)?;
        std::fs::write(&self.path, json).with_context(|| format!("writing {}", self.path.display()))
    }

    fn clear(&self) -> anyhow::Result<()> {
        match std::fs::remove_file(&self.path) {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => {
                Err(err).with_context(|| format!("removing {}", self.path.display()))
            }
            _ => Ok(()),
        }
    }
}
