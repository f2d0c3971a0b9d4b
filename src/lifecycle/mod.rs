//! Client-held room lifecycle: one [`RoomLifecycle`] per participant.

mod backend;
mod manager;
mod session;

pub use backend::RoomBackend;
pub use manager::{CloseReason, LifecycleConfig, LifecycleEvent, OutgoingFile, Phase, RoomLifecycle};
pub use session::{ConnectionStatus, FileSessionCache, MemorySessionCache, SESSION_MAX_AGE, SessionCache, SessionContext};
