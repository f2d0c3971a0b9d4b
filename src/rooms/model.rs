use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::code::RoomCode;
use crate::error::DropError;

/// Opaque identity of an anonymous participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Declared in lifecycle order; a room only ever moves down this list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum RoomStatus {
    Waiting,
    Connected,
    Closed,
}

/// Pairing record. `guest_id` is `None` exactly while `status` is `Waiting`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub room_code: RoomCode,
    pub host_id: ClientId,
    pub guest_id: Option<ClientId>,
    pub status: RoomStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_activity_at: OffsetDateTime,
}

impl Room {
    pub fn is_member(&self, client: ClientId) -> bool {
        self.host_id == client || self.guest_id == Some(client)
    }

    /// True if `self` is an earlier state of the same row than `other`:
    /// a lower status, or the same status with older activity.
    pub fn is_older_than(&self, other: &Room) -> bool {
        (self.status, self.last_activity_at) < (other.status, other.last_activity_at)
    }

    pub fn idle_since(&self, now: OffsetDateTime) -> time::Duration {
        now - self.last_activity_at
    }
}

const MAX_THUMBNAIL_LEN: usize = 64 * 1024;

/// In-flight description of a finished upload. Never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferAnnouncement {
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
    pub download_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}

impl TransferAnnouncement {
    pub fn validate(&self) -> Result<(), DropError> {
        if self.file_name.trim().is_empty() {
            return Err(DropError::InvalidAnnouncement("fileName is empty"));
        }
        if self.mime_type.trim().is_empty() {
            return Err(DropError::InvalidAnnouncement("mimeType is empty"));
        }
        if !(self.download_url.starts_with("https://") || self.download_url.starts_with("http://")) {
            return Err(DropError::InvalidAnnouncement("downloadUrl must be http(s)"));
        }
        if self.thumbnail.as_ref().is_some_and(|t| t.len() > MAX_THUMBNAIL_LEN) {
            return Err(DropError::InvalidAnnouncement("thumbnail is too large"));
        }
        Ok(())
    }
}
