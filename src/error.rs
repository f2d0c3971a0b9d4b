use axum::{Json, http::StatusCode, response::{IntoResponse, Response}};
use serde_json::json;

pub type DropResult<T> = Result<T, DropError>;

/// Failure classes of the pairing and transfer protocol.
#[derive(Debug, thiserror::Error)]
pub enum DropError {
    /// Transient store failure. Pairing state is untouched; retry with backoff.
    #[error("room store unavailable: {0}")]
    StoreUnavailable(String),

    /// Unknown code, closed room and already-paired room all look the same.
    #[error("code not found or room full")]
    RoomNotJoinable,

    #[error("could not create a room: {0}")]
    CreateFailed(String),

    #[error("could not get an upload grant: {0}")]
    UploadGrantFailed(String),

    #[error("file transfer failed: {0}")]
    TransferFailed(String),

    #[error("realtime subscription failed: {0}")]
    SubscriptionError(String),

    #[error("{} is too large, the limit is {}", human_size(.size), human_size(.limit))]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error("invalid transfer announcement: {0}")]
    InvalidAnnouncement(&'static str),

    #[error("not connected to a peer")]
    NotConnected,

    #[error("already in a room")]
    Busy,
}

impl DropError {
    /// Worth retrying without user involvement.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    pub fn status(&self) -> StatusCode {
        use DropError::*;
        match self {
            RoomNotJoinable => StatusCode::NOT_FOUND,
            StoreUnavailable(_) | CreateFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
            UploadGrantFailed(_) | TransferFailed(_) | SubscriptionError(_) => StatusCode::BAD_GATEWAY,
            PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            InvalidAnnouncement(_) => StatusCode::BAD_REQUEST,
            NotConnected | Busy => StatusCode::CONFLICT,
        }
    }
}

impl From<sqlx::Error> for DropError {
    fn from(err: sqlx::Error) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

impl IntoResponse for DropError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn human_size(bytes: &u64) -> String {
    let bytes = *bytes;
    const MB: f64 = 1024.0 * 1024.0;
    if bytes >= 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / MB)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}
