mod blob;
mod grant;

use std::sync::Arc;

use axum::{Json, Router, debug_handler, extract::State, routing::post};
use serde::Deserialize;

use crate::{
    AppResult, AppState,
    config::Config,
    error::{DropError, DropResult},
};

pub use blob::{BlobTransfer, HttpBlobTransfer};
pub use grant::{GRANT_TTL, HttpGrantIssuer, Presigner, UploadGrant, UploadGrantIssuer};

pub fn router() -> Router<AppState> {
    Router::new().route("/grant", post(request_grant))
}

/// Client-side gate run before any grant is requested.
pub fn check_size(size: u64, limit: u64) -> DropResult<()> {
    if size > limit {
        return Err(DropError::PayloadTooLarge { size, limit });
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GrantQuery {
    file_name: String,
    mime_type: String,
    size: Option<u64>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn request_grant(
    State(grants): State<Arc<Presigner>>,
    State(config): State<Arc<Config>>,
    Json(GrantQuery { file_name, mime_type, size }): Json<GrantQuery>,
) -> AppResult<Json<UploadGrant>> {
    if let Some(size) = size {
        check_size(size, config.max_upload_bytes)?;
    }
    Ok(Json(grants.request_upload_grant(&file_name, &mime_type).await?))
}
