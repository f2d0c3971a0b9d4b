use axum::{Json, debug_handler, extract::{Path, Query, State}, http::StatusCode, response::{IntoResponse, Response}};
use serde::Deserialize;
use serde_json::json;
use tower_sessions::Session;
use uuid::Uuid;

use crate::{AppResult, AppState, hub::Hub, session};

use super::ClientId;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MemberQuery {
    client_id: Option<ClientId>,
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "room not found" }))).into_response()
}

/// Members only. Anyone else is told the room does not exist.
#[debug_handler(state = AppState)]
pub(crate) async fn get_room(
    State(hub): State<Hub>,
    Path(room_id): Path<Uuid>,
    Query(MemberQuery { client_id }): Query<MemberQuery>,
    session: Session,
) -> AppResult<Response> {
    let me = session::client_id(&session, client_id).await?;
    match hub.get_room(room_id).await? {
        Some(room) if room.is_member(me) => Ok(Json(room).into_response()),
        _ => Ok(not_found()),
    }
}

/// Idempotent for members; a room that is already gone reads as deleted.
#[debug_handler(state = AppState)]
pub(crate) async fn delete_room(
    State(hub): State<Hub>,
    Path(room_id): Path<Uuid>,
    Query(MemberQuery { client_id }): Query<MemberQuery>,
    session: Session,
) -> AppResult<Response> {
    let me = session::client_id(&session, client_id).await?;
    if let Some(room) = hub.get_room(room_id).await? {
        if !room.is_member(me) {
            return Ok(not_found());
        }
    }

    hub.delete_room(room_id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
