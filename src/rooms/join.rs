use axum::{Json, debug_handler, extract::State};
use serde::Deserialize;
use tower_sessions::Session;

use crate::{AppResult, AppState, hub::Hub, session};

use super::{ClientId, Room};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JoinRoomQuery {
    room_code: String,
    client_id: Option<ClientId>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn join_room(
    State(hub): State<Hub>,
    session: Session,

    Json(JoinRoomQuery { room_code, client_id }): Json<JoinRoomQuery>,
) -> AppResult<Json<Room>> {
    let guest_id = session::client_id(&session, client_id).await?;
    Ok(Json(hub.join_room(&room_code, guest_id).await?))
}
