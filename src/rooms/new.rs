use axum::{Json, debug_handler, extract::State, http::StatusCode, response::{IntoResponse, Response}};
use serde::Deserialize;
use tower_sessions::Session;

use crate::{AppResult, AppState, hub::Hub, session};

use super::ClientId;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NewRoomQuery {
    client_id: Option<ClientId>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn new_room(
    State(hub): State<Hub>,
    session: Session,

    Json(NewRoomQuery { client_id }): Json<NewRoomQuery>,
) -> AppResult<Response> {
    let host_id = session::client_id(&session, client_id).await?;
    let room = hub.create_room(host_id).await?;

    Ok((StatusCode::CREATED, Json(room)).into_response())
}
