use tower_sessions::Session;

use crate::{AppResult, rooms::ClientId};

pub const CLIENT_ID: &str = "client_id";

/// Identity of the caller. The id kept in the session always wins; an
/// explicit id is only taken up by a session that has none yet, and is bound
/// to it from then on. Without either, a fresh id is minted.
pub async fn client_id(session: &Session, explicit: Option<ClientId>) -> AppResult<ClientId> {
    if let Some(id) = session.get::<ClientId>(CLIENT_ID).await? {
        return Ok(id);
    }
    let id = explicit.unwrap_or_default();
    session.insert(CLIENT_ID, id).await?;
    Ok(id)
}
