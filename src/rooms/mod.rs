mod code;
mod join;
mod model;
mod new;
mod room;
pub mod store;
pub mod sweep;
mod ws;

use axum::{Router, routing::{get, post}};

use crate::AppState;

pub use code::{ALPHABET, BadRoomCode, CODE_LEN, RoomCode};
pub use model::{ClientId, Room, RoomStatus, TransferAnnouncement};
pub use store::RoomStore;
pub use ws::{ClientFrame, ServerFrame};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(new::new_room))
        .route("/join", post(join::join_room))
        .route("/{room_id}", get(room::get_room).delete(room::delete_room))
        .route("/{room_id}/ws", get(ws::room_ws))
}
