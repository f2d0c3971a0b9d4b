use axum::{
    debug_handler,
    extract::{Path, Query, State, WebSocketUpgrade, ws::{Message, WebSocket}},
    response::Response,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    AppResult, AppState,
    error::DropError,
    hub::Hub,
    realtime::FeedItem,
    session,
};

use super::{ClientId, Room, TransferAnnouncement};

/// Frames pushed to a participant. One socket carries both room topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Room { room: Room },
    Transfer { announcement: TransferAnnouncement },
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Transfer { announcement: TransferAnnouncement },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WsQuery {
    client_id: Option<ClientId>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn room_ws(
    Path(room_id): Path<Uuid>,
    Query(WsQuery { client_id }): Query<WsQuery>,
    State(hub): State<Hub>,
    session: Session,

    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let me = session::client_id(&session, client_id).await?;

    // strangers get the same answer as for a missing room
    let Some(room) = hub.get_room(room_id).await? else {
        return Err(DropError::RoomNotJoinable.into());
    };
    if !room.is_member(me) {
        return Err(DropError::RoomNotJoinable.into());
    }

    Ok(ws.on_upgrade(move |socket| relay(socket, hub, room_id, me)))
}

async fn relay(socket: WebSocket, hub: Hub, room_id: Uuid, me: ClientId) {
    // attach both topics before the direct fetch so nothing falls in between
    let mut feed = hub.subscribe_feed(room_id);
    let mut transfers = hub.subscribe_transfers(room_id, me);
    let (mut sender, mut receiver) = socket.split();

    let current = match hub.get_room(room_id).await {
        Ok(Some(room)) => ServerFrame::Room { room },
        Ok(None) => ServerFrame::Closed,
        Err(err) => {
            warn!(%room_id, %err, "could not load room for websocket");
            return;
        }
    };

    let forward_hub = hub.clone();
    let mut forward_task = tokio::spawn(async move {
        let mut next = Some(current);
        loop {
            if let Some(frame) = next.take() {
                let closing = frame == ServerFrame::Closed;
                if send_frame(&mut sender, &frame).await.is_err() || closing {
                    let _ = sender.close().await;
                    break;
                }
            }

            let wake = tokio::select! {
                biased;
                item = feed.next() => Wake::Feed(item),
                announcement = transfers.recv() => Wake::Transfer(announcement),
            };

            next = match wake {
                Wake::Feed(FeedItem::Snapshot(room)) => Some(ServerFrame::Room { room }),
                Wake::Feed(FeedItem::Lagged(skipped)) => {
                    warn!(%room_id, skipped, "websocket fell behind the change feed, refetching");
                    // a fresh receiver so the stale backlog is never forwarded
                    feed = forward_hub.subscribe_feed(room_id);
                    match forward_hub.get_room(room_id).await {
                        Ok(Some(room)) => Some(ServerFrame::Room { room }),
                        Ok(None) => Some(ServerFrame::Closed),
                        Err(err) => {
                            warn!(%room_id, %err, "refetch failed");
                            None
                        }
                    }
                }
                Wake::Feed(FeedItem::Ended) | Wake::Transfer(None) => Some(ServerFrame::Closed),
                Wake::Transfer(Some(announcement)) => Some(ServerFrame::Transfer { announcement }),
            };
        }
    });

    let mut receive_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            let text = match msg {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };

            let Ok(ClientFrame::Transfer { announcement }) = serde_json::from_str(text.as_str()) else {
                debug!(%room_id, "ignoring malformed frame");
                continue;
            };

            if let Err(err) = hub.publish_transfer(room_id, me, announcement).await {
                warn!(%room_id, %err, "transfer not relayed");
            }
        }
    });

    tokio::select! {
        _ = &mut forward_task => receive_task.abort(),
        _ = &mut receive_task => forward_task.abort(),
    };
}

enum Wake {
    Feed(FeedItem),
    Transfer(Option<TransferAnnouncement>),
}

async fn send_frame(sender: &mut SplitSink<WebSocket, Message>, frame: &ServerFrame) -> Result<(), axum::Error> {
    let json = serde_json::to_string(frame).map_err(axum::Error::new)?;
    sender.send(Message::Text(json.into())).await
}
