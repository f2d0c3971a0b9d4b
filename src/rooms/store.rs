use std::str::FromStr;

use sqlx::{
    FromRow, SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use super::{
    code::RoomCode,
    model::{ClientId, Room, RoomStatus},
};
use crate::error::{DropError, DropResult};

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS rooms (
        id TEXT PRIMARY KEY NOT NULL,
        room_code TEXT NOT NULL COLLATE NOCASE,
        host_id TEXT NOT NULL,
        guest_id TEXT,
        status TEXT NOT NULL CHECK (status IN ('waiting', 'connected', 'closed')),
        created_at INTEGER NOT NULL,
        last_activity_at INTEGER NOT NULL,
        CHECK (status != 'waiting' OR guest_id IS NULL),
        CHECK (status != 'connected' OR guest_id IS NOT NULL),
        CHECK (guest_id IS NULL OR guest_id != host_id)
    )"#,
    "CREATE UNIQUE INDEX IF NOT EXISTS rooms_open_code ON rooms (room_code) WHERE status != 'closed'",
    "CREATE INDEX IF NOT EXISTS rooms_last_activity ON rooms (last_activity_at)",
];

const COLUMNS: &str = "id,room_code,host_id,guest_id,status,created_at,last_activity_at";

#[derive(FromRow)]
struct RoomRow {
    id: String,
    room_code: String,
    host_id: String,
    guest_id: Option<String>,
    status: RoomStatus,
    created_at: i64,
    last_activity_at: i64,
}

impl TryFrom<RoomRow> for Room {
    type Error = DropError;

    fn try_from(row: RoomRow) -> Result<Self, Self::Error> {
        let corrupt = |what: &str| DropError::StoreUnavailable(format!("corrupt room row {}: bad {what}", row.id));
        Ok(Room {
            id: Uuid::parse_str(&row.id).map_err(|_| corrupt("id"))?,
            room_code: RoomCode::parse(&row.room_code).map_err(|_| corrupt("room_code"))?,
            host_id: ClientId(Uuid::parse_str(&row.host_id).map_err(|_| corrupt("host_id"))?),
            guest_id: match &row.guest_id {
                Some(g) => Some(ClientId(Uuid::parse_str(g).map_err(|_| corrupt("guest_id"))?)),
                None => None,
            },
            status: row.status,
            created_at: from_millis(row.created_at).ok_or_else(|| corrupt("created_at"))?,
            last_activity_at: from_millis(row.last_activity_at).ok_or_else(|| corrupt("last_activity_at"))?,
        })
    }
}

pub(crate) fn to_millis(t: OffsetDateTime) -> i64 {
    (t.unix_timestamp_nanos() / 1_000_000) as i64
}

pub(crate) fn from_millis(ms: i64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000).ok()
}

/// Durable record of rooms. The row is only ever changed by the conditional
/// join, by activity touches, and by deletion.
#[derive(Clone)]
pub struct RoomStore {
    db_pool: SqlitePool,
}

impl RoomStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let db_pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self::new(db_pool))
    }

    /// Waits for open connections to finish; later calls fail as unavailable.
    pub async fn close(&self) {
        self.db_pool.close().await;
    }

    pub async fn migrate(&self) -> DropResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.db_pool).await?;
        }
        Ok(())
    }

    /// Single insert attempt. `Ok(None)` means the code belongs to an open room.
    pub async fn insert_room(
        &self,
        host_id: ClientId,
        room_code: &RoomCode,
        now: OffsetDateTime,
    ) -> DropResult<Option<Room>> {
        let now = to_millis(now);
        let result = sqlx::query_as::<_, RoomRow>(&format!(
            "INSERT INTO rooms ({COLUMNS}) VALUES (?,?,?,NULL,'waiting',?,?) RETURNING {COLUMNS}"
        ))
        .bind(Uuid::now_v7().to_string())
        .bind(room_code.as_str())
        .bind(host_id.to_string())
        .bind(now)
        .bind(now)
        .fetch_one(&self.db_pool)
        .await;

        match result {
            Ok(row) => Ok(Some(row.try_into()?)),
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// The Atomic Join Operation: one conditional update, so concurrent
    /// joiners cannot both match `status = 'waiting'`.
    pub async fn join_room(
        &self,
        room_code: &RoomCode,
        guest_id: ClientId,
        now: OffsetDateTime,
    ) -> DropResult<Room> {
        let row = sqlx::query_as::<_, RoomRow>(&format!(
            "UPDATE rooms SET guest_id=?, status='connected', last_activity_at=? \
             WHERE room_code=? COLLATE NOCASE AND status='waiting' AND host_id!=? \
             RETURNING {COLUMNS}"
        ))
        .bind(guest_id.to_string())
        .bind(to_millis(now))
        .bind(room_code.as_str())
        .bind(guest_id.to_string())
        .fetch_optional(&self.db_pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(DropError::RoomNotJoinable),
        }
    }

    pub async fn get_room(&self, room_id: Uuid) -> DropResult<Option<Room>> {
        sqlx::query_as::<_, RoomRow>(&format!("SELECT {COLUMNS} FROM rooms WHERE id=?"))
            .bind(room_id.to_string())
            .fetch_optional(&self.db_pool)
            .await?
            .map(Room::try_from)
            .transpose()
    }

    /// Bumps `last_activity_at`, never backwards.
    pub async fn touch_room(&self, room_id: Uuid, now: OffsetDateTime) -> DropResult<Option<Room>> {
        sqlx::query_as::<_, RoomRow>(&format!(
            "UPDATE rooms SET last_activity_at=MAX(last_activity_at, ?) \
             WHERE id=? AND status!='closed' RETURNING {COLUMNS}"
        ))
        .bind(to_millis(now))
        .bind(room_id.to_string())
        .fetch_optional(&self.db_pool)
        .await?
        .map(Room::try_from)
        .transpose()
    }

    /// Idempotent. Returns whether a row was removed.
    pub async fn delete_room(&self, room_id: Uuid) -> DropResult<bool> {
        let result = sqlx::query("DELETE FROM rooms WHERE id=?")
            .bind(room_id.to_string())
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Deletes every room idle since before `cutoff`.
    pub async fn delete_idle(&self, cutoff: OffsetDateTime) -> DropResult<Vec<Uuid>> {
        let ids: Vec<(String,)> = sqlx::query_as("DELETE FROM rooms WHERE last_activity_at<? RETURNING id")
            .bind(to_millis(cutoff))
            .fetch_all(&self.db_pool)
            .await?;

        if !ids.is_empty() {
            info!(count = ids.len(), "deleted idle rooms");
        }

        Ok(ids
            .into_iter()
            .filter_map(|(id,)| Uuid::parse_str(&id).ok())
            .collect())
    }
}
