use anyhow::Result;

use crate::models::DirectMessageRow;
use crate::{Database, OptionalExt};

const DIRECT_COLUMNS: &str = "id, sender_id, receiver_id, body, kind, media_url, media_path, \
     mirror_key, sync_status, read_by, deleted_by, created_at";

impl Database {
    pub fn insert_direct_message(&self, msg: &DirectMessageRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO messages (id, sender_id, receiver_id, body, kind, media_url,
                     media_path, mirror_key, sync_status, read_by, deleted_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                rusqlite::params![
                    msg.id,
                    msg.sender_id,
                    msg.receiver_id,
                    msg.body,
                    msg.kind,
                    msg.media_url,
                    msg.media_path,
                    msg.mirror_key,
                    msg.sync_status,
                    msg.read_by,
                    msg.deleted_by,
                    msg.created_at,
                ],
            )?;
            Ok(())
        })
    }

    /// Record the mirror push key and flip the row to synced.
    pub fn set_direct_mirror(&self, id: &str, mirror_key: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE messages SET mirror_key = ?2, sync_status = 'synced' WHERE id = ?1",
                rusqlite::params![id, mirror_key],
            )?;
            Ok(())
        })
    }

    /// Both directions of a direct conversation, oldest first.
    pub fn conversation_messages(&self, a: &str, b: &str) -> Result<Vec<DirectMessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {DIRECT_COLUMNS} FROM messages
                 WHERE (sender_id = ?1 AND receiver_id = ?2)
                    OR (sender_id = ?2 AND receiver_id = ?1)
                 ORDER BY created_at ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([a, b], row_to_direct)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_direct_by_mirror_key(&self, mirror_key: &str) -> Result<Option<DirectMessageRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {DIRECT_COLUMNS} FROM messages WHERE mirror_key = ?1");
            conn.query_row(&sql, [mirror_key], row_to_direct).optional()
        })
    }

    pub fn set_direct_read_by(&self, id: &str, read_by_json: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE messages SET read_by = ?2 WHERE id = ?1",
                rusqlite::params![id, read_by_json],
            )?;
            Ok(())
        })
    }

    pub fn set_direct_deleted_by(&self, id: &str, deleted_by_json: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE messages SET deleted_by = ?2 WHERE id = ?1",
                rusqlite::params![id, deleted_by_json],
            )?;
            Ok(())
        })
    }

    /// Rows whose mirror write never landed; the repair sweep re-publishes
    /// them.
    pub fn unsynced_direct_messages(&self) -> Result<Vec<DirectMessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {DIRECT_COLUMNS} FROM messages
                 WHERE sync_status = 'pending'
                 ORDER BY created_at ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], row_to_direct)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn row_to_direct(row: &rusqlite::Row<'_>) -> rusqlite::Result<DirectMessageRow> {
    Ok(DirectMessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        body: row.get(3)?,
        kind: row.get(4)?,
        media_url: row.get(5)?,
        media_path: row.get(6)?,
        mirror_key: row.get(7)?,
        sync_status: row.get(8)?,
        read_by: row.get(9)?,
        deleted_by: row.get(10)?,
        created_at: row.get(11)?,
    })
}
