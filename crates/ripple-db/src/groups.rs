use anyhow::Result;

use crate::models::{GroupMessageRow, GroupRow};
use crate::{Database, OptionalExt};

const GROUP_MSG_COLUMNS: &str = "id, group_id, sender_id, body, kind, media_url, media_path, \
     mirror_key, sync_status, read_by, deleted_by, created_at";

impl Database {
    // -- Group chats --

    pub fn insert_group(&self, group: &GroupRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO group_chats (id, name, photo_path, creator_id, members,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                rusqlite::params![
                    group.id,
                    group.name,
                    group.photo_path,
                    group.creator_id,
                    group.members,
                    group.created_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_group(&self, id: &str) -> Result<Option<GroupRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, photo_path, creator_id, members, created_at
                 FROM group_chats WHERE id = ?1",
                [id],
                row_to_group,
            )
            .optional()
        })
    }

    pub fn update_group_details(
        &self,
        id: &str,
        name: &str,
        photo_path: Option<&str>,
        updated_at: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE group_chats SET name = ?2, photo_path = ?3, updated_at = ?4
                 WHERE id = ?1",
                rusqlite::params![id, name, photo_path, updated_at],
            )?;
            Ok(())
        })
    }

    pub fn update_group_members(&self, id: &str, members_json: &str, updated_at: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE group_chats SET members = ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![id, members_json, updated_at],
            )?;
            Ok(())
        })
    }

    /// Groups whose member set contains the user. `json_each` walks the
    /// JSON members column.
    pub fn groups_for_user(&self, user_id: &str) -> Result<Vec<GroupRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT g.id, g.name, g.photo_path, g.creator_id, g.members, g.created_at
                 FROM group_chats g
                 WHERE g.creator_id = ?1
                    OR EXISTS (SELECT 1 FROM json_each(g.members) WHERE json_each.value = ?1)
                 ORDER BY g.created_at DESC",
            )?;
            let rows = stmt
                .query_map([user_id], row_to_group)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Group messages --

    pub fn insert_group_message(&self, msg: &GroupMessageRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO group_messages (id, group_id, sender_id, body, kind, media_url,
                     media_path, mirror_key, sync_status, read_by, deleted_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                rusqlite::params![
                    msg.id,
                    msg.group_id,
                    msg.sender_id,
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

    pub fn set_group_message_mirror(&self, id: &str, mirror_key: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE group_messages SET mirror_key = ?2, sync_status = 'synced' WHERE id = ?1",
                rusqlite::params![id, mirror_key],
            )?;
            Ok(())
        })
    }

    pub fn get_group_message_by_mirror_key(
        &self,
        group_id: &str,
        mirror_key: &str,
    ) -> Result<Option<GroupMessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {GROUP_MSG_COLUMNS} FROM group_messages
                 WHERE group_id = ?1 AND mirror_key = ?2"
            );
            conn.query_row(&sql, [group_id, mirror_key], row_to_group_message)
                .optional()
        })
    }

    pub fn group_messages(&self, group_id: &str) -> Result<Vec<GroupMessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {GROUP_MSG_COLUMNS} FROM group_messages
                 WHERE group_id = ?1
                 ORDER BY created_at ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([group_id], row_to_group_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn set_group_message_read_by(&self, id: &str, read_by_json: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE group_messages SET read_by = ?2 WHERE id = ?1",
                rusqlite::params![id, read_by_json],
            )?;
            Ok(())
        })
    }

    pub fn set_group_message_deleted_by(&self, id: &str, deleted_by_json: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE group_messages SET deleted_by = ?2 WHERE id = ?1",
                rusqlite::params![id, deleted_by_json],
            )?;
            Ok(())
        })
    }

    pub fn unsynced_group_messages(&self) -> Result<Vec<GroupMessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {GROUP_MSG_COLUMNS} FROM group_messages
                 WHERE sync_status = 'pending'
                 ORDER BY created_at ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], row_to_group_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn row_to_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<GroupRow> {
    Ok(GroupRow {
        id: row.get(0)?,
        name: row.get(1)?,
        photo_path: row.get(2)?,
        creator_id: row.get(3)?,
        members: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn row_to_group_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<GroupMessageRow> {
    Ok(GroupMessageRow {
        id: row.get(0)?,
        group_id: row.get(1)?,
        sender_id: row.get(2)?,
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
