use anyhow::Result;

use crate::models::FriendRow;
use crate::{Database, OptionalExt, placeholders};

impl Database {
    pub fn create_friend_request(
        &self,
        id: &str,
        requester_id: &str,
        target_id: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO friends (id, requester_id, target_id, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'pending', ?4, ?4)",
                rusqlite::params![id, requester_id, target_id, created_at],
            )?;
            Ok(())
        })
    }

    pub fn get_friend_by_id(&self, id: &str) -> Result<Option<FriendRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, requester_id, target_id, status, created_at
                 FROM friends WHERE id = ?1",
                [id],
                row_to_friend,
            )
            .optional()
        })
    }

    /// The active (pending or accepted) edge between two users, in either
    /// direction. The unordered-pair invariant is enforced in application
    /// code with this lookup; the schema carries no unique constraint.
    pub fn find_active_edge(&self, a: &str, b: &str) -> Result<Option<FriendRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, requester_id, target_id, status, created_at
                 FROM friends
                 WHERE status IN ('pending', 'accepted')
                   AND ((requester_id = ?1 AND target_id = ?2)
                     OR (requester_id = ?2 AND target_id = ?1))",
                [a, b],
                row_to_friend,
            )
            .optional()
        })
    }

    pub fn set_friend_status(&self, id: &str, status: &str, updated_at: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE friends SET status = ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![id, status, updated_at],
            )?;
            Ok(())
        })
    }

    /// All accepted edges touching any of the given user ids, as
    /// (requester, target) pairs. One call serves both the direct-friend
    /// and friends-of-friends expansion.
    pub fn accepted_edges_touching(&self, ids: &[String]) -> Result<Vec<(String, String)>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        self.with_conn(|conn| {
            let list = placeholders(1, ids.len());
            let sql = format!(
                "SELECT requester_id, target_id FROM friends
                 WHERE status = 'accepted'
                   AND (requester_id IN ({list}) OR target_id IN ({list}))"
            );
            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> =
                ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();
            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn pending_requests_for(&self, target_id: &str) -> Result<Vec<FriendRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, requester_id, target_id, status, created_at
                 FROM friends
                 WHERE target_id = ?1 AND status = 'pending'
                 ORDER BY created_at DESC",
            )?;
            let rows = stmt
                .query_map([target_id], row_to_friend)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn row_to_friend(row: &rusqlite::Row<'_>) -> rusqlite::Result<FriendRow> {
    Ok(FriendRow {
        id: row.get(0)?,
        requester_id: row.get(1)?,
        target_id: row.get(2)?,
        status: row.get(3)?,
        created_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::Database;

    fn seed_user(db: &Database, id: &str, name: &str) {
        db.create_user(id, name, Some(&format!("{name}@x.io")), None, "hash", "2026-01-01T00:00:00Z")
            .unwrap();
    }

    #[test]
    fn active_edge_is_direction_independent() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, "a", "alice");
        seed_user(&db, "b", "bob");

        db.create_friend_request("f1", "a", "b", "2026-01-01T00:00:00Z").unwrap();

        assert!(db.find_active_edge("a", "b").unwrap().is_some());
        assert!(db.find_active_edge("b", "a").unwrap().is_some());

        db.set_friend_status("f1", "rejected", "2026-01-02T00:00:00Z").unwrap();
        assert!(db.find_active_edge("a", "b").unwrap().is_none());
    }

    #[test]
    fn accepted_edges_touching_spans_both_directions() {
        let db = Database::open_in_memory().unwrap();
        for (id, name) in [("a", "alice"), ("b", "bob"), ("c", "cara")] {
            seed_user(&db, id, name);
        }
        db.create_friend_request("f1", "a", "b", "2026-01-01T00:00:00Z").unwrap();
        db.set_friend_status("f1", "accepted", "2026-01-01T00:00:00Z").unwrap();
        db.create_friend_request("f2", "c", "a", "2026-01-01T00:00:00Z").unwrap();
        db.set_friend_status("f2", "accepted", "2026-01-01T00:00:00Z").unwrap();
        // Pending edges are excluded.
        db.create_friend_request("f3", "b", "c", "2026-01-01T00:00:00Z").unwrap();

        let edges = db.accepted_edges_touching(&["a".into()]).unwrap();
        assert_eq!(edges.len(), 2);
    }
}
