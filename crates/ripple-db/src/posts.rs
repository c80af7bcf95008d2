use anyhow::Result;

use crate::models::{PostRow, ReactionCountRow, UserReactionRow};
use crate::{Database, OptionalExt, placeholders};

impl Database {
    pub fn insert_post(&self, id: &str, author_id: &str, content: &str, created_at: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO posts (id, author_id, content, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, author_id, content, created_at],
            )?;
            Ok(())
        })
    }

    pub fn get_post(&self, id: &str) -> Result<Option<PostRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, author_id, content, created_at FROM posts WHERE id = ?1",
                [id],
                row_to_post,
            )
            .optional()
        })
    }

    /// The caller's own posts newer than `since`, newest first, excluding
    /// ids the client already holds. Freshness fast-path for the feed.
    pub fn recent_own_posts(
        &self,
        author_id: &str,
        since: &str,
        exclude: &[String],
    ) -> Result<Vec<PostRow>> {
        self.with_conn(|conn| {
            let mut params: Vec<&dyn rusqlite::types::ToSql> = vec![&author_id, &since];
            let not_in = if exclude.is_empty() {
                String::new()
            } else {
                params.extend(exclude.iter().map(|id| id as &dyn rusqlite::types::ToSql));
                format!("AND id NOT IN ({})", placeholders(3, exclude.len()))
            };
            let sql = format!(
                "SELECT id, author_id, content, created_at FROM posts
                 WHERE author_id = ?1 AND created_at >= ?2 {not_in}
                 ORDER BY created_at DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params.as_slice(), row_to_post)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Random other-author posts for feed fill, excluding already-fetched
    /// ids. Unseeded by design.
    pub fn random_posts_excluding(
        &self,
        not_author: &str,
        exclude: &[String],
        limit: u32,
    ) -> Result<Vec<PostRow>> {
        self.with_conn(|conn| {
            let mut params: Vec<&dyn rusqlite::types::ToSql> = vec![&not_author];
            let not_in = if exclude.is_empty() {
                String::new()
            } else {
                params.extend(exclude.iter().map(|id| id as &dyn rusqlite::types::ToSql));
                format!("AND id NOT IN ({})", placeholders(2, exclude.len()))
            };
            let sql = format!(
                "SELECT id, author_id, content, created_at FROM posts
                 WHERE author_id != ?1 {not_in}
                 ORDER BY RANDOM() LIMIT ?{}",
                exclude.len() + 2
            );
            params.push(&limit);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params.as_slice(), row_to_post)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Reaction counts grouped by kind for a batch of posts, one query for
    /// the whole page.
    pub fn reaction_counts(&self, post_ids: &[String]) -> Result<Vec<ReactionCountRow>> {
        if post_ids.is_empty() {
            return Ok(vec![]);
        }
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT post_id, kind, COUNT(*) FROM reactions
                 WHERE post_id IN ({})
                 GROUP BY post_id, kind",
                placeholders(1, post_ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = post_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();
            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok(ReactionCountRow {
                        post_id: row.get(0)?,
                        kind: row.get(1)?,
                        count: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// The caller's own reaction per post, for the same batch.
    pub fn user_reactions(&self, user_id: &str, post_ids: &[String]) -> Result<Vec<UserReactionRow>> {
        if post_ids.is_empty() {
            return Ok(vec![]);
        }
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT post_id, kind FROM reactions
                 WHERE user_id = ?1 AND post_id IN ({})",
                placeholders(2, post_ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut params: Vec<&dyn rusqlite::types::ToSql> = vec![&user_id];
            params.extend(post_ids.iter().map(|id| id as &dyn rusqlite::types::ToSql));
            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok(UserReactionRow {
                        post_id: row.get(0)?,
                        kind: row.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// One reaction per (post, user); reacting again replaces the kind.
    pub fn upsert_reaction(
        &self,
        id: &str,
        post_id: &str,
        user_id: &str,
        kind: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO reactions (id, post_id, user_id, kind, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(post_id, user_id) DO UPDATE SET kind = excluded.kind",
                rusqlite::params![id, post_id, user_id, kind, created_at],
            )?;
            Ok(())
        })
    }
}

fn row_to_post(row: &rusqlite::Row<'_>) -> rusqlite::Result<PostRow> {
    Ok(PostRow {
        id: row.get(0)?,
        author_id: row.get(1)?,
        content: row.get(2)?,
        created_at: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::Database;

    fn seed(db: &Database) {
        for (id, name) in [("u1", "ann"), ("u2", "ben")] {
            db.create_user(id, name, Some(&format!("{name}@x.io")), None, "h", "2026-01-01T00:00:00Z")
                .unwrap();
        }
        db.insert_post("p1", "u1", "hello", "2026-01-01T00:00:00Z").unwrap();
        db.insert_post("p2", "u2", "hey", "2026-01-01T00:00:01Z").unwrap();
    }

    #[test]
    fn reacting_twice_keeps_one_row_with_latest_kind() {
        let db = Database::open_in_memory().unwrap();
        seed(&db);

        db.upsert_reaction("r1", "p1", "u2", "like", "2026-01-02T00:00:00Z").unwrap();
        db.upsert_reaction("r2", "p1", "u2", "love", "2026-01-02T00:00:01Z").unwrap();

        let counts = db.reaction_counts(&["p1".into()]).unwrap();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].kind, "love");
        assert_eq!(counts[0].count, 1);
    }

    #[test]
    fn random_posts_respect_exclusions() {
        let db = Database::open_in_memory().unwrap();
        seed(&db);

        let posts = db.random_posts_excluding("u1", &["p2".into()], 10).unwrap();
        assert!(posts.is_empty(), "only other-author post was excluded");

        let posts = db.random_posts_excluding("u1", &[], 10).unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, "p2");
    }
}
