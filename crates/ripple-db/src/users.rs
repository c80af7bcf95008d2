use anyhow::Result;

use crate::models::UserRow;
use crate::{Database, OptionalExt, placeholders};

impl Database {
    pub fn create_user(
        &self,
        id: &str,
        name: &str,
        email: Option<&str>,
        phone: Option<&str>,
        password_hash: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, name, email, phone, password, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![id, name, email, phone, password_hash, created_at],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, email, phone, password, created_at FROM users WHERE id = ?1",
                [id],
                row_to_user,
            )
            .optional()
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, email, phone, password, created_at FROM users WHERE email = ?1",
                [email],
                row_to_user,
            )
            .optional()
        })
    }

    pub fn get_user_by_phone(&self, phone: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, email, phone, password, created_at FROM users WHERE phone = ?1",
                [phone],
                row_to_user,
            )
            .optional()
        })
    }

    pub fn user_exists(&self, id: &str) -> Result<bool> {
        Ok(self.get_user_by_id(id)?.is_some())
    }

    pub fn get_users_by_ids(&self, ids: &[String]) -> Result<Vec<UserRow>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT id, name, email, phone, password, created_at FROM users
                 WHERE id IN ({})",
                placeholders(1, ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> =
                ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();
            let rows = stmt
                .query_map(params.as_slice(), row_to_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Uniformly random user ids outside the exclusion list. Backfill pool
    /// for the discovery feed; intentionally unseeded.
    pub fn random_user_ids_excluding(&self, exclude: &[String], limit: u32) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let (filter, mut params): (String, Vec<&dyn rusqlite::types::ToSql>) =
                if exclude.is_empty() {
                    (String::new(), vec![])
                } else {
                    (
                        format!("WHERE id NOT IN ({})", placeholders(1, exclude.len())),
                        exclude
                            .iter()
                            .map(|id| id as &dyn rusqlite::types::ToSql)
                            .collect(),
                    )
                };
            let sql = format!(
                "SELECT id FROM users {} ORDER BY RANDOM() LIMIT ?{}",
                filter,
                exclude.len() + 1
            );
            params.push(&limit);

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params.as_slice(), |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        phone: row.get(3)?,
        password: row.get(4)?,
        created_at: row.get(5)?,
    })
}
