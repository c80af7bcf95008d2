pub mod auth;
pub mod chat;
pub mod error;
pub mod feed;
pub mod friends;
pub mod group_chats;
pub mod group_messages;
pub mod messages;
pub mod middleware;
pub mod posts;
pub mod suggestions;
pub mod users;

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::warn;
use uuid::Uuid;

use ripple_db::Database;
use ripple_media::DiskStore;
use ripple_mirror::MirrorStore;

use error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub mirror: MirrorStore,
    pub media: DiskStore,
    pub jwt_secret: String,
}

/// Run a blocking DB closure off the async runtime.
pub(crate) async fn with_db<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| ApiError::Upstream(anyhow::anyhow!("spawn_blocking join error: {e}")))?
        .map_err(ApiError::from)
}

/// Timestamps are stored as fixed-width RFC 3339 so string comparison in
/// SQL matches chronological order.
pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_base64(data: &str) -> Result<Vec<u8>, ApiError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|_| ApiError::validation("Invalid base64 payload"))
}

pub(crate) fn parse_uuid(raw: &str, context: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt uuid '{}' in {}: {}", raw, context, e);
        Uuid::nil()
    })
}

pub(crate) fn parse_timestamp(raw: &str, context: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}' in {}: {}", raw, context, e);
            DateTime::default()
        })
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;

    /// Fresh state over an in-memory DB and a temp media dir. The TempDir
    /// must outlive the state or the media dir disappears mid-test.
    pub(crate) async fn test_state() -> (tempfile::TempDir, AppState) {
        let dir = tempfile::tempdir().unwrap();
        let media = DiskStore::open(dir.path().to_path_buf(), "/storage")
            .await
            .unwrap();
        let state = Arc::new(AppStateInner {
            db: Database::open_in_memory().unwrap(),
            mirror: MirrorStore::new(),
            media,
            jwt_secret: "test-secret".into(),
        });
        (dir, state)
    }

    pub(crate) fn seed_user(state: &AppState, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        state
            .db
            .create_user(
                &id.to_string(),
                name,
                Some(&format!("{name}@example.com")),
                None,
                "$argon2id$fake-hash",
                &now_rfc3339(),
            )
            .unwrap();
        id
    }
}
