//! Dual-write messaging core. Every compose operation persists the
//! relational row first (source of truth), then publishes a denormalized
//! copy to the realtime mirror. Rows carry a sync status so a mirror write
//! that never landed can be replayed by the repair sweep; a committed row
//! is never rolled back because of the mirror.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use ripple_db::models::{DirectMessageRow, GroupMessageRow, GroupRow};
use ripple_types::api::MessageResponse;
use ripple_types::models::{IdSet, MessageKind, SyncStatus};

use crate::error::ApiError;
use crate::{AppState, parse_timestamp, parse_uuid, with_db};

pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;
pub const MAX_FILE_BYTES: usize = 20 * 1024 * 1024;
pub const MAX_VOICE_BYTES: usize = 5 * 1024 * 1024;
pub const MAX_VOICE_SECONDS: u32 = 300;

/// Storage prefixes for uploaded attachments.
pub struct MediaDirs {
    pub image: &'static str,
    pub file: &'static str,
    pub voice: &'static str,
}

pub const DIRECT_MEDIA_DIRS: MediaDirs = MediaDirs {
    image: "chat-images",
    file: "chat-files",
    voice: "chat-voices",
};

pub const GROUP_MEDIA_DIRS: MediaDirs = MediaDirs {
    image: "group-chat-images",
    file: "group-chat-files",
    voice: "group-chat-voices",
};

/// Deterministic conversation id for a direct pair. The two ids are put in
/// lexicographic order first, so both participants always address the same
/// mirror subtree no matter who initiates. A non-deterministic order would
/// split one conversation into two trees.
pub fn conversation_id(a: Uuid, b: Uuid) -> String {
    let (a, b) = (a.to_string(), b.to_string());
    if a <= b {
        format!("chat_{a}_{b}")
    } else {
        format!("chat_{b}_{a}")
    }
}

pub fn direct_messages_path(a: Uuid, b: Uuid) -> String {
    format!("conversations/{}/messages", conversation_id(a, b))
}

pub fn group_messages_path(group_id: Uuid) -> String {
    format!("groups/{group_id}/messages")
}

/// A composed message ready to be written to both stores.
pub struct Outgoing {
    pub kind: MessageKind,
    pub body: String,
    pub media_url: Option<String>,
    pub media_path: Option<String>,
    /// Mirror-only payload: voice duration, file metadata, shared post.
    pub extra: Map<String, Value>,
}

impl Outgoing {
    pub fn text(body: String) -> Self {
        Self {
            kind: MessageKind::Text,
            body,
            media_url: None,
            media_path: None,
            extra: Map::new(),
        }
    }
}

/// An attachment arriving with a compose request.
pub struct MediaUpload {
    pub kind: MessageKind,
    pub bytes: Vec<u8>,
    pub caption: Option<String>,
    pub filename: Option<String>,
    pub mime: Option<String>,
    pub duration: Option<u32>,
}

// -- Direct sends --

pub async fn send_direct_text(
    state: &AppState,
    sender: Uuid,
    receiver: Uuid,
    body: String,
) -> Result<MessageResponse, ApiError> {
    if body.trim().is_empty() {
        return Err(ApiError::validation("Message body is required"));
    }
    ensure_user_exists(state, receiver, "Receiver").await?;
    persist_direct(state, sender, receiver, Outgoing::text(body)).await
}

pub async fn send_direct_media(
    state: &AppState,
    sender: Uuid,
    receiver: Uuid,
    upload: MediaUpload,
) -> Result<MessageResponse, ApiError> {
    validate_upload(&upload)?;
    ensure_user_exists(state, receiver, "Receiver").await?;

    let (outgoing, media_path) = store_upload(state, &upload, &DIRECT_MEDIA_DIRS).await?;
    match persist_direct(state, sender, receiver, outgoing).await {
        Ok(resp) => Ok(resp),
        Err(e) => {
            // The relational write failed, so nothing references the
            // uploaded object; remove it before surfacing the error.
            if let Err(del) = state.media.delete(&media_path).await {
                warn!("Cleanup of orphaned upload {} failed: {}", media_path, del);
            }
            Err(e)
        }
    }
}

pub async fn send_direct_post_share(
    state: &AppState,
    sender: Uuid,
    receiver: Uuid,
    post_id: Uuid,
    post_kind: String,
    message: Option<String>,
    thumbnail: Option<String>,
) -> Result<MessageResponse, ApiError> {
    ensure_user_exists(state, receiver, "Receiver").await?;
    let outgoing = post_share_outgoing(state, post_id, post_kind, message, thumbnail).await?;
    persist_direct(state, sender, receiver, outgoing).await
}

// -- Group sends --

pub async fn send_group_text(
    state: &AppState,
    sender: Uuid,
    group_id: Uuid,
    body: String,
) -> Result<MessageResponse, ApiError> {
    if body.trim().is_empty() {
        return Err(ApiError::validation("Message body is required"));
    }
    ensure_group_member(state, group_id, sender).await?;
    persist_group(state, sender, group_id, Outgoing::text(body)).await
}

pub async fn send_group_media(
    state: &AppState,
    sender: Uuid,
    group_id: Uuid,
    upload: MediaUpload,
) -> Result<MessageResponse, ApiError> {
    validate_upload(&upload)?;
    ensure_group_member(state, group_id, sender).await?;

    let (outgoing, media_path) = store_upload(state, &upload, &GROUP_MEDIA_DIRS).await?;
    match persist_group(state, sender, group_id, outgoing).await {
        Ok(resp) => Ok(resp),
        Err(e) => {
            if let Err(del) = state.media.delete(&media_path).await {
                warn!("Cleanup of orphaned upload {} failed: {}", media_path, del);
            }
            Err(e)
        }
    }
}

pub async fn send_group_post_share(
    state: &AppState,
    sender: Uuid,
    group_id: Uuid,
    post_id: Uuid,
    post_kind: String,
    message: Option<String>,
    thumbnail: Option<String>,
) -> Result<MessageResponse, ApiError> {
    ensure_group_member(state, group_id, sender).await?;
    let outgoing = post_share_outgoing(state, post_id, post_kind, message, thumbnail).await?;
    persist_group(state, sender, group_id, outgoing).await
}

// -- Read receipts --

/// Idempotently add `caller` to a direct message's read-by set in both
/// stores. When the relational row is missing (mirror-only delivery race)
/// the mirror is still updated so the client-visible state is correct; the
/// repair sweep reconciles the row once it appears. Returns false in that
/// mirror-only case.
pub async fn mark_read_direct(
    state: &AppState,
    caller: Uuid,
    friend: Uuid,
    mirror_key: &str,
) -> Result<bool, ApiError> {
    ensure_user_exists(state, friend, "Friend").await?;
    let base = direct_messages_path(caller, friend);

    let row = {
        let key = mirror_key.to_string();
        with_db(state, move |db| db.get_direct_by_mirror_key(&key)).await?
    };

    match row {
        Some(row) => {
            let caller_str = caller.to_string();
            if row.sender_id != caller_str && row.receiver_id != caller_str {
                return Err(ApiError::unauthorized(
                    "Only participants can mark a message as read",
                ));
            }
            // The mirror path is derived from the (caller, friend) pair, so
            // the named friend must be the row's other participant or the
            // read receipt would land under the wrong conversation.
            let other = if row.sender_id == caller_str {
                &row.receiver_id
            } else {
                &row.sender_id
            };
            if *other != friend.to_string() {
                return Err(ApiError::validation(
                    "Message does not belong to this conversation",
                ));
            }
            apply_read(state, &base, mirror_key, caller, &row.id, &row.read_by, true).await?;
            Ok(true)
        }
        None => {
            mirror_only_read(state, &base, mirror_key, caller)?;
            Ok(false)
        }
    }
}

/// Group variant of [`mark_read_direct`].
pub async fn mark_read_group(
    state: &AppState,
    caller: Uuid,
    group_id: Uuid,
    mirror_key: &str,
) -> Result<bool, ApiError> {
    ensure_group_member(state, group_id, caller).await?;
    let base = group_messages_path(group_id);

    let row = {
        let (gid, key) = (group_id.to_string(), mirror_key.to_string());
        with_db(state, move |db| db.get_group_message_by_mirror_key(&gid, &key)).await?
    };

    match row {
        Some(row) => {
            apply_read(state, &base, mirror_key, caller, &row.id, &row.read_by, false).await?;
            Ok(true)
        }
        None => {
            mirror_only_read(state, &base, mirror_key, caller)?;
            Ok(false)
        }
    }
}

async fn apply_read(
    state: &AppState,
    base: &str,
    mirror_key: &str,
    reader: Uuid,
    row_id: &str,
    read_by_json: &str,
    direct: bool,
) -> Result<(), ApiError> {
    let mut read_by = IdSet::from_json(read_by_json);
    if read_by.insert(reader) {
        let (id, json) = (row_id.to_string(), read_by.to_json());
        if direct {
            with_db(state, move |db| db.set_direct_read_by(&id, &json)).await?;
        } else {
            with_db(state, move |db| db.set_group_message_read_by(&id, &json)).await?;
        }
    }
    // Re-set the mirror even on a no-op so the two stores converge.
    state
        .mirror
        .set(&format!("{base}/{mirror_key}/read_by"), idset_value(&read_by))?;
    Ok(())
}

fn mirror_only_read(
    state: &AppState,
    base: &str,
    mirror_key: &str,
    reader: Uuid,
) -> Result<(), ApiError> {
    let path = format!("{base}/{mirror_key}/read_by");
    let mut read_by: IdSet = state
        .mirror
        .get(&path)?
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();
    read_by.insert(reader);
    state.mirror.set(&path, idset_value(&read_by))?;
    Ok(())
}

// -- Clear chat --

/// Hide every message of a direct conversation from `caller` by adding
/// them to each message's deleted-by set in both stores. Content is never
/// removed; the other participant's view is untouched, and calling again
/// is a no-op. Returns how many relational rows were newly hidden.
pub async fn clear_chat_direct(
    state: &AppState,
    caller: Uuid,
    friend: Uuid,
) -> Result<usize, ApiError> {
    ensure_user_exists(state, friend, "Friend").await?;
    let base = direct_messages_path(caller, friend);
    hide_mirror_messages(state, &base, caller)?;

    let rows = {
        let (a, b) = (caller.to_string(), friend.to_string());
        with_db(state, move |db| db.conversation_messages(&a, &b)).await?
    };
    let mut hidden = 0;
    for row in rows {
        let mut deleted_by = IdSet::from_json(&row.deleted_by);
        if deleted_by.insert(caller) {
            let (id, json) = (row.id.clone(), deleted_by.to_json());
            with_db(state, move |db| db.set_direct_deleted_by(&id, &json)).await?;
            hidden += 1;
        }
    }
    Ok(hidden)
}

/// Group variant of [`clear_chat_direct`]; caller must be a member.
pub async fn clear_chat_group(
    state: &AppState,
    caller: Uuid,
    group_id: Uuid,
) -> Result<usize, ApiError> {
    ensure_group_member(state, group_id, caller).await?;
    let base = group_messages_path(group_id);
    hide_mirror_messages(state, &base, caller)?;

    let rows = {
        let gid = group_id.to_string();
        with_db(state, move |db| db.group_messages(&gid)).await?
    };
    let mut hidden = 0;
    for row in rows {
        let mut deleted_by = IdSet::from_json(&row.deleted_by);
        if deleted_by.insert(caller) {
            let (id, json) = (row.id.clone(), deleted_by.to_json());
            with_db(state, move |db| db.set_group_message_deleted_by(&id, &json)).await?;
            hidden += 1;
        }
    }
    Ok(hidden)
}

fn hide_mirror_messages(state: &AppState, base: &str, user: Uuid) -> Result<(), ApiError> {
    for (key, value) in state.mirror.children(base)? {
        let mut deleted_by: IdSet = value
            .get("deleted_by")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        if deleted_by.insert(user) {
            state
                .mirror
                .set(&format!("{base}/{key}/deleted_by"), idset_value(&deleted_by))?;
        }
    }
    Ok(())
}

// -- Listing --

/// Both directions of a direct conversation, oldest first, minus messages
/// the caller has cleared.
pub async fn direct_conversation(
    state: &AppState,
    caller: Uuid,
    friend: Uuid,
) -> Result<Vec<MessageResponse>, ApiError> {
    ensure_user_exists(state, friend, "Friend").await?;
    let rows = {
        let (a, b) = (caller.to_string(), friend.to_string());
        with_db(state, move |db| db.conversation_messages(&a, &b)).await?
    };
    Ok(rows
        .iter()
        .filter(|row| !IdSet::from_json(&row.deleted_by).contains(caller))
        .map(direct_row_response)
        .collect())
}

pub async fn group_conversation(
    state: &AppState,
    caller: Uuid,
    group_id: Uuid,
) -> Result<Vec<MessageResponse>, ApiError> {
    ensure_group_member(state, group_id, caller).await?;
    let rows = {
        let gid = group_id.to_string();
        with_db(state, move |db| db.group_messages(&gid)).await?
    };
    Ok(rows
        .iter()
        .filter(|row| !IdSet::from_json(&row.deleted_by).contains(caller))
        .map(group_row_response)
        .collect())
}

// -- Repair sweep --

/// Republish rows whose mirror write never landed. Safe to run repeatedly;
/// a row already carrying a mirror key is overwritten in place rather than
/// pushed again.
pub async fn repair_sweep(state: &AppState) -> Result<usize, ApiError> {
    let mut repaired = 0;

    for row in with_db(state, |db| db.unsynced_direct_messages()).await? {
        let sender = parse_uuid(&row.sender_id, "messages.sender_id");
        let receiver = parse_uuid(&row.receiver_id, "messages.receiver_id");
        let path = direct_messages_path(sender, receiver);
        let value = mirror_value_from_parts(
            sender,
            &row.body,
            &row.kind,
            &row.media_url,
            &row.media_path,
            &row.read_by,
            &row.deleted_by,
            &row.created_at,
        );
        let key = republish(state, &path, row.mirror_key.as_deref(), value)?;
        let id = row.id.clone();
        with_db(state, move |db| db.set_direct_mirror(&id, &key)).await?;
        repaired += 1;
    }

    for row in with_db(state, |db| db.unsynced_group_messages()).await? {
        let sender = parse_uuid(&row.sender_id, "group_messages.sender_id");
        let group_id = parse_uuid(&row.group_id, "group_messages.group_id");
        let path = group_messages_path(group_id);
        let value = mirror_value_from_parts(
            sender,
            &row.body,
            &row.kind,
            &row.media_url,
            &row.media_path,
            &row.read_by,
            &row.deleted_by,
            &row.created_at,
        );
        let key = republish(state, &path, row.mirror_key.as_deref(), value)?;
        let id = row.id.clone();
        with_db(state, move |db| db.set_group_message_mirror(&id, &key)).await?;
        repaired += 1;
    }

    Ok(repaired)
}

fn republish(
    state: &AppState,
    path: &str,
    existing_key: Option<&str>,
    value: Value,
) -> Result<String, ApiError> {
    match existing_key {
        Some(key) => {
            state.mirror.set(&format!("{path}/{key}"), value)?;
            Ok(key.to_string())
        }
        None => Ok(state.mirror.push(path, value)?),
    }
}

/// Background task that periodically reconciles unsynced rows.
pub async fn run_repair_loop(state: AppState, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        interval.tick().await;
        match repair_sweep(&state).await {
            Ok(0) => {}
            Ok(n) => info!("Repair sweep republished {} messages", n),
            Err(e) => warn!("Repair sweep error: {}", e),
        }
    }
}

// -- Internals --

async fn ensure_user_exists(state: &AppState, id: Uuid, what: &str) -> Result<(), ApiError> {
    let id_str = id.to_string();
    if with_db(state, move |db| db.user_exists(&id_str)).await? {
        Ok(())
    } else {
        Err(ApiError::not_found(format!("{what} not found")))
    }
}

pub(crate) async fn load_group(state: &AppState, group_id: Uuid) -> Result<GroupRow, ApiError> {
    let gid = group_id.to_string();
    with_db(state, move |db| db.get_group(&gid))
        .await?
        .ok_or_else(|| ApiError::not_found("Group not found"))
}

pub(crate) async fn ensure_group_member(
    state: &AppState,
    group_id: Uuid,
    user: Uuid,
) -> Result<GroupRow, ApiError> {
    let group = load_group(state, group_id).await?;
    if !IdSet::from_json(&group.members).contains(user) {
        return Err(ApiError::unauthorized("Only group members may do this"));
    }
    Ok(group)
}

fn validate_upload(upload: &MediaUpload) -> Result<(), ApiError> {
    if upload.bytes.is_empty() {
        return Err(ApiError::validation("Attachment is empty"));
    }
    let limit = match upload.kind {
        MessageKind::Image => MAX_IMAGE_BYTES,
        MessageKind::File => MAX_FILE_BYTES,
        MessageKind::Voice => MAX_VOICE_BYTES,
        _ => return Err(ApiError::validation("Unsupported attachment kind")),
    };
    if upload.bytes.len() > limit {
        return Err(ApiError::validation("Attachment exceeds the size limit"));
    }
    if upload.kind == MessageKind::Voice {
        match upload.duration {
            Some(d) if (1..=MAX_VOICE_SECONDS).contains(&d) => {}
            _ => return Err(ApiError::validation("Voice duration must be 1-300 seconds")),
        }
    }
    Ok(())
}

/// Upload the attachment and build the outgoing descriptor. The returned
/// path is what a caller must delete if the relational write fails later.
async fn store_upload(
    state: &AppState,
    upload: &MediaUpload,
    dirs: &MediaDirs,
) -> Result<(Outgoing, String), ApiError> {
    let dir = match upload.kind {
        MessageKind::Image => dirs.image,
        MessageKind::File => dirs.file,
        MessageKind::Voice => dirs.voice,
        _ => unreachable!("validated above"),
    };
    let ext = extension_for(upload);
    let path = format!("{dir}/{}.{ext}", Uuid::new_v4());
    let path = state.media.put(&path, &upload.bytes).await?;
    let url = state.media.url(&path);

    let body = match upload.kind {
        MessageKind::Voice => "Voice message".to_string(),
        MessageKind::File => upload
            .caption
            .clone()
            .or_else(|| upload.filename.clone())
            .unwrap_or_default(),
        _ => upload.caption.clone().unwrap_or_default(),
    };

    let mut extra = Map::new();
    match upload.kind {
        MessageKind::Voice => {
            extra.insert("duration".into(), json!(upload.duration));
        }
        MessageKind::File => {
            extra.insert(
                "file".into(),
                json!({
                    "name": upload.filename,
                    "mime": upload.mime,
                    "size": upload.bytes.len(),
                }),
            );
        }
        _ => {}
    }

    let outgoing = Outgoing {
        kind: upload.kind,
        body,
        media_url: Some(url),
        media_path: Some(path.clone()),
        extra,
    };
    Ok((outgoing, path))
}

fn extension_for(upload: &MediaUpload) -> String {
    if let Some(ext) = upload
        .filename
        .as_deref()
        .and_then(|f| f.rsplit_once('.').map(|(_, e)| e))
        .filter(|e| !e.is_empty() && e.len() <= 8)
    {
        return ext.to_ascii_lowercase();
    }
    match upload.mime.as_deref() {
        Some("image/jpeg") => "jpg",
        Some("image/png") => "png",
        Some("image/gif") => "gif",
        Some("image/webp") => "webp",
        Some("audio/webm") => "webm",
        Some("audio/mpeg") => "mp3",
        Some("audio/ogg") => "ogg",
        Some("audio/wav") => "wav",
        _ => "bin",
    }
    .to_string()
}

async fn post_share_outgoing(
    state: &AppState,
    post_id: Uuid,
    post_kind: String,
    message: Option<String>,
    thumbnail: Option<String>,
) -> Result<Outgoing, ApiError> {
    let pid = post_id.to_string();
    if with_db(state, move |db| db.get_post(&pid)).await?.is_none() {
        return Err(ApiError::not_found("Post not found"));
    }

    let mut extra = Map::new();
    extra.insert(
        "post".into(),
        json!({
            "id": post_id,
            "post_kind": post_kind,
            "thumbnail": thumbnail,
        }),
    );
    Ok(Outgoing {
        kind: MessageKind::Post,
        body: message.unwrap_or_default(),
        media_url: thumbnail,
        media_path: None,
        extra,
    })
}

/// Relational write, then mirror push. Errors out of this function mean
/// the row was NOT committed; once the insert succeeds, mirror problems
/// only downgrade the response to `sync_status: pending`.
async fn persist_direct(
    state: &AppState,
    sender: Uuid,
    receiver: Uuid,
    outgoing: Outgoing,
) -> Result<MessageResponse, ApiError> {
    let id = Uuid::new_v4();
    let now = Utc::now();
    let created_at = now.to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
    let read_by = IdSet::single(sender);
    let deleted_by = IdSet::new();

    let row = DirectMessageRow {
        id: id.to_string(),
        sender_id: sender.to_string(),
        receiver_id: receiver.to_string(),
        body: outgoing.body.clone(),
        kind: outgoing.kind.as_str().to_string(),
        media_url: outgoing.media_url.clone(),
        media_path: outgoing.media_path.clone(),
        mirror_key: None,
        sync_status: SyncStatus::Pending.as_str().to_string(),
        read_by: read_by.to_json(),
        deleted_by: deleted_by.to_json(),
        created_at: created_at.clone(),
    };
    with_db(state, move |db| db.insert_direct_message(&row)).await?;

    let value = mirror_message_value(sender, &outgoing, now, &read_by, &deleted_by);
    let path = direct_messages_path(sender, receiver);
    let (mirror_key, sync_status) = publish(state, &path, id, value, true).await;

    Ok(MessageResponse {
        id,
        sender_id: sender,
        receiver_id: Some(receiver),
        group_id: None,
        body: outgoing.body,
        kind: outgoing.kind,
        media_url: outgoing.media_url,
        mirror_key,
        sync_status,
        read_by,
        deleted_by,
        created_at: now,
    })
}

async fn persist_group(
    state: &AppState,
    sender: Uuid,
    group_id: Uuid,
    outgoing: Outgoing,
) -> Result<MessageResponse, ApiError> {
    let id = Uuid::new_v4();
    let now = Utc::now();
    let created_at = now.to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
    let read_by = IdSet::single(sender);
    let deleted_by = IdSet::new();

    let row = GroupMessageRow {
        id: id.to_string(),
        group_id: group_id.to_string(),
        sender_id: sender.to_string(),
        body: outgoing.body.clone(),
        kind: outgoing.kind.as_str().to_string(),
        media_url: outgoing.media_url.clone(),
        media_path: outgoing.media_path.clone(),
        mirror_key: None,
        sync_status: SyncStatus::Pending.as_str().to_string(),
        read_by: read_by.to_json(),
        deleted_by: deleted_by.to_json(),
        created_at: created_at.clone(),
    };
    with_db(state, move |db| db.insert_group_message(&row)).await?;

    let value = mirror_message_value(sender, &outgoing, now, &read_by, &deleted_by);
    let path = group_messages_path(group_id);
    let (mirror_key, sync_status) = publish(state, &path, id, value, false).await;

    Ok(MessageResponse {
        id,
        sender_id: sender,
        receiver_id: None,
        group_id: Some(group_id),
        body: outgoing.body,
        kind: outgoing.kind,
        media_url: outgoing.media_url,
        mirror_key,
        sync_status,
        read_by,
        deleted_by,
        created_at: now,
    })
}

/// Mirror push plus key write-back. Never fails: a mirror or write-back
/// problem leaves the row pending for the repair sweep.
async fn publish(
    state: &AppState,
    path: &str,
    message_id: Uuid,
    value: Value,
    direct: bool,
) -> (Option<String>, SyncStatus) {
    let key = match state.mirror.push(path, value) {
        Ok(key) => key,
        Err(e) => {
            warn!("Mirror push failed for message {}: {}", message_id, e);
            return (None, SyncStatus::Pending);
        }
    };

    let (id, k) = (message_id.to_string(), key.clone());
    let write_back = if direct {
        with_db(state, move |db| db.set_direct_mirror(&id, &k)).await
    } else {
        with_db(state, move |db| db.set_group_message_mirror(&id, &k)).await
    };
    match write_back {
        Ok(()) => (Some(key), SyncStatus::Synced),
        Err(e) => {
            warn!("Mirror key write-back failed for message {}: {}", message_id, e);
            (Some(key), SyncStatus::Pending)
        }
    }
}

fn mirror_message_value(
    sender: Uuid,
    outgoing: &Outgoing,
    now: DateTime<Utc>,
    read_by: &IdSet,
    deleted_by: &IdSet,
) -> Value {
    let mut map = Map::new();
    map.insert("sender_id".into(), json!(sender));
    map.insert("text".into(), json!(outgoing.body));
    map.insert("timestamp".into(), json!(now.timestamp()));
    map.insert("kind".into(), json!(outgoing.kind));
    if let Some(url) = &outgoing.media_url {
        map.insert("media_url".into(), json!(url));
    }
    if let Some(path) = &outgoing.media_path {
        map.insert("media_path".into(), json!(path));
    }
    for (key, value) in &outgoing.extra {
        map.insert(key.clone(), value.clone());
    }
    map.insert("read_by".into(), idset_value(read_by));
    map.insert("deleted_by".into(), idset_value(deleted_by));
    Value::Object(map)
}

#[allow(clippy::too_many_arguments)]
fn mirror_value_from_parts(
    sender: Uuid,
    body: &str,
    kind: &str,
    media_url: &Option<String>,
    media_path: &Option<String>,
    read_by_json: &str,
    deleted_by_json: &str,
    created_at: &str,
) -> Value {
    let mut map = Map::new();
    map.insert("sender_id".into(), json!(sender));
    map.insert("text".into(), json!(body));
    map.insert(
        "timestamp".into(),
        json!(parse_timestamp(created_at, "message.created_at").timestamp()),
    );
    map.insert("kind".into(), json!(kind));
    if let Some(url) = media_url {
        map.insert("media_url".into(), json!(url));
    }
    if let Some(path) = media_path {
        map.insert("media_path".into(), json!(path));
    }
    map.insert("read_by".into(), idset_value(&IdSet::from_json(read_by_json)));
    map.insert(
        "deleted_by".into(),
        idset_value(&IdSet::from_json(deleted_by_json)),
    );
    Value::Object(map)
}

fn idset_value(set: &IdSet) -> Value {
    serde_json::to_value(set).unwrap_or_else(|_| json!([]))
}

pub(crate) fn direct_row_response(row: &DirectMessageRow) -> MessageResponse {
    MessageResponse {
        id: parse_uuid(&row.id, "messages.id"),
        sender_id: parse_uuid(&row.sender_id, "messages.sender_id"),
        receiver_id: Some(parse_uuid(&row.receiver_id, "messages.receiver_id")),
        group_id: None,
        body: row.body.clone(),
        kind: row.kind.parse().unwrap_or(MessageKind::Text),
        media_url: row.media_url.clone(),
        mirror_key: row.mirror_key.clone(),
        sync_status: row.sync_status.parse().unwrap_or(SyncStatus::Pending),
        read_by: IdSet::from_json(&row.read_by),
        deleted_by: IdSet::from_json(&row.deleted_by),
        created_at: parse_timestamp(&row.created_at, "messages.created_at"),
    }
}

pub(crate) fn group_row_response(row: &GroupMessageRow) -> MessageResponse {
    MessageResponse {
        id: parse_uuid(&row.id, "group_messages.id"),
        sender_id: parse_uuid(&row.sender_id, "group_messages.sender_id"),
        receiver_id: None,
        group_id: Some(parse_uuid(&row.group_id, "group_messages.group_id")),
        body: row.body.clone(),
        kind: row.kind.parse().unwrap_or(MessageKind::Text),
        media_url: row.media_url.clone(),
        mirror_key: row.mirror_key.clone(),
        sync_status: row.sync_status.parse().unwrap_or(SyncStatus::Pending),
        read_by: IdSet::from_json(&row.read_by),
        deleted_by: IdSet::from_json(&row.deleted_by),
        created_at: parse_timestamp(&row.created_at, "group_messages.created_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::now_rfc3339;
    use crate::test_util::{seed_user, test_state};

    fn seed_group(state: &AppState, creator: Uuid, others: &[Uuid]) -> Uuid {
        let group_id = Uuid::new_v4();
        let mut members = IdSet::single(creator);
        for id in others {
            members.insert(*id);
        }
        state
            .db
            .insert_group(&GroupRow {
                id: group_id.to_string(),
                name: "core".into(),
                photo_path: None,
                creator_id: creator.to_string(),
                members: members.to_json(),
                created_at: now_rfc3339(),
            })
            .unwrap();
        group_id
    }

    #[test]
    fn conversation_id_is_order_independent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(conversation_id(a, b), conversation_id(b, a));

        let c = Uuid::new_v4();
        assert_ne!(conversation_id(a, b), conversation_id(a, c));
    }

    #[tokio::test]
    async fn direct_text_send_writes_both_stores() {
        let (_dir, state) = test_state().await;
        let alice = seed_user(&state, "alice");
        let bob = seed_user(&state, "bob");

        let resp = send_direct_text(&state, alice, bob, "hi bob".into())
            .await
            .unwrap();
        assert_eq!(resp.sync_status, SyncStatus::Synced);
        assert_eq!(resp.read_by, IdSet::single(alice));
        let key = resp.mirror_key.clone().unwrap();

        let children = state
            .mirror
            .children(&direct_messages_path(alice, bob))
            .unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].0, key);
        assert_eq!(children[0].1["text"], "hi bob");
        assert_eq!(children[0].1["kind"], "text");

        let row = state
            .db
            .get_direct_by_mirror_key(&key)
            .unwrap()
            .expect("row carries the mirror key");
        assert_eq!(row.sync_status, "synced");
    }

    #[tokio::test]
    async fn mark_read_is_idempotent_across_both_stores() {
        let (_dir, state) = test_state().await;
        let alice = seed_user(&state, "alice");
        let bob = seed_user(&state, "bob");

        let resp = send_direct_text(&state, alice, bob, "hi".into()).await.unwrap();
        let key = resp.mirror_key.unwrap();

        assert!(mark_read_direct(&state, bob, alice, &key).await.unwrap());
        let row = state.db.get_direct_by_mirror_key(&key).unwrap().unwrap();
        let read_by = IdSet::from_json(&row.read_by);
        assert!(read_by.contains(alice) && read_by.contains(bob));

        // Second call changes nothing anywhere.
        mark_read_direct(&state, bob, alice, &key).await.unwrap();
        let row_again = state.db.get_direct_by_mirror_key(&key).unwrap().unwrap();
        assert_eq!(row.read_by, row_again.read_by);

        let path = format!("{}/{}/read_by", direct_messages_path(alice, bob), key);
        let mirror_read_by: IdSet =
            serde_json::from_value(state.mirror.get(&path).unwrap().unwrap()).unwrap();
        assert_eq!(mirror_read_by, read_by);
    }

    #[tokio::test]
    async fn mark_read_by_stranger_is_rejected() {
        let (_dir, state) = test_state().await;
        let alice = seed_user(&state, "alice");
        let bob = seed_user(&state, "bob");
        let mallory = seed_user(&state, "mallory");

        let resp = send_direct_text(&state, alice, bob, "secret".into()).await.unwrap();
        let key = resp.mirror_key.unwrap();

        let err = mark_read_direct(&state, mallory, alice, &key).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn mark_read_falls_back_to_mirror_when_row_is_missing() {
        let (_dir, state) = test_state().await;
        let alice = seed_user(&state, "alice");
        let bob = seed_user(&state, "bob");

        // Mirror-only entry, as if relational persistence raced behind.
        let path = direct_messages_path(alice, bob);
        let key = state
            .mirror
            .push(&path, json!({"text": "ghost", "read_by": [alice]}))
            .unwrap();

        let updated_row = mark_read_direct(&state, bob, alice, &key).await.unwrap();
        assert!(!updated_row);

        let read_by: IdSet = serde_json::from_value(
            state.mirror.get(&format!("{path}/{key}/read_by")).unwrap().unwrap(),
        )
        .unwrap();
        assert!(read_by.contains(alice) && read_by.contains(bob));
    }

    #[tokio::test]
    async fn mark_read_with_mismatched_friend_touches_neither_store() {
        let (_dir, state) = test_state().await;
        let alice = seed_user(&state, "alice");
        let bob = seed_user(&state, "bob");
        let carol = seed_user(&state, "carol");

        let resp = send_direct_text(&state, alice, bob, "hi".into()).await.unwrap();
        let key = resp.mirror_key.unwrap();

        // Bob names carol instead of alice while reusing a real key.
        let err = mark_read_direct(&state, bob, carol, &key).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        // The row is unchanged and no entry appeared under bob/carol.
        let row = state.db.get_direct_by_mirror_key(&key).unwrap().unwrap();
        assert_eq!(IdSet::from_json(&row.read_by), IdSet::single(alice));
        assert!(state
            .mirror
            .get(&direct_messages_path(bob, carol))
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn clear_chat_is_idempotent_and_per_user() {
        let (_dir, state) = test_state().await;
        let alice = seed_user(&state, "alice");
        let bob = seed_user(&state, "bob");

        send_direct_text(&state, alice, bob, "one".into()).await.unwrap();
        send_direct_text(&state, bob, alice, "two".into()).await.unwrap();

        assert_eq!(clear_chat_direct(&state, bob, alice).await.unwrap(), 2);
        assert_eq!(clear_chat_direct(&state, bob, alice).await.unwrap(), 0);

        // Bob sees nothing, alice still sees everything in full.
        let bobs = direct_conversation(&state, bob, alice).await.unwrap();
        assert!(bobs.is_empty());
        let alices = direct_conversation(&state, alice, bob).await.unwrap();
        assert_eq!(alices.len(), 2);
        assert_eq!(alices[0].body, "one");

        // Mirror entries kept their content, only deleted_by grew.
        for (_, value) in state.mirror.children(&direct_messages_path(alice, bob)).unwrap() {
            let deleted_by: IdSet = serde_json::from_value(value["deleted_by"].clone()).unwrap();
            assert!(deleted_by.contains(bob) && !deleted_by.contains(alice));
            assert!(value["text"].is_string());
        }
    }

    #[tokio::test]
    async fn group_send_requires_membership() {
        let (_dir, state) = test_state().await;
        let ann = seed_user(&state, "ann");
        let outsider = seed_user(&state, "outsider");
        let group_id = seed_group(&state, ann, &[]);

        let err = send_group_text(&state, outsider, group_id, "hi".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));

        // No write happened in either store.
        assert!(state.db.group_messages(&group_id.to_string()).unwrap().is_empty());
        assert!(state.mirror.children(&group_messages_path(group_id)).unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_relational_write_cleans_up_uploaded_object() {
        let (dir, state) = test_state().await;
        let alice = seed_user(&state, "alice");
        let bob = seed_user(&state, "bob");

        // Force the insert to fail after the upload.
        state
            .db
            .with_conn_mut(|conn| {
                conn.execute("DROP TABLE messages", [])?;
                Ok(())
            })
            .unwrap();

        let upload = MediaUpload {
            kind: MessageKind::Image,
            bytes: vec![0xFF; 128],
            caption: Some("pic".into()),
            filename: Some("pic.png".into()),
            mime: Some("image/png".into()),
            duration: None,
        };
        let err = send_direct_media(&state, alice, bob, upload).await.unwrap_err();
        assert!(matches!(err, ApiError::Upstream(_)));

        // The compensating delete ran: the upload directory holds nothing.
        let image_dir = dir.path().join(DIRECT_MEDIA_DIRS.image);
        let leftover = std::fs::read_dir(&image_dir)
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftover, 0);
    }

    #[tokio::test]
    async fn voice_upload_validates_duration() {
        let (_dir, state) = test_state().await;
        let alice = seed_user(&state, "alice");
        let bob = seed_user(&state, "bob");

        let upload = MediaUpload {
            kind: MessageKind::Voice,
            bytes: vec![1; 64],
            caption: None,
            filename: None,
            mime: Some("audio/webm".into()),
            duration: Some(301),
        };
        let err = send_direct_media(&state, alice, bob, upload).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn repair_sweep_republishes_pending_rows() {
        let (_dir, state) = test_state().await;
        let alice = seed_user(&state, "alice");
        let bob = seed_user(&state, "bob");

        // A row the mirror never saw.
        let id = Uuid::new_v4();
        state
            .db
            .insert_direct_message(&DirectMessageRow {
                id: id.to_string(),
                sender_id: alice.to_string(),
                receiver_id: bob.to_string(),
                body: "stranded".into(),
                kind: "text".into(),
                media_url: None,
                media_path: None,
                mirror_key: None,
                sync_status: "pending".into(),
                read_by: IdSet::single(alice).to_json(),
                deleted_by: IdSet::new().to_json(),
                created_at: now_rfc3339(),
            })
            .unwrap();

        assert_eq!(repair_sweep(&state).await.unwrap(), 1);

        let children = state.mirror.children(&direct_messages_path(alice, bob)).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].1["text"], "stranded");
        assert!(state.db.unsynced_direct_messages().unwrap().is_empty());

        // Second sweep finds nothing to do.
        assert_eq!(repair_sweep(&state).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn group_mark_read_is_idempotent_across_both_stores() {
        let (_dir, state) = test_state().await;
        let ann = seed_user(&state, "ann");
        let ben = seed_user(&state, "ben");
        let group_id = seed_group(&state, ann, &[ben]);

        let resp = send_group_text(&state, ann, group_id, "hello".into()).await.unwrap();
        let key = resp.mirror_key.unwrap();

        assert!(mark_read_group(&state, ben, group_id, &key).await.unwrap());
        let row = state
            .db
            .get_group_message_by_mirror_key(&group_id.to_string(), &key)
            .unwrap()
            .unwrap();
        let read_by = IdSet::from_json(&row.read_by);
        assert!(read_by.contains(ann) && read_by.contains(ben));

        // Second call changes nothing anywhere.
        mark_read_group(&state, ben, group_id, &key).await.unwrap();
        let row_again = state
            .db
            .get_group_message_by_mirror_key(&group_id.to_string(), &key)
            .unwrap()
            .unwrap();
        assert_eq!(row.read_by, row_again.read_by);

        let path = format!("{}/{key}/read_by", group_messages_path(group_id));
        let mirror_read_by: IdSet =
            serde_json::from_value(state.mirror.get(&path).unwrap().unwrap()).unwrap();
        assert_eq!(mirror_read_by, read_by);
    }

    #[tokio::test]
    async fn group_clear_chat_is_idempotent_and_per_member() {
        let (_dir, state) = test_state().await;
        let ann = seed_user(&state, "ann");
        let ben = seed_user(&state, "ben");
        let group_id = seed_group(&state, ann, &[ben]);

        send_group_text(&state, ann, group_id, "one".into()).await.unwrap();
        send_group_text(&state, ben, group_id, "two".into()).await.unwrap();

        assert_eq!(clear_chat_group(&state, ben, group_id).await.unwrap(), 2);
        assert_eq!(clear_chat_group(&state, ben, group_id).await.unwrap(), 0);

        // Ben sees nothing, ann still sees both messages.
        assert!(group_conversation(&state, ben, group_id).await.unwrap().is_empty());
        let anns = group_conversation(&state, ann, group_id).await.unwrap();
        assert_eq!(anns.len(), 2);

        // Mirror entries kept their content, only deleted_by grew.
        for (_, value) in state.mirror.children(&group_messages_path(group_id)).unwrap() {
            let deleted_by: IdSet = serde_json::from_value(value["deleted_by"].clone()).unwrap();
            assert!(deleted_by.contains(ben) && !deleted_by.contains(ann));
            assert!(value["text"].is_string());
        }
    }
}
