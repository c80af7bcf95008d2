//! Group chat lifecycle: create, rename, photo, membership. Metadata is
//! mirrored under `groups/{id}/info` and membership as a map at
//! `groups/{id}/members/{uid}`, so realtime clients see changes without
//! polling. Membership edits are creator-only and idempotent: re-adding a
//! member or removing a non-member changes nothing and does not error.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::{Map, Value, json};
use tracing::warn;
use uuid::Uuid;

use ripple_db::models::GroupRow;
use ripple_types::api::{
    AddMembersRequest, Claims, CreateGroupRequest, GroupResponse, PhotoUpload,
    RemoveMemberRequest, UpdateGroupRequest, UserSummary,
};
use ripple_types::models::IdSet;

use crate::chat::{ensure_group_member, load_group};
use crate::error::ApiError;
use crate::friends::user_summary;
use crate::{AppState, decode_base64, now_rfc3339, parse_timestamp, parse_uuid, with_db};

pub const MAX_PHOTO_BYTES: usize = 5 * 1024 * 1024;
const PHOTO_DIR: &str = "group-photos";

fn group_info_path(group_id: Uuid) -> String {
    format!("groups/{group_id}/info")
}

fn group_member_path(group_id: Uuid, user: Uuid) -> String {
    format!("groups/{group_id}/members/{user}")
}

// -- Core operations --

pub async fn create(
    state: &AppState,
    creator: Uuid,
    name: String,
    members: Vec<Uuid>,
    photo: Option<PhotoUpload>,
) -> Result<GroupResponse, ApiError> {
    let name = name.trim().to_string();
    if name.is_empty() || name.len() > 255 {
        return Err(ApiError::validation("Group name must be 1-255 characters"));
    }

    // The creator is always a member, whatever the request listed.
    let mut member_set: IdSet = members.into_iter().collect();
    member_set.insert(creator);
    ensure_users_exist(state, &member_set).await?;

    let photo_path = match photo {
        Some(photo) => Some(store_photo(state, &photo).await?),
        None => None,
    };

    let group_id = Uuid::new_v4();
    let row = GroupRow {
        id: group_id.to_string(),
        name: name.clone(),
        photo_path,
        creator_id: creator.to_string(),
        members: member_set.to_json(),
        created_at: now_rfc3339(),
    };
    let resp = group_response(state, &row);
    with_db(state, move |db| db.insert_group(&row)).await?;

    state.mirror.set(&group_info_path(group_id), info_value(&resp))?;
    for member in resp.members.iter() {
        state
            .mirror
            .set(&group_member_path(group_id, member), json!(true))?;
    }
    Ok(resp)
}

pub async fn my_groups(state: &AppState, caller: Uuid) -> Result<Vec<GroupResponse>, ApiError> {
    let rows = {
        let uid = caller.to_string();
        with_db(state, move |db| db.groups_for_user(&uid)).await?
    };
    Ok(rows.iter().map(|row| group_response(state, row)).collect())
}

pub async fn update(
    state: &AppState,
    caller: Uuid,
    group_id: Uuid,
    name: String,
    photo: Option<PhotoUpload>,
) -> Result<GroupResponse, ApiError> {
    let name = name.trim().to_string();
    if name.is_empty() || name.len() > 255 {
        return Err(ApiError::validation("Group name must be 1-255 characters"));
    }
    let group = ensure_creator(state, group_id, caller).await?;

    let photo_path = match photo {
        Some(photo) => {
            let path = store_photo(state, &photo).await?;
            // The previous photo is unreferenced once the row updates.
            if let Some(old) = &group.photo_path {
                if let Err(del) = state.media.delete(old).await {
                    warn!("Cleanup of replaced group photo {} failed: {}", old, del);
                }
            }
            Some(path)
        }
        None => group.photo_path.clone(),
    };

    {
        let (gid, name, path, now) = (
            group_id.to_string(),
            name.clone(),
            photo_path.clone(),
            now_rfc3339(),
        );
        with_db(state, move |db| {
            db.update_group_details(&gid, &name, path.as_deref(), &now)
        })
        .await?;
    }

    let row = GroupRow {
        name,
        photo_path,
        ..group
    };
    let resp = group_response(state, &row);

    let mut fields = Map::new();
    fields.insert("name".into(), json!(resp.name));
    fields.insert("photo_url".into(), json!(resp.photo_url));
    state.mirror.update(&group_info_path(group_id), fields)?;
    Ok(resp)
}

pub async fn add_members(
    state: &AppState,
    caller: Uuid,
    group_id: Uuid,
    members: Vec<Uuid>,
) -> Result<GroupResponse, ApiError> {
    if members.is_empty() {
        return Err(ApiError::validation("At least one member is required"));
    }
    let group = ensure_creator(state, group_id, caller).await?;

    let additions: IdSet = members.into_iter().collect();
    ensure_users_exist(state, &additions).await?;

    let mut member_set = IdSet::from_json(&group.members);
    let mut added = Vec::new();
    for id in additions.iter() {
        if member_set.insert(id) {
            added.push(id);
        }
    }
    if !added.is_empty() {
        write_members(state, group_id, &member_set).await?;
    }
    for id in added {
        state
            .mirror
            .set(&group_member_path(group_id, id), json!(true))?;
    }

    let row = GroupRow {
        members: member_set.to_json(),
        ..group
    };
    Ok(group_response(state, &row))
}

pub async fn remove_member(
    state: &AppState,
    caller: Uuid,
    group_id: Uuid,
    member: Uuid,
) -> Result<GroupResponse, ApiError> {
    let group = ensure_creator(state, group_id, caller).await?;
    if member.to_string() == group.creator_id {
        return Err(ApiError::validation("The creator cannot be removed"));
    }

    let mut member_set = IdSet::from_json(&group.members);
    if member_set.remove(member) {
        write_members(state, group_id, &member_set).await?;
    }
    // Message history keeps the departed member in read_by; only the
    // membership entry goes away.
    state.mirror.remove(&group_member_path(group_id, member))?;

    let row = GroupRow {
        members: member_set.to_json(),
        ..group
    };
    Ok(group_response(state, &row))
}

/// Member roster as user summaries; any member may fetch it.
pub async fn members(
    state: &AppState,
    caller: Uuid,
    group_id: Uuid,
) -> Result<Vec<UserSummary>, ApiError> {
    let group = ensure_group_member(state, group_id, caller).await?;
    let ids: Vec<String> = IdSet::from_json(&group.members)
        .iter()
        .map(|id| id.to_string())
        .collect();
    let rows = with_db(state, move |db| db.get_users_by_ids(&ids)).await?;
    Ok(rows.iter().map(user_summary).collect())
}

// -- Handlers --

pub async fn create_group(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let resp = create(&state, claims.sub, req.name, req.members, req.photo).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

pub async fn list_my_groups(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(my_groups(&state, claims.sub).await?))
}

pub async fn update_group(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(group_id): Path<Uuid>,
    Json(req): Json<UpdateGroupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        update(&state, claims.sub, group_id, req.name, req.photo).await?,
    ))
}

pub async fn add_group_members(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AddMembersRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        add_members(&state, claims.sub, req.group_id, req.members).await?,
    ))
}

pub async fn remove_group_member(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RemoveMemberRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        remove_member(&state, claims.sub, req.group_id, req.member_id).await?,
    ))
}

pub async fn get_group_members(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(group_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(members(&state, claims.sub, group_id).await?))
}

// -- Internals --

async fn ensure_creator(
    state: &AppState,
    group_id: Uuid,
    caller: Uuid,
) -> Result<GroupRow, ApiError> {
    let group = load_group(state, group_id).await?;
    if group.creator_id != caller.to_string() {
        return Err(ApiError::unauthorized(
            "Only the group creator may manage the group",
        ));
    }
    Ok(group)
}

async fn ensure_users_exist(state: &AppState, ids: &IdSet) -> Result<(), ApiError> {
    let wanted = ids.len();
    let id_strings: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
    let found = with_db(state, move |db| db.get_users_by_ids(&id_strings))
        .await?
        .len();
    if found != wanted {
        return Err(ApiError::not_found("One or more users do not exist"));
    }
    Ok(())
}

async fn store_photo(state: &AppState, photo: &PhotoUpload) -> Result<String, ApiError> {
    let bytes = decode_base64(&photo.data)?;
    if bytes.is_empty() {
        return Err(ApiError::validation("Photo is empty"));
    }
    if bytes.len() > MAX_PHOTO_BYTES {
        return Err(ApiError::validation("Photo exceeds the size limit"));
    }
    let ext = match photo.mime.as_deref() {
        Some("image/png") => "png",
        Some("image/gif") => "gif",
        Some("image/webp") => "webp",
        _ => "jpg",
    };
    let path = format!("{PHOTO_DIR}/{}.{ext}", Uuid::new_v4());
    Ok(state.media.put(&path, &bytes).await?)
}

async fn write_members(state: &AppState, group_id: Uuid, members: &IdSet) -> Result<(), ApiError> {
    let (gid, json, now) = (group_id.to_string(), members.to_json(), now_rfc3339());
    with_db(state, move |db| db.update_group_members(&gid, &json, &now)).await
}

fn group_response(state: &AppState, row: &GroupRow) -> GroupResponse {
    GroupResponse {
        id: parse_uuid(&row.id, "group_chats.id"),
        name: row.name.clone(),
        photo_url: row.photo_path.as_deref().map(|p| state.media.url(p)),
        creator_id: parse_uuid(&row.creator_id, "group_chats.creator_id"),
        members: IdSet::from_json(&row.members),
        created_at: parse_timestamp(&row.created_at, "group_chats.created_at"),
    }
}

fn info_value(group: &GroupResponse) -> Value {
    json!({
        "name": group.name,
        "photo_url": group.photo_url,
        "creator_id": group.creator_id,
        "created_at": group.created_at.timestamp(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{seed_user, test_state};

    #[tokio::test]
    async fn create_always_includes_the_creator() {
        let (_dir, state) = test_state().await;
        let ann = seed_user(&state, "ann");
        let ben = seed_user(&state, "ben");

        let group = create(&state, ann, "hikers".into(), vec![ben], None)
            .await
            .unwrap();
        assert!(group.members.contains(ann));
        assert!(group.members.contains(ben));
        assert_eq!(group.creator_id, ann);

        let info = state.mirror.get(&group_info_path(group.id)).unwrap().unwrap();
        assert_eq!(info["name"], "hikers");
        let entry = state.mirror.get(&group_member_path(group.id, ann)).unwrap();
        assert_eq!(entry, Some(json!(true)));
    }

    #[tokio::test]
    async fn create_rejects_unknown_members() {
        let (_dir, state) = test_state().await;
        let ann = seed_user(&state, "ann");

        let err = create(&state, ann, "ghosts".into(), vec![Uuid::new_v4()], None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn membership_edits_are_creator_only() {
        let (_dir, state) = test_state().await;
        let ann = seed_user(&state, "ann");
        let ben = seed_user(&state, "ben");
        let cy = seed_user(&state, "cy");

        let group = create(&state, ann, "core".into(), vec![ben], None)
            .await
            .unwrap();

        let err = add_members(&state, ben, group.id, vec![cy]).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
        let err = remove_member(&state, ben, group.id, ann).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn add_members_is_idempotent() {
        let (_dir, state) = test_state().await;
        let ann = seed_user(&state, "ann");
        let ben = seed_user(&state, "ben");

        let group = create(&state, ann, "core".into(), vec![ben], None)
            .await
            .unwrap();
        let after = add_members(&state, ann, group.id, vec![ben]).await.unwrap();
        assert_eq!(after.members, group.members);
    }

    #[tokio::test]
    async fn remove_member_updates_both_stores() {
        let (_dir, state) = test_state().await;
        let ann = seed_user(&state, "ann");
        let ben = seed_user(&state, "ben");

        let group = create(&state, ann, "core".into(), vec![ben], None)
            .await
            .unwrap();
        let after = remove_member(&state, ann, group.id, ben).await.unwrap();
        assert!(!after.members.contains(ben));

        let row = state.db.get_group(&group.id.to_string()).unwrap().unwrap();
        assert!(!IdSet::from_json(&row.members).contains(ben));
        assert!(state
            .mirror
            .get(&group_member_path(group.id, ben))
            .unwrap()
            .is_none());

        // Removing again is a quiet no-op.
        let again = remove_member(&state, ann, group.id, ben).await.unwrap();
        assert_eq!(again.members, after.members);
    }

    #[tokio::test]
    async fn creator_cannot_be_removed() {
        let (_dir, state) = test_state().await;
        let ann = seed_user(&state, "ann");

        let group = create(&state, ann, "solo".into(), vec![], None).await.unwrap();
        let err = remove_member(&state, ann, group.id, ann).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn update_merges_into_mirror_info() {
        let (_dir, state) = test_state().await;
        let ann = seed_user(&state, "ann");

        let group = create(&state, ann, "old name".into(), vec![], None)
            .await
            .unwrap();
        update(&state, ann, group.id, "new name".into(), None)
            .await
            .unwrap();

        let info = state.mirror.get(&group_info_path(group.id)).unwrap().unwrap();
        assert_eq!(info["name"], "new name");
        assert_eq!(info["creator_id"], json!(ann));
    }

    #[tokio::test]
    async fn replacing_the_photo_drops_the_old_object() {
        use base64::Engine;

        let (_dir, state) = test_state().await;
        let ann = seed_user(&state, "ann");

        let photo = |byte: u8| PhotoUpload {
            data: base64::engine::general_purpose::STANDARD.encode([byte; 32]),
            mime: Some("image/png".into()),
        };
        let group = create(&state, ann, "snaps".into(), vec![], Some(photo(1)))
            .await
            .unwrap();
        let old = state
            .db
            .get_group(&group.id.to_string())
            .unwrap()
            .unwrap()
            .photo_path
            .unwrap();
        assert!(state.media.exists(&old).await);

        update(&state, ann, group.id, "snaps".into(), Some(photo(2)))
            .await
            .unwrap();
        assert!(!state.media.exists(&old).await);
        let new = state
            .db
            .get_group(&group.id.to_string())
            .unwrap()
            .unwrap()
            .photo_path
            .unwrap();
        assert_ne!(new, old);
        assert!(state.media.exists(&new).await);
    }

    #[tokio::test]
    async fn roster_is_member_visible_only() {
        let (_dir, state) = test_state().await;
        let ann = seed_user(&state, "ann");
        let ben = seed_user(&state, "ben");
        let outsider = seed_user(&state, "outsider");

        let group = create(&state, ann, "core".into(), vec![ben], None)
            .await
            .unwrap();

        let roster = members(&state, ben, group.id).await.unwrap();
        assert_eq!(roster.len(), 2);

        let err = members(&state, outsider, group.id).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }
}
