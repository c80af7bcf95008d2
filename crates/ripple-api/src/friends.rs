//! Friend graph: requests, accept/reject, listings. At most one active
//! (pending or accepted) edge may exist per unordered user pair; the
//! direction only records who asked. Re-sending your own pending request
//! or accepting an already-accepted one is a no-op, not an error.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use ripple_db::models::{FriendRow, UserRow};
use ripple_types::api::{Claims, FriendRequestPayload, FriendshipResponse, UserSummary};
use ripple_types::models::FriendStatus;

use crate::error::ApiError;
use crate::{AppState, now_rfc3339, parse_timestamp, parse_uuid, with_db};

// -- Core operations --

pub async fn send_request(
    state: &AppState,
    caller: Uuid,
    target: Uuid,
) -> Result<FriendshipResponse, ApiError> {
    if caller == target {
        return Err(ApiError::validation("You cannot befriend yourself"));
    }
    {
        let tid = target.to_string();
        if !with_db(state, move |db| db.user_exists(&tid)).await? {
            return Err(ApiError::not_found("User not found"));
        }
    }

    let existing = {
        let (a, b) = (caller.to_string(), target.to_string());
        with_db(state, move |db| db.find_active_edge(&a, &b)).await?
    };
    if let Some(edge) = existing {
        // Repeating your own pending request is harmless.
        if edge.status == FriendStatus::Pending.as_str() && edge.requester_id == caller.to_string()
        {
            return Ok(friend_response(&edge));
        }
        return Err(ApiError::conflict(
            "A friend request or friendship already exists",
        ));
    }

    let id = Uuid::new_v4();
    let created_at = now_rfc3339();
    {
        let (fid, rid, tid, now) = (
            id.to_string(),
            caller.to_string(),
            target.to_string(),
            created_at.clone(),
        );
        with_db(state, move |db| db.create_friend_request(&fid, &rid, &tid, &now)).await?;
    }

    Ok(FriendshipResponse {
        id,
        requester_id: caller,
        target_id: target,
        status: FriendStatus::Pending,
        created_at: parse_timestamp(&created_at, "friends.created_at"),
    })
}

/// Accept or reject a pending request. Only the target may respond; the
/// requester asking is an authorization failure, not a missing row.
pub async fn respond(
    state: &AppState,
    caller: Uuid,
    friend_id: Uuid,
    status: FriendStatus,
) -> Result<FriendshipResponse, ApiError> {
    let edge = {
        let fid = friend_id.to_string();
        with_db(state, move |db| db.get_friend_by_id(&fid))
            .await?
            .ok_or_else(|| ApiError::not_found("Friend request not found"))?
    };
    if edge.target_id != caller.to_string() {
        return Err(ApiError::unauthorized(
            "Only the request target may respond",
        ));
    }
    if edge.status == status.as_str() {
        return Ok(friend_response(&edge));
    }
    if edge.status != FriendStatus::Pending.as_str() {
        return Err(ApiError::conflict("This request was already resolved"));
    }

    {
        let (fid, s, now) = (friend_id.to_string(), status.as_str(), now_rfc3339());
        with_db(state, move |db| db.set_friend_status(&fid, s, &now)).await?;
    }
    Ok(friend_response(&FriendRow {
        status: status.as_str().to_string(),
        ..edge
    }))
}

pub async fn pending_requests(
    state: &AppState,
    caller: Uuid,
) -> Result<Vec<FriendshipResponse>, ApiError> {
    let rows = {
        let uid = caller.to_string();
        with_db(state, move |db| db.pending_requests_for(&uid)).await?
    };
    Ok(rows.iter().map(friend_response).collect())
}

/// Accepted friends of the caller, as user summaries.
pub async fn friends_of(state: &AppState, caller: Uuid) -> Result<Vec<UserSummary>, ApiError> {
    let uid = caller.to_string();
    let ids = friend_ids_of(state, &uid).await?;
    let users = with_db(state, move |db| db.get_users_by_ids(&ids)).await?;
    Ok(users.iter().map(user_summary).collect())
}

/// Ids of everyone sharing an accepted edge with `user_id`.
pub(crate) async fn friend_ids_of(state: &AppState, user_id: &str) -> Result<Vec<String>, ApiError> {
    let uid = user_id.to_string();
    let edges = {
        let ids = vec![uid.clone()];
        with_db(state, move |db| db.accepted_edges_touching(&ids)).await?
    };
    let mut out: Vec<String> = edges
        .into_iter()
        .map(|(requester, target)| if requester == uid { target } else { requester })
        .collect();
    out.sort();
    out.dedup();
    Ok(out)
}

// -- Handlers --

pub async fn send_friend_request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<FriendRequestPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let resp = send_request(&state, claims.sub, req.target_id).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

pub async fn accept_friend_request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(friend_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        respond(&state, claims.sub, friend_id, FriendStatus::Accepted).await?,
    ))
}

pub async fn reject_friend_request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(friend_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        respond(&state, claims.sub, friend_id, FriendStatus::Rejected).await?,
    ))
}

pub async fn list_pending(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(pending_requests(&state, claims.sub).await?))
}

pub async fn list_friends(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(friends_of(&state, claims.sub).await?))
}

// -- Internals --

fn friend_response(row: &FriendRow) -> FriendshipResponse {
    FriendshipResponse {
        id: parse_uuid(&row.id, "friends.id"),
        requester_id: parse_uuid(&row.requester_id, "friends.requester_id"),
        target_id: parse_uuid(&row.target_id, "friends.target_id"),
        status: row.status.parse().unwrap_or(FriendStatus::Pending),
        created_at: parse_timestamp(&row.created_at, "friends.created_at"),
    }
}

pub(crate) fn user_summary(row: &UserRow) -> UserSummary {
    UserSummary {
        id: parse_uuid(&row.id, "users.id"),
        name: row.name.clone(),
        email: row.email.clone(),
        phone: row.phone.clone(),
    }
}
