//! Post publishing and reactions.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use uuid::Uuid;

use ripple_types::api::{Claims, CreatePostRequest, PostResponse, ReactRequest};

use crate::error::ApiError;
use crate::{AppState, now_rfc3339, parse_timestamp, with_db};

pub const MAX_POST_CHARS: usize = 5000;

const REACTION_KINDS: [&str; 6] = ["like", "love", "haha", "wow", "sad", "angry"];

// -- Core operations --

pub async fn create(
    state: &AppState,
    author: Uuid,
    content: String,
) -> Result<PostResponse, ApiError> {
    let content = content.trim().to_string();
    if content.is_empty() {
        return Err(ApiError::validation("Post content is required"));
    }
    if content.chars().count() > MAX_POST_CHARS {
        return Err(ApiError::validation("Post content is too long"));
    }

    let id = Uuid::new_v4();
    let created_at = now_rfc3339();
    {
        let (pid, aid, body, now) = (
            id.to_string(),
            author.to_string(),
            content.clone(),
            created_at.clone(),
        );
        with_db(state, move |db| db.insert_post(&pid, &aid, &body, &now)).await?;
    }

    Ok(PostResponse {
        id,
        author_id: author,
        content,
        created_at: parse_timestamp(&created_at, "posts.created_at"),
    })
}

/// One reaction per user per post; reacting again replaces the kind.
pub async fn react(
    state: &AppState,
    caller: Uuid,
    post_id: Uuid,
    kind: String,
) -> Result<(), ApiError> {
    if !REACTION_KINDS.contains(&kind.as_str()) {
        return Err(ApiError::validation("Unknown reaction kind"));
    }
    {
        let pid = post_id.to_string();
        if with_db(state, move |db| db.get_post(&pid)).await?.is_none() {
            return Err(ApiError::not_found("Post not found"));
        }
    }

    let (rid, pid, uid, now) = (
        Uuid::new_v4().to_string(),
        post_id.to_string(),
        caller.to_string(),
        now_rfc3339(),
    );
    with_db(state, move |db| db.upsert_reaction(&rid, &pid, &uid, &kind, &now)).await
}

// -- Handlers --

pub async fn create_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreatePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let resp = create(&state, claims.sub, req.content).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

pub async fn react_to_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<Uuid>,
    Json(req): Json<ReactRequest>,
) -> Result<impl IntoResponse, ApiError> {
    react(&state, claims.sub, post_id, req.kind).await?;
    Ok(Json(json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{seed_user, test_state};

    #[tokio::test]
    async fn empty_posts_are_rejected() {
        let (_dir, state) = test_state().await;
        let alice = seed_user(&state, "alice");

        let err = create(&state, alice, "   ".into()).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_reaction_kinds_are_rejected() {
        let (_dir, state) = test_state().await;
        let alice = seed_user(&state, "alice");
        let bob = seed_user(&state, "bob");

        let post = create(&state, bob, "hello".into()).await.unwrap();
        let err = react(&state, alice, post.id, "meh".into()).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn reacting_to_a_missing_post_is_not_found() {
        let (_dir, state) = test_state().await;
        let alice = seed_user(&state, "alice");

        let err = react(&state, alice, Uuid::new_v4(), "like".into()).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
