//! REST handlers for group messaging; delegates to [`crate::chat`].

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use uuid::Uuid;

use ripple_types::api::{
    Claims, GroupClearChatRequest, GroupMarkReadRequest, GroupMediaMessageRequest,
    GroupSendRequest, GroupSharePostRequest, GroupVoiceMessageRequest,
};
use ripple_types::models::MessageKind;

use crate::chat::{self, MediaUpload};
use crate::decode_base64;
use crate::error::ApiError;
use crate::AppState;

pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<GroupSendRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let resp = chat::send_group_text(&state, claims.sub, req.group_id, req.message).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

pub async fn send_image(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<GroupMediaMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let upload = MediaUpload {
        kind: MessageKind::Image,
        bytes: decode_base64(&req.data)?,
        caption: req.caption,
        filename: req.filename,
        mime: req.mime,
        duration: None,
    };
    let resp = chat::send_group_media(&state, claims.sub, req.group_id, upload).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

pub async fn send_file(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<GroupMediaMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let upload = MediaUpload {
        kind: MessageKind::File,
        bytes: decode_base64(&req.data)?,
        caption: req.caption,
        filename: req.filename,
        mime: req.mime,
        duration: None,
    };
    let resp = chat::send_group_media(&state, claims.sub, req.group_id, upload).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

pub async fn send_voice(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<GroupVoiceMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let upload = MediaUpload {
        kind: MessageKind::Voice,
        bytes: decode_base64(&req.data)?,
        caption: None,
        filename: None,
        mime: Some("audio/webm".into()),
        duration: Some(req.duration),
    };
    let resp = chat::send_group_media(&state, claims.sub, req.group_id, upload).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

pub async fn share_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<GroupSharePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let resp = chat::send_group_post_share(
        &state,
        claims.sub,
        req.group_id,
        req.post_id,
        req.post_kind,
        req.message,
        req.thumbnail,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<GroupMarkReadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let synced =
        chat::mark_read_group(&state, claims.sub, req.group_id, &req.message_key).await?;
    Ok(Json(json!({ "success": true, "synced": synced })))
}

pub async fn clear_chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<GroupClearChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let cleared = chat::clear_chat_group(&state, claims.sub, req.group_id).await?;
    Ok(Json(json!({ "success": true, "cleared": cleared })))
}

pub async fn conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(group_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = chat::group_conversation(&state, claims.sub, group_id).await?;
    Ok(Json(messages))
}
