//! REST handlers for direct messaging. These stay thin: decode the
//! payload, then delegate to the dual-write core in [`crate::chat`].

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use uuid::Uuid;

use ripple_types::api::{
    Claims, ClearChatRequest, MarkReadRequest, MediaMessageRequest, SendMessageRequest,
    SharePostRequest, VoiceMessageRequest,
};
use ripple_types::models::MessageKind;

use crate::chat::{self, MediaUpload};
use crate::decode_base64;
use crate::error::ApiError;
use crate::AppState;

pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let resp = chat::send_direct_text(&state, claims.sub, req.receiver_id, req.body).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

pub async fn send_image(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<MediaMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let upload = MediaUpload {
        kind: MessageKind::Image,
        bytes: decode_base64(&req.data)?,
        caption: req.caption,
        filename: req.filename,
        mime: req.mime,
        duration: None,
    };
    let resp = chat::send_direct_media(&state, claims.sub, req.receiver_id, upload).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

pub async fn send_file(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<MediaMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let upload = MediaUpload {
        kind: MessageKind::File,
        bytes: decode_base64(&req.data)?,
        caption: req.caption,
        filename: req.filename,
        mime: req.mime,
        duration: None,
    };
    let resp = chat::send_direct_media(&state, claims.sub, req.receiver_id, upload).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

pub async fn send_voice(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<VoiceMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let upload = MediaUpload {
        kind: MessageKind::Voice,
        bytes: decode_base64(&req.data)?,
        caption: None,
        filename: None,
        mime: Some("audio/webm".into()),
        duration: Some(req.duration),
    };
    let resp = chat::send_direct_media(&state, claims.sub, req.receiver_id, upload).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

pub async fn share_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SharePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let resp = chat::send_direct_post_share(
        &state,
        claims.sub,
        req.receiver_id,
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
    Json(req): Json<MarkReadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let synced =
        chat::mark_read_direct(&state, claims.sub, req.friend_id, &req.message_key).await?;
    Ok(Json(json!({ "success": true, "synced": synced })))
}

pub async fn clear_chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ClearChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let cleared = chat::clear_chat_direct(&state, claims.sub, req.friend_id).await?;
    Ok(Json(json!({ "success": true, "cleared": cleared })))
}

pub async fn conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(friend_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = chat::direct_conversation(&state, claims.sub, friend_id).await?;
    Ok(Json(messages))
}
