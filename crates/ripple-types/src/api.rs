use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{FriendStatus, IdSet, MessageKind, SyncStatus};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the auth handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub name: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignupRequest {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user_id: Uuid,
    pub name: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

// -- Direct messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub receiver_id: Uuid,
    pub body: String,
}

/// Media payload carried inline as base64, same transport the rest of the
/// JSON API uses. Shared by image and file sends.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MediaMessageRequest {
    pub receiver_id: Uuid,
    #[serde(default)]
    pub caption: Option<String>,
    pub data: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub mime: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VoiceMessageRequest {
    pub receiver_id: Uuid,
    pub data: String,
    /// Seconds, 1..=300.
    pub duration: u32,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SharePostRequest {
    pub receiver_id: Uuid,
    pub post_id: Uuid,
    pub post_kind: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkReadRequest {
    pub friend_id: Uuid,
    pub message_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClearChatRequest {
    pub friend_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Option<Uuid>,
    pub group_id: Option<Uuid>,
    pub body: String,
    pub kind: MessageKind,
    pub media_url: Option<String>,
    pub mirror_key: Option<String>,
    pub sync_status: SyncStatus,
    pub read_by: IdSet,
    pub deleted_by: IdSet,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

// -- Group messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupSendRequest {
    pub group_id: Uuid,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupMediaMessageRequest {
    pub group_id: Uuid,
    #[serde(default)]
    pub caption: Option<String>,
    pub data: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub mime: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupVoiceMessageRequest {
    pub group_id: Uuid,
    pub data: String,
    pub duration: u32,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupSharePostRequest {
    pub group_id: Uuid,
    pub post_id: Uuid,
    pub post_kind: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupMarkReadRequest {
    pub group_id: Uuid,
    pub message_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupClearChatRequest {
    pub group_id: Uuid,
}

// -- Group chats --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PhotoUpload {
    pub data: String,
    #[serde(default)]
    pub mime: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateGroupRequest {
    pub name: String,
    pub members: Vec<Uuid>,
    #[serde(default)]
    pub photo: Option<PhotoUpload>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateGroupRequest {
    pub name: String,
    #[serde(default)]
    pub photo: Option<PhotoUpload>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddMembersRequest {
    pub group_id: Uuid,
    pub members: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoveMemberRequest {
    pub group_id: Uuid,
    pub member_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct GroupResponse {
    pub id: Uuid,
    pub name: String,
    pub photo_url: Option<String>,
    pub creator_id: Uuid,
    pub members: IdSet,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

// -- Friends --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FriendRequestPayload {
    pub target_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct FriendshipResponse {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub target_id: Uuid,
    pub status: FriendStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

// -- Suggestions --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SuggestedUsersRequest {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub seen: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct SuggestedUsersResponse {
    pub users: Vec<UserSummary>,
}

// -- Posts & feed --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreatePostRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct PostResponse {
    pub id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReactRequest {
    pub kind: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeedRequest {
    #[serde(default)]
    pub already_fetched_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct FeedPost {
    pub id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub is_own: bool,
    pub reactions_count: BTreeMap<String, i64>,
    pub total_reactions: i64,
    pub current_user_reaction: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FeedResponse {
    pub posts: Vec<FeedPost>,
    pub fetched_ids: Vec<Uuid>,
}
