/// Database row types — these map directly to SQLite rows. Distinct from
/// the ripple-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password: String,
    pub created_at: String,
}

pub struct FriendRow {
    pub id: String,
    pub requester_id: String,
    pub target_id: String,
    pub status: String,
    pub created_at: String,
}

pub struct DirectMessageRow {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub body: String,
    pub kind: String,
    pub media_url: Option<String>,
    pub media_path: Option<String>,
    pub mirror_key: Option<String>,
    pub sync_status: String,
    pub read_by: String,
    pub deleted_by: String,
    pub created_at: String,
}

pub struct GroupRow {
    pub id: String,
    pub name: String,
    pub photo_path: Option<String>,
    pub creator_id: String,
    pub members: String,
    pub created_at: String,
}

pub struct GroupMessageRow {
    pub id: String,
    pub group_id: String,
    pub sender_id: String,
    pub body: String,
    pub kind: String,
    pub media_url: Option<String>,
    pub media_path: Option<String>,
    pub mirror_key: Option<String>,
    pub sync_status: String,
    pub read_by: String,
    pub deleted_by: String,
    pub created_at: String,
}

pub struct PostRow {
    pub id: String,
    pub author_id: String,
    pub content: String,
    pub created_at: String,
}

pub struct ReactionCountRow {
    pub post_id: String,
    pub kind: String,
    pub count: i64,
}

pub struct UserReactionRow {
    pub post_id: String,
    pub kind: String,
}
