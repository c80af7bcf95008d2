use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            email       TEXT UNIQUE,
            phone       TEXT UNIQUE,
            password    TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS friends (
            id            TEXT PRIMARY KEY,
            requester_id  TEXT NOT NULL REFERENCES users(id),
            target_id     TEXT NOT NULL REFERENCES users(id),
            status        TEXT NOT NULL DEFAULT 'pending',
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_friends_requester ON friends(requester_id, status);
        CREATE INDEX IF NOT EXISTS idx_friends_target    ON friends(target_id, status);

        -- read_by / deleted_by are JSON arrays of user ids.
        CREATE TABLE IF NOT EXISTS messages (
            id           TEXT PRIMARY KEY,
            sender_id    TEXT NOT NULL REFERENCES users(id),
            receiver_id  TEXT NOT NULL REFERENCES users(id),
            body         TEXT NOT NULL,
            kind         TEXT NOT NULL DEFAULT 'text',
            media_url    TEXT,
            media_path   TEXT,
            mirror_key   TEXT,
            sync_status  TEXT NOT NULL DEFAULT 'pending',
            read_by      TEXT NOT NULL DEFAULT '[]',
            deleted_by   TEXT NOT NULL DEFAULT '[]',
            created_at   TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_pair
            ON messages(sender_id, receiver_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_messages_sync ON messages(sync_status);
        CREATE INDEX IF NOT EXISTS idx_messages_mirror ON messages(mirror_key);

        -- members is a JSON array of user ids; the creator is always in it.
        CREATE TABLE IF NOT EXISTS group_chats (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            photo_path  TEXT,
            creator_id  TEXT NOT NULL REFERENCES users(id),
            members     TEXT NOT NULL DEFAULT '[]',
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS group_messages (
            id           TEXT PRIMARY KEY,
            group_id     TEXT NOT NULL REFERENCES group_chats(id),
            sender_id    TEXT NOT NULL REFERENCES users(id),
            body         TEXT NOT NULL,
            kind         TEXT NOT NULL DEFAULT 'text',
            media_url    TEXT,
            media_path   TEXT,
            mirror_key   TEXT,
            sync_status  TEXT NOT NULL DEFAULT 'pending',
            read_by      TEXT NOT NULL DEFAULT '[]',
            deleted_by   TEXT NOT NULL DEFAULT '[]',
            created_at   TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_group_messages_group
            ON group_messages(group_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_group_messages_sync ON group_messages(sync_status);
        CREATE INDEX IF NOT EXISTS idx_group_messages_mirror
            ON group_messages(group_id, mirror_key);

        CREATE TABLE IF NOT EXISTS posts (
            id          TEXT PRIMARY KEY,
            author_id   TEXT NOT NULL REFERENCES users(id),
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_posts_author ON posts(author_id, created_at);

        CREATE TABLE IF NOT EXISTS reactions (
            id          TEXT PRIMARY KEY,
            post_id     TEXT NOT NULL REFERENCES posts(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            kind        TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            UNIQUE(post_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_reactions_post ON reactions(post_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
