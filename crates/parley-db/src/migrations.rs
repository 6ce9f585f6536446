use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            email       TEXT NOT NULL UNIQUE,
            username    TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            avatar_url  TEXT,
            status      TEXT NOT NULL DEFAULT 'offline'
                        CHECK (status IN ('online', 'away', 'offline')),
            phone       TEXT,
            bio         TEXT,
            employer    TEXT,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS workspaces (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            created_by  TEXT NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS workspace_members (
            workspace_id  TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
            user_id       TEXT NOT NULL REFERENCES users(id),
            role          TEXT NOT NULL CHECK (role IN ('admin', 'member')),
            joined_at     TEXT NOT NULL,
            PRIMARY KEY (workspace_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_members_user
            ON workspace_members(user_id);

        CREATE TABLE IF NOT EXISTS channels (
            id            TEXT PRIMARY KEY,
            workspace_id  TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
            name          TEXT NOT NULL,
            created_by    TEXT NOT NULL REFERENCES users(id),
            created_at    TEXT NOT NULL,
            UNIQUE (workspace_id, name)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            channel_id  TEXT NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL REFERENCES users(id),
            content     TEXT NOT NULL,
            parent_id   TEXT REFERENCES messages(id),
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_channel
            ON messages(channel_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_parent
            ON messages(parent_id);

        CREATE TABLE IF NOT EXISTS files (
            id            TEXT PRIMARY KEY,
            owner_id      TEXT NOT NULL REFERENCES users(id),
            storage_name  TEXT NOT NULL UNIQUE,
            file_name     TEXT NOT NULL,
            file_type     TEXT NOT NULL,
            size          INTEGER NOT NULL,
            sha256        TEXT NOT NULL,
            created_at    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS attachments (
            message_id  TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            file_id     TEXT NOT NULL REFERENCES files(id),
            position    INTEGER NOT NULL,
            PRIMARY KEY (message_id, file_id)
        );

        CREATE INDEX IF NOT EXISTS idx_attachments_file
            ON attachments(file_id);

        CREATE TABLE IF NOT EXISTS direct_messages (
            id           TEXT PRIMARY KEY,
            sender_id    TEXT NOT NULL REFERENCES users(id),
            receiver_id  TEXT NOT NULL REFERENCES users(id),
            content      TEXT NOT NULL,
            created_at   TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_dm_pair
            ON direct_messages(sender_id, receiver_id, created_at);

        CREATE TABLE IF NOT EXISTS reactions (
            message_id  TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL REFERENCES users(id),
            emoji       TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            PRIMARY KEY (message_id, user_id, emoji)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
