use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS user_sessions (
            id              TEXT PRIMARY KEY,
            session_token   TEXT NOT NULL UNIQUE,
            user_agent      TEXT,
            created_at      TEXT NOT NULL DEFAULT (datetime('now')),
            expires_at      TEXT NOT NULL,
            last_activity   TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_user_sessions_expires
            ON user_sessions(expires_at);

        CREATE TABLE IF NOT EXISTS rooms (
            id              TEXT PRIMARY KEY,
            theme           TEXT NOT NULL,
            creator_session TEXT REFERENCES user_sessions(id) ON DELETE SET NULL,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            room_id         TEXT NOT NULL REFERENCES rooms(id),
            message         TEXT NOT NULL,
            reaction_count  INTEGER NOT NULL DEFAULT 0,
            answered        INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_room
            ON messages(room_id, created_at);

        CREATE TABLE IF NOT EXISTS user_reactions (
            session_id      TEXT NOT NULL REFERENCES user_sessions(id) ON DELETE CASCADE,
            room_id         TEXT NOT NULL REFERENCES rooms(id),
            message_id      TEXT NOT NULL REFERENCES messages(id),
            reaction_type   TEXT NOT NULL,
            created_at      TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(session_id, message_id, reaction_type)
        );

        CREATE INDEX IF NOT EXISTS idx_user_reactions_message
            ON user_reactions(message_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
