use crate::models::{MessageRow, RoomRow};
use crate::Database;
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row};

impl Database {
    // -- Rooms --

    pub fn insert_room(&self, id: &str, theme: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("INSERT INTO rooms (id, theme) VALUES (?1, ?2)", (id, theme))?;
            Ok(())
        })
    }

    pub fn get_rooms(&self) -> Result<Vec<RoomRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, theme, created_at FROM rooms ORDER BY created_at DESC, rowid DESC",
            )?;
            let rows = stmt
                .query_map([], room_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_room(&self, id: &str) -> Result<Option<RoomRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, theme, created_at FROM rooms WHERE id = ?1",
                    [id],
                    room_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Record which user session created a room. Returns false if the session is unknown.
    pub fn set_room_creator(&self, room_id: &str, session_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE rooms SET creator_session = ?2
                 WHERE id = ?1 AND EXISTS (SELECT 1 FROM user_sessions WHERE id = ?2)",
                (room_id, session_id),
            )?;
            Ok(changed > 0)
        })
    }

    pub fn get_user_rooms(&self, session_token: &str) -> Result<Vec<RoomRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.id, r.theme, r.created_at
                 FROM rooms r
                 JOIN user_sessions s ON r.creator_session = s.id
                 WHERE s.session_token = ?1
                 ORDER BY r.created_at DESC, r.rowid DESC",
            )?;
            let rows = stmt
                .query_map([session_token], room_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    pub fn insert_message(&self, id: &str, room_id: &str, message: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, room_id, message) VALUES (?1, ?2, ?3)",
                (id, room_id, message),
            )?;
            Ok(())
        })
    }

    /// Messages of a room, oldest first. With a session token each row also
    /// reports whether that session has reacted to it.
    pub fn get_room_messages(
        &self,
        room_id: &str,
        session_token: Option<&str>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_room_messages(conn, room_id, session_token))
    }

    pub fn get_message(&self, room_id: &str, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, room_id, message, reaction_count, answered, created_at
                     FROM messages WHERE id = ?1 AND room_id = ?2",
                    [id, room_id],
                    |row| message_from_row(row, None),
                )
                .optional()?;
            Ok(row)
        })
    }

    // -- Reactions --

    /// Increment the reaction counter. Returns the new count, or None if the
    /// message does not exist in that room.
    pub fn react_to_message(&self, room_id: &str, id: &str) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            let count = conn
                .query_row(
                    "UPDATE messages SET reaction_count = reaction_count + 1
                     WHERE id = ?1 AND room_id = ?2
                     RETURNING reaction_count",
                    [id, room_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(count)
        })
    }

    /// Decrement the reaction counter, never below zero.
    pub fn remove_reaction_from_message(&self, room_id: &str, id: &str) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            let count = conn
                .query_row(
                    "UPDATE messages SET reaction_count = MAX(reaction_count - 1, 0)
                     WHERE id = ?1 AND room_id = ?2
                     RETURNING reaction_count",
                    [id, room_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(count)
        })
    }

    pub fn mark_message_as_answered(&self, room_id: &str, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET answered = 1 WHERE id = ?1 AND room_id = ?2",
                [id, room_id],
            )?;
            Ok(changed > 0)
        })
    }

    /// Track that a session reacted to a message. Repeats are ignored.
    pub fn add_user_reaction(
        &self,
        session_id: &str,
        room_id: &str,
        message_id: &str,
        reaction_type: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO user_reactions (session_id, room_id, message_id, reaction_type)
                 VALUES (?1, ?2, ?3, ?4)",
                [session_id, room_id, message_id, reaction_type],
            )?;
            Ok(())
        })
    }

    pub fn remove_user_reaction(
        &self,
        session_id: &str,
        message_id: &str,
        reaction_type: &str,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM user_reactions
                 WHERE session_id = ?1 AND message_id = ?2 AND reaction_type = ?3",
                [session_id, message_id, reaction_type],
            )?;
            Ok(changed > 0)
        })
    }
}

fn room_from_row(row: &Row<'_>) -> rusqlite::Result<RoomRow> {
    Ok(RoomRow {
        id: row.get(0)?,
        theme: row.get(1)?,
        created_at: row.get(2)?,
    })
}

fn message_from_row(row: &Row<'_>, user_reacted: Option<bool>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        room_id: row.get(1)?,
        message: row.get(2)?,
        reaction_count: row.get(3)?,
        answered: row.get(4)?,
        user_reacted,
        created_at: row.get(5)?,
    })
}

fn query_room_messages(
    conn: &Connection,
    room_id: &str,
    session_token: Option<&str>,
) -> Result<Vec<MessageRow>> {
    let rows = match session_token {
        Some(token) => {
            // One query with an EXISTS probe instead of a lookup per message
            let mut stmt = conn.prepare(
                "SELECT m.id, m.room_id, m.message, m.reaction_count, m.answered, m.created_at,
                        EXISTS (
                            SELECT 1 FROM user_reactions ur
                            JOIN user_sessions s ON ur.session_id = s.id
                            WHERE ur.message_id = m.id AND s.session_token = ?2
                        )
                 FROM messages m
                 WHERE m.room_id = ?1
                 ORDER BY m.created_at ASC, m.rowid ASC",
            )?;
            stmt.query_map([room_id, token], |row| {
                let reacted: bool = row.get(6)?;
                message_from_row(row, Some(reacted))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?
        }
        None => {
            let mut stmt = conn.prepare(
                "SELECT id, room_id, message, reaction_count, answered, created_at
                 FROM messages
                 WHERE room_id = ?1
                 ORDER BY created_at ASC, rowid ASC",
            )?;
            stmt.query_map([room_id], |row| message_from_row(row, None))?
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };

    Ok(rows)
}
