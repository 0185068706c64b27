use crate::models::UserSessionRow;
use crate::Database;
use anyhow::Result;
use rusqlite::{OptionalExtension, Row};

impl Database {
    // -- User sessions --

    pub fn create_user_session(
        &self,
        id: &str,
        session_token: &str,
        user_agent: Option<&str>,
        expires_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO user_sessions (id, session_token, user_agent, expires_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, session_token, user_agent, expires_at],
            )?;
            Ok(())
        })
    }

    /// Fetch a session that is still valid at `now`.
    pub fn get_user_session(&self, session_token: &str, now: &str) -> Result<Option<UserSessionRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, session_token, user_agent, created_at, expires_at, last_activity
                     FROM user_sessions
                     WHERE session_token = ?1 AND expires_at > ?2",
                    [session_token, now],
                    session_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn update_session_activity(
        &self,
        session_token: &str,
        expires_at: &str,
        now: &str,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE user_sessions SET expires_at = ?2, last_activity = ?3
                 WHERE session_token = ?1",
                [session_token, expires_at, now],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn delete_user_session(&self, session_token: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM user_sessions WHERE session_token = ?1",
                [session_token],
            )?;
            Ok(changed > 0)
        })
    }

    /// Remove every session expired at `now`. Returns how many were removed.
    pub fn clean_expired_sessions(&self, now: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM user_sessions WHERE expires_at <= ?1", [now])?;
            Ok(removed)
        })
    }
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<UserSessionRow> {
    Ok(UserSessionRow {
        id: row.get(0)?,
        session_token: row.get(1)?,
        user_agent: row.get(2)?,
        created_at: row.get(3)?,
        expires_at: row.get(4)?,
        last_activity: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_sessions_are_invisible_and_swept() {
        let db = Database::open_in_memory().unwrap();
        db.create_user_session("a", "live", None, "2030-01-02 00:00:00").unwrap();
        db.create_user_session("b", "stale", None, "2030-01-01 00:00:00").unwrap();

        let now = "2030-01-01 12:00:00";
        assert!(db.get_user_session("live", now).unwrap().is_some());
        assert!(db.get_user_session("stale", now).unwrap().is_none());

        assert_eq!(db.clean_expired_sessions(now).unwrap(), 1);
        assert_eq!(db.clean_expired_sessions(now).unwrap(), 0);
    }

    #[test]
    fn activity_update_extends_expiry() {
        let db = Database::open_in_memory().unwrap();
        db.create_user_session("a", "tok", Some("curl"), "2030-01-01 00:00:00").unwrap();

        assert!(
            db.update_session_activity("tok", "2030-01-05 00:00:00", "2030-01-01 00:00:00")
                .unwrap()
        );
        let row = db.get_user_session("tok", "2030-01-03 00:00:00").unwrap().unwrap();
        assert_eq!(row.expires_at, "2030-01-05 00:00:00");
        assert_eq!(row.user_agent.as_deref(), Some("curl"));

        assert!(db.delete_user_session("tok").unwrap());
        assert!(!db.delete_user_session("tok").unwrap());
    }
}
