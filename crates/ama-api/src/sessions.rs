use std::sync::Arc;

use ama_db::models::UserSessionRow;
use ama_db::{format_timestamp, parse_timestamp, Database};
use anyhow::Result;
use axum_extra::extract::cookie::{Cookie, SameSite};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::token::{random_token, redact};

pub const USER_SESSION_COOKIE: &str = "user_session";
pub const USER_SESSION_TTL_SECS: i64 = 24 * 60 * 60;

/// A persisted, anonymous browser session.
#[derive(Debug, Clone)]
pub struct UserSession {
    pub id: String,
    pub token: String,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TryFrom<UserSessionRow> for UserSession {
    type Error = anyhow::Error;

    fn try_from(row: UserSessionRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            token: row.session_token,
            user_agent: row.user_agent,
            created_at: parse_timestamp(&row.created_at)?,
            expires_at: parse_timestamp(&row.expires_at)?,
        })
    }
}

/// Creates, resolves and expires user sessions.
///
/// Every method touches the database synchronously; call them from
/// `spawn_blocking`.
#[derive(Clone)]
pub struct UserSessionManager {
    db: Arc<Database>,
    ttl: Duration,
    secure_cookies: bool,
}

impl UserSessionManager {
    pub fn new(db: Arc<Database>, secure_cookies: bool) -> Self {
        Self {
            db,
            ttl: Duration::seconds(USER_SESSION_TTL_SECS),
            secure_cookies,
        }
    }

    pub fn create_session(&self, user_agent: Option<&str>) -> Result<UserSession> {
        let now = Utc::now();
        let session = UserSession {
            id: Uuid::new_v4().to_string(),
            token: random_token(),
            user_agent: user_agent.map(str::to_owned),
            created_at: now,
            expires_at: now + self.ttl,
        };

        self.db.create_user_session(
            &session.id,
            &session.token,
            session.user_agent.as_deref(),
            &format_timestamp(session.expires_at),
        )?;

        info!(token = %redact(&session.token), "user session created");
        Ok(session)
    }

    /// Look up a live session and slide its expiry forward.
    pub fn get_session(&self, token: &str) -> Result<Option<UserSession>> {
        let now = Utc::now();
        let Some(row) = self.db.get_user_session(token, &format_timestamp(now))? else {
            return Ok(None);
        };

        let mut session = UserSession::try_from(row)?;
        session.expires_at = now + self.ttl;
        self.db.update_session_activity(
            token,
            &format_timestamp(session.expires_at),
            &format_timestamp(now),
        )?;

        Ok(Some(session))
    }

    /// Reuse the presented session if it is still valid, otherwise mint one.
    pub fn resolve(&self, token: Option<&str>, user_agent: Option<&str>) -> Result<UserSession> {
        if let Some(token) = token {
            if let Some(session) = self.get_session(token)? {
                return Ok(session);
            }
            debug!(token = %redact(token), "presented session unknown or expired");
        }
        self.create_session(user_agent)
    }

    pub fn delete_session(&self, token: &str) -> Result<bool> {
        self.db.delete_user_session(token)
    }

    pub fn clean_expired_sessions(&self) -> Result<usize> {
        self.db.clean_expired_sessions(&format_timestamp(Utc::now()))
    }

    pub fn session_cookie(&self, token: &str) -> Cookie<'static> {
        Cookie::build((USER_SESSION_COOKIE, token.to_owned()))
            .path("/")
            .http_only(true)
            .secure(self.secure_cookies)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::seconds(self.ttl.num_seconds()))
            .build()
    }

    pub fn clear_cookie(&self) -> Cookie<'static> {
        Cookie::build((USER_SESSION_COOKIE, ""))
            .path("/")
            .http_only(true)
            .secure(self.secure_cookies)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::ZERO)
            .build()
    }

    /// Background task that deletes expired sessions on a fixed interval.
    pub async fn run_sweep_loop(self, every: std::time::Duration) {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;

        loop {
            interval.tick().await;
            let manager = self.clone();
            match tokio::task::spawn_blocking(move || manager.clean_expired_sessions()).await {
                Ok(Ok(0)) => {}
                Ok(Ok(removed)) => info!("User sessions: removed {} expired", removed),
                Ok(Err(e)) => tracing::error!("User session cleanup failed: {:#}", e),
                Err(e) => tracing::error!("User session cleanup task panicked: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> UserSessionManager {
        let db = Database::open_in_memory().expect("in-memory db");
        UserSessionManager::new(Arc::new(db), false)
    }

    #[test]
    fn created_session_can_be_resolved() {
        let sessions = manager();
        let created = sessions.create_session(Some("test-agent")).unwrap();
        assert_eq!(created.token.len(), 43);

        let found = sessions.get_session(&created.token).unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.user_agent.as_deref(), Some("test-agent"));
    }

    #[test]
    fn resolve_reuses_or_creates() {
        let sessions = manager();
        let first = sessions.resolve(None, None).unwrap();
        let again = sessions.resolve(Some(&first.token), None).unwrap();
        assert_eq!(first.id, again.id);

        let fresh = sessions.resolve(Some("not-a-session"), None).unwrap();
        assert_ne!(fresh.token, first.token);
    }

    #[test]
    fn reading_a_session_slides_its_expiry() {
        let sessions = manager();
        let session = sessions.create_session(None).unwrap();

        // Pretend the session is about to run out
        let now = Utc::now();
        sessions
            .db
            .update_session_activity(
                &session.token,
                &format_timestamp(now + Duration::seconds(60)),
                &format_timestamp(now),
            )
            .unwrap();

        let refreshed = sessions.get_session(&session.token).unwrap().unwrap();
        let expected = Utc::now() + Duration::seconds(USER_SESSION_TTL_SECS);
        assert!((expected - refreshed.expires_at).num_seconds().abs() <= 5);

        let stored = sessions
            .db
            .get_user_session(&session.token, &format_timestamp(Utc::now()))
            .unwrap()
            .unwrap();
        let stored_expiry = parse_timestamp(&stored.expires_at).unwrap();
        assert!((expected - stored_expiry).num_seconds().abs() <= 5);
    }

    #[test]
    fn expired_session_is_not_resolved() {
        let sessions = manager();
        let session = sessions.create_session(None).unwrap();
        let now = Utc::now();
        sessions
            .db
            .update_session_activity(
                &session.token,
                &format_timestamp(now - Duration::seconds(1)),
                &format_timestamp(now),
            )
            .unwrap();

        assert!(sessions.get_session(&session.token).unwrap().is_none());
        assert_eq!(sessions.clean_expired_sessions().unwrap(), 1);
    }

    #[test]
    fn deleted_session_is_gone() {
        let sessions = manager();
        let session = sessions.create_session(None).unwrap();
        assert!(sessions.delete_session(&session.token).unwrap());
        assert!(sessions.get_session(&session.token).unwrap().is_none());
        assert!(!sessions.delete_session(&session.token).unwrap());
    }

    #[test]
    fn cookie_attributes() {
        let sessions = manager();
        let cookie = sessions.session_cookie("abc");
        assert_eq!(cookie.name(), USER_SESSION_COOKIE);
        assert_eq!(cookie.value(), "abc");
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.max_age(), Some(time::Duration::seconds(86400)));

        let cleared = sessions.clear_cookie();
        assert_eq!(cleared.value(), "");
        assert_eq!(cleared.max_age(), Some(time::Duration::ZERO));
    }
}
