use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::token::{random_token, redact};

pub const HOST_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const HOST_SWEEP_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Proof that the holder created a room.
#[derive(Debug, Clone)]
pub struct HostSession {
    pub room_id: Uuid,
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Instant,
}

impl HostSession {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Default)]
struct HostTables {
    /// token -> session
    sessions: HashMap<String, HostSession>,
    /// room -> its current token
    room_hosts: HashMap<Uuid, String>,
}

/// Issues and checks room-host tokens.
///
/// Process-local: a restart invalidates every token. At most one token per
/// room is current; issuing a new one makes the previous token unresolvable.
#[derive(Clone)]
pub struct HostSessionAuthority {
    tables: Arc<RwLock<HostTables>>,
    ttl: Duration,
}

impl Default for HostSessionAuthority {
    fn default() -> Self {
        Self::new(HOST_SESSION_TTL)
    }
}

impl HostSessionAuthority {
    pub fn new(ttl: Duration) -> Self {
        Self {
            tables: Arc::new(RwLock::new(HostTables::default())),
            ttl,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HostTables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HostTables> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Mint a token for a room, superseding any earlier one.
    pub fn issue_for_room(&self, room_id: Uuid) -> HostSession {
        let session = HostSession {
            room_id,
            token: random_token(),
            created_at: Utc::now(),
            expires_at: Instant::now() + self.ttl,
        };

        let mut tables = self.write();
        if let Some(previous) = tables.room_hosts.insert(room_id, session.token.clone()) {
            tables.sessions.remove(&previous);
            debug!(%room_id, "previous host token superseded");
        }
        tables.sessions.insert(session.token.clone(), session.clone());

        info!(%room_id, token = %redact(&session.token), "host session created");
        session
    }

    /// True iff `token` is the room's current, unexpired host token.
    pub fn is_host(&self, room_id: Uuid, token: &str) -> bool {
        let tables = self.read();
        let Some(current) = tables.room_hosts.get(&room_id) else {
            return false;
        };
        if current != token {
            return false;
        }
        tables
            .sessions
            .get(token)
            .is_some_and(|s| s.room_id == room_id && !s.is_expired(Instant::now()))
    }

    /// The unexpired session behind a token, if any.
    pub fn session(&self, token: &str) -> Option<HostSession> {
        let tables = self.read();
        tables
            .sessions
            .get(token)
            .filter(|s| !s.is_expired(Instant::now()))
            .cloned()
    }

    pub fn current_token(&self, room_id: Uuid) -> Option<String> {
        let tables = self.read();
        let token = tables.room_hosts.get(&room_id)?;
        let session = tables.sessions.get(token)?;
        (!session.is_expired(Instant::now())).then(|| token.clone())
    }

    /// Drop the room's current session. Returns false if there was none.
    pub fn revoke(&self, room_id: Uuid) -> bool {
        let mut tables = self.write();
        match tables.room_hosts.remove(&room_id) {
            Some(token) => {
                tables.sessions.remove(&token);
                info!(%room_id, "host session revoked");
                true
            }
            None => false,
        }
    }

    /// Purge expired sessions. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut tables = self.write();

        let expired: Vec<String> = tables
            .sessions
            .iter()
            .filter(|(_, s)| s.is_expired(now))
            .map(|(token, _)| token.clone())
            .collect();

        for token in &expired {
            if let Some(session) = tables.sessions.remove(token) {
                // Only clear the room entry if it still points at this token
                if tables.room_hosts.get(&session.room_id) == Some(token) {
                    tables.room_hosts.remove(&session.room_id);
                }
            }
        }

        expired.len()
    }

    pub fn len(&self) -> usize {
        self.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Background task that sweeps expired sessions on a fixed interval.
    pub async fn run_sweep_loop(self, every: Duration) {
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            let removed = self.sweep_expired();
            if removed > 0 {
                info!("Host sessions: purged {} expired", removed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn reissue_supersedes_previous_token() {
        let hosts = HostSessionAuthority::default();
        let room = Uuid::new_v4();

        let first = hosts.issue_for_room(room).token;
        assert!(hosts.is_host(room, &first));
        assert!(!hosts.is_host(room, "wrong"));

        let second = hosts.issue_for_room(room).token;
        assert!(!hosts.is_host(room, &first));
        assert!(hosts.is_host(room, &second));
        assert!(hosts.session(&first).is_none());
        assert_eq!(hosts.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn token_is_scoped_to_its_room() {
        let hosts = HostSessionAuthority::default();
        let room_a = Uuid::new_v4();
        let room_b = Uuid::new_v4();

        let token_a = hosts.issue_for_room(room_a).token;
        hosts.issue_for_room(room_b);

        assert!(!hosts.is_host(room_b, &token_a));
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_is_checked_before_the_sweep_runs() {
        let hosts = HostSessionAuthority::default();
        let room = Uuid::new_v4();
        let token = hosts.issue_for_room(room).token;

        tokio::time::advance(HOST_SESSION_TTL - Duration::from_secs(1)).await;
        assert!(hosts.is_host(room, &token));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!hosts.is_host(room, &token));
        assert!(hosts.current_token(room).is_none());
        assert!(hosts.session(&token).is_none());

        // Still stored until swept
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts.sweep_expired(), 1);
        assert!(hosts.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn revoke_removes_current_session() {
        let hosts = HostSessionAuthority::default();
        let room = Uuid::new_v4();
        let token = hosts.issue_for_room(room).token;

        assert!(hosts.revoke(room));
        assert!(!hosts.is_host(room, &token));
        assert!(!hosts.revoke(room));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_keeps_live_sessions() {
        let hosts = HostSessionAuthority::new(Duration::from_secs(60));
        let old_room = Uuid::new_v4();
        hosts.issue_for_room(old_room);

        tokio::time::advance(Duration::from_secs(30)).await;
        let new_room = Uuid::new_v4();
        let fresh = hosts.issue_for_room(new_room).token;

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(hosts.sweep_expired(), 1);
        assert!(hosts.is_host(new_room, &fresh));
        assert_eq!(hosts.current_token(new_room), Some(fresh));
    }
}
