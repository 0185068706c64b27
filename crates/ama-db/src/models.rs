/// Database row types. These map directly to SQLite rows and stay
/// independent of the ama-types API models.

pub struct RoomRow {
    pub id: String,
    pub theme: String,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub room_id: String,
    pub message: String,
    pub reaction_count: i64,
    pub answered: bool,
    /// Only populated when the query was asked about a specific session.
    pub user_reacted: Option<bool>,
    pub created_at: String,
}

pub struct UserSessionRow {
    pub id: String,
    pub session_token: String,
    pub user_agent: Option<String>,
    pub created_at: String,
    pub expires_at: String,
    pub last_activity: String,
}
