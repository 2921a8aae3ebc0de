use axum::http::{header, HeaderMap};
use chrono::{Duration, Utc};
use rand::Rng;
use rusqlite::{params, OptionalExtension};

use crate::db::models::{User, UserId};
use crate::state::DbPool;
use crate::store::RepositoryResult;

/// Same format SQLite's `datetime('now')` produces, so string comparison works.
const SQLITE_DATETIME: &str = "%Y-%m-%d %H:%M:%S";

/// Longest session lifetime honoured, about ten years.
pub const MAX_SESSION_HOURS: u64 = 24 * 365 * 10;

/// Create a new session for a user. Returns the session token.
pub fn create_session(pool: &DbPool, user_id: &UserId, hours: u64) -> RepositoryResult<String> {
    let conn = pool.get()?;

    let token = generate_token();
    let id = uuid::Uuid::now_v7().to_string();
    let hours = hours.min(MAX_SESSION_HOURS) as i64;
    let expires_at = (Utc::now() + Duration::hours(hours))
        .format(SQLITE_DATETIME)
        .to_string();

    conn.execute(
        "INSERT INTO sessions (id, user_id, token, expires_at) VALUES (?1, ?2, ?3, ?4)",
        params![id, user_id, token, expires_at],
    )?;

    Ok(token)
}

/// Resolve a session token to its user, ignoring expired sessions.
pub fn find_session_user(pool: &DbPool, token: &str) -> RepositoryResult<Option<User>> {
    let conn = pool.get()?;
    let user = conn
        .query_row(
            "SELECT u.id, u.username, u.email, u.password_hash, u.role_id, u.created_at
             FROM sessions s
             JOIN users u ON u.id = s.user_id
             WHERE s.token = ?1 AND s.expires_at > datetime('now')",
            params![token],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    email: row.get(2)?,
                    password_hash: row.get(3)?,
                    role_id: row.get(4)?,
                    created_at: row.get(5)?,
                })
            },
        )
        .optional()?;
    Ok(user)
}

/// Delete a session by token.
pub fn delete_session(pool: &DbPool, token: &str) -> RepositoryResult<()> {
    let conn = pool.get()?;
    conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
    Ok(())
}

/// Remove expired sessions. Returns how many were deleted.
pub fn purge_expired(pool: &DbPool) -> RepositoryResult<usize> {
    let conn = pool.get()?;
    let deleted = conn.execute(
        "DELETE FROM sessions WHERE expires_at <= datetime('now')",
        [],
    )?;
    Ok(deleted)
}

/// Generate a cryptographically random 32-byte hex token.
fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

// -- Cookie helpers --

pub fn session_cookie(name: &str, token: &str, max_age_hours: u64) -> String {
    let max_age_secs = max_age_hours.min(MAX_SESSION_HOURS) * 3600;
    format!(
        "{}={}; HttpOnly; SameSite=Strict; Path=/; Max-Age={}",
        name, token, max_age_secs
    )
}

pub fn clear_session_cookie(name: &str) -> String {
    format!("{}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0", name)
}

pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(';'))
        .map(|s| s.trim())
        .find_map(|cookie| {
            let mut split = cookie.splitn(2, '=');
            let key = split.next()?.trim();
            let val = split.next()?.trim();
            if key == name && !val.is_empty() {
                Some(val)
            } else {
                None
            }
        })
}
