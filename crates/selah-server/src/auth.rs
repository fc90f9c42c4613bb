//! Bearer-token authentication
//!
//! Tokens are opaque strings looked up in the `api_tokens` table. There
//! is no claims parsing on this side; the token either maps to a user
//! or it does not.

use axum::http::HeaderMap;
use rusqlite::OptionalExtension;

use crate::db::ServerDb;
use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
}

/// Stable hash of a user id for log lines, so raw ids stay out of logs
pub fn user_fingerprint(user_id: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    user_id.hash(&mut hasher);
    hasher.finish()
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let header = headers
        .get("authorization")
        .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|_| AppError::unauthorized("Authorization header is not valid UTF-8"))?;

    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| AppError::unauthorized("Authorization header must be `Bearer <token>`"))?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AppError::unauthorized(
            "Authorization scheme must be `Bearer`",
        ));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::unauthorized("Bearer token is empty"));
    }

    Ok(token)
}

pub fn authenticate(db: &ServerDb, token: &str) -> Result<AuthenticatedUser, AppError> {
    let conn = db.lock();
    let row: Option<(String, Option<i64>)> = conn
        .query_row(
            "SELECT user_id, expires_at FROM api_tokens WHERE token = ?1",
            [token],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let Some((user_id, expires_at)) = row else {
        return Err(AppError::unauthorized("Unknown bearer token"));
    };

    if let Some(expires_at) = expires_at {
        if expires_at <= chrono::Utc::now().timestamp_millis() {
            return Err(AppError::unauthorized("Bearer token is expired"));
        }
    }

    Ok(AuthenticatedUser { user_id })
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn test_bearer_token_extractor_accepts_standard_header() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer tok-123"));
        assert_eq!(extract_bearer_token(&headers).unwrap(), "tok-123");
    }

    #[test]
    fn test_bearer_token_extractor_rejects_wrong_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert!(extract_bearer_token(&headers).is_err());
    }

    #[test]
    fn test_bearer_token_extractor_rejects_empty_token() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer   "));
        assert!(extract_bearer_token(&headers).is_err());
    }

    #[test]
    fn test_authenticate_resolves_seeded_token() {
        let db = ServerDb::open_in_memory().unwrap();
        db.insert_api_token("tok", "user-1", None).unwrap();

        let user = authenticate(&db, "tok").unwrap();
        assert_eq!(user.user_id, "user-1");
    }

    #[test]
    fn test_authenticate_rejects_unknown_token() {
        let db = ServerDb::open_in_memory().unwrap();
        assert!(authenticate(&db, "nope").is_err());
    }

    #[test]
    fn test_authenticate_rejects_expired_token() {
        let db = ServerDb::open_in_memory().unwrap();
        let past = chrono::Utc::now().timestamp_millis() - 1_000;
        db.insert_api_token("tok", "user-1", Some(past)).unwrap();
        assert!(authenticate(&db, "tok").is_err());
    }

    #[test]
    fn test_authenticate_accepts_unexpired_token() {
        let db = ServerDb::open_in_memory().unwrap();
        let future = chrono::Utc::now().timestamp_millis() + 60_000;
        db.insert_api_token("tok", "user-1", Some(future)).unwrap();
        assert!(authenticate(&db, "tok").is_ok());
    }

    #[test]
    fn test_user_fingerprint_is_stable_and_distinct() {
        assert_eq!(user_fingerprint("user-1"), user_fingerprint("user-1"));
        assert_ne!(user_fingerprint("user-1"), user_fingerprint("user-2"));
    }
}
