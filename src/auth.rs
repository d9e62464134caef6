//! Accounts and sessions.
//!
//! Credential storage is plain CRUD over the catalog: SHA-256 password
//! digests, UUID bearer tokens with a 7-day lifetime, lazy purge of expired
//! rows. The route guard is an explicit function returning a typed result —
//! handlers call [`AuthService::authenticate`] (via the server's extractor)
//! and branch on `Authenticated` vs `Unauthorized`, no hidden decorator
//! magic.

use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use crate::catalog::{Catalog, SessionUser};
use crate::error::LecternError;

/// Sessions live for a week; expiry is enforced at validation time.
pub const SESSION_LIFETIME_DAYS: i64 = 7;

/// Hex SHA-256 digest of a password.
pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// A freshly created session, as returned to the login caller.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub token: String,
    pub user_id: i64,
    pub username: String,
    pub expires_at: i64,
}

/// The typed "no" of the auth guard.
#[derive(Debug, Clone, Copy)]
pub struct Unauthorized {
    pub reason: &'static str,
}

/// Account and session operations over the catalog.
pub struct AuthService {
    catalog: Arc<Catalog>,
}

impl AuthService {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    /// Register a new account. `None` when the username or email is taken.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<Option<i64>, LecternError> {
        self.catalog
            .add_user(username, email, &hash_password(password))
            .await
    }

    /// Verify credentials and mint a session. `None` on unknown user or
    /// wrong password — indistinguishable on purpose.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<SessionInfo>, LecternError> {
        let Some(user) = self.catalog.user_by_username(username).await? else {
            return Ok(None);
        };
        if user.password_hash != hash_password(password) {
            return Ok(None);
        }

        let token = Uuid::new_v4().to_string();
        let expires_at =
            (chrono::Utc::now() + chrono::Duration::days(SESSION_LIFETIME_DAYS)).timestamp();
        self.catalog
            .create_session(user.user_id, &token, expires_at)
            .await?;

        Ok(Some(SessionInfo {
            token,
            user_id: user.user_id,
            username: user.username,
            expires_at,
        }))
    }

    /// Drop a session. `false` when the token was unknown.
    pub async fn logout(&self, token: &str) -> Result<bool, LecternError> {
        self.catalog.delete_session(token).await
    }

    /// The route guard: resolve an `Authorization` header value to its user.
    pub async fn authenticate(
        &self,
        authorization: Option<&str>,
    ) -> Result<SessionUser, Unauthorized> {
        let Some(header) = authorization else {
            return Err(Unauthorized {
                reason: "Unauthorized - No valid session token",
            });
        };
        let Some(token) = header.strip_prefix("Bearer ") else {
            return Err(Unauthorized {
                reason: "Unauthorized - No valid session token",
            });
        };

        match self.catalog.session_user(token).await {
            Ok(Some(user)) => Ok(user),
            _ => Err(Unauthorized {
                reason: "Unauthorized - Invalid or expired session token",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_is_deterministic_hex() {
        let a = hash_password("hunter2");
        assert_eq!(a, hash_password("hunter2"));
        assert_ne!(a, hash_password("hunter3"));
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    async fn service() -> (tempfile::TempDir, AuthService) {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(
            Catalog::open(dir.path().join("catalog.db"), None)
                .await
                .unwrap(),
        );
        (dir, AuthService::new(catalog))
    }

    #[tokio::test]
    async fn register_login_logout_roundtrip() {
        let (_dir, auth) = service().await;

        let user_id = auth
            .register("ada", "ada@example.com", "pw")
            .await
            .unwrap()
            .expect("fresh username registers");

        let session = auth.login("ada", "pw").await.unwrap().expect("valid login");
        assert_eq!(session.user_id, user_id);

        let header = format!("Bearer {}", session.token);
        let who = auth.authenticate(Some(&header)).await.unwrap();
        assert_eq!(who.username, "ada");

        assert!(auth.logout(&session.token).await.unwrap());
        assert!(auth.authenticate(Some(&header)).await.is_err());
        // Logging out again is a miss, not an error.
        assert!(!auth.logout(&session.token).await.unwrap());
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_look_identical() {
        let (_dir, auth) = service().await;
        auth.register("ada", "a@x.com", "pw").await.unwrap();

        assert!(auth.login("ada", "wrong").await.unwrap().is_none());
        assert!(auth.login("ghost", "pw").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_authorization_header_is_rejected() {
        let (_dir, auth) = service().await;
        assert!(auth.authenticate(None).await.is_err());
        assert!(auth.authenticate(Some("Basic abc")).await.is_err());
        assert!(auth.authenticate(Some("Bearer nope")).await.is_err());
    }
}
