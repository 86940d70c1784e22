use std::sync::Arc;

use anyhow::Context;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum::{async_trait, http::header};
use dashmap::DashMap;
use pk::basic_models::UserProfile;
use rusqlite::params;
use serde::Serialize;
use sha2::Digest;
use subtle::ConstantTimeEq;

use crate::config::AuthConfig;
use crate::database::{self, Database, DocumentStore, FromRow};
use crate::errors::WebError;
use crate::models;

pub type AuthResult<X> = Result<X, AuthError>;

lazy_static::lazy_static! {
    static ref EMAIL: regex::Regex =
        regex::Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern compiles");
}

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("No user is signed in")]
    NotSignedIn,
    #[error("Invalid email address: {0}")]
    InvalidEmail(String),
    #[error("Password must be at least {0} characters")]
    WeakPassword(usize),
    #[error("An account already exists for {0}")]
    EmailInUse(String),
    #[error("Wrong email or password")]
    WrongCredentials,
    #[error("Identity backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// A signed-in user and the bearer token that proves it
#[derive(Clone, Debug, Serialize)]
pub struct UserSession {
    pub token: String,
    pub uid: String,
    pub email: String,
}

struct Account {
    uid: String,
    email: String,
    salt: String,
    password_hash: String,
}

impl FromRow for Account {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            uid: row.get("uid")?,
            email: row.get("email")?,
            salt: row.get("salt")?,
            password_hash: row.get("password_hash")?,
        })
    }
}

/// Email and password accounts, plus the sessions of signed-in users.
///
/// Accounts live in the database; sessions only live in memory, so a restart
/// signs everyone out.
#[derive(Clone)]
pub struct Identity {
    db: Database,
    docs: Arc<dyn DocumentStore>,
    sessions: Arc<DashMap<String, UserSession>>,
    min_password_len: usize,
}

impl Identity {
    pub fn new(db: Database, docs: Arc<dyn DocumentStore>, config: &AuthConfig) -> Self {
        Self {
            db,
            docs,
            sessions: Default::default(),
            min_password_len: config.min_password_len,
        }
    }

    /// Create an account, write its profile document and sign it in.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        first_name: &str,
        last_name: &str,
    ) -> AuthResult<UserSession> {
        let email = normalize_email(email)?;
        if password.chars().count() < self.min_password_len {
            return Err(AuthError::WeakPassword(self.min_password_len));
        }
        if self.find_account(&email)?.is_some() {
            return Err(AuthError::EmailInUse(email));
        }

        let uid = uuid::Uuid::new_v4().simple().to_string();
        let salt = hex::encode(rand::random::<[u8; 16]>());
        let inserted = {
            let conn = self.db.pool.get().context("Connecting to account store")?;
            conn.execute(
                "INSERT OR IGNORE INTO Account (uid, email, salt, password_hash, created_on)
                VALUES (?, ?, ?, ?, ?)",
                params![
                    uid,
                    email,
                    salt,
                    hash_password(&salt, password),
                    database::sqlite_current_timestamp()
                ],
            )
            .context("Creating account")?
        };
        if inserted == 0 {
            return Err(AuthError::EmailInUse(email));
        }

        let profile = UserProfile {
            uid: uid.clone(),
            email: email.clone(),
            first_name: first_name.trim().to_string(),
            last_name: last_name.trim().to_string(),
        };
        self.docs
            .set(
                &database::user_path(&uid),
                &models::profile_to_document(&profile)?,
            )
            .await
            .map_err(|e| {
                tracing::error!("Account {} created but its profile was not written: {:?}", uid, e);
                e
            })?;
        tracing::info!("Registered user {}", uid);
        Ok(self.open_session(uid, email))
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> AuthResult<UserSession> {
        let email = normalize_email(email)?;
        let account = self
            .find_account(&email)?
            .ok_or(AuthError::WrongCredentials)?;
        if !password_matches(&account.salt, password, &account.password_hash) {
            tracing::info!("Failed sign in for {}", account.uid);
            return Err(AuthError::WrongCredentials);
        }
        Ok(self.open_session(account.uid, account.email))
    }

    /// End a session. Returns whether the token was signed in.
    pub fn sign_out(&self, token: &str) -> bool {
        self.sessions.remove(token).is_some()
    }

    /// The session belonging to a bearer token
    pub fn session(&self, token: &str) -> AuthResult<UserSession> {
        self.sessions
            .get(token)
            .map(|s| s.value().clone())
            .ok_or(AuthError::NotSignedIn)
    }

    pub async fn profile(&self, uid: &str) -> AuthResult<Option<UserProfile>> {
        Ok(self
            .docs
            .get(&database::user_path(uid))
            .await?
            .map(|body| models::profile_from_document(&body)))
    }

    fn find_account(&self, email: &str) -> AuthResult<Option<Account>> {
        Ok(self
            .db
            .collect_rows("SELECT * FROM Account WHERE email = ?", params![email])?
            .pop())
    }

    fn open_session(&self, uid: String, email: String) -> UserSession {
        let session = UserSession {
            token: hex::encode(rand::random::<[u8; 32]>()),
            uid,
            email,
        };
        self.sessions
            .insert(session.token.clone(), session.clone());
        session
    }
}

fn normalize_email(email: &str) -> AuthResult<String> {
    let email = email.trim().to_lowercase();
    if EMAIL.is_match(&email) {
        Ok(email)
    } else {
        Err(AuthError::InvalidEmail(email))
    }
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compare against the stored hash in constant time
fn password_matches(salt: &str, password: &str, password_hash: &str) -> bool {
    hash_password(salt, password)
        .as_bytes()
        .ct_eq(password_hash.as_bytes())
        .into()
}

/// Signed-in user, taken from an `Authorization: Bearer <token>` header.
/// Use this as a request guard on routes that need a user.
#[async_trait]
impl<S> FromRequestParts<S> for UserSession
where
    Identity: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = WebError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or(AuthError::NotSignedIn)?;
        Ok(Identity::from_ref(state).session(token.trim())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn identity() -> Identity {
        let db = Database::connect_in_memory().await.unwrap();
        Identity::new(db.clone(), Arc::new(db), &AuthConfig::default())
    }

    #[tokio::test]
    async fn register_writes_profile_and_signs_in() {
        let identity = identity().await;
        let session = identity
            .register(" Cook@Example.com ", "secret1", "Ada", "Lovelace")
            .await
            .unwrap();
        assert_eq!(session.email, "cook@example.com");
        assert_eq!(identity.session(&session.token).unwrap().uid, session.uid);

        let profile = identity.profile(&session.uid).await.unwrap().unwrap();
        assert_eq!(profile.uid, session.uid);
        assert_eq!(profile.first_name, "Ada");
        assert_eq!(profile.last_name, "Lovelace");
    }

    #[tokio::test]
    async fn sign_in_checks_the_password() {
        let identity = identity().await;
        let registered = identity
            .register("cook@example.com", "secret1", "Ada", "L")
            .await
            .unwrap();

        let session = identity.sign_in("COOK@example.com", "secret1").await.unwrap();
        assert_eq!(session.uid, registered.uid);
        assert_ne!(session.token, registered.token);
        assert!(matches!(
            identity.sign_in("cook@example.com", "Secret1").await,
            Err(AuthError::WrongCredentials)
        ));
        assert!(matches!(
            identity.sign_in("nobody@example.com", "secret1").await,
            Err(AuthError::WrongCredentials)
        ));
    }

    #[test]
    fn password_hashes_compare_exactly() {
        let hash = hash_password("salt", "secret1");
        assert!(password_matches("salt", "secret1", &hash));
        assert!(!password_matches("salt", "secret2", &hash));
        assert!(!password_matches("pepper", "secret1", &hash));
        assert!(!password_matches("salt", "secret1", &hash[..10]));
    }

    #[tokio::test]
    async fn registration_rules() {
        let identity = identity().await;
        assert!(matches!(
            identity.register("not-an-email", "secret1", "", "").await,
            Err(AuthError::InvalidEmail(_))
        ));
        assert!(matches!(
            identity.register("a@b.co", "12345", "", "").await,
            Err(AuthError::WeakPassword(6))
        ));
        identity.register("a@b.co", "123456", "", "").await.unwrap();
        assert!(matches!(
            identity.register("A@B.co", "654321", "", "").await,
            Err(AuthError::EmailInUse(_))
        ));
    }

    #[tokio::test]
    async fn sign_out_ends_the_session() {
        let identity = identity().await;
        let session = identity
            .register("a@b.co", "123456", "", "")
            .await
            .unwrap();
        assert!(identity.sign_out(&session.token));
        assert!(!identity.sign_out(&session.token));
        assert!(matches!(
            identity.session(&session.token),
            Err(AuthError::NotSignedIn)
        ));
    }
}
