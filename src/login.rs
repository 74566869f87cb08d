#![cfg(feature = "web")]
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use lazy_static::lazy_static;
use log::{info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, SystemTime};
use tempfile::NamedTempFile;
use thiserror::Error;
use uuid::Uuid;

use crate::config::MAX_TOKEN_TTL;

lazy_static! {
    static ref USERNAME_PATTERN: Regex = Regex::new(r"^[A-Za-z0-9_.@+-]{1,150}$").unwrap();
}

const USERS_FILE: &str = "users.json";

/// User data structure representing a registered application user
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct User {
    /// Username (unique identifier for the user)
    pub username: String,

    /// Email address
    pub email: String,

    /// Argon2 hash of the user's password
    pub password_hash: String,

    /// Created by the admin bootstrap rather than by registration
    #[serde(default)]
    pub is_admin: bool,
}

/// Public view of a user, safe to return from the API
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UserProfile {
    pub username: String,
    pub email: String,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        UserProfile {
            username: user.username.clone(),
            email: user.email.clone(),
        }
    }
}

/// Credentials submitted to the login endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Data submitted to the registration endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    #[serde(default)]
    pub email: String,
    pub password: String,
}

/// Account created at startup when configured
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminAccount {
    pub username: String,
    pub password: String,
    pub email: String,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Authentication credentials were not provided.")]
    MissingToken,

    #[error("Invalid token.")]
    InvalidToken,

    #[error("{0}")]
    InvalidInput(String),

    #[error("Username already exists")]
    UsernameTaken,

    #[error("Email address is already registered")]
    EmailTaken,

    #[error("user database error: {0}")]
    Storage(String),

    #[error("password hashing failed")]
    Hashing,
}

impl From<std::io::Error> for AuthError {
    fn from(e: std::io::Error) -> Self {
        AuthError::Storage(e.to_string())
    }
}

/// Users persisted as a JSON map in `<root>/users.json`
pub struct UserStore {
    path: PathBuf,
    // Serializes read-modify-write cycles on the users file
    write_lock: Mutex<()>,
}

impl UserStore {
    /// Initialize the user database, creating an empty users file if needed
    pub fn open(root: impl AsRef<Path>) -> Result<Self, AuthError> {
        let root = root.as_ref();
        create_dir_all(root)?;

        let path = root.join(USERS_FILE);
        if !path.exists() {
            fs::write(&path, b"{}")?;
        }

        Ok(UserStore {
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// Get all registered users keyed by username
    pub fn get_users(&self) -> Result<HashMap<String, User>, AuthError> {
        let contents = fs::read_to_string(&self.path)?;
        serde_json::from_str(&contents)
            .map_err(|e| AuthError::Storage(format!("failed to parse users data: {e}")))
    }

    pub fn get_user(&self, username: &str) -> Result<Option<User>, AuthError> {
        Ok(self.get_users()?.remove(username))
    }

    fn save_users(&self, users: &HashMap<String, User>) -> Result<(), AuthError> {
        let json = serde_json::to_string_pretty(users)
            .map_err(|e| AuthError::Storage(format!("failed to serialize users data: {e}")))?;
        let dir = self.path.parent().unwrap_or(Path::new("."));
        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(json.as_bytes())?;
        temp.persist(&self.path).map_err(|e| AuthError::from(e.error))?;
        Ok(())
    }

    /// Register a new user
    ///
    /// The password is hashed with Argon2 before storage.
    ///
    /// # Errors
    /// * `InvalidInput` if a field is empty or the username has unsupported characters
    /// * `UsernameTaken` / `EmailTaken` if either is already in use
    pub fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
        is_admin: bool,
    ) -> Result<User, AuthError> {
        let username = username.trim();
        let email = email.trim();
        if username.is_empty() || password.is_empty() || email.is_empty() {
            return Err(AuthError::InvalidInput(
                "Username, email and password cannot be empty".to_string(),
            ));
        }
        if !USERNAME_PATTERN.is_match(username) || username.starts_with('.') {
            return Err(AuthError::InvalidInput(
                "Username may only contain letters, digits and @/./+/-/_".to_string(),
            ));
        }

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| AuthError::Storage("user store lock poisoned".to_string()))?;
        let mut users = self.get_users()?;
        if users.contains_key(username) {
            return Err(AuthError::UsernameTaken);
        }
        if users.values().any(|user| user.email.eq_ignore_ascii_case(email)) {
            return Err(AuthError::EmailTaken);
        }

        let user = User {
            username: username.to_string(),
            email: email.to_string(),
            password_hash: hash_password(password)?,
            is_admin,
        };
        users.insert(user.username.clone(), user.clone());
        self.save_users(&users)?;

        info!("registered user {}", user.username);
        Ok(user)
    }

    /// Verify user credentials, returning the user on success
    pub fn verify(&self, username: &str, password: &str) -> Result<Option<User>, AuthError> {
        let Some(user) = self.get_user(username)? else {
            return Ok(None);
        };
        if verify_password(password, &user.password_hash)? {
            Ok(Some(user))
        } else {
            Ok(None)
        }
    }
}

/// Hash a password using Argon2
fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| AuthError::Hashing)
}

/// Verify a password against a stored hash
fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|_| AuthError::Storage("invalid password hash format".to_string()))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

#[derive(Debug, Clone)]
struct TokenEntry {
    username: String,
    expires_at: SystemTime,
}

/// In-memory registry of issued bearer tokens
///
/// One live token per user: logging in again while a token is valid
/// returns the same token.
pub struct TokenRegistry {
    tokens: RwLock<HashMap<String, TokenEntry>>,
    ttl: Duration,
}

impl TokenRegistry {
    /// Lifetimes above [`MAX_TOKEN_TTL`] are clamped to it
    pub fn new(ttl: Duration) -> Self {
        TokenRegistry {
            tokens: RwLock::new(HashMap::new()),
            ttl: ttl.min(MAX_TOKEN_TTL),
        }
    }

    /// Return the user's live token or issue a new one
    pub fn issue(&self, username: &str) -> Result<String, AuthError> {
        let now = SystemTime::now();
        let mut tokens = self
            .tokens
            .write()
            .map_err(|_| AuthError::Storage("token registry lock poisoned".to_string()))?;
        tokens.retain(|_, entry| entry.expires_at > now);

        if let Some((token, _)) = tokens.iter().find(|(_, e)| e.username == username) {
            return Ok(token.clone());
        }

        let token = Uuid::new_v4().simple().to_string();
        tokens.insert(
            token.clone(),
            TokenEntry {
                username: username.to_string(),
                expires_at: now.checked_add(self.ttl).unwrap_or(now),
            },
        );
        Ok(token)
    }

    /// Validate a token, returning its owner
    pub fn validate(&self, token: &str) -> Result<String, AuthError> {
        let tokens = self
            .tokens
            .read()
            .map_err(|_| AuthError::Storage("token registry lock poisoned".to_string()))?;
        match tokens.get(token) {
            Some(entry) if entry.expires_at > SystemTime::now() => Ok(entry.username.clone()),
            _ => Err(AuthError::InvalidToken),
        }
    }

    /// Invalidate a token; unknown tokens are ignored
    pub fn revoke(&self, token: &str) -> Result<(), AuthError> {
        let mut tokens = self
            .tokens
            .write()
            .map_err(|_| AuthError::Storage("token registry lock poisoned".to_string()))?;
        tokens.remove(token);
        Ok(())
    }
}

/// Users plus tokens: everything the auth gate needs
pub struct Authenticator {
    pub users: UserStore,
    pub tokens: TokenRegistry,
}

impl Authenticator {
    pub fn new(users: UserStore, ttl: Duration) -> Self {
        Authenticator {
            users,
            tokens: TokenRegistry::new(ttl),
        }
    }

    /// Check credentials and hand out a token
    pub fn login(&self, username: &str, password: &str) -> Result<(String, User), AuthError> {
        match self.users.verify(username, password)? {
            Some(user) => {
                let token = self.tokens.issue(&user.username)?;
                info!("user {} logged in", user.username);
                Ok((token, user))
            }
            None => {
                warn!("failed login attempt for {:?}", username);
                Err(AuthError::InvalidCredentials)
            }
        }
    }

    /// Register a user and log them straight in
    pub fn register(&self, request: &RegisterRequest) -> Result<(String, User), AuthError> {
        let user = self
            .users
            .register(&request.username, &request.email, &request.password, false)?;
        let token = self.tokens.issue(&user.username)?;
        Ok((token, user))
    }

    pub fn logout(&self, token: &str) -> Result<(), AuthError> {
        self.tokens.revoke(token)
    }

    /// Resolve an `Authorization` header value to a username
    pub fn authenticate(&self, header: Option<&str>) -> Result<String, AuthError> {
        let token = parse_authorization(header.ok_or(AuthError::MissingToken)?)
            .ok_or(AuthError::InvalidToken)?;
        self.tokens.validate(token)
    }

    /// Create the configured admin account unless it already exists
    ///
    /// # Returns
    /// * `Ok(true)` if the account was created, `Ok(false)` if it was already there
    pub fn ensure_admin(&self, admin: &AdminAccount) -> Result<bool, AuthError> {
        if self.users.get_user(&admin.username)?.is_some() {
            warn!("admin user already exists: {}", admin.username);
            return Ok(false);
        }
        self.users
            .register(&admin.username, &admin.email, &admin.password, true)?;
        info!("created admin user: {}", admin.username);
        Ok(true)
    }
}

/// Extract the token from an `Authorization` header value
///
/// Accepts `Token <value>` and `Bearer <value>` (scheme is case-insensitive).
///
/// # Examples
/// ```
/// use equipviz::login::parse_authorization;
///
/// assert_eq!(parse_authorization("Token abc123"), Some("abc123"));
/// assert_eq!(parse_authorization("Basic abc123"), None);
/// ```
pub fn parse_authorization(header: &str) -> Option<&str> {
    let (scheme, value) = header.trim().split_once(' ')?;
    let value = value.trim();
    let known = scheme.eq_ignore_ascii_case("token") || scheme.eq_ignore_ascii_case("bearer");
    (known && !value.is_empty()).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_TOKEN_TTL;

    fn authenticator(dir: &Path) -> Authenticator {
        Authenticator::new(UserStore::open(dir).unwrap(), DEFAULT_TOKEN_TTL)
    }

    fn register(auth: &Authenticator, name: &str) -> (String, User) {
        auth.register(&RegisterRequest {
            username: name.to_string(),
            email: format!("{name}@example.com"),
            password: "s3cret!".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn register_then_login() {
        let dir = tempfile::tempdir().unwrap();
        let auth = authenticator(dir.path());
        let (token, user) = register(&auth, "alice");

        assert_ne!(user.password_hash, "s3cret!");
        assert!(!user.is_admin);
        assert_eq!(auth.tokens.validate(&token).unwrap(), "alice");

        let (again, _) = auth.login("alice", "s3cret!").unwrap();
        assert_eq!(again, token);
        assert!(matches!(
            auth.login("alice", "wrong"),
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            auth.login("nobody", "s3cret!"),
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[test]
    fn duplicate_and_invalid_registrations() {
        let dir = tempfile::tempdir().unwrap();
        let auth = authenticator(dir.path());
        register(&auth, "alice");

        let duplicate = auth.users.register("alice", "other@example.com", "pw", false);
        assert!(matches!(duplicate, Err(AuthError::UsernameTaken)));
        let same_email = auth.users.register("alice2", "ALICE@example.com", "pw", false);
        assert!(matches!(same_email, Err(AuthError::EmailTaken)));
        let empty = auth.users.register("bob", "", "pw", false);
        assert!(matches!(empty, Err(AuthError::InvalidInput(_))));
        let traversal = auth.users.register("../bob", "b@example.com", "pw", false);
        assert!(matches!(traversal, Err(AuthError::InvalidInput(_))));
    }

    #[test]
    fn users_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        register(&authenticator(dir.path()), "alice");

        let reopened = authenticator(dir.path());
        assert!(reopened.login("alice", "s3cret!").is_ok());
    }

    #[test]
    fn logout_invalidates_token() {
        let dir = tempfile::tempdir().unwrap();
        let auth = authenticator(dir.path());
        let (token, _) = register(&auth, "alice");
        let header = format!("Token {token}");

        assert_eq!(auth.authenticate(Some(&header)).unwrap(), "alice");
        auth.logout(&token).unwrap();
        assert!(matches!(
            auth.authenticate(Some(&header)),
            Err(AuthError::InvalidToken)
        ));
        assert!(matches!(auth.authenticate(None), Err(AuthError::MissingToken)));

        let (fresh, _) = auth.login("alice", "s3cret!").unwrap();
        assert_ne!(fresh, token);
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let auth = Authenticator::new(UserStore::open(dir.path()).unwrap(), Duration::ZERO);
        register(&auth, "alice");
        let (token, _) = auth.login("alice", "s3cret!").unwrap();
        assert!(matches!(
            auth.tokens.validate(&token),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn oversized_ttl_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let auth = Authenticator::new(UserStore::open(dir.path()).unwrap(), Duration::MAX);
        register(&auth, "alice");
        let (token, _) = auth.login("alice", "s3cret!").unwrap();
        assert_eq!(auth.tokens.validate(&token).unwrap(), "alice");
    }

    #[test]
    fn admin_bootstrap_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let auth = authenticator(dir.path());
        let admin = AdminAccount {
            username: "admin".to_string(),
            password: "admin123".to_string(),
            email: "admin@example.com".to_string(),
        };

        assert!(auth.ensure_admin(&admin).unwrap());
        assert!(!auth.ensure_admin(&admin).unwrap());
        assert!(auth.users.get_user("admin").unwrap().unwrap().is_admin);
        assert!(auth.login("admin", "admin123").is_ok());
    }

    #[test]
    fn authorization_header_parsing() {
        assert_eq!(parse_authorization("Token abc"), Some("abc"));
        assert_eq!(parse_authorization("bearer  abc "), Some("abc"));
        assert_eq!(parse_authorization("Token "), None);
        assert_eq!(parse_authorization("abc"), None);
    }
}
