//! Username/password accounts: PBKDF2 hashing over a SQLite `users` table.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use pbkdf2::{Params, Pbkdf2};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::{fs, path::Path, sync::Arc};
use thiserror::Error;
use tracing::{info, warn};

pub const DEFAULT_PBKDF2_ROUNDS: u32 = 29_000;
const HASH_OUTPUT_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("username {0:?} is already registered")]
    Duplicate(String),
    #[error("account store failure: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0} must not be blank")]
    Blank(&'static str),
    #[error("Username already registered")]
    Duplicate,
    #[error("Incorrect username or password")]
    InvalidCredentials,
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate(_) => AuthError::Duplicate,
            other => AuthError::Store(other),
        }
    }
}

// ---------- Hashing ----------

/// PBKDF2-SHA256 producing PHC strings (`$pbkdf2-sha256$i=..,l=..$salt$hash`).
/// The salt and round count travel inside the string, so `verify` needs no
/// configuration and old hashes stay valid after `rounds` changes.
#[derive(Debug, Clone, Copy)]
pub struct PasswordHashing {
    rounds: u32,
}

impl Default for PasswordHashing {
    fn default() -> Self {
        Self::new(DEFAULT_PBKDF2_ROUNDS)
    }
}

impl PasswordHashing {
    pub fn new(rounds: u32) -> Self {
        Self { rounds: rounds.max(1) }
    }

    pub fn hash(&self, plaintext: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        let params = Params {
            rounds: self.rounds,
            output_length: HASH_OUTPUT_LEN,
        };
        let hash = Pbkdf2
            .hash_password_customized(plaintext.as_bytes(), None, None, params, &salt)
            .map_err(|e| AuthError::Hash(e.to_string()))?;
        Ok(hash.to_string())
    }

    pub fn verify(&self, plaintext: &str, stored: &str) -> bool {
        match PasswordHash::new(stored) {
            Ok(parsed) => Pbkdf2.verify_password(plaintext.as_bytes(), &parsed).is_ok(),
            Err(e) => {
                warn!("stored password hash is malformed: {e}");
                false
            }
        }
    }
}

// ---------- Store ----------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub hashed_password: String,
}

/// Account persistence. Implementations enforce one row per username at
/// write time.
pub trait AccountStore: Send + Sync {
    fn create_user(&self, username: &str, password_hash: &str) -> Result<UserRecord, StoreError>;

    fn find_user(&self, username: &str) -> Result<Option<UserRecord>, StoreError>;
}

#[derive(Debug)]
pub struct SqliteAccountStore {
    conn: Mutex<Connection>,
}

impl SqliteAccountStore {
    pub fn open(path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed creating database dir {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed opening account database {}", path))?;
        let store = Self::with_connection(conn)?;
        info!("account store ready at {path}");
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed opening in-memory database")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                hashed_password TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_users_username ON users(username);
            ",
        )
        .context("failed initializing users schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl AccountStore for SqliteAccountStore {
    fn create_user(&self, username: &str, password_hash: &str) -> Result<UserRecord, StoreError> {
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT INTO users(username, hashed_password) VALUES(?1, ?2)",
            params![username, password_hash],
        );
        match inserted {
            Ok(_) => Ok(UserRecord {
                id: conn.last_insert_rowid(),
                username: username.to_string(),
                hashed_password: password_hash.to_string(),
            }),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(StoreError::Duplicate(username.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn find_user(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, username, hashed_password FROM users WHERE username = ?1",
                params![username],
                |row| {
                    Ok(UserRecord {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        hashed_password: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}

// ---------- Flow ----------

#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn AccountStore>,
    hasher: PasswordHashing,
    /// Verified against when the username is unknown, so both failure paths
    /// do the same amount of work.
    decoy_hash: Arc<str>,
}

impl AuthService {
    pub fn new(store: Arc<dyn AccountStore>, hasher: PasswordHashing) -> Result<Self, AuthError> {
        let decoy_hash = Arc::from(hasher.hash("decoy-password-never-issued")?);
        Ok(Self {
            store,
            hasher,
            decoy_hash,
        })
    }

    pub fn signup(&self, username: &str, password: &str) -> Result<UserRecord, AuthError> {
        check_present(username, password)?;
        let hash = self.hasher.hash(password)?;
        let user = self.store.create_user(username, &hash).map_err(|e| {
            if matches!(e, StoreError::Duplicate(_)) {
                warn!("signup rejected: username {username:?} already registered");
            }
            AuthError::from(e)
        })?;
        info!("user {:?} registered (id={})", user.username, user.id);
        Ok(user)
    }

    /// Returns the username on success. Unknown users and wrong passwords
    /// produce the same error.
    pub fn signin(&self, username: &str, password: &str) -> Result<String, AuthError> {
        let user = if username.trim().is_empty() || password.is_empty() {
            None
        } else {
            self.store.find_user(username)?
        };
        match user {
            Some(user) if self.hasher.verify(password, &user.hashed_password) => Ok(user.username),
            Some(_) => {
                warn!("signin failed for {username:?}");
                Err(AuthError::InvalidCredentials)
            }
            None => {
                let _ = self.hasher.verify(password, &self.decoy_hash);
                warn!("signin failed for {username:?}");
                Err(AuthError::InvalidCredentials)
            }
        }
    }
}

fn check_present(username: &str, password: &str) -> Result<(), AuthError> {
    if username.trim().is_empty() {
        return Err(AuthError::Blank("username"));
    }
    if password.is_empty() {
        return Err(AuthError::Blank("password"));
    }
    Ok(())
}
