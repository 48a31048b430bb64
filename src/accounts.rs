//! Account management
//!
//! Usernames map to salted SHA-256 password hashes kept in a JSON file.
//! Logging in or signing up provisions the user's home directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::filesystem::security::{sanitize_name, PathResolver, UserRoot};
use crate::protocol::FileSystemError;

pub const MIN_USERNAME_LEN: usize = 3;
pub const MIN_PASSWORD_LEN: usize = 6;
const SALT_BYTES: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("account store i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("account store is corrupt: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    FileSystem(#[from] FileSystemError),
    #[error("account store lock poisoned")]
    Poisoned,
}

/// Username → hashed password mapping.
pub trait CredentialStore: Send + Sync {
    fn verify(&self, username: &str, password: &str) -> Result<bool, AccountError>;

    /// Returns `false` when the username is taken.
    fn create(&self, username: &str, password: &str) -> Result<bool, AccountError>;

    /// Returns `false` when the username or old password does not match.
    fn change_password(
        &self,
        username: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<bool, AccountError>;
}

/// Credential store backed by a single JSON object on disk.
pub struct JsonCredentialStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<BTreeMap<String, String>, AccountError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let data = fs::read_to_string(&self.path)?;
        if data.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&data)?)
    }

    fn save(&self, users: &BTreeMap<String, String>) -> Result<(), AccountError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(users)?;
        let temp = self
            .path
            .with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        fs::write(&temp, data)?;
        if let Err(e) = fs::rename(&temp, &self.path) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }
        Ok(())
    }
}

impl CredentialStore for JsonCredentialStore {
    fn verify(&self, username: &str, password: &str) -> Result<bool, AccountError> {
        let _guard = self.lock.lock().map_err(|_| AccountError::Poisoned)?;
        let users = self.load()?;
        Ok(users
            .get(username)
            .map(|record| verify_record(record, password))
            .unwrap_or(false))
    }

    fn create(&self, username: &str, password: &str) -> Result<bool, AccountError> {
        let _guard = self.lock.lock().map_err(|_| AccountError::Poisoned)?;
        let mut users = self.load()?;
        if users.contains_key(username) {
            return Ok(false);
        }
        users.insert(username.to_string(), new_record(password));
        self.save(&users)?;
        Ok(true)
    }

    fn change_password(
        &self,
        username: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<bool, AccountError> {
        let _guard = self.lock.lock().map_err(|_| AccountError::Poisoned)?;
        let mut users = self.load()?;
        match users.get(username) {
            Some(record) if verify_record(record, old_password) => {}
            _ => return Ok(false),
        }
        users.insert(username.to_string(), new_record(new_password));
        self.save(&users)?;
        Ok(true)
    }
}

fn digest(salt: &[u8], password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// `<salt-hex>$<sha256-hex>`
fn new_record(password: &str) -> String {
    let mut salt = [0u8; SALT_BYTES];
    rand::thread_rng().fill_bytes(&mut salt);
    format!("{}${}", hex::encode(salt), digest(&salt, password))
}

/// Accepts salted records and bare unsalted SHA-256 hex from older stores.
fn verify_record(record: &str, password: &str) -> bool {
    match record.split_once('$') {
        Some((salt_hex, expected)) => match hex::decode(salt_hex) {
            Ok(salt) => digest(&salt, password) == expected,
            Err(_) => false,
        },
        None => digest(&[], password) == record,
    }
}

/// Identity service consumed by the server: credential checks plus home
/// directory provisioning.
pub struct AccountService {
    store: Arc<dyn CredentialStore>,
    resolver: Arc<PathResolver>,
}

impl AccountService {
    pub fn new(store: Arc<dyn CredentialStore>, resolver: Arc<PathResolver>) -> Self {
        Self { store, resolver }
    }

    /// The user's home on success, `None` for bad credentials.
    pub fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<UserRoot>, AccountError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Ok(None);
        }
        if !self.store.verify(username, password)? {
            tracing::info!("Failed login for {}", username);
            return Ok(None);
        }
        let root = self.resolver.provision(username)?;
        tracing::info!("User {} logged in", username);
        Ok(Some(root))
    }

    /// The new user's home, or `None` when the username is taken.
    pub fn create_account(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<UserRoot>, AccountError> {
        let username = username.trim();
        validate_username(username)?;
        validate_password(password)?;

        if !self.store.create(username, password)? {
            return Ok(None);
        }
        let root = self.resolver.provision(username)?;
        tracing::info!("Created account {}", username);
        Ok(Some(root))
    }

    pub fn change_password(
        &self,
        username: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<bool, AccountError> {
        let username = username.trim();
        if username.is_empty() || old_password.is_empty() || new_password.is_empty() {
            return Err(AccountError::Invalid("All fields are required".to_string()));
        }
        validate_password(new_password)?;

        let changed = self
            .store
            .change_password(username, old_password, new_password)?;
        if changed {
            tracing::info!("Password changed for {}", username);
        }
        Ok(changed)
    }
}

fn validate_username(username: &str) -> Result<(), AccountError> {
    if username.len() < MIN_USERNAME_LEN {
        return Err(AccountError::Invalid(format!(
            "Username must be at least {} characters",
            MIN_USERNAME_LEN
        )));
    }
    if sanitize_name(username) != username {
        return Err(AccountError::Invalid(
            "Username may only contain letters, digits, '_', '-' and '.'".to_string(),
        ));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), AccountError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AccountError::Invalid(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}
