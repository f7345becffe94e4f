//! Credential storage: file-based (primary) + OS keyring (optional mirror)
//!
//! The session record (credentials and profile together) is serialized as a
//! single JSON document, so a save can never leave one half updated. The file
//! is replaced by rename, which readers observe atomically.
//!
//! Anything that fails to decode is treated as "no session": the record is
//! removed and the user simply starts logged out.

use super::types::{AuthError, AuthSession};
use crate::settings::{SessionSettings, APP_NAME};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use keyring::Entry;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::path::PathBuf;

const SESSION_KEY: &str = "auth_session";
const AUTH_SESSION_FILE: &str = "session.dat";
const AUTH_SESSION_TMP_FILE: &str = "session.dat.tmp";

// Obfuscation only keeps tokens from being read at a glance; it is not encryption
const OBFUSCATION_KEY: &[u8] = b"PromptGen2024SessionStore";

/// Durable holder of the session record
pub trait CredentialStore: Send + Sync {
    /// Persist credentials and profile as one record
    fn save(&self, session: &AuthSession) -> Result<(), AuthError>;

    /// Rehydrate the record. Corrupt data is reported as `None`.
    fn load(&self) -> Option<AuthSession>;

    /// Remove every persisted copy
    fn clear(&self) -> Result<(), AuthError>;
}

/// File store with an optional keyring mirror
pub struct FileCredentialStore {
    keyring_entry: Option<Entry>,
    data_dir: PathBuf,
}

impl FileCredentialStore {
    /// Create a store rooted at `data_dir`
    pub fn new(data_dir: impl Into<PathBuf>, use_keyring: bool) -> Result<Self, AuthError> {
        let data_dir = data_dir.into();

        std::fs::create_dir_all(&data_dir).map_err(|e| {
            AuthError::StorageError(format!("Failed to create data directory: {}", e))
        })?;

        info!(
            "Credential store at {}",
            data_dir.join(AUTH_SESSION_FILE).display()
        );

        let keyring_entry = if use_keyring {
            match Entry::new(APP_NAME, SESSION_KEY) {
                Ok(entry) => {
                    debug!("Keyring mirror available");
                    Some(entry)
                }
                Err(e) => {
                    warn!("Keyring not available ({}). Using file storage only.", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            keyring_entry,
            data_dir,
        })
    }

    /// Create a store from settings (platform data dir unless overridden)
    pub fn from_settings(settings: &SessionSettings) -> Result<Self, AuthError> {
        let data_dir = settings.resolve_data_dir().ok_or_else(|| {
            AuthError::StorageError("Could not determine data directory".to_string())
        })?;
        Self::new(data_dir, settings.use_keyring)
    }

    /// Get the session file path
    pub fn session_file_path(&self) -> PathBuf {
        self.data_dir.join(AUTH_SESSION_FILE)
    }

    /// XOR obfuscation; applying it twice restores the input
    fn obfuscate(data: &[u8]) -> Vec<u8> {
        data.iter()
            .enumerate()
            .map(|(i, &byte)| byte ^ OBFUSCATION_KEY[i % OBFUSCATION_KEY.len()])
            .collect()
    }

    fn encode(session: &AuthSession) -> Result<String, AuthError> {
        let json = serde_json::to_string(session)
            .map_err(|e| AuthError::StorageError(format!("Failed to serialize session: {}", e)))?;
        Ok(BASE64.encode(Self::obfuscate(json.as_bytes())))
    }

    fn decode(encoded: &str) -> Result<AuthSession, AuthError> {
        let obfuscated = BASE64
            .decode(encoded.trim())
            .map_err(|e| AuthError::StorageCorrupt(format!("base64: {}", e)))?;
        let json = String::from_utf8(Self::obfuscate(&obfuscated))
            .map_err(|e| AuthError::StorageCorrupt(format!("utf8: {}", e)))?;
        let session: AuthSession = serde_json::from_str(&json)
            .map_err(|e| AuthError::StorageCorrupt(format!("json: {}", e)))?;
        if session.credentials.access_token.is_empty() {
            return Err(AuthError::StorageCorrupt("empty access token".to_string()));
        }
        Ok(session)
    }

    /// Write to a temp file, then rename over the record
    fn store_to_file(&self, encoded: &str) -> Result<(), AuthError> {
        let tmp = self.data_dir.join(AUTH_SESSION_TMP_FILE);
        let path = self.session_file_path();

        std::fs::write(&tmp, encoded).map_err(|e| {
            error!("Failed to write session file: {}", e);
            AuthError::StorageError(format!("Failed to write session file: {}", e))
        })?;
        std::fs::rename(&tmp, &path).map_err(|e| {
            error!("Failed to move session file into place: {}", e);
            let _ = std::fs::remove_file(&tmp);
            AuthError::StorageError(format!("Failed to replace session file: {}", e))
        })?;

        debug!("Session stored in file ({} bytes)", encoded.len());
        Ok(())
    }

    fn load_from_file(&self) -> Option<AuthSession> {
        let path = self.session_file_path();

        if !path.exists() {
            debug!("Session file does not exist (first run or logged out)");
            return None;
        }

        let encoded = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) => {
                error!("Failed to read session file: {}", e);
                return None;
            }
        };

        match Self::decode(&encoded) {
            Ok(session) => {
                info!("Loaded session from file for user: {}", session.user.identifier);
                Some(session)
            }
            Err(e) => {
                error!("Discarding unreadable session file: {}", e);
                let _ = std::fs::remove_file(&path);
                None
            }
        }
    }

    fn clear_file(&self) -> Result<(), AuthError> {
        let path = self.session_file_path();
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| {
                AuthError::StorageError(format!("Failed to delete session file: {}", e))
            })?;
            info!("Cleared session file");
        }
        Ok(())
    }

    fn store_to_keyring(&self, encoded: &str) {
        let Some(entry) = &self.keyring_entry else {
            return;
        };
        match entry.set_password(encoded) {
            Ok(()) => debug!("Session mirrored to keyring"),
            Err(e) => warn!("Failed to store in keyring (file storage still works): {}", e),
        }
    }

    fn load_from_keyring(&self) -> Option<AuthSession> {
        let entry = self.keyring_entry.as_ref()?;

        match entry.get_password() {
            Ok(encoded) => match Self::decode(&encoded) {
                Ok(session) => Some(session),
                Err(e) => {
                    warn!("Discarding unreadable keyring session: {}", e);
                    let _ = entry.delete_credential();
                    None
                }
            },
            Err(keyring::Error::NoEntry) => {
                debug!("No session in keyring");
                None
            }
            Err(e) => {
                warn!("Keyring read error: {:?}", e);
                None
            }
        }
    }

    fn clear_keyring(&self) {
        if let Some(entry) = &self.keyring_entry {
            match entry.delete_credential() {
                Ok(()) => info!("Cleared session from keyring"),
                Err(keyring::Error::NoEntry) => debug!("No keyring session to clear"),
                Err(e) => warn!("Failed to clear keyring session: {}", e),
            }
        }
    }
}

impl CredentialStore for FileCredentialStore {
    fn save(&self, session: &AuthSession) -> Result<(), AuthError> {
        info!(
            "Storing session for {} (token length: {} chars, expires: {:?})",
            session.user.identifier,
            session.credentials.access_token.len(),
            session.credentials.expires_at
        );

        let encoded = Self::encode(session)?;
        self.store_to_file(&encoded)?;
        self.store_to_keyring(&encoded);
        Ok(())
    }

    fn load(&self) -> Option<AuthSession> {
        if let Some(session) = self.load_from_file() {
            return Some(session);
        }

        let session = self.load_from_keyring()?;
        info!("Session loaded from keyring (migrating to file storage)");
        if let Ok(encoded) = Self::encode(&session) {
            let _ = self.store_to_file(&encoded);
        }
        Some(session)
    }

    fn clear(&self) -> Result<(), AuthError> {
        self.clear_keyring();
        self.clear_file()
    }
}

/// Process-local store; nothing survives a restart
#[derive(Default)]
pub struct MemoryCredentialStore {
    record: Mutex<Option<AuthSession>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a session
    pub fn with_session(session: AuthSession) -> Self {
        Self {
            record: Mutex::new(Some(session)),
        }
    }

    /// Current record without going through `load`
    pub fn snapshot(&self) -> Option<AuthSession> {
        self.record.lock().clone()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn save(&self, session: &AuthSession) -> Result<(), AuthError> {
        *self.record.lock() = Some(session.clone());
        Ok(())
    }

    fn load(&self) -> Option<AuthSession> {
        self.record.lock().clone()
    }

    fn clear(&self) -> Result<(), AuthError> {
        *self.record.lock() = None;
        Ok(())
    }
}
