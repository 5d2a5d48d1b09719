//! Encrypted session persistence
//!
//! Sessions are stored encrypted with AES-256-GCM in ~/.config/geotrail/sessions.enc.
//! The encryption key is derived from machine-specific identifiers, so the
//! file is useless when copied to another machine.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::models::{Session, SessionToken, TokenKind};
use crate::paths;

const NONCE_SIZE: usize = 12;

/// A session handle as written to disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    /// Account name
    pub username: String,
    /// Token to present on reload
    pub token: SessionToken,
    /// When the handle was written
    pub saved_at: DateTime<Utc>,
}

impl PersistedSession {
    /// Rebuild an authenticated session from the handle
    pub fn into_session(self) -> Session {
        let mut session = Session::authenticated(&self.username, self.token);
        session.established_at = Some(self.saved_at);
        session
    }
}

/// Get machine ID for key derivation
fn get_machine_id() -> String {
    #[cfg(target_os = "linux")]
    {
        if let Ok(id) = fs::read_to_string("/etc/machine-id") {
            return id.trim().to_string();
        }
        if let Ok(id) = fs::read_to_string("/var/lib/dbus/machine-id") {
            return id.trim().to_string();
        }
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(output) = std::process::Command::new("ioreg")
            .args(["-rd1", "-c", "IOPlatformExpertDevice"])
            .output()
        {
            let stdout = String::from_utf8_lossy(&output.stdout);
            for line in stdout.lines() {
                if line.contains("IOPlatformUUID") {
                    if let Some(uuid) = line.split('"').nth(3) {
                        return uuid.to_string();
                    }
                }
            }
        }
    }

    dirs::home_dir()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|| "geotrail-fallback-key".to_string())
}

/// Derive encryption key from machine-specific data
fn derive_key() -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(get_machine_id().as_bytes());

    if let Some(home) = dirs::home_dir() {
        hasher.update(home.to_string_lossy().as_bytes());
    }

    hasher.update(b"geotrail-session-store-v1");

    hasher.finalize().into()
}

fn cipher() -> Result<Aes256Gcm> {
    Aes256Gcm::new_from_slice(&derive_key()).map_err(|_| anyhow::anyhow!("Invalid key length"))
}

/// Encrypted key/value file of persisted sessions.
///
/// One harvest process writes; later runs only read until a handle is
/// judged expired and removed.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    /// Store at the default location
    pub fn open_default() -> Result<Self> {
        Ok(Self::at(paths::sessions_path()?))
    }

    /// Store at a specific path
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File backing this store
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<HashMap<String, PersistedSession>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }

        let encrypted = fs::read(&self.path).context("Failed to read session file")?;
        if encrypted.len() < NONCE_SIZE {
            return Ok(HashMap::new());
        }

        let (nonce_bytes, ciphertext) = encrypted.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher()?
            .decrypt(nonce, ciphertext)
            .map_err(|_| anyhow::anyhow!("Failed to decrypt session file"))?;

        let json = String::from_utf8(plaintext).context("Invalid UTF-8 in session file")?;
        serde_json::from_str(&json).context("Failed to parse session file")
    }

    fn write_all(&self, sessions: &HashMap<String, PersistedSession>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create session directory")?;
        }

        let json = serde_json::to_string(sessions)?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher()?
            .encrypt(nonce, json.as_bytes())
            .map_err(|_| anyhow::anyhow!("Failed to encrypt session file"))?;

        let mut output = nonce_bytes.to_vec();
        output.extend(ciphertext);

        fs::write(&self.path, output).context("Failed to write session file")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&self.path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(&self.path, perms)?;
        }

        Ok(())
    }

    /// Load the handle stored for an account
    pub fn load(&self, username: &str, kind: TokenKind) -> Result<Option<PersistedSession>> {
        let sessions = self.read_all()?;
        Ok(sessions.get(&Session::store_key(username, kind)).cloned())
    }

    /// Persist an authenticated session. Sessions without a token are ignored.
    pub fn save(&self, session: &Session) -> Result<()> {
        let Some(token) = session.token.clone() else {
            return Ok(());
        };

        // An unreadable file (e.g. from another machine) is replaced
        let mut sessions = self.read_all().unwrap_or_default();
        sessions.insert(
            Session::store_key(&session.username, token.kind),
            PersistedSession {
                username: session.username.clone(),
                token,
                saved_at: Utc::now(),
            },
        );
        self.write_all(&sessions)
    }

    /// Forget the handle stored for an account
    pub fn remove(&self, username: &str, kind: TokenKind) -> Result<()> {
        let mut sessions = self.read_all().unwrap_or_default();
        if sessions.remove(&Session::store_key(username, kind)).is_some() {
            self.write_all(&sessions)?;
        }
        Ok(())
    }

    /// Accounts with a stored handle
    pub fn usernames(&self) -> Vec<String> {
        self.read_all()
            .map(|s| s.into_values().map(|p| p.username).collect())
            .unwrap_or_default()
    }
}
