use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use super::{FileSessionStore, KeyringSessionStore};
use crate::models::TokenPair;

/// The two named credential entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub const ALL: [TokenKind; 2] = [TokenKind::Access, TokenKind::Refresh];

    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access_token",
            TokenKind::Refresh => "refresh_token",
        }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable storage for the session credential pair.
///
/// Passed explicitly to the `ApiClient`; nothing reads credentials from
/// ambient global state.
pub trait SessionStore: Send + Sync {
    fn get(&self, kind: TokenKind) -> Result<Option<String>>;

    fn set(&self, kind: TokenKind, value: &str) -> Result<()>;

    /// Remove both credentials.
    fn clear(&self) -> Result<()>;

    fn access_token(&self) -> Result<Option<String>> {
        self.get(TokenKind::Access)
    }

    fn refresh_token(&self) -> Result<Option<String>> {
        self.get(TokenKind::Refresh)
    }

    fn store_pair(&self, pair: &TokenPair) -> Result<()> {
        self.set(TokenKind::Access, &pair.access_token)?;
        self.set(TokenKind::Refresh, &pair.refresh_token)
    }

    /// A stored access credential is what makes the caller authenticated.
    fn is_authenticated(&self) -> bool {
        matches!(self.access_token(), Ok(Some(ref t)) if !t.is_empty())
    }
}

/// In-memory credential store.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    tokens: RwLock<HashMap<TokenKind, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with an existing pair, as if a login had already happened.
    pub fn with_pair(pair: &TokenPair) -> Self {
        let mut tokens = HashMap::new();
        tokens.insert(TokenKind::Access, pair.access_token.clone());
        tokens.insert(TokenKind::Refresh, pair.refresh_token.clone());
        Self {
            tokens: RwLock::new(tokens),
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, kind: TokenKind) -> Result<Option<String>> {
        let tokens = self
            .tokens
            .read()
            .map_err(|_| anyhow!("session store lock poisoned"))?;
        Ok(tokens.get(&kind).cloned())
    }

    fn set(&self, kind: TokenKind, value: &str) -> Result<()> {
        let mut tokens = self
            .tokens
            .write()
            .map_err(|_| anyhow!("session store lock poisoned"))?;
        tokens.insert(kind, value.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut tokens = self
            .tokens
            .write()
            .map_err(|_| anyhow!("session store lock poisoned"))?;
        tokens.clear();
        Ok(())
    }
}

/// Which `SessionStore` implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialBackend {
    #[default]
    File,
    Keyring,
    Memory,
}

impl std::str::FromStr for CredentialBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(CredentialBackend::File),
            "keyring" | "keychain" => Ok(CredentialBackend::Keyring),
            "memory" => Ok(CredentialBackend::Memory),
            other => Err(anyhow!(
                "Unknown credential backend '{}' (expected file, keyring or memory)",
                other
            )),
        }
    }
}

impl std::fmt::Display for CredentialBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialBackend::File => write!(f, "file"),
            CredentialBackend::Keyring => write!(f, "keyring"),
            CredentialBackend::Memory => write!(f, "memory"),
        }
    }
}

/// Open the configured store. `cache_dir` is where the file backend keeps
/// `session.json`.
pub fn open_store(backend: CredentialBackend, cache_dir: PathBuf) -> Arc<dyn SessionStore> {
    match backend {
        CredentialBackend::File => Arc::new(FileSessionStore::new(cache_dir)),
        CredentialBackend::Keyring => Arc::new(KeyringSessionStore::new()),
        CredentialBackend::Memory => Arc::new(MemorySessionStore::new()),
    }
}
