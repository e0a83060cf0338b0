use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{SessionStore, TokenKind};

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionData {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SessionData {
    fn slot(&mut self, kind: TokenKind) -> &mut Option<String> {
        match kind {
            TokenKind::Access => &mut self.access_token,
            TokenKind::Refresh => &mut self.refresh_token,
        }
    }
}

/// Credential pair persisted as JSON in the cache directory.
///
/// Every call goes to disk so separate processes see each other's updates.
pub struct FileSessionStore {
    cache_dir: PathBuf,
    // Serializes read-modify-write cycles within this process
    lock: Mutex<()>,
}

impl FileSessionStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            lock: Mutex::new(()),
        }
    }

    /// Load session from disk. A corrupt file reads as an empty session.
    pub fn load(&self) -> Result<SessionData> {
        let path = self.session_path();
        if !path.exists() {
            return Ok(SessionData::default());
        }
        let contents = std::fs::read_to_string(&path).context("Failed to read session file")?;
        match serde_json::from_str(&contents) {
            Ok(data) => Ok(data),
            Err(e) => {
                warn!(error = %e, path = %path.display(), "Ignoring unreadable session file");
                Ok(SessionData::default())
            }
        }
    }

    /// Write to a per-process temp file, then rename over the session file
    /// so readers in other processes never see a partial write.
    fn save(&self, data: &SessionData) -> Result<()> {
        let path = self.session_path();
        std::fs::create_dir_all(&self.cache_dir).context("Failed to create session directory")?;
        let contents = serde_json::to_string_pretty(data)?;

        let tmp_path = self
            .cache_dir
            .join(format!("{}.{}.tmp", SESSION_FILE, std::process::id()));
        {
            let mut file =
                std::fs::File::create(&tmp_path).context("Failed to write session file")?;
            file.write_all(contents.as_bytes())
                .context("Failed to write session file")?;
            file.sync_all().context("Failed to write session file")?;
        }
        if let Err(e) = std::fs::rename(&tmp_path, &path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e).context("Failed to replace session file");
        }
        debug!(path = %path.display(), "Session saved");
        Ok(())
    }

    fn session_path(&self) -> PathBuf {
        self.cache_dir.join(SESSION_FILE)
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self, kind: TokenKind) -> Result<Option<String>> {
        let _guard = self.lock.lock().map_err(|_| anyhow!("session file lock poisoned"))?;
        let mut data = self.load()?;
        Ok(data.slot(kind).take())
    }

    fn set(&self, kind: TokenKind, value: &str) -> Result<()> {
        let _guard = self.lock.lock().map_err(|_| anyhow!("session file lock poisoned"))?;
        let mut data = self.load()?;
        *data.slot(kind) = Some(value.to_string());
        data.updated_at = Some(Utc::now());
        self.save(&data)
    }

    fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock().map_err(|_| anyhow!("session file lock poisoned"))?;
        let path = self.session_path();
        if path.exists() {
            std::fs::remove_file(&path).context("Failed to remove session file")?;
        }
        Ok(())
    }

    fn is_authenticated(&self) -> bool {
        let Ok(_guard) = self.lock.lock() else {
            return false;
        };
        self.load()
            .ok()
            .and_then(|data| data.access_token)
            .map(|t| !t.is_empty())
            .unwrap_or(false)
    }
}
