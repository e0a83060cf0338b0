//! Command implementations. Each command is a thin consumer of the
//! `ApiClient`; user-facing error text comes from the service `detail`
//! where there is one.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use rxscan_core::api::FileUpload;
use rxscan_core::auth::open_store;
use rxscan_core::models::{PasswordStrength, Prescription};
use rxscan_core::{ApiClient, ApiError, CacheManager, Config, SessionEvent};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::render;

const ENV_USERNAME: &str = "RXSCAN_USERNAME";
const ENV_PASSWORD: &str = "RXSCAN_PASSWORD";

pub struct App {
    pub config: Config,
    pub client: ApiClient,
    cache: Option<CacheManager>,
    events: broadcast::Receiver<SessionEvent>,
}

impl App {
    pub fn new(api_url: Option<String>) -> Result<Self> {
        let mut config = match Config::load() {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Failed to load config, using defaults");
                Config::default()
            }
        };
        if api_url.is_some() {
            config.api_url = api_url;
        }

        let cache_dir = config.cache_dir().unwrap_or_else(|_| PathBuf::from("./cache"));
        debug!(?cache_dir, backend = %config.credential_backend, "Opening session store");

        let store = open_store(config.credential_backend, cache_dir.clone());
        let client = ApiClient::with_timeout(config.api_url(), store, config.request_timeout())
            .context("Failed to create API client")?;
        let events = client.subscribe();

        let cache = match CacheManager::new(cache_dir) {
            Ok(cache) => Some(cache),
            Err(e) => {
                warn!(error = %e, "Cache unavailable");
                None
            }
        };

        Ok(Self {
            config,
            client,
            cache,
            events,
        })
    }

    /// Reason of the first `Expired` event seen so far, if any.
    pub fn session_expired(&mut self) -> Option<String> {
        let mut expired = None;
        while let Ok(event) = self.events.try_recv() {
            debug!(%event, "Session event");
            if let SessionEvent::Expired { reason } = event {
                expired.get_or_insert(reason);
            }
        }
        expired
    }

    fn require_login(&self) -> Result<()> {
        if self.client.is_authenticated() {
            Ok(())
        } else {
            Err(anyhow!("Not logged in. Run `rxscan login` first."))
        }
    }

    // ===== Authentication =====

    pub async fn register(&mut self, username: Option<String>) -> Result<()> {
        let username = match username {
            Some(u) => u,
            None => prompt_username(None)?,
        };
        if username.is_empty() {
            return Err(anyhow!("Username is required"));
        }

        let password = rpassword::prompt_password("Password: ")?;
        let strength = PasswordStrength::evaluate(&password);
        print!("{}", render::password_checklist(&strength));
        let confirm = rpassword::prompt_password("Confirm password: ")?;
        if password != confirm {
            return Err(anyhow!("Passwords do not match"));
        }

        self.client
            .register(&username, &password)
            .await
            .map_err(|e| user_error(e, "Registration failed"))?;
        println!("Registration successful!");

        self.finish_login(&username, &password).await
    }

    pub async fn login(&mut self, username: Option<String>) -> Result<()> {
        let username = match username.or_else(|| std::env::var(ENV_USERNAME).ok()) {
            Some(u) => u,
            None => prompt_username(self.config.last_username.as_deref())?,
        };
        let password = match std::env::var(ENV_PASSWORD) {
            Ok(p) if !p.is_empty() => p,
            _ => rpassword::prompt_password("Password: ")?,
        };

        if username.is_empty() || password.is_empty() {
            return Err(anyhow!("Username and password required"));
        }

        self.finish_login(&username, &password).await
    }

    async fn finish_login(&mut self, username: &str, password: &str) -> Result<()> {
        self.client
            .login(username, password)
            .await
            .map_err(|e| user_error(e, "Login failed"))?;

        self.config.last_username = Some(username.to_string());
        if let Err(e) = self.config.save() {
            warn!(error = %e, "Failed to save config");
        }
        println!("Login successful!");
        Ok(())
    }

    pub fn logout(&mut self) -> Result<()> {
        self.client.logout()?;
        if let Some(cache) = &self.cache {
            cache.clear()?;
        }
        println!("Logged out.");
        Ok(())
    }

    pub async fn whoami(&self) -> Result<()> {
        self.require_login()?;
        let account = self
            .client
            .current_user()
            .await
            .map_err(|e| user_error(e, "Failed to load profile"))?;
        print!("{}", render::account(&account));
        Ok(())
    }

    pub fn status(&self) -> Result<()> {
        println!("API:            {}", self.client.base_url());
        println!("Credentials:    {}", self.config.credential_backend);
        println!(
            "Authenticated:  {}",
            if self.client.is_authenticated() { "yes" } else { "no" }
        );
        if let Some(ref user) = self.config.last_username {
            println!("Last username:  {}", user);
        }
        Ok(())
    }

    // ===== Prescriptions =====

    pub async fn scan(&self, file: &Path, json: bool) -> Result<()> {
        self.require_login()?;
        let upload = FileUpload::from_path(file)
            .await
            .map_err(|e| user_error(e, "Please select an image file"))?;

        eprintln!("Analyzing {}...", upload.file_name);
        let record = self
            .client
            .analyze_prescription(upload)
            .await
            .map_err(|e| user_error(e, "Analysis failed"))?;

        self.cache_record(&record);
        if json {
            println!("{}", serde_json::to_string_pretty(&record)?);
        } else {
            println!("Analysis complete!\n");
            print!("{}", render::prescription(&record));
        }
        Ok(())
    }

    pub async fn history(&self, offline: bool, json: bool) -> Result<()> {
        let records = if offline {
            self.cached_history()?
        } else {
            self.require_login()?;
            match self.client.history().await {
                Ok(records) => {
                    if let Some(cache) = &self.cache {
                        if let Err(e) = cache.save_history(&records) {
                            warn!(error = %e, "Failed to cache history");
                        }
                    }
                    records
                }
                Err(ApiError::Network(e)) if self.cache.is_some() => {
                    warn!(error = %e, "Service unreachable, falling back to cache");
                    self.cached_history()?
                }
                Err(e) => return Err(user_error(e, "Failed to load history")),
            }
        };

        if json {
            println!("{}", serde_json::to_string_pretty(&records)?);
        } else {
            print!("{}", render::history(&records));
        }
        Ok(())
    }

    pub async fn show(&self, ids: &[i64], offline: bool, json: bool) -> Result<()> {
        let records = if offline {
            ids.iter()
                .map(|id| self.cached_record(*id))
                .collect::<Result<Vec<_>>>()?
        } else {
            self.require_login()?;
            let fetches = ids.iter().map(|id| self.client.prescription(*id));
            let results = futures::future::join_all(fetches).await;

            let mut records = Vec::with_capacity(results.len());
            for (id, result) in ids.iter().zip(results) {
                let record =
                    result.map_err(|e| user_error(e, &format!("Failed to load prescription {}", id)))?;
                self.cache_record(&record);
                records.push(record);
            }
            records
        };

        if json {
            println!("{}", serde_json::to_string_pretty(&records)?);
        } else {
            let rendered: Vec<String> = records.iter().map(render::prescription).collect();
            print!("{}", rendered.join("\n"));
        }
        Ok(())
    }

    pub async fn structured(&self, id: i64) -> Result<()> {
        self.require_login()?;
        let record = self
            .client
            .structured_data(id)
            .await
            .map_err(|e| user_error(e, "Structured data not available"))?;
        println!("{}", serde_json::to_string_pretty(&record)?);
        Ok(())
    }

    // ===== Cache helpers =====

    fn cache_record(&self, record: &Prescription) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.save_prescription(record) {
                warn!(error = %e, id = record.id, "Failed to cache prescription");
            }
        }
    }

    fn cached_history(&self) -> Result<Vec<Prescription>> {
        let cache = self.cache.as_ref().ok_or_else(|| anyhow!("Cache unavailable"))?;
        let cached = cache
            .load_history()?
            .ok_or_else(|| anyhow!("No cached history. Run `rxscan history` while online first."))?;
        eprintln!("(cached {})", cached.age_display());
        Ok(cached.data)
    }

    fn cached_record(&self, id: i64) -> Result<Prescription> {
        let cache = self.cache.as_ref().ok_or_else(|| anyhow!("Cache unavailable"))?;
        let cached = cache
            .load_prescription(id)?
            .ok_or_else(|| anyhow!("Prescription {} is not cached", id))?;
        Ok(cached.data)
    }
}

/// Turn an API failure into the message shown to the user: the service
/// `detail` when present, otherwise a per-command fallback.
fn user_error(err: ApiError, fallback: &str) -> anyhow::Error {
    let message = match &err {
        ApiError::Network(e) if e.is_timeout() => {
            "Connection timed out. Please try again.".to_string()
        }
        ApiError::Network(_) => {
            "Unable to connect to server. Check your internet connection.".to_string()
        }
        ApiError::SessionExpired(_) => "Session expired. Please log in again.".to_string(),
        ApiError::RateLimited => "Server is busy. Please wait a moment and try again.".to_string(),
        other => other.detail().unwrap_or(fallback).to_string(),
    };
    anyhow::Error::new(err).context(message)
}

fn prompt_username(last: Option<&str>) -> Result<String> {
    match last {
        Some(last) => print!("Username [{}]: ", last),
        None => print!("Username: "),
    }
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim();

    Ok(match (input.is_empty(), last) {
        (true, Some(last)) => last.to_string(),
        _ => input.to_string(),
    })
}
