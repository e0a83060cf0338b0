//! Core library for rxscan.
//!
//! Provides the authenticated API client for the prescription analysis
//! service, pluggable session stores for the access/refresh credential pair,
//! typed models for analysis results, and a local cache for offline viewing.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod models;
pub mod utils;

pub use api::{ApiClient, ApiError, ApiResult};
pub use auth::{SessionEvent, SessionStore, TokenKind, TokenPair};
pub use cache::CacheManager;
pub use config::Config;
