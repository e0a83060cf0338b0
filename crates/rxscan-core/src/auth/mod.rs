//! Authentication module for managing the session credential pair.
//!
//! This module provides:
//! - `SessionStore`: Injected abstraction over the stored access/refresh tokens
//! - `MemorySessionStore`: In-process store, used by tests and embedders
//! - `FileSessionStore`: Tokens persisted to `session.json` in the cache directory
//! - `KeyringSessionStore`: Tokens kept in the OS keychain via keyring
//! - `SessionEvent`: Signal observed by the presentation layer (login, expiry, ...)

pub mod credentials;
pub mod events;
pub mod session;
pub mod store;

pub use credentials::KeyringSessionStore;
pub use events::SessionEvent;
pub use session::FileSessionStore;
pub use store::{open_store, CredentialBackend, MemorySessionStore, SessionStore, TokenKind};

pub use crate::models::TokenPair;
