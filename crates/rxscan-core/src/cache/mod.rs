//! Local caching module for offline access to past analyses.
//!
//! This module provides the `CacheManager` for storing and retrieving
//! prescription history and individual records locally. Data is cached in
//! JSON format and considered stale after 60 minutes.

pub mod manager;

pub use manager::{CacheManager, CachedData};
