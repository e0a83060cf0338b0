//! Utility functions for formatting analysis results for display.

pub mod format;

// Re-export commonly used functions at module level
pub use format::{format_date, format_optional, format_timestamp, join_or, truncate_string};
