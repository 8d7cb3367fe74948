//! Utility functions for date and string formatting.

pub mod format;

// Re-export commonly used functions at module level
pub use format::{format_long_date, format_optional, format_query_date, parse_query_date, truncate_string};
