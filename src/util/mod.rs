//! Shared utilities

pub mod backoff;
pub mod rate_limit;
pub mod time;
