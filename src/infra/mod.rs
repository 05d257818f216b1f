//! Infrastructure layer
//!
//! Network access, the HTTP response cache and platform directories.

pub mod dirs;
pub mod fetcher;
pub mod http_cache;
