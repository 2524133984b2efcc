//! Sluice Core - Shared paths, attribute types, errors and configuration
//!
//! This crate contains the foundational types used across all Sluice components.
//! It has no dependencies on threads, channels or backend code.

pub mod config;
pub mod error;
pub mod path;
pub mod types;

pub use config::{CacheConfig, Capacity, Config, ConfigError, ServiceConfig};
pub use error::*;
pub use path::VirtualPath;
pub use types::*;

/// Default streaming pipe capacity in bytes (1 MiB)
pub const DEFAULT_PIPE_CAPACITY: usize = 1024 * 1024;

/// Maximum path length in bytes
pub const MAX_PATH_LEN: usize = 4096;

/// Maximum filename length in bytes
pub const MAX_FILENAME_LEN: usize = 255;
