//! Shared types, error model, and configuration for articlepipe.
//!
//! This crate is the foundation depended on by all other articlepipe crates.
//! It provides:
//! - [`ArticlePipeError`]: the unified error type
//! - Domain types ([`FetchTarget`], [`FetchOutcome`], [`PersistableRecord`],
//!   [`StoredArticle`], [`BatchStatistics`])
//! - Configuration ([`AppConfig`], [`FetchConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ConflictPolicy, DEFAULT_USER_AGENT, FetchConfig, FetchSettings, LimitsConfig,
    StorageConfig, config_dir, config_file_path, expand_home, init_config, load_config,
    load_config_from,
};
pub use error::{ArticlePipeError, Result};
pub use types::{
    BatchStatistics, FetchOutcome, FetchTarget, PersistableRecord, STATUS_NO_RESPONSE, STATUS_OK,
    StoreStats, StoredArticle, truncate_chars,
};
