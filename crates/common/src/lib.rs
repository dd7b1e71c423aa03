//! GameQA Common Library
//!
//! Data model, error taxonomy and configuration shared by the test agent
//! and the command-line front end.

pub mod config;
pub mod error;
pub mod types;

pub use config::QaConfig;
pub use error::{Error, ErrorCategory, Result};
pub use types::*;

/// GameQA version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default data directory for reports and artifacts
pub fn default_data_dir() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".gameqa")
}

/// Default configuration file path
pub fn default_config_path() -> std::path::PathBuf {
    default_data_dir().join("config.toml")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}
