//! Configuration management for the request security pipeline.
//! This module handles loading and validating configuration settings
//! from config files and environment variables.

mod settings;

pub use settings::{
    AdminConfig, BlocklistConfig, ClientIpConfig, DdosConfig, MetricsConfig, ServerConfig, Settings,
    StorageBackend, StorageConfig,
};

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, config::ConfigError>;

/// Load and validate the application configuration
pub fn load_config() -> ConfigResult<Settings> {
    Settings::load()
}
