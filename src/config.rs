//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platforms)
//! 2. Environment variables (APP_SERVER__PORT, APP_STORAGE__UPLOADS_DIR, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! Nested keys are separated by a double underscore because several field
//! names (`uploads_dir`, `max_upload_mb`, ...) contain single underscores.

use crate::transcription::ModelSize;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub storage: StorageConfig,
    pub tools: ToolsConfig,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Speech model settings.
///
/// ## Fields:
/// - `default_model`: Model used when a request does not name one
/// - `device`: Compute device preference ("auto", "cpu", "cuda", "metal")
/// - `preload`: Load the default model before accepting requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub default_model: ModelSize,
    pub device: String,
    pub preload: bool,
}

/// Where uploads and transcript records live on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub uploads_dir: PathBuf,
    pub transcripts_dir: PathBuf,
    /// Upper bound for a single uploaded file, in megabytes
    pub max_upload_mb: u64,
}

/// External executables the service shells out to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    pub yt_dlp_path: String,
    pub ffmpeg_path: String,
}

/// Performance tuning configuration.
///
/// `max_concurrent_jobs` bounds how many transcriptions run at once. The
/// model cache and the cancellation signal are shared by every job, so
/// anything above 1 trades predictable cancellation for throughput.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_jobs: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 5000,
            },
            models: ModelsConfig {
                default_model: ModelSize::Tiny,
                device: "auto".to_string(),
                preload: false,
            },
            storage: StorageConfig {
                uploads_dir: PathBuf::from("uploads"),
                transcripts_dir: PathBuf::from("transcripts"),
                max_upload_mb: 500,
            },
            tools: ToolsConfig {
                yt_dlp_path: "yt-dlp".to_string(),
                ffmpeg_path: "ffmpeg".to_string(),
            },
            performance: PerformanceConfig {
                max_concurrent_jobs: 1,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_MODELS__DEFAULT_MODEL=base`: Override the default model
    /// - `APP_TOOLS__FFMPEG_PATH=/opt/ffmpeg/bin/ffmpeg`: Use a specific ffmpeg
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special cases for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.performance.max_concurrent_jobs == 0 {
            return Err(anyhow::anyhow!("Max concurrent jobs must be greater than 0"));
        }

        if self.storage.max_upload_mb == 0 {
            return Err(anyhow::anyhow!("Max upload size must be greater than 0"));
        }

        if self.storage.uploads_dir.as_os_str().is_empty()
            || self.storage.transcripts_dir.as_os_str().is_empty()
        {
            return Err(anyhow::anyhow!("Storage directories must not be empty"));
        }

        if self.tools.yt_dlp_path.trim().is_empty() || self.tools.ffmpeg_path.trim().is_empty() {
            return Err(anyhow::anyhow!("Tool paths must not be empty"));
        }

        self.models
            .device
            .parse::<crate::device::DevicePreference>()
            .map_err(|e| anyhow::anyhow!(e))?;

        Ok(())
    }

    /// Upload ceiling in bytes.
    pub fn max_upload_bytes(&self) -> u64 {
        self.storage.max_upload_mb * 1024 * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.models.default_model, ModelSize::Tiny);
        assert_eq!(config.performance.max_concurrent_jobs, 1);
        assert_eq!(config.max_upload_bytes(), 500 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.performance.max_concurrent_jobs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.models.device = "tpu".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.tools.ffmpeg_path = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_defaults_survive_config_round_trip() {
        let built = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default()).unwrap())
            .set_override("models.default_model", "base")
            .unwrap()
            .build()
            .unwrap();
        let config: AppConfig = built.try_deserialize().unwrap();

        assert_eq!(config.models.default_model, ModelSize::Base);
        assert_eq!(config.storage.uploads_dir, PathBuf::from("uploads"));
        assert_eq!(config.tools.yt_dlp_path, "yt-dlp");
    }
}
