use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default config file, overridable through `TIGERHALL_CONFIG`
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    /// Directory holding the repository snapshot
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Where uploaded sighting images are written (env `IMAGE_STORAGE_PATH` wins)
    #[serde(default = "default_image_storage_path")]
    pub image_storage_path: String,

    #[serde(default = "default_notification_queue_capacity")]
    pub notification_queue_capacity: usize,

    /// Serialize concurrent ingestions of the same tiger
    #[serde(default = "default_true")]
    pub serialize_per_subject: bool,

    /// Persist the repository to `<data_dir>/sightings.json`
    #[serde(default = "default_true")]
    pub persist_snapshot: bool,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_image_storage_path() -> String {
    "./default_storage".to_string()
}

fn default_notification_queue_capacity() -> usize {
    100
}

fn default_true() -> bool {
    true
}

fn default_max_upload_bytes() -> usize {
    10 << 20
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_dir: default_log_dir(),
            data_dir: default_data_dir(),
            image_storage_path: default_image_storage_path(),
            notification_queue_capacity: default_notification_queue_capacity(),
            serialize_per_subject: true,
            persist_snapshot: true,
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl BackendConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
        let config: BackendConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e))?;
        Ok(config)
    }

    /// Load the service configuration.
    ///
    /// A missing file is not an error: every field has a default. A file that
    /// exists but does not parse is. `IMAGE_STORAGE_PATH` overrides the image
    /// directory either way.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("TIGERHALL_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let mut config = if Path::new(&path).exists() {
            Self::from_file(&path)?
        } else {
            // logging is not up yet
            eprintln!("Config file '{}' not found, using defaults", path);
            Self::default()
        };

        if let Ok(image_path) = std::env::var("IMAGE_STORAGE_PATH") {
            if !image_path.trim().is_empty() {
                config.image_storage_path = image_path;
            }
        }

        if config.notification_queue_capacity == 0 {
            anyhow::bail!("notification_queue_capacity must be at least 1");
        }

        Ok(config)
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn snapshot_path(&self) -> Option<PathBuf> {
        self.persist_snapshot
            .then(|| Path::new(&self.data_dir).join("sightings.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: BackendConfig = toml::from_str(
            r#"
            port = 9000
            serialize_per_subject = false
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 9000);
        assert!(!config.serialize_per_subject);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.notification_queue_capacity, 100);
        assert_eq!(config.max_upload_bytes, 10 * 1024 * 1024);
        assert_eq!(config.server_address(), "0.0.0.0:9000");
    }

    #[test]
    fn test_snapshot_path() {
        let mut config = BackendConfig::default();
        assert_eq!(config.snapshot_path(), Some(PathBuf::from("data/sightings.json")));

        config.persist_snapshot = false;
        assert_eq!(config.snapshot_path(), None);
    }

    #[test]
    fn test_from_file_reports_parse_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "port = \"not a number\"").unwrap();

        let err = BackendConfig::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
