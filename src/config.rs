use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "config.json";
pub const DATA_DIR_ENV: &str = "GETBUSY_DATA_DIR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogConfig {
    pub filter: String,
    pub json: bool,
    pub to_file: bool,
    pub file_name: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: true,
            to_file: true,
            file_name: "getbusy.log".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub database_file: String,
    pub seed_default_tags: bool,
    pub log: LogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            database_file: "getbusy.db".to_string(),
            seed_default_tags: true,
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> AppResult<Self> {
        Self::load(&default_data_dir())
    }

    /// Reads `config.json` from `data_dir` if present. A config without an
    /// explicit `dataDir` is anchored to the directory it was loaded from.
    pub fn load(data_dir: &Path) -> AppResult<Self> {
        let path = data_dir.join(CONFIG_FILE_NAME);
        if !path.is_file() {
            return Ok(Self {
                data_dir: data_dir.to_path_buf(),
                ..Self::default()
            });
        }

        let raw = fs::read_to_string(&path).map_err(|err| AppError::Io(err.to_string()))?;
        let mut config: Self = serde_json::from_str(&raw)
            .map_err(|err| AppError::Config(format!("{}: {}", path.to_string_lossy(), err)))?;
        if config.data_dir.as_os_str().is_empty() || config.data_dir == Path::new(".") {
            config.data_dir = data_dir.to_path_buf();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.database_file.trim().is_empty() {
            return Err(AppError::Config("databaseFile must not be empty".to_string()));
        }
        if self.log.to_file && self.log.file_name.trim().is_empty() {
            return Err(AppError::Config("log.fileName must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

fn default_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }

    #[cfg(unix)]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".getbusy");
        }
    }

    #[cfg(windows)]
    {
        if let Ok(home) = std::env::var("USERPROFILE") {
            return PathBuf::from(home).join(".getbusy");
        }
    }

    std::env::current_dir()
        .map(|cwd| cwd.join(".getbusy"))
        .unwrap_or_else(|_| PathBuf::from(".getbusy"))
}

#[cfg(test)]
mod tests {
    use super::{AppConfig, CONFIG_FILE_NAME};

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = AppConfig::load(dir.path()).expect("load");
        assert_eq!(config.data_dir, dir.path());
        assert_eq!(config.database_path(), dir.path().join("getbusy.db"));
        assert_eq!(config.log_dir(), dir.path().join("logs"));
        assert!(config.seed_default_tags);
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"{ "databaseFile": "custom.db", "log": { "filter": "debug", "toFile": false } }"#,
        )
        .expect("write config");

        let config = AppConfig::load(dir.path()).expect("load");
        assert_eq!(config.database_path(), dir.path().join("custom.db"));
        assert_eq!(config.log.filter, "debug");
        assert!(!config.log.to_file);
        assert!(config.log.json);
        assert_eq!(config.log.file_name, "getbusy.log");
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "{ not json").expect("write config");
        let error = AppConfig::load(dir.path()).expect_err("malformed");
        assert!(matches!(error, crate::errors::AppError::Config(_)));
    }

    #[test]
    fn empty_database_file_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), r#"{ "databaseFile": " " }"#).expect("write config");
        assert!(AppConfig::load(dir.path()).is_err());
    }
}
