mod config;
mod db;
mod errors;
mod filter;
mod live;
mod models;
mod suggestions;

pub use crate::config::{AppConfig, LogConfig, CONFIG_FILE_NAME, DATA_DIR_ENV};
pub use crate::db::Database;
pub use crate::errors::{AppError, AppResult};
pub use crate::filter::{is_eligible, FilterSpec};
pub use crate::live::{ChangeFeed, Dependency, LiveQuery, Revision};
pub use crate::models::{
    Activity, ActivityDetail, ListActivitiesFilters, ListTagsFilters, Tag, TagCategory, DEFAULT_TAGS,
};
pub use crate::suggestions::SuggestionCore;

use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Prepares the data directory and opens the store, seeding default tags when configured.
pub fn bootstrap(config: &AppConfig) -> AppResult<SuggestionCore> {
    std::fs::create_dir_all(&config.data_dir).map_err(|error| AppError::Io(error.to_string()))?;
    SuggestionCore::open(config)
}

pub fn init_tracing(config: &AppConfig) -> AppResult<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log.filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let result = if config.log.to_file {
        let log_dir = config.log_dir();
        std::fs::create_dir_all(&log_dir).map_err(|error| AppError::Io(error.to_string()))?;
        let file_appender = tracing_appender::rolling::daily(log_dir, &config.log.file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let _ = LOG_GUARD.set(guard);

        if config.log.json {
            builder.json().with_writer(non_blocking).try_init()
        } else {
            builder.with_ansi(false).with_writer(non_blocking).try_init()
        }
    } else if config.log.json {
        builder.json().with_writer(std::io::stderr).try_init()
    } else {
        builder.with_writer(std::io::stderr).try_init()
    };

    result.map_err(|error| AppError::Internal(error.to_string()))
}
