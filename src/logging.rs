//! Log setup: a daily rolling file under the state directory plus stderr.
//!
//! Without `RUST_LOG` the filter keeps dependencies at `warn` and applies the
//! configured level to the panel, with optional per-module overrides such as
//! `timeline = "trace"`.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

const LOG_FILE_BASENAME: &str = "hue9000.log";
const LOG_DIR_ENV: &str = "HUE9000_LOG_PATH";
const CRATE_TARGET: &str = "hue9000";
const SECONDS_PER_DAY: u64 = 60 * 60 * 24;

/// Get the log directory path
pub fn get_log_dir() -> Result<PathBuf> {
    resolve_log_dir()
}

pub fn init_logging(config: &LoggingConfig) -> Result<WorkerGuard> {
    let log_dir = resolve_log_dir()?;
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory: {:?}", log_dir))?;

    let expired = match config.retention_days {
        0 => Vec::new(),
        days => expired_logs(&log_dir, Duration::from_secs(SECONDS_PER_DAY * days)),
    };

    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_BASENAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(filter_directives(config))
            .context("Invalid [logging] level in config")?,
    };

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    // Pruned after the subscriber is up so removals are logged
    for path in expired {
        match std::fs::remove_file(&path) {
            Ok(()) => debug!("Removed expired log {:?}", path),
            Err(e) => warn!("Failed to remove expired log {:?}: {}", path, e),
        }
    }

    Ok(guard)
}

/// `warn` for dependencies, the configured level for the panel and its modules
fn filter_directives(config: &LoggingConfig) -> String {
    let mut directives = format!("warn,{}={}", CRATE_TARGET, config.level);
    for (module, level) in &config.modules {
        directives.push_str(&format!(",{}::{}={}", CRATE_TARGET, module, level));
    }
    directives
}

fn resolve_log_dir() -> Result<PathBuf> {
    if let Ok(override_path) = std::env::var(LOG_DIR_ENV) {
        return Ok(PathBuf::from(override_path));
    }

    let proj_dirs = ProjectDirs::from("dev", "hue9000", "panel")
        .context("Failed to determine project directories for log path")?;

    let base = proj_dirs
        .state_dir()
        .unwrap_or_else(|| proj_dirs.data_local_dir());
    Ok(base.join("logs"))
}

/// Rotated panel logs in `log_dir` last modified more than `max_age` ago
fn expired_logs(log_dir: &Path, max_age: Duration) -> Vec<PathBuf> {
    let Some(cutoff) = SystemTime::now().checked_sub(max_age) else {
        return Vec::new();
    };
    let Ok(entries) = std::fs::read_dir(log_dir) else {
        return Vec::new();
    };

    entries
        .flatten()
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(LOG_FILE_BASENAME))
        })
        .filter_map(|entry| {
            let metadata = entry.metadata().ok()?;
            let modified = metadata.modified().ok()?;
            (metadata.is_file() && modified < cutoff).then(|| entry.path())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_filter_names_panel_modules() {
        let mut config = LoggingConfig::default();
        assert_eq!(filter_directives(&config), "warn,hue9000=info");

        config.level = "debug".into();
        config.modules = BTreeMap::from([
            ("shutdown".to_string(), "warn".to_string()),
            ("timeline".to_string(), "trace".to_string()),
        ]);
        let directives = filter_directives(&config);
        assert_eq!(
            directives,
            "warn,hue9000=debug,hue9000::shutdown=warn,hue9000::timeline=trace"
        );
        assert!(EnvFilter::try_new(directives).is_ok());
    }

    #[test]
    fn test_expired_logs_skip_fresh_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join(format!("{}.2026-10-18", LOG_FILE_BASENAME));
        let foreign = dir.path().join("notes.txt");
        std::fs::write(&log, "log").unwrap();
        std::fs::write(&foreign, "keep").unwrap();

        assert!(expired_logs(dir.path(), Duration::from_secs(3600)).is_empty());

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(expired_logs(dir.path(), Duration::ZERO), vec![log]);
    }
}
