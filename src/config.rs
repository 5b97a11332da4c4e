//! Configuration for intervene.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (INTERVENE_HOME, INTERVENE_DB)
//! 2. Config file (.intervene/config.yaml)
//! 3. Defaults (~/.intervene)
//!
//! Config file discovery:
//! - Searches the start directory and its parents for .intervene/config.yaml
//! - `paths.home` is relative to the .intervene/ directory, `paths.database`
//!   to the resolved home
//!
//! The resolved configuration is passed to whoever needs it; nothing is
//! cached globally.

use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use anyhow::{ensure, Context, Result};
use chrono::Duration;
use serde::Deserialize;

use crate::core::audit_log::MAX_PAGE_SIZE;
use crate::core::{BreakerSettings, OrchestratorSettings, OutcomeThresholds};

pub const CONFIG_DIR: &str = ".intervene";
pub const CONFIG_FILE: &str = "config.yaml";
pub const DEFAULT_DATABASE: &str = "intervene.db";

pub const ENV_HOME: &str = "INTERVENE_HOME";
pub const ENV_DB: &str = "INTERVENE_DB";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub outcome: OutcomeConfig,
    #[serde(default)]
    pub breaker: BreakerSettings,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

fn default_version() -> String {
    "1.0".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .intervene/)
    pub home: Option<String>,
    /// SQLite database (relative to home)
    pub database: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    /// Hours a HIGH impact proposal may wait before it times out
    pub timeout_hours: u64,
    /// How often `serve` runs the timeout sweep
    pub sweep_interval_seconds: u64,
    /// Minutes an approved record may hold an unfinished execution before
    /// the sweep fails it
    pub interrupted_after_minutes: u64,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            timeout_hours: 24,
            sweep_interval_seconds: 300,
            interrupted_after_minutes: 15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct OutcomeConfig {
    pub check_delay_days: u64,
    pub centrality_drop_threshold: f64,
    pub burnout_increase_threshold: f64,
}

impl Default for OutcomeConfig {
    fn default() -> Self {
        let thresholds = OutcomeThresholds::default();
        Self {
            check_delay_days: 7,
            centrality_drop_threshold: thresholds.centrality_drop,
            burnout_increase_threshold: thresholds.burnout_increase,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// How long a store call waits on a locked database
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub page_size: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// State directory
    pub home: PathBuf,
    /// SQLite database holding interventions, audit log and local workspace
    pub database: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub approval: ApprovalConfig,
    pub outcome: OutcomeConfig,
    pub breaker: BreakerSettings,
    pub store: StoreConfig,
    pub audit: AuditConfig,
}

impl ResolvedConfig {
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            approval_timeout: Duration::hours(self.approval.timeout_hours as i64),
            outcome_check_delay: Duration::days(self.outcome.check_delay_days as i64),
            thresholds: OutcomeThresholds {
                centrality_drop: self.outcome.centrality_drop_threshold,
                burnout_increase: self.outcome.burnout_increase_threshold,
            },
            breaker: self.breaker,
            audit_page_size: self.audit.page_size,
            interrupted_execution_after: Duration::minutes(
                self.approval.interrupted_after_minutes as i64,
            ),
        }
    }

    pub fn busy_timeout(&self) -> StdDuration {
        StdDuration::from_millis(self.store.busy_timeout_ms)
    }

    pub fn sweep_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.approval.sweep_interval_seconds)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            (1..=24 * 365).contains(&self.approval.timeout_hours),
            "approval.timeout_hours must be between 1 and 8760, got {}",
            self.approval.timeout_hours
        );
        ensure!(
            self.approval.sweep_interval_seconds > 0,
            "approval.sweep_interval_seconds must be positive"
        );
        ensure!(
            (1..=24 * 60).contains(&self.approval.interrupted_after_minutes),
            "approval.interrupted_after_minutes must be between 1 and 1440, got {}",
            self.approval.interrupted_after_minutes
        );
        ensure!(
            self.outcome.check_delay_days <= 365,
            "outcome.check_delay_days must be at most 365, got {}",
            self.outcome.check_delay_days
        );
        for (name, value) in [
            ("centrality_drop_threshold", self.outcome.centrality_drop_threshold),
            ("burnout_increase_threshold", self.outcome.burnout_increase_threshold),
        ] {
            ensure!(
                value.is_finite() && value > 0.0,
                "outcome.{} must be a positive number, got {}",
                name,
                value
            );
        }
        ensure!(
            self.breaker.failure_threshold > 0,
            "breaker.failure_threshold must be at least 1"
        );
        ensure!(
            (1..=MAX_PAGE_SIZE).contains(&self.audit.page_size),
            "audit.page_size must be between 1 and {}, got {}",
            MAX_PAGE_SIZE,
            self.audit.page_size
        );
        Ok(())
    }
}

/// Find config file by searching `start` and its parents
pub fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Load configuration for the current directory and process environment
pub fn load() -> Result<ResolvedConfig> {
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(CONFIG_DIR);

    load_from(&cwd, &default_home, |key| std::env::var(key).ok())
}

/// Load configuration discovered from `start`, reading overrides through `env`
pub fn load_from<F>(start: &Path, default_home: &Path, env: F) -> Result<ResolvedConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let config_file = find_config_file(start);
    let config = match config_file {
        Some(ref path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    let home = if let Some(env_home) = env(ENV_HOME) {
        PathBuf::from(env_home)
    } else if let (Some(path), Some(home_path)) = (&config_file, &config.paths.home) {
        let config_dir = path.parent().unwrap_or(Path::new("."));
        resolve_path(config_dir, home_path)
    } else {
        default_home.to_path_buf()
    };

    let database = if let Some(env_db) = env(ENV_DB) {
        PathBuf::from(env_db)
    } else {
        let db = config.paths.database.as_deref().unwrap_or(DEFAULT_DATABASE);
        resolve_path(&home, db)
    };

    let resolved = ResolvedConfig {
        home,
        database,
        config_file,
        approval: config.approval,
        outcome: config.outcome,
        breaker: config.breaker,
        store: config.store,
        audit: config.audit,
    };
    resolved
        .validate()
        .with_context(|| match &resolved.config_file {
            Some(path) => format!("Invalid configuration in {}", path.display()),
            None => "Invalid default configuration".to_string(),
        })?;

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write_config(root: &Path, body: &str) -> PathBuf {
        let dir = root.join(CONFIG_DIR);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(CONFIG_FILE);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_defaults_without_file() {
        let temp = TempDir::new().unwrap();
        let home = temp.path().join("state");

        let config = load_from(temp.path(), &home, no_env).unwrap();
        assert!(config.config_file.is_none());
        assert_eq!(config.home, home);
        assert_eq!(config.database, home.join(DEFAULT_DATABASE));

        let settings = config.orchestrator_settings();
        assert_eq!(settings.approval_timeout, Duration::hours(24));
        assert_eq!(settings.outcome_check_delay, Duration::days(7));
        assert_eq!(settings.thresholds, OutcomeThresholds::default());
        assert_eq!(settings.interrupted_execution_after, Duration::minutes(15));
        assert_eq!(config.busy_timeout(), StdDuration::from_millis(5000));
    }

    #[test]
    fn test_config_file_found_in_parent() {
        let temp = TempDir::new().unwrap();
        let path = write_config(
            temp.path(),
            r#"
version: "1.0"
paths:
  home: ./state
approval:
  timeout_hours: 48
outcome:
  centrality_drop_threshold: 0.25
audit:
  page_size: 50
"#,
        );
        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let config = load_from(&nested, Path::new("/unused"), no_env).unwrap();
        assert_eq!(config.config_file.as_deref(), Some(path.as_path()));
        assert_eq!(config.home, temp.path().join(CONFIG_DIR).join("./state"));
        assert_eq!(config.approval.timeout_hours, 48);
        assert_eq!(config.approval.sweep_interval_seconds, 300);
        assert_eq!(config.outcome.centrality_drop_threshold, 0.25);
        assert_eq!(config.outcome.burnout_increase_threshold, 0.20);
        assert_eq!(config.audit.page_size, 50);
        assert_eq!(config.breaker, BreakerSettings::default());
    }

    #[test]
    fn test_env_overrides_file() {
        let temp = TempDir::new().unwrap();
        write_config(temp.path(), "paths:\n  home: ./state\n");

        let env: HashMap<&str, String> = [
            (ENV_HOME, "/srv/intervene".to_string()),
            (ENV_DB, "/srv/db/prod.db".to_string()),
        ]
        .into_iter()
        .collect();

        let config = load_from(temp.path(), Path::new("/unused"), |k| env.get(k).cloned()).unwrap();
        assert_eq!(config.home, PathBuf::from("/srv/intervene"));
        assert_eq!(config.database, PathBuf::from("/srv/db/prod.db"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let temp = TempDir::new().unwrap();
        write_config(temp.path(), "approval:\n  timeout_hours: 0\n");
        let err = load_from(temp.path(), Path::new("/unused"), no_env).unwrap_err();
        assert!(format!("{:#}", err).contains("timeout_hours"));

        write_config(temp.path(), "audit:\n  page_size: 5000\n");
        assert!(load_from(temp.path(), Path::new("/unused"), no_env).is_err());

        write_config(temp.path(), "approval:\n  interrupted_after_minutes: 0\n");
        assert!(load_from(temp.path(), Path::new("/unused"), no_env).is_err());
    }

    #[test]
    fn test_malformed_yaml_reports_path() {
        let temp = TempDir::new().unwrap();
        let path = write_config(temp.path(), "approval: [unclosed");
        let err = load_from(temp.path(), Path::new("/unused"), no_env).unwrap_err();
        assert!(err.to_string().contains(&path.display().to_string()));
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
