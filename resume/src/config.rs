//! Resume store configuration loading
//!
//! Loads configuration from `~/.config/agent-resume/resume.toml` (or the
//! `AGENT_RESUME_CONFIG` env var). Every field has a default, so an absent
//! file is not an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::db::PoolOptions;
use crate::errors::{ResumeError, Result};

/// Root configuration for the checkpoint store
#[derive(Debug, Deserialize, Clone)]
pub struct ResumeConfig {
    /// Path to the SQLite database
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Maximum pooled connections
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// How long a connection waits on a locked database
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Enable WAL journal mode
    #[serde(default = "default_wal")]
    pub wal: bool,

    /// Soft-delete retention
    #[serde(default)]
    pub retention: RetentionConfig,
}

fn default_db_path() -> String {
    dirs::home_dir()
        .map(|h| {
            h.join(".config")
                .join("agent-resume")
                .join("resume.db")
                .to_string_lossy()
                .into_owned()
        })
        .unwrap_or_else(|| "resume.db".to_string())
}

fn default_pool_size() -> u32 {
    4
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_wal() -> bool {
    true
}

/// Retention of soft-deleted checkpoints
#[derive(Debug, Deserialize, Clone)]
pub struct RetentionConfig {
    /// Days a soft-deleted row is kept before `purge` removes it
    #[serde(default = "default_deleted_days")]
    pub deleted_days: u32,
}

fn default_deleted_days() -> u32 {
    7
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            deleted_days: default_deleted_days(),
        }
    }
}

impl Default for ResumeConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            pool_size: default_pool_size(),
            busy_timeout_ms: default_busy_timeout_ms(),
            wal: default_wal(),
            retention: RetentionConfig::default(),
        }
    }
}

impl ResumeConfig {
    /// Environment variable for config path override
    pub const ENV_CONFIG_PATH: &'static str = "AGENT_RESUME_CONFIG";

    /// Default config filename
    pub const DEFAULT_CONFIG_FILENAME: &'static str = "resume.toml";

    /// Load configuration from file
    ///
    /// Resolution order:
    /// 1. `AGENT_RESUME_CONFIG` environment variable
    /// 2. `~/.config/agent-resume/resume.toml`
    ///
    /// If the config file doesn't exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let path = Self::resolve_config_path();

        if !path.exists() {
            tracing::info!(
                path = %path.display(),
                "Resume config not found, using defaults"
            );
            return Ok(Self::default());
        }

        Self::load_from_path(&path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ResumeError::config_with_source(
                format!("failed to read config at {}", path.display()),
                e,
            )
        })?;

        Self::parse(&contents)
    }

    /// Parse configuration from TOML string
    pub fn parse(contents: &str) -> Result<Self> {
        let cfg: ResumeConfig = toml::from_str(contents)
            .map_err(|e| ResumeError::config_with_source("failed to parse config", e))?;

        cfg.validate()?;
        Ok(cfg)
    }

    fn resolve_config_path() -> PathBuf {
        if let Ok(path) = std::env::var(Self::ENV_CONFIG_PATH) {
            return PathBuf::from(path);
        }

        dirs::home_dir()
            .map(|h| {
                h.join(".config")
                    .join("agent-resume")
                    .join(Self::DEFAULT_CONFIG_FILENAME)
            })
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_CONFIG_FILENAME))
    }

    fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(ResumeError::config("pool_size must be at least 1"));
        }

        if self.db_path.trim().is_empty() {
            return Err(ResumeError::config("db_path must not be empty"));
        }

        if self.retention.deleted_days == 0 {
            tracing::warn!("retention.deleted_days is 0; purge removes soft-deleted rows at once");
        }

        Ok(())
    }

    /// Get the resolved database path (expanding ~ if needed)
    pub fn resolved_db_path(&self) -> PathBuf {
        let path = &self.db_path;
        if let Some(stripped) = path.strip_prefix("~/")
            && let Some(home) = dirs::home_dir()
        {
            return home.join(stripped);
        }
        PathBuf::from(path)
    }

    /// Pool settings derived from this configuration
    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            max_size: self.pool_size,
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            wal: self.wal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = ResumeConfig::default();
        assert_eq!(cfg.pool_size, 4);
        assert_eq!(cfg.busy_timeout_ms, 5_000);
        assert!(cfg.wal);
        assert_eq!(cfg.retention.deleted_days, 7);
        assert!(cfg.db_path.ends_with("resume.db"));
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            db_path = "/tmp/resume-test.db"
        "#;

        let cfg = ResumeConfig::parse(toml).expect("should parse");
        assert_eq!(cfg.db_path, "/tmp/resume-test.db");
        // Defaults should be applied
        assert_eq!(cfg.pool_size, 4);
        assert_eq!(cfg.retention.deleted_days, 7);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            db_path = "~/.local/share/agent-resume/resume.db"
            pool_size = 8
            busy_timeout_ms = 250
            wal = false

            [retention]
            deleted_days = 30
        "#;

        let cfg = ResumeConfig::parse(toml).expect("should parse");
        assert_eq!(cfg.pool_size, 8);
        assert!(!cfg.wal);
        assert_eq!(cfg.retention.deleted_days, 30);

        let options = cfg.pool_options();
        assert_eq!(options.max_size, 8);
        assert_eq!(options.busy_timeout, Duration::from_millis(250));
        assert!(!options.wal);
    }

    #[test]
    fn test_rejects_zero_pool_size() {
        let err = ResumeConfig::parse("pool_size = 0").expect_err("should reject");
        assert_eq!(err.category(), crate::ErrorCategory::Config);
    }

    #[test]
    fn test_rejects_malformed_toml() {
        let err = ResumeConfig::parse("pool_size = \"many\"").expect_err("should reject");
        assert_eq!(err.category(), crate::ErrorCategory::Config);
    }

    #[test]
    fn test_load_from_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("resume.toml");
        std::fs::write(&path, "pool_size = 2\n").expect("write");

        let cfg = ResumeConfig::load_from_path(&path).expect("load");
        assert_eq!(cfg.pool_size, 2);

        let missing = ResumeConfig::load_from_path(&dir.path().join("absent.toml"));
        assert!(missing.is_err());
    }

    #[test]
    fn test_resolved_db_path_expands_home() {
        let cfg = ResumeConfig {
            db_path: "~/resume/test.db".to_string(),
            ..ResumeConfig::default()
        };
        let resolved = cfg.resolved_db_path();
        if dirs::home_dir().is_some() {
            assert!(!resolved.to_string_lossy().starts_with('~'));
        }
        assert!(resolved.ends_with("resume/test.db"));
    }
}
