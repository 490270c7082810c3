//! Configuration management for Tagwatch.
//!
//! Handles loading configuration from TOML files with environment variable
//! overrides. Required values are validated once at startup; a missing
//! repository URL or local path is fatal.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Watched repository settings
    pub repository: RepositoryConfig,

    /// Watcher loop settings
    pub watcher: WatcherConfig,

    /// Build orchestration settings
    pub build: BuildConfig,

    /// Notification settings
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

/// The repository to watch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Remote Git URL (required)
    pub url: String,

    /// Base path for the local clone (required); `~` is expanded
    pub local_path: String,

    /// HTTPS token credential for the remote
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Path to an SSH private key for the remote
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh_key_path: Option<PathBuf>,
}

/// Watch loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Seconds between poll ticks
    pub poll_interval_secs: u64,

    /// Retention window in days for the startup ledger seed
    pub retention_days: i64,
}

/// Build orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Maximum number of builds in flight (1 = strictly sequential)
    pub concurrency: usize,

    /// Per-build timeout in seconds
    pub timeout_secs: u64,

    /// Which workflow runner to use
    pub workflow: WorkflowKind,

    /// Image name for the docker workflow
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_image: Option<String>,

    /// Where build workspaces are created (defaults to the system temp dir)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,
}

/// Workflow runner selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowKind {
    /// Probe the workspace: workflows/ script, then Makefile, then docker
    #[default]
    Auto,
    /// Run the workspace's `workflows/build.sh`
    Script,
    /// Run `make` against the workspace Makefile
    Make,
    /// Run `docker build` in the workspace
    Docker,
}

/// Notification settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    /// Discord webhook URL for build outcome messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discord_webhook_url: Option<String>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self { poll_interval_secs: 10, retention_days: 30 }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            timeout_secs: 1800,
            workflow: WorkflowKind::Auto,
            docker_image: None,
            workspace_root: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repository: RepositoryConfig::default(),
            watcher: WatcherConfig::default(),
            build: BuildConfig::default(),
            notifications: NotificationsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default locations.
    ///
    /// Looks for config in:
    /// 1. `tagwatch.toml` in the current directory
    /// 2. `~/.config/tagwatch/config.toml`
    /// 3. Falls back to defaults
    ///
    /// Environment variables (`TAGWATCH_*`) override file values either way.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = {
            let local_config = PathBuf::from("tagwatch.toml");
            if local_config.exists() {
                Self::load_from_file(&local_config)?
            } else if let Some(global) = Self::config_dir().map(|d| d.join("config.toml")) {
                if global.exists() {
                    Self::load_from_file(&global)?
                } else {
                    Self::default()
                }
            } else {
                Self::default()
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file, then apply env overrides.
    pub fn load_from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Get the config directory path.
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("tagwatch"))
    }

    /// Apply `TAGWATCH_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("TAGWATCH_REPO_URL") {
            self.repository.url = url;
        }
        if let Ok(path) = std::env::var("TAGWATCH_LOCAL_PATH") {
            self.repository.local_path = path;
        }
        if let Ok(token) = std::env::var("TAGWATCH_TOKEN") {
            self.repository.token = Some(token);
        }
        if let Ok(key) = std::env::var("TAGWATCH_SSH_KEY") {
            self.repository.ssh_key_path = Some(PathBuf::from(key));
        }
        if let Some(secs) = env_parse("TAGWATCH_POLL_INTERVAL") {
            self.watcher.poll_interval_secs = secs;
        }
        if let Some(days) = env_parse("TAGWATCH_RETENTION_DAYS") {
            self.watcher.retention_days = days;
        }
        if let Some(n) = env_parse("TAGWATCH_CONCURRENCY") {
            self.build.concurrency = n;
        }
        if let Some(secs) = env_parse("TAGWATCH_BUILD_TIMEOUT") {
            self.build.timeout_secs = secs;
        }
        if let Ok(url) = std::env::var("TAGWATCH_DISCORD_WEBHOOK") {
            self.notifications.discord_webhook_url = Some(url);
        }
    }

    /// Validate required values. Called once at startup; failure is fatal.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.repository.url.trim().is_empty() {
            anyhow::bail!("repository.url is required (or set TAGWATCH_REPO_URL)");
        }
        if self.repository.local_path.trim().is_empty() {
            anyhow::bail!("repository.local_path is required (or set TAGWATCH_LOCAL_PATH)");
        }
        if self.build.concurrency == 0 {
            anyhow::bail!("build.concurrency must be at least 1");
        }
        if self.watcher.poll_interval_secs == 0 {
            anyhow::bail!("watcher.poll_interval_secs must be at least 1");
        }
        if self.watcher.retention_days <= 0 {
            anyhow::bail!("watcher.retention_days must be positive");
        }
        if self.build.workflow == WorkflowKind::Docker && self.build.docker_image.is_none() {
            anyhow::bail!("build.docker_image is required when build.workflow = \"docker\"");
        }
        Ok(())
    }

    /// The local clone path with `~` expanded.
    #[must_use]
    pub fn local_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.repository.local_path).into_owned())
    }

    /// The poll interval as a [`Duration`].
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.watcher.poll_interval_secs)
    }

    /// The per-build timeout as a [`Duration`].
    #[must_use]
    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build.timeout_secs)
    }

    /// The retention window as a [`chrono::Duration`].
    #[must_use]
    pub fn retention_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.watcher.retention_days)
    }

    /// Where build workspaces are created.
    #[must_use]
    pub fn workspace_root(&self) -> PathBuf {
        self.build.workspace_root.clone().unwrap_or_else(std::env::temp_dir)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
