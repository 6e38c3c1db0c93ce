//! Bot configuration: TOML file + CLI/environment overrides.

use anyhow::{bail, Context, Result};
use chrono::FixedOffset;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;
use vpsphere_core::{AuthorizedOperator, ControllerConfig};

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub bot: BotSection,
    #[serde(default)]
    pub shell: ShellSection,
    #[serde(default)]
    pub activity: ActivitySection,
    #[serde(default)]
    pub ssh_watch: SshWatchSection,
    #[serde(default)]
    pub uploads: UploadsSection,
}

/// `[bot]` section. Both values are usually supplied through the
/// environment instead.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BotSection {
    pub token: Option<String>,
    pub operator_id: Option<u64>,
}

/// `[shell]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ShellSection {
    #[serde(default = "default_working_dir")]
    pub working_dir: String,
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default = "default_term")]
    pub term: String,
    #[serde(default = "default_chunk_threshold")]
    pub chunk_threshold: usize,
    #[serde(default = "default_chunk_threshold")]
    pub message_limit: usize,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            working_dir: default_working_dir(),
            shell: default_shell(),
            term: default_term(),
            chunk_threshold: default_chunk_threshold(),
            message_limit: default_chunk_threshold(),
        }
    }
}

/// `[activity]` section. An empty path disables the log.
#[derive(Debug, Clone, Deserialize)]
pub struct ActivitySection {
    #[serde(default = "default_activity_log")]
    pub log_path: String,
}

impl Default for ActivitySection {
    fn default() -> Self {
        Self {
            log_path: default_activity_log(),
        }
    }
}

/// `[ssh_watch]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SshWatchSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_watch_command")]
    pub command: Vec<String>,
    #[serde(default = "default_utc_offset")]
    pub utc_offset_hours: i32,
    #[serde(default = "default_zone_label")]
    pub zone_label: String,
}

impl Default for SshWatchSection {
    fn default() -> Self {
        Self {
            enabled: true,
            command: default_watch_command(),
            utc_offset_hours: default_utc_offset(),
            zone_label: default_zone_label(),
        }
    }
}

/// `[uploads]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadsSection {
    #[serde(default = "default_upload_dir")]
    pub dir_name: String,
}

impl Default for UploadsSection {
    fn default() -> Self {
        Self {
            dir_name: default_upload_dir(),
        }
    }
}

fn default_working_dir() -> String {
    "/opt/hostingerbot".to_string()
}
fn default_shell() -> String {
    "/bin/sh".to_string()
}
fn default_term() -> String {
    "xterm".to_string()
}
fn default_chunk_threshold() -> usize {
    vpsphere_core::session::DEFAULT_CHUNK_THRESHOLD
}
fn default_activity_log() -> String {
    "~/.vpsphere/activity.log".to_string()
}
fn default_true() -> bool {
    true
}
fn default_watch_command() -> Vec<String> {
    ["/usr/bin/journalctl", "-u", "ssh", "-f", "-n", "0"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_utc_offset() -> i32 {
    8
}
fn default_zone_label() -> String {
    "WITA".to_string()
}
fn default_upload_dir() -> String {
    "Upload".to_string()
}

/// Values given on the command line or through the environment. Each one
/// that is set wins over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub token: Option<String>,
    pub operator_id: Option<u64>,
    pub working_dir: Option<PathBuf>,
    pub shell: Option<String>,
    pub activity_log: Option<String>,
    pub disable_ssh_watch: bool,
}

/// Resolved SSH-login watcher settings.
#[derive(Debug, Clone)]
pub struct SshWatchConfig {
    pub command: Vec<String>,
    pub offset: FixedOffset,
    pub zone_label: String,
}

/// Resolved bot configuration (paths expanded, overrides applied).
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub token: String,
    pub operator: AuthorizedOperator,
    pub working_dir: PathBuf,
    pub controller: ControllerConfig,
    pub activity_log: Option<PathBuf>,
    pub ssh_watch: Option<SshWatchConfig>,
    pub upload_dir_name: String,
}

impl BotConfig {
    /// Load `config_path` if it exists, then apply `overrides`.
    pub fn load(config_path: &Path, overrides: Overrides) -> Result<Self> {
        let expanded = expand_tilde(&config_path.to_string_lossy());
        let file = if expanded.exists() {
            info!(path = %expanded.display(), "loading config file");
            let content = std::fs::read_to_string(&expanded)
                .with_context(|| format!("cannot read {}", expanded.display()))?;
            parse(&content).with_context(|| format!("invalid config {}", expanded.display()))?
        } else {
            info!(path = %expanded.display(), "config file not found, using defaults");
            ConfigFile::default()
        };
        Self::resolve(file, overrides)
    }

    /// Merge a parsed file with overrides and validate the result.
    pub fn resolve(file: ConfigFile, overrides: Overrides) -> Result<Self> {
        let token = overrides
            .token
            .or(file.bot.token)
            .filter(|t| !t.trim().is_empty())
            .context("bot token is not set (BOT_TOKEN or [bot].token)")?;
        let operator_id = overrides
            .operator_id
            .or(file.bot.operator_id)
            .context("operator id is not set (USER_ID or [bot].operator_id)")?;

        let shell = file.shell;
        if shell.chunk_threshold == 0 || shell.message_limit == 0 {
            bail!("chunk_threshold and message_limit must be positive");
        }
        let working_dir = overrides
            .working_dir
            .unwrap_or_else(|| expand_tilde(&shell.working_dir));

        let activity_path = overrides.activity_log.unwrap_or(file.activity.log_path);
        let activity_log = (!activity_path.trim().is_empty()).then(|| expand_tilde(&activity_path));

        let watch = file.ssh_watch;
        let ssh_watch = if watch.enabled && !overrides.disable_ssh_watch {
            if watch.command.is_empty() {
                bail!("[ssh_watch].command must not be empty");
            }
            let offset = watch
                .utc_offset_hours
                .checked_mul(3600)
                .and_then(FixedOffset::east_opt)
                .with_context(|| {
                    format!("utc_offset_hours out of range: {}", watch.utc_offset_hours)
                })?;
            Some(SshWatchConfig {
                command: watch.command,
                offset,
                zone_label: watch.zone_label,
            })
        } else {
            None
        };

        let upload_dir_name = file.uploads.dir_name;
        if upload_dir_name.is_empty() || upload_dir_name.contains('/') {
            bail!("[uploads].dir_name must be a single path component");
        }

        Ok(Self {
            token,
            operator: AuthorizedOperator(operator_id),
            working_dir,
            controller: ControllerConfig {
                shell: overrides.shell.unwrap_or(shell.shell),
                term: shell.term,
                chunk_threshold: shell.chunk_threshold,
                message_limit: shell.message_limit,
            },
            activity_log,
            ssh_watch,
            upload_dir_name,
        })
    }
}

pub fn parse(content: &str) -> Result<ConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_tilde(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}
