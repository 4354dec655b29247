use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CLIENT_ID: &str = "1408133296000466945";
pub const DEFAULT_LARGE_IMAGE_KEY: &str = "ollama";
pub const DEFAULT_DETECTION_COMMAND: &str = "ollama ps";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
/// 12 ticks at the default 5s interval is one minute of confirmed downtime.
pub const DEFAULT_AUTO_EXIT_GRACE_TICKS: u32 = 12;

pub const DEFAULT_PROCESS_MATCH: &str = "ollama";
pub const DEFAULT_PORT: u16 = 11434;
pub const DEFAULT_VERSION_COMMAND: &str = "ollama --version";
pub const DEFAULT_LAUNCH_COMMAND: &str = "ollama serve";
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_PORT_TIMEOUT_MS: u64 = 1000;

/// Root configuration structure. Deserialized from ~/.ollama/discord/config.toml.
///
/// Loaded once at startup and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Discord application id the presence is published under.
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Asset key of the large presence icon.
    #[serde(default = "default_large_image_key")]
    pub large_image_key: String,
    /// Launch the target at startup if it is not already running.
    #[serde(default = "default_true")]
    pub auto_start: bool,
    /// Exit once the target has been stopped for `auto_exit_grace_ticks` polls.
    #[serde(default = "default_true")]
    pub auto_exit: bool,
    /// Command listing the target's loaded models (e.g. `ollama ps`).
    #[serde(default = "default_detection_command")]
    pub detection_command: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_grace_ticks")]
    pub auto_exit_grace_ticks: u32,
    #[serde(default)]
    pub target: TargetConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            large_image_key: DEFAULT_LARGE_IMAGE_KEY.to_string(),
            auto_start: true,
            auto_exit: true,
            detection_command: DEFAULT_DETECTION_COMMAND.to_string(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            auto_exit_grace_ticks: DEFAULT_AUTO_EXIT_GRACE_TICKS,
            target: TargetConfig::default(),
        }
    }
}

/// How the monitored service is recognised and queried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Case-insensitive substring matched against process names and executable paths.
    #[serde(default = "default_process_match")]
    pub process_match: String,
    /// Local TCP port probed when the process table is inconclusive.
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_version_command")]
    pub version_command: String,
    #[serde(default = "default_launch_command")]
    pub launch_command: String,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_port_timeout")]
    pub port_timeout_ms: u64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            process_match: DEFAULT_PROCESS_MATCH.to_string(),
            port: DEFAULT_PORT,
            version_command: DEFAULT_VERSION_COMMAND.to_string(),
            launch_command: DEFAULT_LAUNCH_COMMAND.to_string(),
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            port_timeout_ms: DEFAULT_PORT_TIMEOUT_MS,
        }
    }
}

impl TargetConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn port_timeout(&self) -> Duration {
        Duration::from_millis(self.port_timeout_ms)
    }
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Rejects values the monitor cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            bail!("poll_interval_secs must be greater than zero");
        }
        if self.auto_exit_grace_ticks == 0 {
            bail!("auto_exit_grace_ticks must be greater than zero");
        }
        if self.target.process_match.trim().is_empty() {
            bail!("target.process_match must not be empty");
        }
        let mut commands = vec![
            ("detection_command", &self.detection_command),
            ("target.version_command", &self.target.version_command),
        ];
        // The launch command only runs when auto-start is on.
        if self.auto_start {
            commands.push(("target.launch_command", &self.target.launch_command));
        }
        for (name, cmd) in commands {
            if split_command(cmd).is_empty() {
                bail!("{name} must not be empty");
            }
        }
        Ok(())
    }
}

/// Splits a configured command line into an argument vector. No shell
/// interpretation takes place, so quoting is not supported.
pub fn split_command(cmd: &str) -> Vec<String> {
    cmd.split_whitespace().map(str::to_string).collect()
}

/// Loads the config file at `path`, returning `Config::default()` if the file does not exist.
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Writes the default configuration to `path`, creating the parent directory.
pub fn write_default(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let content =
        toml::to_string_pretty(&Config::default()).context("Failed to serialize default config")?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config file: {}", path.display()))
}

fn default_true() -> bool {
    true
}

fn default_client_id() -> String {
    DEFAULT_CLIENT_ID.to_string()
}

fn default_large_image_key() -> String {
    DEFAULT_LARGE_IMAGE_KEY.to_string()
}

fn default_detection_command() -> String {
    DEFAULT_DETECTION_COMMAND.to_string()
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_grace_ticks() -> u32 {
    DEFAULT_AUTO_EXIT_GRACE_TICKS
}

fn default_process_match() -> String {
    DEFAULT_PROCESS_MATCH.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_version_command() -> String {
    DEFAULT_VERSION_COMMAND.to_string()
}

fn default_launch_command() -> String {
    DEFAULT_LAUNCH_COMMAND.to_string()
}

fn default_command_timeout() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECS
}

fn default_port_timeout() -> u64 {
    DEFAULT_PORT_TIMEOUT_MS
}
