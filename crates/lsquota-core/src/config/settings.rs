use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::finder::FinderSettings;
use crate::protocol::{USER_STATUS_PATH, VERIFY_PATH};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Find the IDE language server and show model quotas")]
pub struct Config {
    /// Enable debug mode
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Host to probe first (default 127.0.0.1)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Language server executable name to look for
    #[arg(long, global = true)]
    pub process_name: Option<String>,

    /// Workspace root open in the IDE (repeatable)
    #[arg(short, long = "workspace", global = true)]
    pub workspaces: Vec<PathBuf>,

    /// Polling interval in milliseconds (watch mode)
    #[arg(short = 'i', long, global = true)]
    pub poll_interval: Option<u64>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// Subcommand
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Find and verify the language server, printing diagnostics on failure
    Detect,
    /// Fetch model quotas once
    Quota,
    /// Poll model quotas until interrupted
    Watch,
    /// Print the workspace identifier of a path
    WorkspaceId {
        /// Path to normalize
        path: PathBuf,
        /// Use Windows path rules regardless of the host OS
        #[arg(long)]
        windows: bool,
    },
}

impl Config {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Subcommand to run; `quota` when none was given
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Quota)
    }
}

/// Application settings (from config file)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    /// Quota polling interval in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Workspace roots used to pick the right language server
    #[serde(default)]
    pub workspace_roots: Vec<PathBuf>,

    /// Discovery settings
    #[serde(default)]
    pub discovery: DiscoverySettings,

    /// Language server endpoint settings
    #[serde(default)]
    pub server: ServerSettings,
}

fn default_poll_interval() -> u64 {
    60_000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            workspace_roots: Vec::new(),
            discovery: DiscoverySettings::default(),
            server: ServerSettings::default(),
        }
    }
}

/// How the language server process is searched for
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoverySettings {
    /// Discovery cycles before giving up
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// First retry delay in milliseconds (doubles each retry)
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Retry delay cap in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Executable name override (platform default when unset)
    #[serde(default)]
    pub process_name: Option<String>,

    /// Command-line keyword for the fallback process listing
    #[serde(default = "default_keyword")]
    pub keyword: String,

    /// Only accept servers started with this `--app_data_dir` (empty = any)
    #[serde(default = "default_app_data_dir")]
    pub app_data_dir: String,

    /// Timeout for process and port listing commands
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,

    /// Timeout for the one-time retry after a cold-start timeout
    #[serde(default = "default_warmup_timeout")]
    pub warmup_timeout_ms: u64,

    /// Pause before the cold-start retry
    #[serde(default = "default_warmup_delay")]
    pub warmup_delay_ms: u64,
}

fn default_attempts() -> u32 {
    5
}

fn default_base_delay() -> u64 {
    1500
}

fn default_max_delay() -> u64 {
    10_000
}

fn default_keyword() -> String {
    "language_server".to_string()
}

fn default_app_data_dir() -> String {
    "antigravity".to_string()
}

fn default_command_timeout() -> u64 {
    3000
}

fn default_warmup_timeout() -> u64 {
    5000
}

fn default_warmup_delay() -> u64 {
    1000
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            process_name: None,
            keyword: default_keyword(),
            app_data_dir: default_app_data_dir(),
            command_timeout_ms: default_command_timeout(),
            warmup_timeout_ms: default_warmup_timeout(),
            warmup_delay_ms: default_warmup_delay(),
        }
    }
}

/// Endpoint overrides, mostly for testing against a fake server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerSettings {
    /// Host probed first
    #[serde(default = "default_host")]
    pub host: String,

    /// RPC used to verify a port and token
    #[serde(default = "default_verify_path")]
    pub verify_path: String,

    /// RPC returning model quotas
    #[serde(default = "default_quota_path")]
    pub quota_path: String,

    /// Per-attempt request timeout in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_verify_path() -> String {
    VERIFY_PATH.to_string()
}

fn default_quota_path() -> String {
    USER_STATUS_PATH.to_string()
}

fn default_request_timeout() -> u64 {
    5000
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            verify_path: default_verify_path(),
            quota_path: default_quota_path(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl Settings {
    /// Load settings from config file or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        // Try custom path first
        if let Some(p) = path {
            if p.exists() {
                return Self::load_file(p);
            }
        }

        // Try default config locations
        let default_paths = [
            dirs::config_dir().map(|p| p.join("lsquota/config.toml")),
            dirs::home_dir().map(|p| p.join(".config/lsquota/config.toml")),
            dirs::home_dir().map(|p| p.join(".lsquota.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                return Self::load_file(path);
            }
        }

        // Return defaults if no config file found
        Ok(Self::default())
    }

    fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Merge CLI config into settings (CLI takes precedence)
    pub fn merge_cli(&mut self, cli: &Config) {
        if let Some(poll_interval) = cli.poll_interval {
            self.poll_interval_ms = poll_interval;
        }
        if let Some(host) = &cli.host {
            self.server.host = host.clone();
        }
        if let Some(name) = &cli.process_name {
            self.discovery.process_name = Some(name.clone());
        }
        if !cli.workspaces.is_empty() {
            self.workspace_roots = cli.workspaces.clone();
        }
    }

    /// Validate and normalize settings values
    ///
    /// Keeps at least one discovery attempt and a polling interval that
    /// does not hammer the server.
    pub fn validate(&mut self) {
        const MIN_POLL_INTERVAL: u64 = 1000;

        if self.poll_interval_ms < MIN_POLL_INTERVAL {
            self.poll_interval_ms = MIN_POLL_INTERVAL;
        }
        if self.discovery.attempts == 0 {
            self.discovery.attempts = 1;
        }
        if self.discovery.max_delay_ms < self.discovery.base_delay_ms {
            self.discovery.max_delay_ms = self.discovery.base_delay_ms;
        }
        if self.discovery.process_name.as_deref() == Some("") {
            self.discovery.process_name = None;
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.request_timeout_ms)
    }

    /// Discovery tunables for [`ProcessFinder`](crate::finder::ProcessFinder)
    pub fn finder_settings(&self) -> FinderSettings {
        let d = &self.discovery;
        FinderSettings {
            attempts: d.attempts,
            base_delay: Duration::from_millis(d.base_delay_ms),
            max_delay: Duration::from_millis(d.max_delay_ms),
            process_name: d.process_name.clone(),
            keyword: d.keyword.clone(),
            app_data_dir: (!d.app_data_dir.is_empty()).then(|| d.app_data_dir.clone()),
            host: self.server.host.clone(),
            verify_path: self.server.verify_path.clone(),
            command_timeout: Duration::from_millis(d.command_timeout_ms),
            warmup_timeout: Duration::from_millis(d.warmup_timeout_ms),
            warmup_delay: Duration::from_millis(d.warmup_delay_ms),
            request_timeout: self.request_timeout(),
        }
    }
}
