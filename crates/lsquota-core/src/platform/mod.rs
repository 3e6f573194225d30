//! OS-specific process enumeration and port listing.
//!
//! One [`PlatformStrategy`] per OS family builds the commands and parses
//! their output. [`Platform`] picks the strategy for the host once and is
//! the only dispatch point; it also validates every name that ends up in a
//! command.

mod cmdline;
mod unix;
mod windows;
pub mod wsl;

pub use cmdline::parse_command_line;
pub use unix::{PortTool, UnixFlavor, UnixStrategy};
pub use windows::WindowsStrategy;

use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::runner::CommandSpec;
use crate::types::ProcessCandidate;

/// Process names and keywords allowed in commands
static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("Invalid NAME_PATTERN regex"));

/// Reject names that could change the meaning of a query
fn validate_name(name: &str) -> Result<()> {
    if !NAME_PATTERN.is_match(name) {
        anyhow::bail!("Invalid process name or keyword: {:?}", name);
    }
    Ok(())
}

/// Commands and parsers for one OS family
pub trait PlatformStrategy: Send + Sync {
    /// Short platform name for logs
    fn name(&self) -> &'static str;

    /// List processes named `target`
    fn list_processes_command(&self, target: &str) -> CommandSpec;

    /// Candidates from the process listing; `None` on parse failure or no match
    fn parse_processes(&self, stdout: &str, needle: &str) -> Option<Vec<ProcessCandidate>>;

    /// Fallback listing matching `keyword` anywhere in the command line
    fn list_processes_by_keyword_command(&self, _keyword: &str) -> Option<CommandSpec> {
        None
    }

    /// Second tool to try when both listings above come back empty
    fn secondary_list_command(&self, _target: &str) -> Option<CommandSpec> {
        None
    }

    fn parse_secondary_processes(&self, _stdout: &str, _target: &str) -> Option<Vec<ProcessCandidate>> {
        None
    }

    /// List listening TCP ports of `pid`
    fn list_ports_command(&self, pid: u32) -> CommandSpec;

    /// Listening ports of `pid`, deduplicated, in listing order
    fn parse_ports(&self, stdout: &str, pid: u32) -> Vec<u16>;

    /// The current port tool is not installed. Switches to the next tool
    /// for the rest of the process lifetime; returns false if none is left.
    fn port_tool_unavailable(&self) -> bool {
        false
    }

    /// Print the parent PID of `pid`
    fn parent_pid_command(&self, pid: u32) -> CommandSpec;

    fn parse_parent_pid(&self, stdout: &str) -> Option<u32> {
        stdout.trim().parse().ok().filter(|p| *p != 0)
    }

    /// Listing used by the diagnostic pass after discovery gives up
    fn diagnostic_command(&self) -> Option<CommandSpec> {
        None
    }

    fn troubleshooting_tips(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Whether the process query can time out on its first run
    fn has_cold_start(&self) -> bool {
        false
    }
}

/// Strategy for the host OS
#[derive(Debug)]
pub enum Platform {
    Windows(WindowsStrategy),
    Unix(UnixStrategy),
}

static CURRENT: Lazy<Arc<Platform>> = Lazy::new(|| Arc::new(Platform::detect()));

impl Platform {
    /// Strategy for the host OS, shared for the process lifetime so the
    /// port tool fallback is only discovered once
    pub fn current() -> Arc<Platform> {
        CURRENT.clone()
    }

    fn detect() -> Self {
        if cfg!(windows) {
            Self::windows()
        } else if cfg!(target_os = "macos") {
            Self::macos()
        } else {
            Self::linux()
        }
    }

    pub fn windows() -> Self {
        Platform::Windows(WindowsStrategy::new())
    }

    pub fn macos() -> Self {
        Platform::Unix(UnixStrategy::new(UnixFlavor::MacOs))
    }

    pub fn linux() -> Self {
        Platform::Unix(UnixStrategy::new(UnixFlavor::Linux))
    }

    pub fn strategy(&self) -> &dyn PlatformStrategy {
        match self {
            Platform::Windows(s) => s,
            Platform::Unix(s) => s,
        }
    }

    /// Language server executable name for this OS and CPU
    pub fn default_process_name(&self) -> &'static str {
        let arm = cfg!(target_arch = "aarch64");
        match self {
            Platform::Windows(_) => "language_server_windows_x64.exe",
            Platform::Unix(s) => match (s.flavor(), arm) {
                (UnixFlavor::MacOs, true) => "language_server_macos_arm",
                (UnixFlavor::MacOs, false) => "language_server_macos",
                (UnixFlavor::Linux, true) => "language_server_linux_arm",
                (UnixFlavor::Linux, false) => "language_server_linux_x64",
            },
        }
    }

    pub fn list_processes_command(&self, target: &str) -> Result<CommandSpec> {
        validate_name(target)?;
        Ok(self.strategy().list_processes_command(target))
    }

    pub fn list_processes_by_keyword_command(&self, keyword: &str) -> Result<Option<CommandSpec>> {
        validate_name(keyword)?;
        Ok(self.strategy().list_processes_by_keyword_command(keyword))
    }

    pub fn secondary_list_command(&self, target: &str) -> Result<Option<CommandSpec>> {
        validate_name(target)?;
        Ok(self.strategy().secondary_list_command(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("language_server_windows_x64.exe").is_ok());
        assert!(validate_name("language-server").is_ok());
        assert!(validate_name("x' OR 1=1 --").is_err());
        assert!(validate_name("a;rm -rf /").is_err());
        assert!(validate_name("").is_err());
    }

    #[test]
    fn test_injection_is_rejected_before_building_commands() {
        let platform = Platform::windows();
        assert!(platform.list_processes_command("evil'; Stop-Computer").is_err());
        assert!(platform.list_processes_by_keyword_command("%' OR '1'='1").is_err());
        assert!(platform.secondary_list_command("a b").is_err());
    }

    #[test]
    fn test_commands_are_argument_vectors() {
        let spec = Platform::linux()
            .list_processes_command("language_server_linux_x64")
            .unwrap();
        assert_eq!(spec.program, "ps");
        assert_eq!(spec.args, vec!["-ww", "-eo", "pid,ppid,args"]);

        let spec = Platform::windows()
            .list_processes_command("language_server_windows_x64.exe")
            .unwrap();
        assert_eq!(spec.program, "powershell");
        assert!(spec.args[3].contains("Name=''language_server_windows_x64.exe''"));
    }

    #[test]
    fn test_default_process_name() {
        assert_eq!(
            Platform::windows().default_process_name(),
            "language_server_windows_x64.exe"
        );
        assert!(Platform::linux()
            .default_process_name()
            .starts_with("language_server_linux"));
        assert!(Platform::macos()
            .default_process_name()
            .starts_with("language_server_macos"));
    }

    #[test]
    fn test_only_windows_has_cold_start() {
        assert!(Platform::windows().strategy().has_cold_start());
        assert!(!Platform::linux().strategy().has_cold_start());
    }
}
