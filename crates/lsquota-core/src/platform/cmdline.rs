//! Extracting connection parameters from a language server command line.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::ProcessCandidate;

/// `--flag=value`, `--flag value`, optionally single- or double-quoted
fn flag_pattern(flag: &str) -> Regex {
    Regex::new(&format!(
        r#"--{}(?:=|\s+)(?:"([^"]*)"|'([^']*)'|([^\s"']+))"#,
        regex::escape(flag)
    ))
    .expect("Invalid flag pattern regex")
}

static PORT_PATTERN: Lazy<Regex> = Lazy::new(|| flag_pattern("extension_server_port"));
static TOKEN_PATTERN: Lazy<Regex> = Lazy::new(|| flag_pattern("csrf_token"));
static WORKSPACE_PATTERN: Lazy<Regex> = Lazy::new(|| flag_pattern("workspace_id"));
static APP_DATA_DIR_PATTERN: Lazy<Regex> = Lazy::new(|| flag_pattern("app_data_dir"));

/// Value of the first occurrence of a flag, ignoring empty values and
/// values that are really the next flag
fn flag_value(pattern: &Regex, cmdline: &str) -> Option<String> {
    let caps = pattern.captures(cmdline)?;
    let value = caps.get(1).or(caps.get(2)).or(caps.get(3))?.as_str().trim();
    if value.is_empty() || value.starts_with("--") {
        return None;
    }
    Some(value.to_string())
}

/// Build a candidate from a process command line.
///
/// Returns `None` unless a CSRF token is present. A missing or unparsable
/// port is kept as 0 and discovered through the port listing.
pub fn parse_command_line(pid: u32, ppid: Option<u32>, cmdline: &str) -> Option<ProcessCandidate> {
    let csrf_token = flag_value(&TOKEN_PATTERN, cmdline)?;
    let extension_port = flag_value(&PORT_PATTERN, cmdline)
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(0);

    Some(ProcessCandidate {
        pid,
        ppid,
        extension_port,
        csrf_token,
        workspace_id: flag_value(&WORKSPACE_PATTERN, cmdline),
        app_data_dir: flag_value(&APP_DATA_DIR_PATTERN, cmdline),
    })
}
