//! macOS and Linux process and port listing.

use std::sync::atomic::{AtomicUsize, Ordering};

use once_cell::sync::Lazy;
use regex::Regex;

use super::cmdline::parse_command_line;
use super::PlatformStrategy;
use crate::runner::CommandSpec;
use crate::types::ProcessCandidate;

/// `  PID  PPID ARGS...` rows of `ps -eo pid,ppid,args`
static PS_ROW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+)\s+(\d+)\s+(.+)$").expect("Invalid PS_ROW regex"));

/// `PID ARGS...` rows of `pgrep -af` / `pgrep -lf`
static PGREP_ROW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+)\s+(.+)$").expect("Invalid PGREP_ROW regex"));

/// Listening socket in `lsof` output: `TCP 127.0.0.1:42100 (LISTEN)`
static LSOF_LISTEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r":(\d+)\s+\(LISTEN\)").expect("Invalid LSOF_LISTEN regex"));

/// Which Unix the strategy targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnixFlavor {
    MacOs,
    Linux,
}

/// Tools that can list the listening ports of a PID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortTool {
    /// `lsof -nP -a -iTCP -sTCP:LISTEN -p <pid>`
    Lsof,
    /// `ss -tlnp`
    Ss,
    /// `netstat -tlnp` (net-tools)
    NetstatLinux,
    /// `netstat -anv -p tcp` (BSD)
    NetstatBsd,
}

impl PortTool {
    fn command(self, pid: u32) -> CommandSpec {
        match self {
            PortTool::Lsof => CommandSpec::new("lsof").args([
                "-nP".to_string(),
                "-a".to_string(),
                "-iTCP".to_string(),
                "-sTCP:LISTEN".to_string(),
                "-p".to_string(),
                pid.to_string(),
            ]),
            PortTool::Ss => CommandSpec::new("ss").arg("-tlnp"),
            PortTool::NetstatLinux => CommandSpec::new("netstat").arg("-tlnp"),
            PortTool::NetstatBsd => CommandSpec::new("netstat").args(["-anv", "-p", "tcp"]),
        }
    }

    fn parse(self, stdout: &str, pid: u32) -> Vec<u16> {
        let pid_str = pid.to_string();
        let mut ports = Vec::new();

        for line in stdout.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let port = match self {
                PortTool::Lsof => {
                    if fields.get(1) != Some(&pid_str.as_str()) {
                        continue;
                    }
                    LSOF_LISTEN
                        .captures(line)
                        .and_then(|c| c[1].parse::<u16>().ok())
                }
                PortTool::Ss => {
                    if !line.contains(&format!("pid={},", pid)) {
                        continue;
                    }
                    fields.get(3).and_then(|addr| port_after(addr, ':'))
                }
                PortTool::NetstatLinux => {
                    let owned = fields
                        .last()
                        .is_some_and(|f| f.split('/').next() == Some(pid_str.as_str()));
                    if !line.contains("LISTEN") || !owned {
                        continue;
                    }
                    fields.get(3).and_then(|addr| port_after(addr, ':'))
                }
                PortTool::NetstatBsd => {
                    // Newer macOS prints `name:pid` instead of a bare pid column
                    let owned = fields.iter().skip(6).any(|f| {
                        *f == pid_str || f.rsplit_once(':').is_some_and(|(_, p)| p == pid_str)
                    });
                    if !line.contains("LISTEN") || !owned {
                        continue;
                    }
                    fields.get(3).and_then(|addr| port_after(addr, '.'))
                }
            };
            if let Some(port) = port {
                push_unique(&mut ports, port);
            }
        }

        ports
    }
}

/// Port after the last `sep` in a local address (`127.0.0.1:42100`, `*.42100`)
pub(super) fn port_after(addr: &str, sep: char) -> Option<u16> {
    let (_, port) = addr.rsplit_once(sep)?;
    port.parse().ok().filter(|p| *p != 0)
}

pub(super) fn push_unique(ports: &mut Vec<u16>, port: u16) {
    if !ports.contains(&port) {
        ports.push(port);
    }
}

/// Process and port listing for macOS and Linux
#[derive(Debug)]
pub struct UnixStrategy {
    flavor: UnixFlavor,
    /// Index into `port_tools()`; only moves forward
    port_tool: AtomicUsize,
}

impl UnixStrategy {
    pub fn new(flavor: UnixFlavor) -> Self {
        Self {
            flavor,
            port_tool: AtomicUsize::new(0),
        }
    }

    pub fn flavor(&self) -> UnixFlavor {
        self.flavor
    }

    fn port_tools(&self) -> &'static [PortTool] {
        match self.flavor {
            UnixFlavor::MacOs => &[PortTool::Lsof, PortTool::NetstatBsd],
            UnixFlavor::Linux => &[PortTool::Lsof, PortTool::Ss, PortTool::NetstatLinux],
        }
    }

    /// Port tool currently in use
    pub fn port_tool(&self) -> PortTool {
        let tools = self.port_tools();
        tools[self.port_tool.load(Ordering::Relaxed).min(tools.len() - 1)]
    }

    fn ps_command() -> CommandSpec {
        CommandSpec::new("ps").args(["-ww", "-eo", "pid,ppid,args"])
    }
}

/// Parse `ps -eo pid,ppid,args` rows whose arguments mention `needle`.
///
/// The `ps` invocation itself never contains the needle, so it cannot
/// show up as a match.
fn parse_ps(stdout: &str, needle: &str) -> Option<Vec<ProcessCandidate>> {
    let candidates: Vec<ProcessCandidate> = stdout
        .lines()
        .filter_map(|line| {
            let caps = PS_ROW.captures(line)?;
            let args = caps.get(3)?.as_str();
            if !args.contains(needle) {
                return None;
            }
            let pid = caps[1].parse().ok()?;
            let ppid = caps[2].parse().ok();
            parse_command_line(pid, ppid, args)
        })
        .collect();

    (!candidates.is_empty()).then_some(candidates)
}

fn parse_pgrep(stdout: &str, needle: &str) -> Option<Vec<ProcessCandidate>> {
    let candidates: Vec<ProcessCandidate> = stdout
        .lines()
        .filter_map(|line| {
            let caps = PGREP_ROW.captures(line)?;
            let args = caps.get(2)?.as_str();
            if !args.contains(needle) {
                return None;
            }
            parse_command_line(caps[1].parse().ok()?, None, args)
        })
        .collect();

    (!candidates.is_empty()).then_some(candidates)
}

impl PlatformStrategy for UnixStrategy {
    fn name(&self) -> &'static str {
        match self.flavor {
            UnixFlavor::MacOs => "macos",
            UnixFlavor::Linux => "linux",
        }
    }

    fn list_processes_command(&self, _target: &str) -> CommandSpec {
        Self::ps_command()
    }

    fn parse_processes(&self, stdout: &str, needle: &str) -> Option<Vec<ProcessCandidate>> {
        parse_ps(stdout, needle)
    }

    fn list_processes_by_keyword_command(&self, _keyword: &str) -> Option<CommandSpec> {
        Some(Self::ps_command())
    }

    fn secondary_list_command(&self, target: &str) -> Option<CommandSpec> {
        let flags = match self.flavor {
            UnixFlavor::MacOs => "-lf",
            UnixFlavor::Linux => "-af",
        };
        Some(CommandSpec::new("pgrep").args([flags, target]))
    }

    fn parse_secondary_processes(&self, stdout: &str, target: &str) -> Option<Vec<ProcessCandidate>> {
        parse_pgrep(stdout, target)
    }

    fn list_ports_command(&self, pid: u32) -> CommandSpec {
        self.port_tool().command(pid)
    }

    fn parse_ports(&self, stdout: &str, pid: u32) -> Vec<u16> {
        self.port_tool().parse(stdout, pid)
    }

    fn port_tool_unavailable(&self) -> bool {
        let current = self.port_tool.load(Ordering::Relaxed);
        if current + 1 >= self.port_tools().len() {
            return false;
        }
        // Another caller may have advanced it already; either way a fallback exists
        let _ = self.port_tool.compare_exchange(
            current,
            current + 1,
            Ordering::Relaxed,
            Ordering::Relaxed,
        );
        true
    }

    fn parent_pid_command(&self, pid: u32) -> CommandSpec {
        CommandSpec::new("ps").args(["-o".to_string(), "ppid=".to_string(), "-p".to_string(), pid.to_string()])
    }

    fn diagnostic_command(&self) -> Option<CommandSpec> {
        Some(Self::ps_command())
    }

    fn troubleshooting_tips(&self) -> Vec<&'static str> {
        let mut tips = vec![
            "Make sure the IDE is running and a workspace folder is open.",
            "Wait a few seconds after the IDE starts; the language server starts lazily.",
        ];
        match self.flavor {
            UnixFlavor::MacOs => {
                tips.push("Check that `lsof` is available (it ships with macOS).");
            }
            UnixFlavor::Linux => {
                tips.push("Install `lsof` or `iproute2` (`ss`) so listening ports can be found.");
                tips.push(
                    "Under WSL, the IDE server may run on the Windows host; NAT networking is probed through the default gateway.",
                );
            }
        }
        tips
    }
}
