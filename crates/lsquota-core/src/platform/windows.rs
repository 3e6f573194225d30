//! Windows process and port listing via PowerShell CIM queries.

use serde::Deserialize;

use super::cmdline::parse_command_line;
use super::unix::{port_after, push_unique};
use super::PlatformStrategy;
use crate::runner::CommandSpec;
use crate::types::ProcessCandidate;

/// Columns requested from `Win32_Process`
const CIM_COLUMNS: &str = "ProcessId,ParentProcessId,CommandLine";

/// One `Win32_Process` row as emitted by `ConvertTo-Json`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CimProcess {
    process_id: u32,
    #[serde(default)]
    parent_process_id: Option<u32>,
    #[serde(default)]
    command_line: Option<String>,
}

/// `ConvertTo-Json` emits a bare object for a single row
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CimRows {
    Many(Vec<CimProcess>),
    One(CimProcess),
}

/// Process and port listing for Windows.
///
/// Names reaching the PowerShell scripts are validated by
/// [`Platform`](super::Platform) before a command is built.
#[derive(Debug, Default)]
pub struct WindowsStrategy;

impl WindowsStrategy {
    pub fn new() -> Self {
        Self
    }

    fn powershell(script: String) -> CommandSpec {
        CommandSpec::new("powershell").args([
            "-NoProfile".to_string(),
            "-NonInteractive".to_string(),
            "-Command".to_string(),
            script,
        ])
    }
}

fn parse_cim_json(stdout: &str) -> Option<Vec<ProcessCandidate>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return None;
    }
    let rows = match serde_json::from_str::<CimRows>(trimmed).ok()? {
        CimRows::Many(rows) => rows,
        CimRows::One(row) => vec![row],
    };

    let candidates: Vec<ProcessCandidate> = rows
        .into_iter()
        .filter_map(|row| {
            let cmdline = row.command_line?;
            parse_command_line(row.process_id, row.parent_process_id, &cmdline)
        })
        .collect();

    (!candidates.is_empty()).then_some(candidates)
}

/// Parse `wmic ... /format:list` output: `Key=Value` lines, records
/// separated by blank lines
fn parse_wmic_list(stdout: &str) -> Option<Vec<ProcessCandidate>> {
    let mut candidates = Vec::new();
    let mut cmdline: Option<String> = None;
    let mut pid: Option<u32> = None;
    let mut ppid: Option<u32> = None;

    let mut flush = |cmdline: &mut Option<String>, pid: &mut Option<u32>, ppid: &mut Option<u32>| {
        if let (Some(line), Some(p)) = (cmdline.take(), pid.take()) {
            if let Some(candidate) = parse_command_line(p, *ppid, &line) {
                candidates.push(candidate);
            }
        }
        *cmdline = None;
        *pid = None;
        *ppid = None;
    };

    for line in stdout.lines().map(|l| l.trim()) {
        if line.is_empty() {
            flush(&mut cmdline, &mut pid, &mut ppid);
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key {
            "CommandLine" => cmdline = Some(value.to_string()),
            "ProcessId" => pid = value.trim().parse().ok(),
            "ParentProcessId" => ppid = value.trim().parse().ok(),
            _ => {}
        }
    }
    flush(&mut cmdline, &mut pid, &mut ppid);

    (!candidates.is_empty()).then_some(candidates)
}

impl PlatformStrategy for WindowsStrategy {
    fn name(&self) -> &'static str {
        "windows"
    }

    fn list_processes_command(&self, target: &str) -> CommandSpec {
        Self::powershell(format!(
            "Get-CimInstance Win32_Process -Filter 'Name=''{}''' | Select-Object {} | ConvertTo-Json -Compress",
            target, CIM_COLUMNS
        ))
    }

    fn parse_processes(&self, stdout: &str, _needle: &str) -> Option<Vec<ProcessCandidate>> {
        parse_cim_json(stdout)
    }

    fn list_processes_by_keyword_command(&self, keyword: &str) -> Option<CommandSpec> {
        // The PowerShell process itself carries the keyword in its command
        // line, so it excludes its own PID.
        Some(Self::powershell(format!(
            "Get-CimInstance Win32_Process -Filter 'CommandLine LIKE ''%{}%''' | Where-Object {{ $_.ProcessId -ne $PID }} | Select-Object {} | ConvertTo-Json -Compress",
            keyword, CIM_COLUMNS
        )))
    }

    fn secondary_list_command(&self, target: &str) -> Option<CommandSpec> {
        Some(CommandSpec::new("wmic").args([
            "process".to_string(),
            "where".to_string(),
            format!("name='{}'", target),
            "get".to_string(),
            "CommandLine,ParentProcessId,ProcessId".to_string(),
            "/format:list".to_string(),
        ]))
    }

    fn parse_secondary_processes(&self, stdout: &str, _target: &str) -> Option<Vec<ProcessCandidate>> {
        parse_wmic_list(stdout)
    }

    fn list_ports_command(&self, _pid: u32) -> CommandSpec {
        CommandSpec::new("netstat").args(["-ano", "-p", "TCP"])
    }

    fn parse_ports(&self, stdout: &str, pid: u32) -> Vec<u16> {
        let pid_str = pid.to_string();
        let mut ports = Vec::new();
        for line in stdout.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if let [proto, local, _remote, state, owner] = fields.as_slice() {
                if proto.eq_ignore_ascii_case("TCP") && *state == "LISTENING" && *owner == pid_str {
                    if let Some(port) = port_after(local, ':') {
                        push_unique(&mut ports, port);
                    }
                }
            }
        }
        ports
    }

    fn parent_pid_command(&self, pid: u32) -> CommandSpec {
        Self::powershell(format!(
            "(Get-CimInstance Win32_Process -Filter 'ProcessId={}').ParentProcessId",
            pid
        ))
    }

    fn diagnostic_command(&self) -> Option<CommandSpec> {
        Some(Self::powershell(
            "Get-CimInstance Win32_Process -Filter 'Name LIKE ''%language_server%''' | Select-Object ProcessId,ParentProcessId,Name,CommandLine | Format-List"
                .to_string(),
        ))
    }

    fn troubleshooting_tips(&self) -> Vec<&'static str> {
        vec![
            "Make sure the IDE is running and a workspace folder is open.",
            "The first process query after boot can be slow while WMI warms up; try again in a few seconds.",
            "Check that security software is not blocking PowerShell or netstat.",
            "If the IDE runs as administrator, run this tool as administrator too.",
        ]
    }

    fn has_cold_start(&self) -> bool {
        true
    }
}
