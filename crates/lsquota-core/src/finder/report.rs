//! Human-readable report printed after discovery gives up.

use std::fmt;

use serde::Serialize;

use super::DetectFailure;
use crate::platform::Platform;
use crate::runner::{CommandRunner, COMMAND_TIMEOUT};

/// Best-effort snapshot of the machine for support output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticReport {
    pub platform: &'static str,
    /// Process listing lines mentioning the keyword, or why the listing failed
    pub processes: Result<Vec<String>, String>,
    pub tips: Vec<&'static str>,
}

impl DiagnosticReport {
    /// Run the platform diagnostic listing. Never fails; listing errors are
    /// kept as text.
    pub async fn collect<R: CommandRunner>(runner: &R, platform: &Platform, keyword: &str) -> Self {
        let strategy = platform.strategy();
        let processes = match strategy.diagnostic_command() {
            None => Err("no diagnostic command on this platform".to_string()),
            Some(spec) => match runner.run(&spec, COMMAND_TIMEOUT).await {
                Ok(output) => Ok(related_lines(&output.stdout, keyword)),
                Err(e) => Err(e.to_string()),
            },
        };

        Self {
            platform: strategy.name(),
            processes,
            tips: strategy.troubleshooting_tips(),
        }
    }
}

fn related_lines(stdout: &str, keyword: &str) -> Vec<String> {
    let keyword = keyword.to_lowercase();
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| line.to_lowercase().contains(&keyword))
        .map(String::from)
        .collect()
}

impl fmt::Display for DiagnosticReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Platform: {}", self.platform)?;
        match &self.processes {
            Ok(lines) if lines.is_empty() => writeln!(f, "Related processes: none")?,
            Ok(lines) => {
                writeln!(f, "Related processes:")?;
                for line in lines {
                    writeln!(f, "  {}", line)?;
                }
            }
            Err(e) => writeln!(f, "Related processes: listing failed ({})", e)?,
        }
        if !self.tips.is_empty() {
            writeln!(f, "Troubleshooting:")?;
            for tip in &self.tips {
                writeln!(f, "  - {}", tip)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for DetectFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.diagnostics;
        writeln!(f, "{} ({})", self.reason.user_message(), self.reason)?;
        writeln!(f, "Candidates: {}", d.candidate_count)?;
        if let Some(prefix) = &d.token_prefix {
            writeln!(f, "Token prefix: {}...", prefix)?;
        }
        writeln!(
            f,
            "Ports: {} from command line, {} from port listing",
            d.cmdline_port_count, d.netstat_port_count
        )?;
        writeln!(f, "Retries: {}", d.retry_count)?;
        if let Some(protocol) = d.protocol {
            writeln!(f, "Protocol: {}", protocol.scheme())?;
        }
        for a in &d.attempts {
            let status = a
                .status_code
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string());
            write!(
                f,
                "  pid {} {}:{} ({:?}) -> {}",
                a.pid, a.host, a.port, a.port_source, status
            )?;
            match &a.error {
                Some(e) => writeln!(f, " {}", e)?,
                None => writeln!(f)?,
            }
        }
        if let Some(report) = &self.report {
            write!(f, "{}", report)?;
        }
        Ok(())
    }
}
