//! Port discovery and handshake for a single candidate.

use super::{CycleState, ProcessFinder};
use crate::protocol::{metadata_body, service_headers, HttpTransport};
use crate::runner::{CommandError, CommandRunner};
use crate::types::{AttemptRecord, ConnectionDescriptor, PortSource, ProcessCandidate};

impl<R: CommandRunner, T: HttpTransport> ProcessFinder<R, T> {
    /// Probe every port of `candidate` until one accepts its token
    pub(super) async fn verify_and_connect(
        &self,
        candidate: &ProcessCandidate,
        state: &mut CycleState,
    ) -> Option<ConnectionDescriptor> {
        let ports = self.candidate_ports(candidate, state).await;
        if ports.is_empty() {
            self.logger
                .debug(&format!("pid {}: no listening ports", candidate.pid));
            return None;
        }

        let mut hosts = vec![self.settings.host.clone()];
        hosts.extend(self.network().await.secondary_hosts());

        let headers = service_headers(&candidate.csrf_token);
        let body = metadata_body();

        for (port, port_source) in ports {
            for host in &hosts {
                let mut record = AttemptRecord {
                    pid: candidate.pid,
                    port,
                    host: host.clone(),
                    status_code: None,
                    protocol: None,
                    port_source,
                    error: None,
                };

                let result = self
                    .client
                    .request(
                        host,
                        port,
                        &self.settings.verify_path,
                        &headers,
                        &body,
                        self.settings.request_timeout,
                    )
                    .await;

                let accepted = match result {
                    Ok(response) => {
                        record.status_code = Some(response.status_code);
                        record.protocol = Some(response.protocol);
                        state.diagnostics.protocol = Some(response.protocol);
                        if !response.is_success() {
                            record.error = Some(format!("HTTP {}", response.status_code));
                        }
                        response.is_success()
                    }
                    Err(e) => {
                        record.error = Some(e.to_string());
                        false
                    }
                };

                self.logger.debug(&format!(
                    "pid {} {}:{} ({:?}) -> {}",
                    candidate.pid,
                    host,
                    port,
                    port_source,
                    record.error.as_deref().unwrap_or("ok")
                ));
                state.diagnostics.attempts.push(record);

                if accepted {
                    return ConnectionDescriptor::new(port, candidate.csrf_token.clone());
                }
            }
        }

        None
    }

    /// Listening ports of the candidate, with the command-line port first
    /// when the listing does not already contain it
    async fn candidate_ports(
        &self,
        candidate: &ProcessCandidate,
        state: &mut CycleState,
    ) -> Vec<(u16, PortSource)> {
        let listed = self.listening_ports(candidate.pid).await;
        state.diagnostics.netstat_port_count += listed.len();

        let mut ports: Vec<(u16, PortSource)> =
            listed.into_iter().map(|p| (p, PortSource::Netstat)).collect();

        if let Some(declared) = candidate.declared_port() {
            if !ports.iter().any(|(p, _)| *p == declared) {
                ports.insert(0, (declared, PortSource::Cmdline));
                state.diagnostics.cmdline_port_count += 1;
            }
        }
        ports
    }

    /// Run the port listing, moving to the next tool while the current one
    /// is not installed
    async fn listening_ports(&self, pid: u32) -> Vec<u16> {
        let strategy = self.platform.strategy();
        loop {
            let spec = strategy.list_ports_command(pid);
            match self.runner.run(&spec, self.settings.command_timeout).await {
                Ok(output) => return strategy.parse_ports(&output.stdout, pid),
                Err(CommandError::NotFound { program }) => {
                    if !strategy.port_tool_unavailable() {
                        self.logger
                            .warn(&format!("{} not found and no other port tool left", program));
                        return Vec::new();
                    }
                    self.logger.info(&format!(
                        "{} not found, switching to {}",
                        program,
                        strategy.list_ports_command(pid).program
                    ));
                }
                Err(e) => {
                    self.logger.debug(&format!("Port listing failed: {}", e));
                    return Vec::new();
                }
            }
        }
    }
}
