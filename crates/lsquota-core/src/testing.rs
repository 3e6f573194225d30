//! Scripted fakes for the command runner and HTTP transport.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;

use crate::protocol::{HttpRequest, HttpResponse, HttpTransport, Protocol, ProtocolError};
use crate::runner::{CommandError, CommandOutput, CommandRunner, CommandSpec};

/// One scripted command result
#[derive(Debug, Clone)]
pub enum Scripted {
    Stdout(String),
    NotFound,
    Timeout,
}

/// Answers commands by substring match on their rendered command line.
///
/// Each rule holds a queue; the last entry repeats once the others are used.
/// Unmatched commands exit with status 1 and no output.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<(String, VecDeque<Scripted>)>>,
    calls: Mutex<Vec<(String, Duration)>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, needle: &str, response: Scripted) -> Self {
        {
            let mut rules = self.rules.lock();
            match rules.iter_mut().find(|(n, _)| n == needle) {
                Some((_, queue)) => queue.push_back(response),
                None => rules.push((needle.to_string(), VecDeque::from([response]))),
            }
        }
        self
    }

    pub fn stdout(self, needle: &str, text: &str) -> Self {
        self.on(needle, Scripted::Stdout(text.to_string()))
    }

    /// Rendered command lines, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(c, _)| c.clone()).collect()
    }

    /// Timeouts passed to calls whose command line contains `needle`
    pub fn timeouts_for(&self, needle: &str) -> Vec<Duration> {
        self.calls
            .lock()
            .iter()
            .filter(|(c, _)| c.contains(needle))
            .map(|(_, t)| *t)
            .collect()
    }

    fn next_response(&self, command: &str) -> Option<Scripted> {
        let mut rules = self.rules.lock();
        let (_, queue) = rules.iter_mut().find(|(n, _)| command.contains(n.as_str()))?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec, timeout: Duration) -> Result<CommandOutput, CommandError> {
        let command = spec.to_string();
        self.calls.lock().push((command.clone(), timeout));

        match self.next_response(&command) {
            Some(Scripted::Stdout(stdout)) => Ok(CommandOutput {
                status: Some(0),
                stdout,
                stderr: String::new(),
            }),
            Some(Scripted::NotFound) => Err(CommandError::NotFound {
                program: spec.program.clone(),
            }),
            Some(Scripted::Timeout) => Err(CommandError::Timeout { command, timeout }),
            None => Ok(CommandOutput {
                status: Some(1),
                ..Default::default()
            }),
        }
    }
}

/// Answers requests by `(protocol, host, port)`; anything else is refused
#[derive(Default)]
pub struct ScriptedTransport {
    routes: HashMap<(Protocol, String, u16), HttpResponse>,
    hangs: HashSet<(Protocol, String, u16)>,
    calls: Mutex<Vec<String>>,
    tokens: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond on loopback
    pub fn respond(self, protocol: Protocol, port: u16, status: u16, body: &str) -> Self {
        self.respond_on(protocol, "127.0.0.1", port, status, body)
    }

    pub fn respond_on(
        mut self,
        protocol: Protocol,
        host: &str,
        port: u16,
        status: u16,
        body: &str,
    ) -> Self {
        self.routes.insert(
            (protocol, host.to_string(), port),
            HttpResponse {
                status,
                body: body.to_string(),
            },
        );
        self
    }

    /// Never answer on loopback `port` over `protocol`
    pub fn hang(mut self, protocol: Protocol, port: u16) -> Self {
        self.hangs.insert((protocol, "127.0.0.1".to_string(), port));
        self
    }

    /// Requested URLs, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// CSRF tokens sent, in call order
    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().clone()
    }
}

fn route_of(url: &str) -> Option<(Protocol, String, u16)> {
    let (protocol, rest) = if let Some(rest) = url.strip_prefix("https://") {
        (Protocol::Https, rest)
    } else {
        (Protocol::Http, url.strip_prefix("http://")?)
    };
    let host_port = rest.split('/').next()?;
    let (host, port) = host_port.rsplit_once(':')?;
    Some((protocol, host.to_string(), port.parse().ok()?))
}

impl HttpTransport for ScriptedTransport {
    async fn post(&self, request: &HttpRequest) -> Result<HttpResponse, ProtocolError> {
        self.calls.lock().push(request.url.clone());
        if let Some((_, token)) = request
            .headers
            .iter()
            .find(|(name, _)| name == crate::protocol::CSRF_HEADER)
        {
            self.tokens.lock().push(token.clone());
        }

        let route = route_of(&request.url);
        if route.as_ref().is_some_and(|r| self.hangs.contains(r)) {
            std::future::pending::<()>().await;
        }
        route
            .and_then(|route| self.routes.get(&route).cloned())
            .ok_or_else(|| ProtocolError::Transport {
                url: request.url.clone(),
                message: "connection refused".to_string(),
            })
    }
}
