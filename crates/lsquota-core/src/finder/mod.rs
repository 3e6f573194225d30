//! Language server discovery.
//!
//! A discovery cycle enumerates candidate processes, ranks them by how
//! strongly they are tied to us (workspace identifier, parent/child
//! relation), and verifies them one at a time until a port accepts the
//! candidate's CSRF token. [`ProcessFinder::detect`] repeats cycles with
//! exponential backoff and returns either a verified descriptor or one
//! categorized failure with diagnostics.

mod logger;
mod ranking;
mod report;
mod verify;

pub use logger::{DiscoveryLogger, NoopLogger, TracingLogger};
pub use ranking::{ProcessIdentity, Stage, MAX_ANCESTRY_DEPTH};
pub use report::DiagnosticReport;

use std::collections::HashSet;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::platform::wsl::WslNetwork;
use crate::platform::Platform;
use crate::protocol::{HttpTransport, ProtocolClient, ProtocolError, ReqwestTransport, VERIFY_PATH};
use crate::retry::{retry, Backoff, RetryConfig};
use crate::runner::{
    CommandError, CommandRunner, CommandSpec, SystemRunner, COMMAND_TIMEOUT, WARMUP_TIMEOUT,
};
use crate::types::{
    token_prefix, ConnectionDescriptor, DiscoveryDiagnostics, FailureReason, ProcessCandidate,
};
use crate::workspace::{expected_ids, PathStyle};

/// Tunables for discovery
#[derive(Debug, Clone)]
pub struct FinderSettings {
    /// Discovery cycles before giving up
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Executable to look for; the platform default when `None`
    pub process_name: Option<String>,
    /// Command-line fragment for the keyword fallback listing
    pub keyword: String,
    /// Only accept candidates started for this IDE (`--app_data_dir`)
    pub app_data_dir: Option<String>,
    /// Primary host to probe
    pub host: String,
    pub verify_path: String,
    pub command_timeout: Duration,
    pub warmup_timeout: Duration,
    /// Pause before re-running a process query that hit a cold start
    pub warmup_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for FinderSettings {
    fn default() -> Self {
        Self {
            attempts: 5,
            base_delay: Duration::from_millis(1500),
            max_delay: Duration::from_secs(10),
            process_name: None,
            keyword: "language_server".to_string(),
            app_data_dir: Some("antigravity".to_string()),
            host: "127.0.0.1".to_string(),
            verify_path: VERIFY_PATH.to_string(),
            command_timeout: COMMAND_TIMEOUT,
            warmup_timeout: WARMUP_TIMEOUT,
            warmup_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Per-call inputs to [`ProcessFinder::detect`]
#[derive(Debug, Clone)]
pub struct DetectOptions {
    /// Open workspace roots of the caller
    pub workspace_roots: Vec<PathBuf>,
    pub path_style: PathStyle,
}

impl DetectOptions {
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            workspace_roots: roots.into_iter().map(Into::into).collect(),
            path_style: PathStyle::current(),
        }
    }
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self::new(Vec::<PathBuf>::new())
    }
}

/// Successful discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub descriptor: ConnectionDescriptor,
    pub diagnostics: DiscoveryDiagnostics,
}

/// Failed discovery: one reason, the diagnostics of the last cycle, and the
/// diagnostic pass run after the last retry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectFailure {
    pub reason: FailureReason,
    pub diagnostics: DiscoveryDiagnostics,
    pub report: Option<DiagnosticReport>,
}

pub type DetectOutcome = Result<Detection, DetectFailure>;

/// State of one discovery cycle
#[derive(Debug, Default)]
pub(crate) struct CycleState {
    pub diagnostics: DiscoveryDiagnostics,
    /// PIDs already verified this cycle
    pub tried: HashSet<u32>,
}

impl CycleState {
    fn fail(mut self, reason: FailureReason) -> DetectFailure {
        self.diagnostics.reason = Some(reason);
        DetectFailure {
            reason,
            diagnostics: self.diagnostics,
            report: None,
        }
    }
}

/// Finds and verifies the language server.
///
/// Not meant to run two `detect` calls at once on the same instance.
pub struct ProcessFinder<R, T> {
    runner: R,
    platform: Arc<Platform>,
    client: ProtocolClient<T>,
    logger: Arc<dyn DiscoveryLogger>,
    identity: ProcessIdentity,
    own_ppid: OnceCell<Option<u32>>,
    network: OnceCell<WslNetwork>,
    settings: FinderSettings,
}

impl ProcessFinder<SystemRunner, ReqwestTransport> {
    /// Finder for the host OS using real subprocesses and HTTP
    pub fn system(settings: FinderSettings) -> Result<Self, ProtocolError> {
        Ok(Self::new(
            SystemRunner,
            Platform::current(),
            ProtocolClient::system()?,
            settings,
        ))
    }
}

impl<R: CommandRunner, T: HttpTransport> ProcessFinder<R, T> {
    pub fn new(
        runner: R,
        platform: Arc<Platform>,
        client: ProtocolClient<T>,
        settings: FinderSettings,
    ) -> Self {
        Self {
            runner,
            platform,
            client,
            logger: Arc::new(NoopLogger),
            identity: ProcessIdentity::current(),
            own_ppid: OnceCell::new(),
            network: OnceCell::new(),
            settings,
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn DiscoveryLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Pretend to be another process when ranking parent/child relations
    pub fn with_identity(mut self, identity: ProcessIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Skip WSL detection
    pub fn with_network(mut self, network: WslNetwork) -> Self {
        self.network = OnceCell::from(network);
        self
    }

    pub fn settings(&self) -> &FinderSettings {
        &self.settings
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Executable name discovery looks for
    pub fn process_name(&self) -> &str {
        self.settings
            .process_name
            .as_deref()
            .unwrap_or_else(|| self.platform.default_process_name())
    }

    /// Discover the language server, retrying with exponential backoff.
    ///
    /// After the last failed cycle a diagnostic pass is attached to the
    /// failure. Subprocess and network errors never escape; they become
    /// [`FailureReason::NoProcess`] or [`FailureReason::NoPort`].
    pub async fn detect(&self, options: &DetectOptions) -> DetectOutcome {
        let expected = expected_ids(&options.workspace_roots, options.path_style);
        self.logger.debug(&format!(
            "Looking for {} (workspace ids: {:?})",
            self.process_name(),
            expected
        ));

        // Cold-start warm-up is allowed once per detect call
        let warmed_up = AtomicBool::new(false);
        let last_failure: Mutex<Option<DetectFailure>> = Mutex::new(None);
        let retries = Arc::new(AtomicU32::new(0));

        let config: RetryConfig<Detection, Infallible> = {
            let retries = retries.clone();
            let logger = self.logger.clone();
            RetryConfig::new(self.settings.attempts)
                .with_delays(self.settings.base_delay, self.settings.max_delay)
                .with_backoff(Backoff::Exponential)
                .with_on_retry(move |attempt, delay| {
                    retries.fetch_add(1, Ordering::Relaxed);
                    logger.info(&format!(
                        "Discovery attempt {} failed, retrying in {}ms",
                        attempt,
                        delay.as_millis()
                    ));
                })
        };

        let outcome = {
            let expected = &expected;
            let warmed_up = &warmed_up;
            let last_failure = &last_failure;
            retry(
                || async move {
                    match self.try_detect(expected, warmed_up).await {
                        Ok(detection) => Ok(Some(detection)),
                        Err(failure) => {
                            *last_failure.lock() = Some(failure);
                            Ok(None)
                        }
                    }
                },
                &config,
            )
            .await
        };
        let detection = match outcome {
            Ok(detection) => detection,
            Err(never) => match never {},
        };
        let retry_count = retries.load(Ordering::Relaxed);

        if let Some(mut detection) = detection {
            detection.diagnostics.retry_count = retry_count;
            return Ok(detection);
        }

        let mut failure = last_failure.into_inner().unwrap_or_else(|| {
            CycleState::default().fail(FailureReason::NoProcess)
        });
        failure.diagnostics.retry_count = retry_count;
        self.logger.warn(&format!(
            "Discovery failed after {} attempts: {}",
            retry_count + 1,
            failure.reason
        ));
        failure.report = Some(
            DiagnosticReport::collect(&self.runner, &self.platform, &self.settings.keyword).await,
        );
        Err(failure)
    }

    /// One discovery cycle
    async fn try_detect(
        &self,
        expected: &[String],
        warmed_up: &AtomicBool,
    ) -> Result<Detection, DetectFailure> {
        let mut state = CycleState::default();

        let candidates = self.enumerate(warmed_up).await;
        state.diagnostics.candidate_count = candidates.len();
        state.diagnostics.token_prefix = candidates.first().map(|c| token_prefix(&c.csrf_token));
        if candidates.is_empty() {
            self.logger.info("No language server process found");
            return Err(state.fail(FailureReason::NoProcess));
        }
        self.logger
            .debug(&format!("{} candidate(s) found", candidates.len()));

        let me = self.identity().await;
        for stage in Stage::ALL {
            let picks = match stage {
                Stage::Ancestry => {
                    self.ancestry_matches(&candidates, expected, &me, &state.tried)
                        .await
                }
                _ => ranking::select(stage, &candidates, expected, &me, &state.tried),
            };

            for index in picks {
                let candidate = &candidates[index];
                if !state.tried.insert(candidate.pid) {
                    continue;
                }
                self.logger.debug(&format!(
                    "Verifying pid {} ({} match)",
                    candidate.pid,
                    stage.label()
                ));
                if let Some(descriptor) = self.verify_and_connect(candidate, &mut state).await {
                    self.logger.info(&format!(
                        "Connected to pid {} on port {} ({} match)",
                        candidate.pid,
                        descriptor.port(),
                        stage.label()
                    ));
                    return Ok(Detection {
                        descriptor,
                        diagnostics: state.diagnostics,
                    });
                }
            }
        }

        let skipped = ranking::mismatched(&candidates, expected, &state.tried);
        let reason = if state.tried.is_empty() && !skipped.is_empty() {
            FailureReason::WorkspaceMismatch
        } else if state
            .diagnostics
            .attempts
            .iter()
            .any(|a| matches!(a.status_code, Some(401 | 403)))
        {
            FailureReason::AuthFailed
        } else {
            FailureReason::NoPort
        };
        self.logger.info(&format!(
            "No candidate verified ({}, {} skipped for workspace mismatch)",
            reason,
            skipped.len()
        ));
        Err(state.fail(reason))
    }

    /// Candidates to consider, after the fallback chain of listings
    async fn enumerate(&self, warmed_up: &AtomicBool) -> Vec<ProcessCandidate> {
        let strategy = self.platform.strategy();
        let target = self.process_name();
        let keyword = self.settings.keyword.as_str();

        let mut found = match self.platform.list_processes_command(target) {
            Ok(spec) => self
                .run_listing(&spec, warmed_up)
                .await
                .and_then(|out| strategy.parse_processes(&out, target)),
            Err(e) => {
                self.logger.error(&e.to_string());
                None
            }
        };

        if found.is_none() {
            self.logger
                .debug("Name-based listing found nothing, trying keyword listing");
            found = match self.platform.list_processes_by_keyword_command(keyword) {
                Ok(Some(spec)) => self
                    .run_listing(&spec, warmed_up)
                    .await
                    .and_then(|out| strategy.parse_processes(&out, keyword)),
                Ok(None) => None,
                Err(e) => {
                    self.logger.error(&e.to_string());
                    None
                }
            };
        }

        if found.is_none() {
            found = match self.platform.secondary_list_command(target) {
                Ok(Some(spec)) => {
                    self.logger
                        .debug(&format!("Keyword listing found nothing, trying {}", spec.program));
                    self.run_listing(&spec, warmed_up)
                        .await
                        .and_then(|out| strategy.parse_secondary_processes(&out, target))
                }
                Ok(None) => None,
                Err(e) => {
                    self.logger.error(&e.to_string());
                    None
                }
            };
        }

        let mut candidates = found.unwrap_or_default();
        candidates.retain(|c| c.pid != self.identity.pid);
        if let Some(wanted) = &self.settings.app_data_dir {
            candidates.retain(|c| match &c.app_data_dir {
                Some(dir) if dir != wanted => {
                    self.logger.debug(&format!(
                        "Ignoring pid {}: app data dir {} is not {}",
                        c.pid, dir, wanted
                    ));
                    false
                }
                _ => true,
            });
        }
        candidates
    }

    /// Run a process listing. The first timeout of a cycle on platforms with
    /// a cold-start penalty is retried once with the longer timeout.
    async fn run_listing(&self, spec: &CommandSpec, warmed_up: &AtomicBool) -> Option<String> {
        match self.runner.run(spec, self.settings.command_timeout).await {
            Ok(output) => Some(output.stdout),
            Err(CommandError::Timeout { .. })
                if self.platform.strategy().has_cold_start()
                    && !warmed_up.swap(true, Ordering::Relaxed) =>
            {
                self.logger.info(&format!(
                    "Process query timed out, retrying once after {}ms warm-up",
                    self.settings.warmup_delay.as_millis()
                ));
                tokio::time::sleep(self.settings.warmup_delay).await;
                match self.runner.run(spec, self.settings.warmup_timeout).await {
                    Ok(output) => Some(output.stdout),
                    Err(e) => {
                        self.logger.warn(&format!("Process query failed after warm-up: {}", e));
                        None
                    }
                }
            }
            Err(e) => {
                self.logger.debug(&format!("{} failed: {}", spec.program, e));
                None
            }
        }
    }

    /// Candidates with our PID within [`MAX_ANCESTRY_DEPTH`] parents
    async fn ancestry_matches(
        &self,
        candidates: &[ProcessCandidate],
        expected: &[String],
        me: &ProcessIdentity,
        tried: &HashSet<u32>,
    ) -> Vec<usize> {
        let mut matches = Vec::new();
        for index in ranking::select(Stage::Ancestry, candidates, expected, me, tried) {
            let candidate = &candidates[index];
            let mut current = match candidate.ppid {
                Some(ppid) => Some(ppid),
                None => self.parent_of(candidate.pid).await,
            };
            for _ in 0..MAX_ANCESTRY_DEPTH {
                let Some(pid) = current.filter(|p| ranking::is_walkable(*p)) else {
                    break;
                };
                if pid == me.pid {
                    matches.push(index);
                    break;
                }
                current = self.parent_of(pid).await;
            }
        }
        matches
    }

    async fn parent_of(&self, pid: u32) -> Option<u32> {
        let strategy = self.platform.strategy();
        let spec = strategy.parent_pid_command(pid);
        match self.runner.run(&spec, self.settings.command_timeout).await {
            Ok(output) => strategy.parse_parent_pid(&output.stdout),
            Err(e) => {
                self.logger
                    .debug(&format!("Parent lookup for pid {} failed: {}", pid, e));
                None
            }
        }
    }

    async fn identity(&self) -> ProcessIdentity {
        if self.identity.ppid.is_some() {
            return self.identity;
        }
        let ppid = *self
            .own_ppid
            .get_or_init(|| self.parent_of(self.identity.pid))
            .await;
        ProcessIdentity {
            pid: self.identity.pid,
            ppid,
        }
    }

    async fn network(&self) -> &WslNetwork {
        self.network
            .get_or_init(|| WslNetwork::detect(&self.runner))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::logger::recording::RecordingLogger;
    use super::*;
    use crate::platform::PortTool;
    use crate::protocol::{Protocol, ProtocolCache};
    use crate::testing::{Scripted, ScriptedRunner, ScriptedTransport};
    use crate::types::PortSource;
    use pretty_assertions::assert_eq;

    const NAME: &str = "language_server_linux_x64";
    const ME: ProcessIdentity = ProcessIdentity {
        pid: 500,
        ppid: Some(400),
    };

    fn settings(attempts: u32) -> FinderSettings {
        FinderSettings {
            attempts,
            process_name: Some(NAME.to_string()),
            ..Default::default()
        }
    }

    fn finder(
        runner: ScriptedRunner,
        transport: ScriptedTransport,
        platform: Platform,
        attempts: u32,
    ) -> ProcessFinder<ScriptedRunner, ScriptedTransport> {
        let client = ProtocolClient::with_cache(transport, Arc::new(ProtocolCache::default()));
        ProcessFinder::new(runner, Arc::new(platform), client, settings(attempts))
            .with_identity(ME)
            .with_network(WslNetwork::Native)
    }

    fn ps_row(pid: u32, ppid: u32, flags: &str) -> String {
        format!(" {} {} /opt/ide/bin/{} {}\n", pid, ppid, NAME, flags)
    }

    fn unix_options() -> DetectOptions {
        DetectOptions {
            workspace_roots: vec![PathBuf::from("/home/me/proj")],
            path_style: PathStyle::Unix,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_picks_first_accepting_port() {
        let runner = ScriptedRunner::new()
            .stdout("ps -ww", &ps_row(101, 400, "--csrf_token=t1"))
            .stdout(
                "lsof",
                "language_ 101 me 12u IPv4 0x1 0t0 TCP 127.0.0.1:58001 (LISTEN)\n\
                 language_ 101 me 13u IPv4 0x2 0t0 TCP 127.0.0.1:58002 (LISTEN)\n",
            );
        let transport = ScriptedTransport::new()
            .respond(Protocol::Https, 58001, 404, "")
            .respond(Protocol::Https, 58002, 200, "{}");

        let detection = finder(runner, transport, Platform::linux(), 5)
            .detect(&DetectOptions::default())
            .await
            .unwrap();

        assert_eq!(detection.descriptor, ConnectionDescriptor::new(58002, "t1").unwrap());
        let d = &detection.diagnostics;
        assert_eq!(d.attempts.len(), 2);
        assert_eq!(d.attempts[0].status_code, Some(404));
        assert_eq!(d.attempts[1].status_code, Some(200));
        assert_eq!(d.attempts[1].port_source, PortSource::Netstat);
        assert_eq!(d.netstat_port_count, 2);
        assert_eq!(d.cmdline_port_count, 0);
        assert_eq!(d.protocol, Some(Protocol::Https));
        assert_eq!(d.token_prefix.as_deref(), Some("t1"));
        assert_eq!(d.retry_count, 0);
        assert_eq!(d.reason, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_workspace_match_beats_direct_child() {
        let ps = [
            ps_row(301, 900, "--csrf_token=unrelated --extension_server_port=58301"),
            ps_row(302, 500, "--csrf_token=child --extension_server_port=58302"),
            ps_row(
                303,
                900,
                "--csrf_token=mine --extension_server_port=58303 --workspace_id=file_home_me_proj",
            ),
        ]
        .concat();
        let runner = ScriptedRunner::new().stdout("ps -ww", &ps);
        let transport = ScriptedTransport::new()
            .respond(Protocol::Https, 58301, 200, "{}")
            .respond(Protocol::Https, 58302, 200, "{}")
            .respond(Protocol::Https, 58303, 200, "{}");

        let detection = finder(runner, transport, Platform::linux(), 1)
            .detect(&unix_options())
            .await
            .unwrap();

        assert_eq!(detection.descriptor.csrf_token(), "mine");
        assert_eq!(detection.diagnostics.attempts.len(), 1);
        assert_eq!(detection.diagnostics.attempts[0].port_source, PortSource::Cmdline);
        assert_eq!(detection.diagnostics.cmdline_port_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_child_then_sibling_before_others() {
        let ps = [
            ps_row(301, 900, "--csrf_token=unrelated --extension_server_port=58301"),
            ps_row(302, 400, "--csrf_token=sibling --extension_server_port=58302"),
        ]
        .concat();
        let runner = ScriptedRunner::new().stdout("ps -ww", &ps);
        let transport = ScriptedTransport::new()
            .respond(Protocol::Https, 58301, 200, "{}")
            .respond(Protocol::Https, 58302, 200, "{}");

        let detection = finder(runner, transport, Platform::linux(), 1)
            .detect(&DetectOptions::default())
            .await
            .unwrap();
        assert_eq!(detection.descriptor.csrf_token(), "sibling");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ancestry_walk_finds_grandchild() {
        let ps = [
            ps_row(301, 900, "--csrf_token=unrelated --extension_server_port=58301"),
            ps_row(302, 777, "--csrf_token=grandchild --extension_server_port=58302"),
        ]
        .concat();
        let runner = ScriptedRunner::new()
            .stdout("ps -ww", &ps)
            .stdout("ppid= -p 777", "500\n")
            .stdout("ppid= -p 900", "1\n");
        let transport = ScriptedTransport::new()
            .respond(Protocol::Https, 58301, 200, "{}")
            .respond(Protocol::Https, 58302, 200, "{}");

        let detection = finder(runner, transport, Platform::linux(), 1)
            .detect(&DetectOptions::default())
            .await
            .unwrap();
        assert_eq!(detection.descriptor.csrf_token(), "grandchild");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ancestry_walk_skips_other_workspace() {
        let runner = ScriptedRunner::new()
            .stdout(
                "ps -ww",
                &ps_row(
                    302,
                    777,
                    "--csrf_token=t2 --extension_server_port=58302 --workspace_id=file_home_me_other",
                ),
            )
            .stdout("ppid= -p 777", "500\n");
        let transport = ScriptedTransport::new().respond(Protocol::Https, 58302, 200, "{}");
        let finder = finder(runner, transport, Platform::linux(), 1);

        let failure = finder.detect(&unix_options()).await.unwrap_err();

        assert_eq!(failure.reason, FailureReason::WorkspaceMismatch);
        assert!(failure.diagnostics.attempts.is_empty());
        assert!(finder.client.transport().calls().is_empty());
        assert!(!finder.runner.calls().iter().any(|c| c.contains("ppid= -p 777")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_secondary_listing_candidate_is_verified() {
        let runner = ScriptedRunner::new()
            .stdout("ps -ww", "  PID  PPID ARGS\n 1 0 /sbin/init\n")
            .stdout(
                "pgrep",
                &format!("101 /opt/ide/bin/{} --csrf_token=t9 --extension_server_port=58009\n", NAME),
            );
        let transport = ScriptedTransport::new().respond(Protocol::Https, 58009, 200, "{}");
        let finder = finder(runner, transport, Platform::linux(), 1);

        let detection = finder.detect(&DetectOptions::default()).await.unwrap();

        assert_eq!(detection.descriptor, ConnectionDescriptor::new(58009, "t9").unwrap());
        assert_eq!(detection.diagnostics.candidate_count, 1);
        assert_eq!(detection.diagnostics.attempts[0].port_source, PortSource::Cmdline);
        let calls = finder.runner.calls();
        assert_eq!(calls.iter().filter(|c| c.starts_with("ps -ww")).count(), 2);
        assert_eq!(calls.iter().filter(|c| c.starts_with("pgrep -af")).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_404_is_no_port() {
        let runner = ScriptedRunner::new().stdout(
            "ps -ww",
            &ps_row(101, 900, "--csrf_token=t1 --extension_server_port=58001"),
        );
        let transport = ScriptedTransport::new().respond(Protocol::Https, 58001, 404, "");

        let failure = finder(runner, transport, Platform::linux(), 1)
            .detect(&DetectOptions::default())
            .await
            .unwrap_err();
        assert_eq!(failure.reason, FailureReason::NoPort);
        assert_eq!(failure.diagnostics.reason, Some(FailureReason::NoPort));
        assert_eq!(failure.diagnostics.candidate_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_403_is_auth_failed() {
        let ps = [
            ps_row(101, 900, "--csrf_token=t1 --extension_server_port=58001"),
            ps_row(102, 900, "--csrf_token=t2 --extension_server_port=58002"),
        ]
        .concat();
        let runner = ScriptedRunner::new().stdout("ps -ww", &ps);
        let transport = ScriptedTransport::new()
            .respond(Protocol::Https, 58001, 403, "")
            .respond(Protocol::Https, 58002, 404, "");

        let failure = finder(runner, transport, Platform::linux(), 1)
            .detect(&DetectOptions::default())
            .await
            .unwrap_err();
        assert_eq!(failure.reason, FailureReason::AuthFailed);
        assert_eq!(failure.diagnostics.attempts.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_candidates_is_no_process_after_all_retries() {
        let logger = Arc::new(RecordingLogger::default());
        let runner = ScriptedRunner::new().stdout("ps -ww", "  PID  PPID ARGS\n 1 0 /sbin/init\n");
        let finder = finder(runner, ScriptedTransport::new(), Platform::linux(), 3)
            .with_logger(logger.clone());

        let failure = finder.detect(&DetectOptions::default()).await.unwrap_err();

        assert_eq!(failure.reason, FailureReason::NoProcess);
        assert_eq!(failure.diagnostics.candidate_count, 0);
        assert_eq!(failure.diagnostics.retry_count, 2);
        assert!(failure.report.is_some());
        assert!(logger.contains("info", "retrying in 1500ms"));
        assert!(logger.contains("info", "retrying in 3000ms"));
        // Name listing, keyword listing and pgrep on each of the 3 cycles
        let calls = finder.runner.calls();
        assert_eq!(calls.iter().filter(|c| c.starts_with("pgrep")).count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_workspace_is_workspace_mismatch() {
        let runner = ScriptedRunner::new().stdout(
            "ps -ww",
            &ps_row(
                101,
                900,
                "--csrf_token=t1 --extension_server_port=58001 --workspace_id=file_home_me_other",
            ),
        );
        let transport = ScriptedTransport::new().respond(Protocol::Https, 58001, 200, "{}");
        let finder = finder(runner, transport, Platform::linux(), 1);

        let failure = finder.detect(&unix_options()).await.unwrap_err();
        assert_eq!(failure.reason, FailureReason::WorkspaceMismatch);
        assert!(failure.diagnostics.attempts.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loose_workspace_match_is_tried() {
        let runner = ScriptedRunner::new().stdout(
            "ps -ww",
            &ps_row(
                101,
                900,
                "--csrf_token=t1 --extension_server_port=58001 --workspace_id=file_home_me-proj",
            ),
        );
        let transport = ScriptedTransport::new().respond(Protocol::Https, 58001, 200, "{}");

        let detection = finder(runner, transport, Platform::linux(), 1)
            .detect(&unix_options())
            .await
            .unwrap();
        assert_eq!(detection.descriptor.port(), 58001);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_ide_is_ignored() {
        let runner = ScriptedRunner::new().stdout(
            "ps -ww",
            &ps_row(
                101,
                900,
                "--csrf_token=t1 --extension_server_port=58001 --app_data_dir windsurf",
            ),
        );
        let transport = ScriptedTransport::new().respond(Protocol::Https, 58001, 200, "{}");

        let failure = finder(runner, transport, Platform::linux(), 1)
            .detect(&DetectOptions::default())
            .await
            .unwrap_err();
        assert_eq!(failure.reason, FailureReason::NoProcess);
    }

    #[tokio::test(start_paused = true)]
    async fn test_http_fallback_is_recorded() {
        let runner = ScriptedRunner::new().stdout(
            "ps -ww",
            &ps_row(101, 900, "--csrf_token=t1 --extension_server_port=58001"),
        );
        let transport = ScriptedTransport::new().respond(Protocol::Http, 58001, 200, "{}");

        let detection = finder(runner, transport, Platform::linux(), 1)
            .detect(&DetectOptions::default())
            .await
            .unwrap();
        assert_eq!(detection.diagnostics.protocol, Some(Protocol::Http));
        assert_eq!(detection.diagnostics.attempts.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_lsof_falls_back_to_ss() {
        let runner = ScriptedRunner::new()
            .stdout("ps -ww", &ps_row(101, 900, "--csrf_token=t1"))
            .on("lsof", Scripted::NotFound)
            .stdout(
                "ss -tlnp",
                "LISTEN 0 4096 127.0.0.1:58005 0.0.0.0:* users:((\"language_server\",pid=101,fd=9))\n",
            );
        let transport = ScriptedTransport::new().respond(Protocol::Https, 58005, 200, "{}");
        let finder = finder(runner, transport, Platform::linux(), 1);

        let detection = finder.detect(&DetectOptions::default()).await.unwrap();
        assert_eq!(detection.descriptor.port(), 58005);
        match finder.platform() {
            Platform::Unix(s) => assert_eq!(s.port_tool(), PortTool::Ss),
            Platform::Windows(_) => unreachable!(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wsl_nat_probes_gateway_after_loopback() {
        let runner = ScriptedRunner::new().stdout(
            "ps -ww",
            &ps_row(101, 900, "--csrf_token=t1 --extension_server_port=58001"),
        );
        let transport =
            ScriptedTransport::new().respond_on(Protocol::Http, "172.29.80.1", 58001, 200, "{}");
        let finder = finder(runner, transport, Platform::linux(), 1).with_network(WslNetwork::Nat {
            host_ip: Some("172.29.80.1".parse().unwrap()),
        });

        let detection = finder.detect(&DetectOptions::default()).await.unwrap();
        let hosts: Vec<&str> = detection
            .diagnostics
            .attempts
            .iter()
            .map(|a| a.host.as_str())
            .collect();
        assert_eq!(hosts, vec!["127.0.0.1", "172.29.80.1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_windows_cold_start_retries_once_with_longer_timeout() {
        let cim = r#"[{"ProcessId":101,"ParentProcessId":900,"CommandLine":"language_server_windows_x64.exe --csrf_token=t1 --extension_server_port=58001"}]"#;
        let runner = ScriptedRunner::new()
            .on("Filter 'Name=", Scripted::Timeout)
            .stdout("Filter 'Name=", cim);
        let transport = ScriptedTransport::new().respond(Protocol::Https, 58001, 200, "{}");
        let client = ProtocolClient::with_cache(transport, Arc::new(ProtocolCache::default()));
        let finder = ProcessFinder::new(
            runner,
            Arc::new(Platform::windows()),
            client,
            FinderSettings {
                attempts: 1,
                ..Default::default()
            },
        )
        .with_identity(ME)
        .with_network(WslNetwork::Native);

        let detection = finder.detect(&DetectOptions::default()).await.unwrap();

        assert_eq!(detection.descriptor.port(), 58001);
        assert_eq!(detection.diagnostics.retry_count, 0);
        assert_eq!(
            finder.runner.timeouts_for("Filter 'Name="),
            vec![COMMAND_TIMEOUT, WARMUP_TIMEOUT]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cold_start_warmup_is_not_granted_twice_per_detect() {
        let runner = ScriptedRunner::new().on("Filter 'Name=", Scripted::Timeout);
        let client = ProtocolClient::with_cache(
            ScriptedTransport::new(),
            Arc::new(ProtocolCache::default()),
        );
        let finder = ProcessFinder::new(
            runner,
            Arc::new(Platform::windows()),
            client,
            FinderSettings {
                attempts: 2,
                ..Default::default()
            },
        )
        .with_identity(ME)
        .with_network(WslNetwork::Native);

        let failure = finder.detect(&DetectOptions::default()).await.unwrap_err();
        assert_eq!(failure.reason, FailureReason::NoProcess);
        // 2 cycles, one warm-up retry in the first only
        assert_eq!(
            finder.runner.timeouts_for("Filter 'Name="),
            vec![COMMAND_TIMEOUT, WARMUP_TIMEOUT, COMMAND_TIMEOUT]
        );
    }
}
