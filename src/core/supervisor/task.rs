// ─── Supervise Task ───
// Start, readiness, supervision and stop of one module's child process.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::core::error::{PanelError, PanelResult};
use crate::core::http::build_probe_client;
use crate::core::java::media::search_path;
use crate::core::java::RuntimeResolver;
use crate::core::platform::process::{
    force_kill_tree, hide_console, is_process_alive, terminate_gracefully, StopPolicy,
};
use crate::core::platform::{self, Platform};

use super::environment::{
    assemble_environment, library_path_var, prepend_search_path, JAVA_HOME_ENV,
    MEDIA_TOOLCHAIN_ENV,
};
use super::pidfile::{lock_file_path, PidFile};
use super::probe::{precheck_port, probe_url, wait_until_ready, ProbeOutcome, PROBE_INTERVAL, PROBE_REQUEST_TIMEOUT};
use super::startup_log::{StartupLogTail, TAIL_WINDOW};
use super::state::{ExitClassification, ModuleState, StateMachine, SupervisorEvent};

/// External runtime a module needs before it can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum RuntimeRequirement {
    None,
    Jvm { min_major: u32 },
    MediaToolchain,
}

/// How the module's executable is started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ExecutableKind {
    Native,
    /// Run with `java -jar`.
    Jar,
    /// Run by an interpreter looked up on PATH.
    Script { interpreter: String },
}

/// One start request, already resolved against the module and version.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub version_dir: PathBuf,
    /// Relative to `version_dir`.
    pub executable: String,
    pub kind: ExecutableKind,
    pub runtime: RuntimeRequirement,
    pub args: Vec<String>,
    pub port: u16,
    /// Module-specific variables added before `env.properties`.
    pub selectors: Vec<(String, String)>,
    /// `env.properties` pairs in file order.
    pub properties: Vec<(String, String)>,
    pub readiness_timeout: Duration,
    /// Structured startup log, relative to `version_dir`.
    pub startup_log: Option<String>,
    pub ready_marker: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedModule {
    pub pid: u32,
    pub url: String,
    pub log_path: PathBuf,
}

#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    pub stop_policy: StopPolicy,
    pub probe_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            stop_policy: StopPolicy::default(),
            probe_interval: PROBE_INTERVAL,
        }
    }
}

struct PreparedLaunch {
    command: Command,
    log_path: PathBuf,
}

struct RunningChild {
    pid: u32,
    /// Set by `stop`; the observer reads it to classify the exit.
    stop: CancellationToken,
    /// Fired once the exit is observed and cleaned up.
    exited: CancellationToken,
}

enum StartupOutcome {
    Ready,
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    StopRequested,
    Cancelled,
}

struct Inner {
    module: String,
    install_root: PathBuf,
    machine: Mutex<StateMachine>,
    running: Mutex<Option<RunningChild>>,
    events: mpsc::UnboundedSender<SupervisorEvent>,
    probe_client: Client,
    config: SupervisorConfig,
    tail: StartupLogTail,
}

/// Supervisor for one module in this panel instance.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(
        module: impl Into<String>,
        install_root: impl Into<PathBuf>,
        events: mpsc::UnboundedSender<SupervisorEvent>,
    ) -> PanelResult<Self> {
        Self::with_config(module, install_root, events, SupervisorConfig::default())
    }

    pub fn with_config(
        module: impl Into<String>,
        install_root: impl Into<PathBuf>,
        events: mpsc::UnboundedSender<SupervisorEvent>,
        config: SupervisorConfig,
    ) -> PanelResult<Self> {
        Ok(Self {
            inner: Arc::new(Inner {
                module: module.into(),
                install_root: install_root.into(),
                machine: Mutex::new(StateMachine::default()),
                running: Mutex::new(None),
                events,
                probe_client: build_probe_client(PROBE_REQUEST_TIMEOUT)?,
                config,
                tail: StartupLogTail::new(),
            }),
        })
    }

    pub fn module(&self) -> &str {
        &self.inner.module
    }

    pub fn pid_file(&self) -> PidFile {
        PidFile::for_module(&self.inner.install_root, &self.inner.module)
    }

    pub async fn state(&self) -> ModuleState {
        self.inner.machine.lock().await.state()
    }

    pub async fn pid(&self) -> Option<u32> {
        self.inner.machine.lock().await.pid()
    }

    fn emit(&self, event: SupervisorEvent) {
        // Nobody listening is fine.
        let _ = self.inner.events.send(event);
    }

    async fn transition(&self, next: ModuleState) -> PanelResult<()> {
        let mut machine = self.inner.machine.lock().await;
        let from = machine.transition(next)?;
        self.emit(SupervisorEvent::StateChanged {
            module: self.inner.module.clone(),
            from,
            to: next,
        });
        Ok(())
    }

    /// Report a failed start and fall back to idle.
    async fn abort_start(&self, err: &PanelError) {
        warn!("Start of {} failed: {}", self.inner.module, err);
        self.emit(SupervisorEvent::StartupFailed {
            module: self.inner.module.clone(),
            kind: err.kind().to_string(),
            message: err.to_string(),
        });
        let current = self.state().await;
        let path: &[ModuleState] = match current {
            ModuleState::Starting => &[ModuleState::Failed, ModuleState::Idle],
            ModuleState::Stopping | ModuleState::Failed => &[ModuleState::Idle],
            _ => &[],
        };
        for next in path {
            if let Err(err) = self.transition(*next).await {
                error!("{}", err);
            }
        }
    }

    // ── Start ───────────────────────────────────────

    #[instrument(skip_all, fields(module = %self.inner.module, port = request.port))]
    pub async fn start(
        &self,
        request: LaunchRequest,
        runtimes: &dyn RuntimeResolver,
        cancel: &CancellationToken,
    ) -> PanelResult<StartedModule> {
        self.transition(ModuleState::Starting).await?;

        let prepared = match self.prepare(&request, runtimes, cancel).await {
            Ok(prepared) => prepared,
            Err(err) => {
                self.abort_start(&err).await;
                return Err(err);
            }
        };
        self.run(prepared, &request, cancel).await
    }

    /// Everything up to the spawn. Nothing here writes the PID file.
    async fn prepare(
        &self,
        request: &LaunchRequest,
        runtimes: &dyn RuntimeResolver,
        cancel: &CancellationToken,
    ) -> PanelResult<PreparedLaunch> {
        self.pid_file().claim()?;
        precheck_port(&self.inner.probe_client, request.port).await?;

        let mut env = assemble_environment(
            std::env::vars_os(),
            &self.inner.module,
            request.port,
            &request.selectors,
            &request.properties,
        );

        let java = match request.runtime {
            RuntimeRequirement::None => None,
            RuntimeRequirement::Jvm { min_major } => {
                let java = runtimes.jvm(min_major, cancel).await?;
                if let Some(home) = java.parent().and_then(Path::parent) {
                    env.insert(JAVA_HOME_ENV.into(), home.as_os_str().to_owned());
                }
                Some(java)
            }
            RuntimeRequirement::MediaToolchain => {
                let media = runtimes.media(cancel).await?;
                env.insert(MEDIA_TOOLCHAIN_ENV.into(), media.bin.as_os_str().to_owned());
                if let Some(lib_dir) = &media.lib_dir {
                    prepend_search_path(&mut env, library_path_var(), lib_dir);
                }
                None
            }
        };

        let executable = request.version_dir.join(&request.executable);
        if !executable.is_file() {
            return Err(PanelError::ArtifactMissing(executable));
        }
        let (program, mut args) = resolve_program(&request.kind, &executable, java)?;
        args.extend(request.args.iter().cloned());

        let logs_dir = request.version_dir.join("logs");
        platform::ensure_dir(&logs_dir)?;
        let log_path = logs_dir.join(format!("{}.log", self.inner.module));
        let log = std::fs::File::create(&log_path).map_err(|source| PanelError::io(&log_path, source))?;
        let log_err = log.try_clone().map_err(|source| PanelError::io(&log_path, source))?;
        if let Some(startup_log) = &request.startup_log {
            // The tail must not match a ready marker left by the previous run.
            let stale = request.version_dir.join(startup_log);
            match std::fs::remove_file(&stale) {
                Ok(()) => debug!("Removed previous startup log {:?}", stale),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(PanelError::io(&stale, source)),
            }
        }

        let mut command = Command::new(&program);
        command
            .args(&args)
            .current_dir(&request.version_dir)
            .env_clear()
            .envs(&env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));
        hide_console(&mut command);
        debug!("Command: {:?} {:?}", program, args);

        Ok(PreparedLaunch { command, log_path })
    }

    async fn run(
        &self,
        mut prepared: PreparedLaunch,
        request: &LaunchRequest,
        cancel: &CancellationToken,
    ) -> PanelResult<StartedModule> {
        let mut child = match prepared.command.spawn() {
            Ok(child) => child,
            Err(source) => {
                let err = PanelError::io(&request.version_dir.join(&request.executable), source);
                self.abort_start(&err).await;
                return Err(err);
            }
        };
        let Some(pid) = child.id() else {
            let err = PanelError::StartupFailed {
                status: "exited before its PID was read".into(),
            };
            self.abort_start(&err).await;
            return Err(err);
        };

        if let Err(err) = self.record(pid).await {
            let _ = child.start_kill();
            let _ = child.wait().await;
            self.abort_start(&err).await;
            return Err(err);
        }
        info!("Started {} (PID {})", self.inner.module, pid);

        let running = RunningChild {
            pid,
            stop: CancellationToken::new(),
            exited: CancellationToken::new(),
        };
        let stop = running.stop.clone();
        let exited = running.exited.clone();
        *self.inner.running.lock().await = Some(running);

        if let Some(startup_log) = &request.startup_log {
            let supervisor = self.clone();
            self.inner
                .tail
                .start(
                    request.version_dir.join(startup_log),
                    request.ready_marker.clone(),
                    TAIL_WINDOW,
                    Arc::new(move |text: String| {
                        supervisor.emit(SupervisorEvent::StartupLog {
                            module: supervisor.inner.module.clone(),
                            text,
                        })
                    }),
                )
                .await;
        }

        let outcome = tokio::select! {
            status = child.wait() => StartupOutcome::Exited(status),
            probe = wait_until_ready(
                &self.inner.probe_client,
                request.port,
                request.readiness_timeout,
                self.inner.config.probe_interval,
                &stop,
            ) => match probe {
                ProbeOutcome::Ready => StartupOutcome::Ready,
                ProbeOutcome::TimedOut => StartupOutcome::TimedOut,
                ProbeOutcome::Cancelled => StartupOutcome::StopRequested,
            },
            _ = cancel.cancelled() => StartupOutcome::Cancelled,
        };
        self.inner.tail.stop().await;

        match outcome {
            StartupOutcome::Ready => {
                if let Err(err) = self.transition(ModuleState::Ready).await {
                    self.kill_and_reap(&mut child, pid).await;
                    self.release(pid).await;
                    self.abort_start(&err).await;
                    exited.cancel();
                    return Err(err);
                }
                let url = probe_url(request.port);
                self.emit(SupervisorEvent::Ready {
                    module: self.inner.module.clone(),
                    pid,
                    url: url.clone(),
                    log_path: prepared.log_path.to_string_lossy().to_string(),
                });
                info!("{} ready at {}", self.inner.module, url);
                let supervisor = self.clone();
                tokio::spawn(async move { supervisor.supervise(child, pid, stop, exited).await });
                Ok(StartedModule {
                    pid,
                    url,
                    log_path: prepared.log_path,
                })
            }
            StartupOutcome::Exited(status) => {
                let status = describe_status(status);
                self.release(pid).await;
                let err = PanelError::StartupFailed { status };
                self.abort_start(&err).await;
                exited.cancel();
                Err(err)
            }
            StartupOutcome::TimedOut => {
                warn!("{} did not answer on port {} in time", self.inner.module, request.port);
                self.kill_and_reap(&mut child, pid).await;
                self.release(pid).await;
                let err = PanelError::StartupTimeout {
                    port: request.port,
                    seconds: request.readiness_timeout.as_secs(),
                };
                self.abort_start(&err).await;
                exited.cancel();
                Err(err)
            }
            StartupOutcome::StopRequested | StartupOutcome::Cancelled => {
                if matches!(outcome, StartupOutcome::Cancelled) {
                    stop.cancel();
                    if self.state().await == ModuleState::Starting {
                        if let Err(err) = self.transition(ModuleState::Stopping).await {
                            error!("{}", err);
                        }
                    }
                    self.kill_and_reap(&mut child, pid).await;
                } else {
                    // `stop` runs the ladder; we only reap.
                    let _ = child.wait().await;
                }
                self.release(pid).await;
                self.emit(SupervisorEvent::Exited {
                    module: self.inner.module.clone(),
                    classification: ExitClassification::StoppedByUser,
                });
                if let Err(err) = self.transition(ModuleState::Idle).await {
                    error!("{}", err);
                }
                exited.cancel();
                Err(PanelError::Cancelled)
            }
        }
    }

    async fn record(&self, pid: u32) -> PanelResult<()> {
        self.inner.machine.lock().await.record_pid(pid)?;
        self.pid_file().write(pid)
    }

    /// Ladder while reaping, so a dead child is not mistaken for a live one.
    async fn kill_and_reap(&self, child: &mut Child, pid: u32) {
        let (step, _) = tokio::join!(
            terminate_gracefully(pid, self.inner.config.stop_policy),
            child.wait()
        );
        match step {
            Ok(step) => debug!("Stopped PID {} via {:?}", pid, step),
            Err(err) => warn!("Stopping PID {} failed: {}", pid, err),
        }
    }

    /// Drop the PID file (if still ours) and the in-memory record.
    async fn release(&self, pid: u32) {
        if let Err(err) = self.pid_file().remove_if_owned(pid) {
            warn!("Could not remove PID file: {}", err);
        }
        let mut running = self.inner.running.lock().await;
        if running.as_ref().is_some_and(|child| child.pid == pid) {
            *running = None;
        }
    }

    async fn supervise(
        &self,
        mut child: Child,
        pid: u32,
        stop: CancellationToken,
        exited: CancellationToken,
    ) {
        let status = child.wait().await;
        let classification = match &status {
            Ok(status) => {
                ExitClassification::classify(stop.is_cancelled(), status.success(), status.code())
            }
            Err(_) => ExitClassification::classify(stop.is_cancelled(), false, None),
        };
        info!("{} exited: {:?}", self.inner.module, classification);
        self.release(pid).await;

        if self.state().await == ModuleState::Ready {
            if let Err(err) = self.transition(ModuleState::Stopping).await {
                error!("{}", err);
            }
        }
        self.emit(SupervisorEvent::Exited {
            module: self.inner.module.clone(),
            classification,
        });
        if let Err(err) = self.transition(ModuleState::Idle).await {
            error!("{}", err);
        }
        exited.cancel();
    }

    // ── Stop ────────────────────────────────────────

    /// Stop the supervised child and wait until it is gone and cleaned up.
    #[instrument(skip_all, fields(module = %self.inner.module))]
    pub async fn stop(&self) -> PanelResult<()> {
        let (pid, stop, exited) = {
            let running = self.inner.running.lock().await;
            match running.as_ref() {
                Some(child) => (child.pid, child.stop.clone(), child.exited.clone()),
                None => return Ok(()),
            }
        };

        if matches!(self.state().await, ModuleState::Ready | ModuleState::Starting) {
            self.transition(ModuleState::Stopping).await?;
        }
        stop.cancel();

        match terminate_gracefully(pid, self.inner.config.stop_policy).await {
            Ok(step) => info!("Stopped {} (PID {}) via {:?}", self.inner.module, pid, step),
            Err(err) => {
                warn!("Graceful stop of PID {} failed: {}; forcing", pid, err);
                force_kill_tree(pid)?;
            }
        }
        exited.cancelled().await;
        Ok(())
    }
}

fn describe_status(status: std::io::Result<ExitStatus>) -> String {
    match status {
        Ok(status) => match status.code() {
            Some(code) => format!("exit code {code}"),
            None => status.to_string(),
        },
        Err(err) => format!("unknown ({err})"),
    }
}

/// Program and leading arguments for `kind`.
fn resolve_program(
    kind: &ExecutableKind,
    executable: &Path,
    java: Option<PathBuf>,
) -> PanelResult<(PathBuf, Vec<String>)> {
    let executable_arg = executable.to_string_lossy().to_string();
    match kind {
        ExecutableKind::Native => Ok((executable.to_path_buf(), Vec::new())),
        ExecutableKind::Jar => {
            let java = java.ok_or_else(|| {
                PanelError::RuntimeUnavailable("a jar module needs a JVM requirement".into())
            })?;
            Ok((java, vec!["-jar".into(), executable_arg]))
        }
        ExecutableKind::Script { interpreter } => {
            let program = search_path(interpreter, Platform::current()).ok_or_else(|| {
                PanelError::RuntimeUnavailable(format!("{interpreter} is not on PATH"))
            })?;
            let script = if cfg!(target_os = "windows") && executable_arg.ends_with(".js") {
                strip_shebang(executable)?
            } else {
                executable.to_path_buf()
            };
            Ok((program, vec![script.to_string_lossy().to_string()]))
        }
    }
}

/// Copy of `script` without a leading `#!` line, next to the original.
/// Returns the original path when there is nothing to strip.
pub fn strip_shebang(script: &Path) -> PanelResult<PathBuf> {
    let content = std::fs::read_to_string(script).map_err(|source| PanelError::io(script, source))?;
    if !content.starts_with("#!") {
        return Ok(script.to_path_buf());
    }
    let body = content.split_once('\n').map(|(_, rest)| rest).unwrap_or_default();
    let name = script
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let copy = script.with_file_name(format!(".launch-{name}"));
    // Keep line numbers in stack traces aligned with the original.
    std::fs::write(&copy, format!("\n{body}")).map_err(|source| PanelError::io(&copy, source))?;
    Ok(copy)
}

/// Kill whatever process the module's PID file names (even one started by
/// another panel), then remove the PID and lock files. Returns the PID
/// that was running, if any.
#[instrument(skip(install_root, policy))]
pub async fn kill_locking_process(
    install_root: &Path,
    module: &str,
    policy: StopPolicy,
) -> PanelResult<Option<u32>> {
    let pid_file = PidFile::for_module(install_root, module);
    let killed = match pid_file.read()? {
        Some(pid) if is_process_alive(pid) => {
            let step = terminate_gracefully(pid, policy).await?;
            info!("Killed locking process {} of {} via {:?}", pid, module, step);
            Some(pid)
        }
        _ => None,
    };

    pid_file.remove()?;
    let lock = lock_file_path(install_root, module);
    match std::fs::remove_file(&lock) {
        Ok(()) => debug!("Removed lock file {:?}", lock),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(source) => return Err(PanelError::io(&lock, source)),
    }
    Ok(killed)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::*;
    use crate::core::java::MediaInstall;
    use crate::core::test_support::{closed_port, serve_fixed, serve_routes_on, Route};

    struct NoRuntimes;

    #[async_trait]
    impl RuntimeResolver for NoRuntimes {
        async fn jvm(&self, min_major: u32, _cancel: &CancellationToken) -> PanelResult<PathBuf> {
            Err(PanelError::RuntimeUnavailable(format!("no Java {min_major}")))
        }

        async fn media(&self, _cancel: &CancellationToken) -> PanelResult<MediaInstall> {
            Err(PanelError::RuntimeUnavailable("no media toolchain".into()))
        }
    }

    fn quick() -> SupervisorConfig {
        SupervisorConfig {
            stop_policy: StopPolicy {
                grace: Duration::from_millis(300),
                poll: Duration::from_millis(20),
            },
            probe_interval: Duration::from_millis(100),
        }
    }

    fn supervisor(root: &Path) -> (Supervisor, mpsc::UnboundedReceiver<SupervisorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Supervisor::with_config("main", root, tx, quick()).unwrap(), rx)
    }

    fn request(version_dir: &Path, port: u16, timeout: Duration) -> LaunchRequest {
        LaunchRequest {
            version_dir: version_dir.to_path_buf(),
            executable: "server.sh".into(),
            kind: ExecutableKind::Native,
            runtime: RuntimeRequirement::None,
            args: Vec::new(),
            port,
            selectors: vec![("MAIN_PROFILE".into(), "default".into())],
            properties: vec![("GREETING".into(), "hello".into())],
            readiness_timeout: timeout,
            startup_log: None,
            ready_marker: None,
        }
    }

    #[cfg(unix)]
    fn write_module(version_dir: &Path, body: &str) {
        std::fs::create_dir_all(version_dir).unwrap();
        let script = version_dir.join("server.sh");
        std::fs::write(&script, format!("#!/bin/sh\n{body}\n")).unwrap();
        platform::mark_executable(&script).unwrap();
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SupervisorEvent>) -> Vec<SupervisorEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn transitions(events: &[SupervisorEvent]) -> Vec<(ModuleState, ModuleState)> {
        events
            .iter()
            .filter_map(|event| match event {
                SupervisorEvent::StateChanged { from, to, .. } => Some((*from, *to)),
                _ => None,
            })
            .collect()
    }

    /// Start a fake module server on `port` after the precheck has passed.
    fn open_port_later(port: u16, after: Duration) {
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            serve_routes_on(port, HashMap::from([("/".to_string(), Route::ok("up"))])).await;
        });
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn ready_then_graceful_stop() {
        let root = tempfile::tempdir().unwrap();
        let version_dir = root.path().join("1.0.0");
        write_module(&version_dir, "echo \"port=$PORT greeting=$GREETING\"\nexec sleep 30");
        let (supervisor, mut rx) = supervisor(root.path());
        let port = closed_port();
        open_port_later(port, Duration::from_millis(400));

        let started = supervisor
            .start(
                request(&version_dir, port, Duration::from_secs(10)),
                &NoRuntimes,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(supervisor.state().await, ModuleState::Ready);
        assert_eq!(supervisor.pid().await, Some(started.pid));
        assert_eq!(supervisor.pid_file().read().unwrap(), Some(started.pid));
        assert_eq!(started.url, format!("http://localhost:{port}/"));

        supervisor.stop().await.unwrap();
        assert_eq!(supervisor.state().await, ModuleState::Idle);
        assert!(!supervisor.pid_file().path().exists());
        assert!(!is_process_alive(started.pid));

        let log = std::fs::read_to_string(&started.log_path).unwrap();
        assert!(log.contains(&format!("port={port} greeting=hello")));

        let events = drain(&mut rx);
        assert_eq!(
            transitions(&events),
            vec![
                (ModuleState::Idle, ModuleState::Starting),
                (ModuleState::Starting, ModuleState::Ready),
                (ModuleState::Ready, ModuleState::Stopping),
                (ModuleState::Stopping, ModuleState::Idle),
            ]
        );
        assert!(events.iter().any(|e| matches!(
            e,
            SupervisorEvent::Exited {
                classification: ExitClassification::StoppedByUser,
                ..
            }
        )));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn previous_startup_log_is_cleared_before_spawn() {
        let root = tempfile::tempdir().unwrap();
        let version_dir = root.path().join("1.0.0");
        write_module(
            &version_dir,
            "mkdir -p logs\necho \"booting on $PORT\" >> logs/startup.log\nexec sleep 30",
        );
        let stale = version_dir.join("logs/startup.log");
        std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
        std::fs::write(&stale, "Server started\n").unwrap();

        let (supervisor, _rx) = supervisor(root.path());
        let port = closed_port();
        open_port_later(port, Duration::from_millis(400));
        let mut launch = request(&version_dir, port, Duration::from_secs(10));
        launch.startup_log = Some("logs/startup.log".into());
        launch.ready_marker = Some("Server started".into());

        supervisor
            .start(launch, &NoRuntimes, &CancellationToken::new())
            .await
            .unwrap();
        let content = std::fs::read_to_string(&stale).unwrap();
        assert_eq!(content, format!("booting on {port}\n"));
        assert!(!supervisor.inner.tail.marker_seen().await);
        assert!(!supervisor.inner.tail.last_text().await.contains("Server started"));

        supervisor.stop().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_before_ready_is_startup_failure() {
        let root = tempfile::tempdir().unwrap();
        let version_dir = root.path().join("1.0.0");
        write_module(&version_dir, "echo boom\nexit 3");
        let (supervisor, mut rx) = supervisor(root.path());

        let err = supervisor
            .start(
                request(&version_dir, closed_port(), Duration::from_secs(10)),
                &NoRuntimes,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, PanelError::StartupFailed { ref status } if status == "exit code 3"));
        assert_eq!(supervisor.state().await, ModuleState::Idle);
        assert!(!supervisor.pid_file().path().exists());
        assert_eq!(
            transitions(&drain(&mut rx)),
            vec![
                (ModuleState::Idle, ModuleState::Starting),
                (ModuleState::Starting, ModuleState::Failed),
                (ModuleState::Failed, ModuleState::Idle),
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn silent_child_times_out_and_is_killed() {
        let root = tempfile::tempdir().unwrap();
        let version_dir = root.path().join("1.0.0");
        write_module(&version_dir, "trap '' INT\nwhile true; do sleep 0.05; done");
        let (supervisor, _rx) = supervisor(root.path());

        let err = supervisor
            .start(
                request(&version_dir, closed_port(), Duration::from_secs(1)),
                &NoRuntimes,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, PanelError::StartupTimeout { seconds: 1, .. }));
        assert_eq!(supervisor.state().await, ModuleState::Idle);
        assert!(!supervisor.pid_file().path().exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn natural_exit_after_ready_is_classified() {
        let root = tempfile::tempdir().unwrap();
        let version_dir = root.path().join("1.0.0");
        write_module(&version_dir, "sleep 1\nexit 0");
        let (supervisor, mut rx) = supervisor(root.path());
        let port = closed_port();
        open_port_later(port, Duration::from_millis(300));

        supervisor
            .start(
                request(&version_dir, port, Duration::from_secs(10)),
                &NoRuntimes,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2000)).await;

        assert_eq!(supervisor.state().await, ModuleState::Idle);
        assert!(!supervisor.pid_file().path().exists());
        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            SupervisorEvent::Exited {
                classification: ExitClassification::ExitedNormally,
                ..
            }
        )));
        assert_eq!(
            transitions(&events).last(),
            Some(&(ModuleState::Stopping, ModuleState::Idle))
        );
    }

    #[tokio::test]
    async fn live_pid_file_refuses_start_untouched() {
        let root = tempfile::tempdir().unwrap();
        let (supervisor, _rx) = supervisor(root.path());
        let me = std::process::id();
        supervisor.pid_file().write(me).unwrap();

        let err = supervisor
            .start(
                request(&root.path().join("1.0.0"), closed_port(), Duration::from_secs(1)),
                &NoRuntimes,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, PanelError::AlreadyRunning { pid } if pid == me));
        assert_eq!(err.exit_code(), 2);
        assert_eq!(supervisor.pid_file().read().unwrap(), Some(me));
        assert_eq!(supervisor.state().await, ModuleState::Idle);
    }

    #[tokio::test]
    async fn busy_port_refuses_start() {
        let root = tempfile::tempdir().unwrap();
        let (supervisor, _rx) = supervisor(root.path());
        let url = serve_fixed(200, b"taken".to_vec()).await;
        let port: u16 = url
            .trim_end_matches('/')
            .rsplit(':')
            .next()
            .unwrap()
            .parse()
            .unwrap();

        let err = supervisor
            .start(
                request(&root.path().join("1.0.0"), port, Duration::from_secs(1)),
                &NoRuntimes,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PanelError::PortBusy { .. }));
        assert_eq!(err.exit_code(), 3);
    }

    #[tokio::test]
    async fn missing_executable_and_runtime_are_reported() {
        let root = tempfile::tempdir().unwrap();
        let version_dir = root.path().join("1.0.0");
        std::fs::create_dir_all(&version_dir).unwrap();
        let (supervisor, _rx) = supervisor(root.path());

        let err = supervisor
            .start(
                request(&version_dir, closed_port(), Duration::from_secs(1)),
                &NoRuntimes,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PanelError::ArtifactMissing(_)));
        assert_eq!(err.exit_code(), 4);

        let mut jar = request(&version_dir, closed_port(), Duration::from_secs(1));
        jar.kind = ExecutableKind::Jar;
        jar.runtime = RuntimeRequirement::Jvm { min_major: 17 };
        let err = supervisor
            .start(jar, &NoRuntimes, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PanelError::RuntimeUnavailable(_)));
        assert!(!supervisor.pid_file().path().exists());
        assert_eq!(supervisor.state().await, ModuleState::Idle);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn kill_locking_process_clears_files() {
        let root = tempfile::tempdir().unwrap();
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        let reaper = tokio::spawn(async move { child.wait().await });
        PidFile::for_module(root.path(), "tracker").write(pid).unwrap();
        std::fs::write(lock_file_path(root.path(), "tracker"), "").unwrap();

        let killed = kill_locking_process(root.path(), "tracker", quick().stop_policy)
            .await
            .unwrap();

        assert_eq!(killed, Some(pid));
        reaper.await.unwrap().unwrap();
        assert!(!root.path().join("tracker.pid").exists());
        assert!(!root.path().join("tracker.lock").exists());
    }

    #[tokio::test]
    async fn kill_locking_process_with_stale_file() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("video.pid"), "garbage").unwrap();
        let killed = kill_locking_process(root.path(), "video", quick().stop_policy)
            .await
            .unwrap();
        assert_eq!(killed, None);
        assert!(!root.path().join("video.pid").exists());
    }

    #[test]
    fn shebang_is_stripped_into_a_copy() {
        let tmp = tempfile::tempdir().unwrap();
        let script = tmp.path().join("bridge.js");
        std::fs::write(&script, "#!/usr/bin/env node\nconsole.log('hi');\n").unwrap();

        let copy = strip_shebang(&script).unwrap();
        assert_eq!(copy, tmp.path().join(".launch-bridge.js"));
        assert_eq!(std::fs::read_to_string(&copy).unwrap(), "\nconsole.log('hi');\n");

        let plain = tmp.path().join("plain.js");
        std::fs::write(&plain, "console.log('hi');\n").unwrap();
        assert_eq!(strip_shebang(&plain).unwrap(), plain);
    }
}
