//! Agent server process management
//!
//! Spawns one detached `stick-agent-server` per agent and answers liveness
//! questions about it later, usually from a different invocation of the CLI.
//! Parent and child share nothing but files under the persistence root:
//!
//! - `pids/<name>.pid`: decimal process id of the spawned server
//! - `pids/<name>.json`: the definition the child loads with `--config`
//! - `logs/<name>.log`: the child's stdout and stderr, appended
//!
//! The pid file is the only liveness oracle. Two concurrent starts for the
//! same name can both pass the already-running check.

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::{AgentDefinition, AgentRegistry, AgentStatus};
use crate::constants::server::{
    DEFAULT_HOST, HEALTH_PROBE_TIMEOUT, READINESS_POLL_INTERVAL, SERVER_BINARY_ENV,
    SERVER_BINARY_NAME,
};
use crate::error::ProcessError;
use crate::paths;

/// A spawned agent server, as seen by the process that started it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerProcessHandle {
    pub pid: u32,
    pub port: u16,
    pub started_at: DateTime<Utc>,
}

/// Program used to launch an agent server. `--config <file> --port <n>` is
/// appended after `args`.
#[derive(Debug, Clone)]
pub struct ServerLauncher {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ServerLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Locate the server binary: `$STICK_AGENT_SERVER_BIN`, then a sibling of
    /// the current executable, then `PATH`.
    pub fn discover() -> Result<Self, ProcessError> {
        if let Some(path) = std::env::var_os(SERVER_BINARY_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::new(path));
        }

        let file_name = format!("{}{}", SERVER_BINARY_NAME, std::env::consts::EXE_SUFFIX);
        if let Some(sibling) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(&file_name)))
            .filter(|p| p.is_file())
        {
            return Ok(Self::new(sibling));
        }

        which::which(SERVER_BINARY_NAME)
            .map(Self::new)
            .map_err(|_| ProcessError::ServerBinaryNotFound(SERVER_BINARY_NAME.to_string()))
    }
}

/// Starts, stops, and probes agent server processes.
pub struct ProcessManager {
    registry: AgentRegistry,
    launcher: Option<ServerLauncher>,
}

impl ProcessManager {
    pub fn new(registry: AgentRegistry) -> Self {
        Self {
            registry,
            launcher: None,
        }
    }

    /// Use an explicit launcher instead of discovering the server binary.
    pub fn with_launcher(mut self, launcher: ServerLauncher) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn pid_path(&self, name: &str) -> PathBuf {
        paths::pids_dir(self.registry.root()).join(format!("{}.pid", name))
    }

    pub fn definition_path(&self, name: &str) -> PathBuf {
        paths::pids_dir(self.registry.root()).join(format!("{}.json", name))
    }

    pub fn log_path(&self, name: &str) -> PathBuf {
        paths::logs_dir(self.registry.root()).join(format!("{}.log", name))
    }

    /// Recorded pid for `name`, if a readable pid file exists
    pub fn read_pid(&self, name: &str) -> Option<u32> {
        fs::read_to_string(self.pid_path(name))
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .filter(|pid| *pid > 0)
    }

    /// Probe the recorded pid. A negative answer removes the stale pid file
    /// and marks the registry record stopped.
    pub fn is_server_running(&self, name: &str) -> bool {
        if let Some(pid) = self.read_pid(name) {
            if process_alive(pid) {
                return true;
            }
            tracing::debug!(agent = name, pid, "Recorded server process is gone");
        }
        self.clear_stale(name);
        false
    }

    fn clear_stale(&self, name: &str) {
        let pid_path = self.pid_path(name);
        if pid_path.exists() {
            if let Err(e) = fs::remove_file(&pid_path) {
                tracing::warn!(agent = name, error = %e, "Failed to remove stale pid file");
            }
        }

        match self.registry.get_agent(name) {
            Ok(Some(record)) if record.is_running() => {
                if let Err(e) = self
                    .registry
                    .update_agent_status(name, AgentStatus::Stopped, None)
                {
                    tracing::warn!(agent = name, error = %e, "Failed to mark agent stopped");
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(agent = name, error = %e, "Failed to read registry"),
        }
    }

    /// Spawn a detached server for `definition` on `port`.
    pub fn start_server(
        &self,
        name: &str,
        definition: &AgentDefinition,
        port: u16,
    ) -> Result<ServerProcessHandle, ProcessError> {
        if self.is_server_running(name) {
            let pid = self.read_pid(name).unwrap_or_default();
            return Err(ProcessError::AlreadyRunning {
                name: name.to_string(),
                pid,
            });
        }

        let launcher = match &self.launcher {
            Some(launcher) => launcher.clone(),
            None => ServerLauncher::discover()?,
        };

        let definition_path = self.definition_path(name);
        let contents = serde_json::to_vec_pretty(definition).map_err(anyhow::Error::from)?;
        paths::write_atomic(&definition_path, &contents)?;

        let log_path = self.log_path(name);
        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        let log_err = log.try_clone()?;

        let mut command = Command::new(&launcher.program);
        command
            .args(&launcher.args)
            .arg("--config")
            .arg(&definition_path)
            .arg("--port")
            .arg(port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));
        detach(&mut command);

        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            name: name.to_string(),
            source,
        })?;
        let pid = child.id();

        // Reap the child if it exits while this process is still around.
        std::thread::spawn(move || {
            let _ = child.wait();
        });

        paths::write_atomic(&self.pid_path(name), pid.to_string().as_bytes())?;
        self.registry.record_deployment(name, pid, port)?;

        tracing::info!(
            agent = name,
            pid,
            port,
            log = %log_path.display(),
            "Started agent server"
        );

        Ok(ServerProcessHandle {
            pid,
            port,
            started_at: Utc::now(),
        })
    }

    /// Send a graceful termination signal and clean up. A missing or dead
    /// process is not an error. Returns whether a live process was signaled.
    pub fn stop_server(&self, name: &str) -> Result<bool, ProcessError> {
        let signaled = match self.read_pid(name) {
            Some(pid) => terminate(pid)?,
            None => false,
        };

        for path in [self.pid_path(name), self.definition_path(name)] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.registry
            .update_agent_status(name, AgentStatus::Stopped, None)?;

        if signaled {
            tracing::info!(agent = name, "Stopped agent server");
        } else {
            tracing::debug!(agent = name, "No live server to stop; cleaned up records");
        }
        Ok(signaled)
    }
}

#[cfg(unix)]
fn detach(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    // Own process group, so terminal signals to the CLI don't reach the server.
    command.process_group(0);
}

#[cfg(not(unix))]
fn detach(_command: &mut Command) {}

/// Zero-effect existence probe
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs only the existence and permission check.
    let rc = unsafe { libc::kill(raw, 0) };
    if rc == 0 {
        return true;
    }
    // EPERM: the process exists but belongs to someone else.
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn process_alive(pid: u32) -> bool {
    Command::new("tasklist")
        .args(["/FI", &format!("PID eq {}", pid), "/NH"])
        .output()
        .map(|out| String::from_utf8_lossy(&out.stdout).contains(&pid.to_string()))
        .unwrap_or(false)
}

/// SIGTERM `pid`. Returns false when the process no longer exists.
#[cfg(unix)]
fn terminate(pid: u32) -> Result<bool, ProcessError> {
    let raw = i32::try_from(pid).map_err(|_| ProcessError::Signal {
        pid,
        source: std::io::Error::from(std::io::ErrorKind::InvalidInput),
    })?;
    // SAFETY: kill has no memory-safety preconditions.
    let rc = unsafe { libc::kill(raw, libc::SIGTERM) };
    if rc == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(false);
    }
    Err(ProcessError::Signal { pid, source: err })
}

#[cfg(not(unix))]
fn terminate(pid: u32) -> Result<bool, ProcessError> {
    if !process_alive(pid) {
        return Ok(false);
    }
    Command::new("taskkill")
        .args(["/PID", &pid.to_string()])
        .status()
        .map(|status| status.success())
        .map_err(|source| ProcessError::Signal { pid, source })
}

fn health_url(host: &str, port: u16) -> String {
    format!("http://{}:{}/health", host, port)
}

/// One `GET /health` against a local agent server
pub async fn probe_health(port: u16) -> bool {
    probe_health_at(DEFAULT_HOST, port).await
}

pub async fn probe_health_at(host: &str, port: u16) -> bool {
    let client = match reqwest::Client::builder()
        .timeout(HEALTH_PROBE_TIMEOUT)
        .build()
    {
        Ok(client) => client,
        Err(_) => return false,
    };
    match client.get(health_url(host, port)).send().await {
        Ok(response) => response.status().is_success(),
        Err(_) => false,
    }
}

/// Poll `/health` until it answers or `timeout` elapses.
pub async fn wait_until_ready(port: u16, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if probe_health(port).await {
            return true;
        }
        if tokio::time::Instant::now() + READINESS_POLL_INTERVAL > deadline {
            return false;
        }
        tokio::time::sleep(READINESS_POLL_INTERVAL).await;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::Path;

    fn definition(name: &str) -> AgentDefinition {
        serde_json::from_value(serde_json::json!({
            "name": name,
            "version": "1.0.0",
            "description": "test agent",
        }))
        .unwrap()
    }

    /// A "server" that just sleeps; it ignores the appended arguments.
    fn sleeper() -> ServerLauncher {
        ServerLauncher::new("/bin/sh").with_args(["-c", "exec sleep 30", "stick-agent-server"])
    }

    fn manager(root: &Path) -> ProcessManager {
        ProcessManager::new(AgentRegistry::with_root(root)).with_launcher(sleeper())
    }

    #[test]
    fn start_records_pid_and_stop_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let pm = manager(dir.path());
        let def = definition("support");
        pm.registry().register_agent(&def, dir.path()).unwrap();

        let handle = pm.start_server("support", &def, 4100).unwrap();
        assert!(pm.is_server_running("support"));
        assert_eq!(pm.read_pid("support"), Some(handle.pid));
        assert!(pm.definition_path("support").is_file());

        let loaded = AgentDefinition::load_from_path(&pm.definition_path("support")).unwrap();
        assert_eq!(loaded.name, "support");

        let record = pm.registry().get_agent("support").unwrap().unwrap();
        assert_eq!(record.status, AgentStatus::Running);
        assert_eq!(record.pid, Some(handle.pid));
        assert_eq!(record.port, Some(4100));

        assert!(pm.stop_server("support").unwrap());
        assert!(!pm.is_server_running("support"));
        assert!(!pm.pid_path("support").exists());
        assert!(!pm.definition_path("support").exists());

        let record = pm.registry().get_agent("support").unwrap().unwrap();
        assert_eq!(record.status, AgentStatus::Stopped);
        assert_eq!(record.pid, None);
        assert!(record.deployed_at.is_some());
    }

    #[test]
    fn second_start_is_rejected_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let pm = manager(dir.path());
        let def = definition("busy");

        let first = pm.start_server("busy", &def, 4101).unwrap();
        let err = pm.start_server("busy", &def, 4102).unwrap_err();
        match err {
            ProcessError::AlreadyRunning { name, pid } => {
                assert_eq!(name, "busy");
                assert_eq!(pid, first.pid);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(pm.read_pid("busy"), Some(first.pid));

        pm.stop_server("busy").unwrap();
    }

    #[test]
    fn stale_pid_is_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let pm = manager(dir.path());
        let def = definition("ghost");
        pm.registry().register_agent(&def, dir.path()).unwrap();

        let mut exited = Command::new("true").spawn().unwrap();
        let dead_pid = exited.id();
        exited.wait().unwrap();

        paths::write_atomic(&pm.pid_path("ghost"), dead_pid.to_string().as_bytes()).unwrap();
        pm.registry()
            .update_agent_status("ghost", AgentStatus::Running, Some(dead_pid))
            .unwrap();

        assert!(!pm.is_server_running("ghost"));
        assert!(!pm.pid_path("ghost").exists());
        let record = pm.registry().get_agent("ghost").unwrap().unwrap();
        assert_eq!(record.status, AgentStatus::Stopped);

        // Repeating the probe changes nothing further.
        assert!(!pm.is_server_running("ghost"));
    }

    #[test]
    fn stop_without_process_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let pm = manager(dir.path());
        assert!(!pm.stop_server("nobody").unwrap());
        assert!(!pm.stop_server("nobody").unwrap());
    }

    #[test]
    fn spawn_failure_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        let pm = ProcessManager::new(AgentRegistry::with_root(dir.path()))
            .with_launcher(ServerLauncher::new(dir.path().join("missing-binary")));
        let err = pm.start_server("x", &definition("x"), 4103).unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
        assert!(pm.read_pid("x").is_none());
    }

    #[test]
    fn own_pid_is_alive() {
        assert!(process_alive(std::process::id()));
        assert!(!process_alive(0));
    }

    #[tokio::test]
    async fn readiness_wait_gives_up_without_a_listener() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        assert!(!wait_until_ready(port, Duration::from_millis(300)).await);
    }

    #[tokio::test]
    async fn health_probe_accepts_ok_response() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let body = r#"{"status":"healthy"}"#;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });
        assert!(probe_health(port).await);
    }
}
