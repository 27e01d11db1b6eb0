//! Single server process supervision.
//!
//! A [`MongoServer`] owns one `mongod` or `mongos` process and, unless the
//! process runs in a container, its data directory. Readiness is learned
//! from the process's own log output rather than by polling the network.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::args::has_arg;
use crate::client::{AdminClient, ClientTlsOptions, ConnectionTarget, command_ok};
use crate::log::LogEntry;
use crate::scan::{BuildInfo, PortScan, run_scan_stream, scan_build_info};
use crate::{Error, Result};

/// Address servers are reached on.
pub const LOCALHOST: &str = "127.0.0.1";

/// Startup log entries retained per server.
const STARTUP_LOG_CAPACITY: usize = 4096;

/// How long to wait for a reattached process to disappear after SIGKILL.
const ATTACHED_EXIT_WAIT: Duration = Duration::from_secs(2);

/// Which server distribution is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerVariant {
    /// Community build.
    Community,
    /// Build including the `enterprise` module.
    Enterprise,
}

impl fmt::Display for ServerVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Community => f.write_str("community"),
            Self::Enterprise => f.write_str("enterprise"),
        }
    }
}

/// Run the server inside a container instead of from a local binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerOptions {
    /// Image holding `mongod`/`mongos`.
    pub image: String,
    /// Extra arguments inserted before the image name.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl DockerOptions {
    /// Container options for `image`.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            extra_args: Vec::new(),
        }
    }
}

/// Options for starting one server.
#[derive(Clone)]
pub struct ServerOptions {
    /// `mongod` or `mongos`.
    pub binary: String,
    /// Directory holding the binary; `PATH` lookup when absent.
    pub bin_dir: Option<PathBuf>,
    /// Parent of the generated data directory.
    pub tmp_dir: PathBuf,
    /// When set, stdout and stderr are copied to a per-process file here.
    pub log_dir: Option<PathBuf>,
    /// Arguments passed to the server.
    pub args: Vec<String>,
    /// Run inside a container.
    pub docker: Option<DockerOptions>,
    /// TLS options for administrative connections.
    pub client_tls: ClientTlsOptions,
    /// Administrative command client.
    pub client: Arc<dyn AdminClient>,
}

impl ServerOptions {
    /// Options for `binary` with data under `tmp_dir`.
    pub fn new(
        binary: impl Into<String>,
        tmp_dir: impl Into<PathBuf>,
        client: Arc<dyn AdminClient>,
    ) -> Self {
        Self {
            binary: binary.into(),
            bin_dir: None,
            tmp_dir: tmp_dir.into(),
            log_dir: None,
            args: Vec::new(),
            docker: None,
            client_tls: ClientTlsOptions::default(),
            client,
        }
    }

    /// Sets the server arguments.
    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Sets the binary directory.
    #[must_use]
    pub fn with_bin_dir(mut self, bin_dir: impl Into<PathBuf>) -> Self {
        self.bin_dir = Some(bin_dir.into());
        self
    }

    /// Enables per-process log files.
    #[must_use]
    pub fn with_log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(log_dir.into());
        self
    }

    /// Runs the server in a container.
    #[must_use]
    pub fn with_docker(mut self, docker: DockerOptions) -> Self {
        self.docker = Some(docker);
        self
    }

    /// Sets client TLS options.
    #[must_use]
    pub fn with_client_tls(mut self, client_tls: ClientTlsOptions) -> Self {
        self.client_tls = client_tls;
        self
    }

    fn is_mongos(&self) -> bool {
        self.binary == "mongos"
    }

    fn is_mongod(&self) -> bool {
        self.binary == "mongod"
    }
}

impl fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerOptions")
            .field("binary", &self.binary)
            .field("bin_dir", &self.bin_dir)
            .field("tmp_dir", &self.tmp_dir)
            .field("log_dir", &self.log_dir)
            .field("args", &self.args)
            .field("docker", &self.docker)
            .field("client_tls", &self.client_tls)
            .finish_non_exhaustive()
    }
}

/// Reattachable description of a running server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedServer {
    /// Operating-system process id.
    pub pid: u32,
    /// Listening port.
    pub port: u16,
    /// Owned data directory; `None` for containers.
    pub db_path: Option<PathBuf>,
    /// Container name, for servers run under Docker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
}

impl SerializedServer {
    /// Tears the described server down without talking to it: the pid is
    /// killed, the container removed and the data directory deleted.
    /// Meant for snapshots that could not be reattached.
    pub async fn force_close(&self) {
        kill_pid(self.pid).await;
        if let Some(container) = &self.container {
            remove_container(container).await;
        }
        if let Some(db_path) = &self.db_path {
            remove_data_dir(db_path).await;
        }
    }
}

/// The OS process behind a server.
#[derive(Debug)]
enum ProcessState {
    /// Nothing spawned yet.
    Unstarted,
    /// Spawned by this process; can be waited on.
    Spawned { child: Child, pid: u32 },
    /// Known only by pid, e.g. after deserializing.
    Attached { pid: u32 },
    /// Torn down.
    Closed,
}

/// A supervised `mongod` or `mongos` process.
pub struct MongoServer {
    binary: Option<String>,
    process: ProcessState,
    port: Option<u16>,
    db_path: Option<PathBuf>,
    container: Option<String>,
    build_info: Option<BuildInfo>,
    startup_log: Arc<Mutex<Vec<LogEntry>>>,
    client: Arc<dyn AdminClient>,
    client_tls: ClientTlsOptions,
    referenced: bool,
}

impl MongoServer {
    fn unstarted(
        binary: Option<String>,
        client: Arc<dyn AdminClient>,
        client_tls: ClientTlsOptions,
    ) -> Self {
        Self {
            binary,
            process: ProcessState::Unstarted,
            port: None,
            db_path: None,
            container: None,
            build_info: None,
            startup_log: Arc::new(Mutex::new(Vec::new())),
            client,
            client_tls,
            referenced: true,
        }
    }

    /// Spawns a server and waits until it is listening and answering
    /// `buildInfo`.
    ///
    /// On failure the partially started process is killed and its data
    /// directory removed before the error is returned.
    pub async fn start(options: ServerOptions) -> Result<Self> {
        let mut server = Self::unstarted(
            Some(options.binary.clone()),
            Arc::clone(&options.client),
            options.client_tls.clone(),
        );

        if let Err(err) = server.launch(&options).await {
            warn!(binary = %options.binary, error = %err, "server failed to start");
            server.close().await;
            return Err(err);
        }

        Ok(server)
    }

    async fn launch(&mut self, options: &ServerOptions) -> Result<()> {
        let binary = options.binary.as_str();
        let mut args = options.args.clone();

        if options.docker.is_none() {
            let db_path = options
                .tmp_dir
                .join(format!("{binary}-{}", Uuid::new_v4().simple()));
            fs::create_dir_all(&db_path).await?;
            self.db_path = Some(db_path);
        }

        if !has_arg(&args, "--port") {
            // mongos does not reliably report a port chosen by the OS.
            let port = if options.is_mongos() {
                allocate_port()?
            } else {
                0
            };
            args.push("--port".to_string());
            args.push(port.to_string());
        }

        if options.is_mongod() && !has_arg(&args, "--dbpath") {
            let db_path = self
                .db_path
                .as_ref()
                .map_or_else(|| "/tmp".to_string(), |path| path.display().to_string());
            args.push("--dbpath".to_string());
            args.push(db_path);
        }

        let mut command = match &options.docker {
            Some(docker) => {
                let name = format!("mongo-harness-{}", Uuid::new_v4().simple());
                let mut command = Command::new("docker");
                command
                    .args(["run", "--rm", "--network=host", "--name", &name])
                    .args(&docker.extra_args)
                    .arg(&docker.image)
                    .arg(binary);
                self.container = Some(name);
                command
            }
            None => Command::new(binary_path(options.bin_dir.as_deref(), binary)),
        };

        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);

        // Own process group: a crashed parent leaves the server running
        // until it is closed from a reattached handle.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                Error::EndedWithoutPort {
                    reason: Some(format!("failed to execute {binary}: {e}")),
                }
            }
            _ => Error::Spawn {
                binary: binary.to_string(),
                reason: e.to_string(),
            },
        })?;

        let pid = child.id().ok_or_else(|| Error::Spawn {
            binary: binary.to_string(),
            reason: "process exited immediately".to_string(),
        })?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        self.process = ProcessState::Spawned { child, pid };

        info!(binary, pid, ?args, "spawned server process");

        let sink = match &options.log_dir {
            Some(dir) => Some(LogSink::create(dir, binary, pid).await?),
            None => None,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(stdout) = stdout {
            tokio::spawn(pump_stdout(
                stdout,
                tx,
                sink.clone(),
                Arc::clone(&self.startup_log),
            ));
        }
        if let Some(stderr) = stderr {
            tokio::spawn(pump_stderr(stderr, sink, binary.to_string(), pid));
        }

        let mut entries = entry_stream(rx);
        let port = run_scan_stream(PortScan, &mut entries).await?;
        drop(entries);
        self.port = Some(port);

        debug!(binary, pid, port, "server is listening");

        let build_info = self.query_build_info().await?;
        info!(
            binary,
            pid,
            port,
            version = build_info.version.as_deref().unwrap_or("unknown"),
            "server ready"
        );
        self.build_info = Some(build_info);

        Ok(())
    }

    /// Reattaches to a server started by another invocation.
    ///
    /// No process is spawned. `buildInfo` is queried immediately, so a
    /// successful return means the process is still answering.
    pub async fn deserialize(
        snapshot: SerializedServer,
        client: Arc<dyn AdminClient>,
        client_tls: ClientTlsOptions,
    ) -> Result<Self> {
        let mut server = Self::unstarted(None, client, client_tls);
        server.process = ProcessState::Attached { pid: snapshot.pid };
        server.port = Some(snapshot.port);
        server.db_path = snapshot.db_path;
        server.container = snapshot.container;

        let build_info = server.query_build_info().await?;
        debug!(pid = snapshot.pid, port = snapshot.port, "reattached to server");
        server.build_info = Some(build_info);

        Ok(server)
    }

    /// Reattachable description of this server.
    pub fn serialize(&self) -> Result<SerializedServer> {
        Ok(SerializedServer {
            pid: self.pid().ok_or(Error::NotReady("pid"))?,
            port: self.port()?,
            db_path: self.db_path.clone(),
            container: self.container.clone(),
        })
    }

    /// Kills the process and removes the data directory.
    ///
    /// Never fails: problems are logged so that closing many servers is
    /// never blocked by one of them. Safe to call repeatedly.
    pub async fn close(&mut self) {
        match std::mem::replace(&mut self.process, ProcessState::Closed) {
            ProcessState::Spawned { mut child, pid } => match child.try_wait() {
                Ok(None) => {
                    if let Err(err) = child.kill().await {
                        warn!(pid, error = %err, "failed to kill server process");
                    } else {
                        debug!(pid, "killed server process");
                    }
                }
                Ok(Some(status)) => debug!(pid, %status, "server process had already exited"),
                Err(err) => warn!(pid, error = %err, "failed to query server process"),
            },
            ProcessState::Attached { pid } => kill_pid(pid).await,
            ProcessState::Unstarted | ProcessState::Closed => {}
        }

        if let Some(container) = self.container.take() {
            remove_container(&container).await;
        }

        if let Some(db_path) = self.db_path.take() {
            remove_data_dir(&db_path).await;
        }

        self.port = None;
        self.build_info = None;
    }

    /// Runs a command against this server alone, failing unless the reply
    /// reports `ok: 1`.
    pub async fn run_command(&self, command: Value) -> Result<Value> {
        let target = self.direct_target()?;
        let reply = self.client.run_command(&target, command.clone()).await?;
        command_ok(&target, &command, reply)
    }

    async fn query_build_info(&self) -> Result<BuildInfo> {
        let reply = self.run_command(json!({ "buildInfo": 1 })).await?;
        Ok(serde_json::from_value(reply)?)
    }

    fn direct_target(&self) -> Result<ConnectionTarget> {
        let port = self.port.ok_or(Error::NotReady("port"))?;
        Ok(ConnectionTarget::direct(
            &format!("{LOCALHOST}:{port}"),
            self.client_tls.clone(),
        ))
    }

    fn ready_build_info(&self, what: &'static str) -> Result<&BuildInfo> {
        match (&self.port, &self.build_info) {
            (Some(_), Some(info)) => Ok(info),
            _ => Err(Error::NotReady(what)),
        }
    }

    /// Listening port.
    pub fn port(&self) -> Result<u16> {
        self.ready_build_info("port")?;
        self.port.ok_or(Error::NotReady("port"))
    }

    /// `127.0.0.1:<port>`.
    pub fn hostport(&self) -> Result<String> {
        self.ready_build_info("hostport")?;
        Ok(format!("{LOCALHOST}:{}", self.port()?))
    }

    /// Version reported by `buildInfo`.
    pub fn server_version(&self) -> Result<&str> {
        self.ready_build_info("serverVersion")?
            .version
            .as_deref()
            .ok_or(Error::NotReady("serverVersion"))
    }

    /// Community or enterprise, from the reported modules.
    pub fn server_variant(&self) -> Result<ServerVariant> {
        let info = self.ready_build_info("serverVariant")?;
        Ok(if info.is_enterprise() {
            ServerVariant::Enterprise
        } else {
            ServerVariant::Community
        })
    }

    /// Build information, once ready.
    pub fn build_info(&self) -> Option<&BuildInfo> {
        self.build_info.as_ref()
    }

    /// Process id, while a process is tracked.
    pub fn pid(&self) -> Option<u32> {
        match &self.process {
            ProcessState::Spawned { pid, .. } | ProcessState::Attached { pid } => Some(*pid),
            ProcessState::Unstarted | ProcessState::Closed => None,
        }
    }

    /// Owned data directory.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Binary name; unknown for reattached servers.
    pub fn binary(&self) -> Option<&str> {
        self.binary.as_deref()
    }

    /// Whether the server has been closed.
    pub fn is_closed(&self) -> bool {
        matches!(self.process, ProcessState::Closed)
    }

    /// Parsed log entries captured since startup.
    pub fn startup_log(&self) -> Vec<LogEntry> {
        self.startup_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Build information announced in the startup banner.
    pub fn banner_build_info(&self) -> Result<BuildInfo> {
        scan_build_info(&mut self.startup_log().into_iter())
    }

    /// Kill the spawned process when this handle is dropped (the default).
    pub fn ref_processes(&mut self) {
        self.referenced = true;
    }

    /// Leave the spawned process running when this handle is dropped.
    pub fn unref_processes(&mut self) {
        self.referenced = false;
    }
}

impl Drop for MongoServer {
    fn drop(&mut self) {
        if !self.referenced {
            return;
        }
        if let ProcessState::Spawned { child, pid } = &mut self.process {
            if let Err(err) = child.start_kill() {
                debug!(pid = *pid, error = %err, "failed to kill dropped server");
            }
        }
    }
}

impl fmt::Debug for MongoServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MongoServer")
            .field("binary", &self.binary)
            .field("process", &self.process)
            .field("port", &self.port)
            .field("db_path", &self.db_path)
            .field("container", &self.container)
            .field("build_info", &self.build_info)
            .field("referenced", &self.referenced)
            .finish_non_exhaustive()
    }
}

fn binary_path(bin_dir: Option<&Path>, binary: &str) -> PathBuf {
    match bin_dir {
        Some(dir) => dir.join(format!("{binary}{}", std::env::consts::EXE_SUFFIX)),
        None => PathBuf::from(binary),
    }
}

/// Reserves a free local port by binding and releasing it.
fn allocate_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind((LOCALHOST, 0))?;
    Ok(listener.local_addr()?.port())
}

fn entry_stream(rx: mpsc::UnboundedReceiver<LogEntry>) -> BoxStream<'static, LogEntry> {
    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|entry| (entry, rx))
    })
    .boxed()
}

/// Per-process log file shared by the stdout and stderr pumps.
#[derive(Clone)]
struct LogSink {
    file: Arc<tokio::sync::Mutex<fs::File>>,
}

impl LogSink {
    async fn create(dir: &Path, binary: &str, pid: u32) -> Result<Self> {
        fs::create_dir_all(dir).await?;
        let name = format!(
            "{binary}-{pid}-{}.log",
            Utc::now().format("%Y%m%dT%H%M%S%.3fZ")
        );
        let path = dir.join(name);
        let file = fs::File::create(&path).await?;
        debug!(path = %path.display(), "writing server log file");
        Ok(Self {
            file: Arc::new(tokio::sync::Mutex::new(file)),
        })
    }

    async fn write_line(&self, line: &str) {
        let mut file = self.file.lock().await;
        let result = async {
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await
        }
        .await;
        if let Err(err) = result {
            debug!(error = %err, "failed to write server log file");
        }
    }
}

/// Reads stdout until EOF. Parsed entries are forwarded to the readiness
/// scan until it hangs up or a line is unrecognizable; the pipe keeps being
/// drained afterwards so the server never blocks on a full pipe.
async fn pump_stdout(
    stdout: ChildStdout,
    tx: mpsc::UnboundedSender<LogEntry>,
    sink: Option<LogSink>,
    history: Arc<Mutex<Vec<LogEntry>>>,
) {
    let mut lines = BufReader::new(stdout).lines();
    let mut forward = Some(tx);

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                debug!(error = %err, "server stdout closed");
                break;
            }
        };

        if let Some(sink) = &sink {
            sink.write_line(&line).await;
        }
        if line.trim().is_empty() {
            continue;
        }

        match LogEntry::parse(&line) {
            Ok(entry) => {
                {
                    let mut history = history.lock().unwrap_or_else(PoisonError::into_inner);
                    if history.len() < STARTUP_LOG_CAPACITY {
                        history.push(entry.clone());
                    }
                }
                if forward.as_ref().is_some_and(|tx| tx.send(entry).is_err()) {
                    forward = None;
                }
            }
            Err(err) => {
                if forward.take().is_some() {
                    debug!(error = %err, "unrecognized server output, ending readiness scan");
                }
            }
        }
    }
}

async fn pump_stderr(stderr: ChildStderr, sink: Option<LogSink>, binary: String, pid: u32) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match &sink {
            Some(sink) => sink.write_line(&line).await,
            None => debug!(binary = %binary, pid, "{line}"),
        }
    }
}

#[cfg(unix)]
async fn kill_pid(pid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        warn!(pid, "pid out of range");
        return;
    };
    let target = Pid::from_raw(raw);

    match kill(target, Signal::SIGKILL) {
        Ok(()) => debug!(pid, "sent SIGKILL to server"),
        Err(Errno::ESRCH) => {
            debug!(pid, "server process was already gone");
            return;
        }
        Err(err) => {
            warn!(pid, error = %err, "failed to signal server process");
            return;
        }
    }

    let deadline = tokio::time::Instant::now() + ATTACHED_EXIT_WAIT;
    while kill(target, None).is_ok() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[cfg(not(unix))]
async fn kill_pid(pid: u32) {
    let result = Command::new("taskkill")
        .args(["/F", "/PID", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    if let Err(err) = result {
        warn!(pid, error = %err, "failed to kill server process");
    }
}

async fn remove_data_dir(path: &Path) {
    match fs::remove_dir_all(path).await {
        Ok(()) => debug!(path = %path.display(), "removed data directory"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), error = %err, "failed to remove data directory"),
    }
}

async fn remove_container(name: &str) {
    let result = Command::new("docker")
        .args(["rm", "-f", name])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match result {
        Ok(status) if status.success() => debug!(container = name, "removed container"),
        Ok(status) => debug!(container = name, %status, "container removal reported failure"),
        Err(err) => warn!(container = name, error = %err, "failed to run docker rm"),
    }
}
