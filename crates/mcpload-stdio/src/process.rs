//! Transport that owns a spawned MCP server process.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use mcpload_transport_traits::{
    Transport, TransportError, TransportMessage, TransportMetrics, TransportResult,
    TransportState, TransportType,
};
use tokio::process::{Child, Command};
use tokio::sync::Mutex as TokioMutex;
use tracing::{debug, info, warn};

use crate::transport::StdioTransport;

/// Default time a server gets to exit after its stdin closes.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// What to run and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCommand {
    /// Executable path or name resolved through `PATH`.
    pub program: PathBuf,
    /// Arguments passed after the program.
    pub args: Vec<OsString>,
    /// Variables set on top of the inherited environment.
    pub env: BTreeMap<String, String>,
    /// Route the server's stderr to ours instead of discarding it.
    pub debug: bool,
}

impl ProcessCommand {
    /// Run `program` with no arguments and no overrides.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            debug: false,
        }
    }

    /// Append arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set one environment override.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Forward the server's stderr.
    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Program and arguments as one display string.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_os_str())
            .chain(self.args.iter().map(OsString::as_os_str))
            .map(|part| part.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A [`StdioTransport`] bound to a child process it exclusively owns.
///
/// The child is spawned with `kill_on_drop`, so every exit path (failed
/// handshake, dropped session, panic) terminates it. [`Transport::disconnect`]
/// first closes the child's stdin and waits up to the shutdown grace period
/// for a clean exit before killing it.
#[derive(Debug)]
pub struct ProcessTransport {
    inner: StdioTransport,
    child: TokioMutex<Option<Child>>,
    pid: Option<u32>,
    command_line: String,
    shutdown_grace: Duration,
}

impl ProcessTransport {
    /// Spawn the server described by `command`.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// `ConfigurationError` for an empty program path and `ConnectionFailed`
    /// when the process cannot be started.
    pub fn spawn(command: &ProcessCommand) -> TransportResult<Self> {
        if command.program.as_os_str().is_empty() {
            return Err(TransportError::ConfigurationError(
                "process path must not be empty".to_string(),
            ));
        }

        let command_line = command.command_line();
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(&command.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(if command.debug {
                Stdio::inherit()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            TransportError::ConnectionFailed(format!("failed to spawn `{command_line}`: {e}"))
        })?;

        // `child` is dropped (and killed) on either early return.
        let stdin = child.stdin.take().ok_or_else(|| {
            TransportError::ConnectionFailed("child stdin was not piped".to_string())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::ConnectionFailed("child stdout was not piped".to_string())
        })?;

        let pid = child.id();
        info!(pid = ?pid, command = %command_line, "Spawned MCP server process");

        Ok(Self {
            inner: StdioTransport::from_raw(stdout, stdin)
                .with_endpoint(format!("process://{command_line}")),
            child: TokioMutex::new(Some(child)),
            pid,
            command_line,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        })
    }

    /// How long `disconnect` waits for a clean exit before killing.
    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// OS process id, if the child was still running when spawned.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn reap_child(&self) -> TransportResult<()> {
        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };

        match tokio::time::timeout(self.shutdown_grace, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(pid = ?self.pid, %status, "MCP server process exited");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(pid = ?self.pid, "Waiting for MCP server process failed: {}", e);
                child.kill().await.map_err(TransportError::from)
            }
            Err(_) => {
                warn!(
                    pid = ?self.pid,
                    command = %self.command_line,
                    "MCP server did not exit within {:?}, killing it",
                    self.shutdown_grace
                );
                child.kill().await.map_err(TransportError::from)
            }
        }
    }
}

#[async_trait]
impl Transport for ProcessTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::Stdio
    }

    async fn state(&self) -> TransportState {
        self.inner.state().await
    }

    async fn connect(&self) -> TransportResult<()> {
        self.inner.connect().await
    }

    async fn disconnect(&self) -> TransportResult<()> {
        // Closing the framed writer closes the child's stdin.
        let inner = self.inner.disconnect().await;
        let reaped = self.reap_child().await;
        inner.and(reaped)
    }

    async fn send(&self, message: TransportMessage) -> TransportResult<()> {
        self.inner.send(message).await
    }

    async fn receive(&self) -> TransportResult<Option<TransportMessage>> {
        self.inner.receive().await
    }

    fn metrics(&self) -> TransportMetrics {
        self.inner.metrics()
    }

    fn endpoint(&self) -> Option<String> {
        self.inner.endpoint()
    }
}
