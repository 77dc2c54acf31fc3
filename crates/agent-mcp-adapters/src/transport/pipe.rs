//! Stdio transport
//!
//! Spawns the server as a child process and exchanges newline-delimited
//! JSON-RPC messages over its standard input and output.

use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{StateCell, Transport, TransportState};
use crate::Result;
use crate::config::{EncodingErrorPolicy, PipeSpec, TransportKind};
use crate::error::MCPError;

/// Transport over a child process's stdin/stdout
pub struct PipeTransport {
    spec: PipeSpec,
    state: StateCell,

    /// Child process handle
    child: Mutex<Option<Child>>,

    /// Stdin writer
    stdin: Mutex<Option<ChildStdin>>,

    /// Stdout reader
    stdout: Mutex<Option<BufReader<ChildStdout>>>,
}

impl PipeTransport {
    /// Create a transport for `spec`; nothing is spawned until `open`
    pub fn new(spec: PipeSpec) -> Self {
        Self {
            spec,
            state: StateCell::new(),
            child: Mutex::new(None),
            stdin: Mutex::new(None),
            stdout: Mutex::new(None),
        }
    }

    /// The spec this transport was built from
    pub fn spec(&self) -> &PipeSpec {
        &self.spec
    }
}

#[async_trait]
impl Transport for PipeTransport {
    async fn open(&self) -> Result<()> {
        let attempt = self.state.begin_open()?;
        debug!("Starting MCP server: {} {:?}", self.spec.command, self.spec.args);

        let mut command = Command::new(&self.spec.command);
        command
            .args(&self.spec.args)
            .envs(&self.spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        if let Some(cwd) = &self.spec.cwd {
            command.current_dir(cwd);
        }

        let mut child = command
            .spawn()
            .map_err(|e| MCPError::Connection(format!("Failed to spawn process: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MCPError::Connection("Failed to get stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MCPError::Connection("Failed to get stdout".to_string()))?;

        *self.stdin.lock().await = Some(stdin);
        *self.stdout.lock().await = Some(BufReader::new(stdout));
        *self.child.lock().await = Some(child);

        attempt.finish()?;
        info!("Spawned MCP server process: {}", self.spec.command);
        Ok(())
    }

    async fn send(&self, message: Value) -> Result<()> {
        self.state.ensure_connected()?;

        let mut line = serde_json::to_string(&message)?;
        line.push('\n');

        let mut stdin = self.stdin.lock().await;
        let stdin = stdin.as_mut().ok_or(MCPError::TransportClosed)?;

        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| MCPError::Connection(e.to_string()))?;
        stdin
            .flush()
            .await
            .map_err(|e| MCPError::Connection(e.to_string()))?;

        Ok(())
    }

    async fn receive(&self) -> Option<Value> {
        let mut stdout = self.stdout.lock().await;
        let reader = stdout.as_mut()?;
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => {
                    debug!("MCP server closed stdout");
                    return None;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Error reading from MCP server: {}", e);
                    return None;
                }
            }

            let Some(line) = decode_line(&buf, self.spec.error_policy) else {
                error!("MCP server wrote invalid UTF-8 under the strict policy; ending stream");
                return None;
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str(line) {
                Ok(message) => return Some(message),
                Err(_) => debug!("Skipping non-JSON line from MCP server: {}", line),
            }
        }
    }

    async fn close(&self) -> Result<()> {
        if !self.state.mark_closed() {
            return Ok(());
        }
        debug!("Closing stdio transport for: {}", self.spec.command);

        // Kill first: a send stuck on a full pipe holds the stdin lock until
        // the child's end of the pipe goes away.
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                debug!("MCP server process already gone: {}", e);
            }
        }

        if let Ok(mut stdin) = self.stdin.try_lock() {
            *stdin = None;
        }

        Ok(())
    }

    fn state(&self) -> TransportState {
        self.state.get()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Pipe
    }
}

/// Decode one line of child output; `None` means strict decoding failed
fn decode_line(bytes: &[u8], policy: EncodingErrorPolicy) -> Option<String> {
    match policy {
        EncodingErrorPolicy::Strict => std::str::from_utf8(bytes).ok().map(str::to_string),
        EncodingErrorPolicy::Replace => Some(String::from_utf8_lossy(bytes).into_owned()),
        EncodingErrorPolicy::Ignore => Some(decode_dropping_invalid(bytes)),
    }
}

fn decode_dropping_invalid(mut bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    loop {
        match std::str::from_utf8(bytes) {
            Ok(valid) => {
                out.push_str(valid);
                return out;
            }
            Err(e) => {
                let (valid, rest) = bytes.split_at(e.valid_up_to());
                out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                let skip = e.error_len().unwrap_or(rest.len());
                bytes = &rest[skip..];
            }
        }
    }
}
