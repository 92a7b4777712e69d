//! MCP Transport Implementations
//!
//! Transports move newline-delimited JSON between the client and a tool host.
//!
//! Reads go through a persistent [`Lines`] buffer so a read abandoned by a
//! timeout keeps its partial line for the next caller.

use std::collections::HashMap;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::error::{Result, TollgateError};

/// Line-oriented duplex channel to a tool host
#[async_trait]
pub trait Transport: Send {
    /// Write one message followed by a newline and flush
    async fn send_line(&mut self, line: &str) -> Result<()>;

    /// Read the next line without its terminator; `None` at end of stream
    async fn receive_line(&mut self) -> Result<Option<String>>;

    /// Close the streams and release the host. Errors are swallowed.
    async fn shutdown(&mut self);
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> Result<()> {
    let mut buf = Vec::with_capacity(line.len() + 1);
    buf.extend_from_slice(line.as_bytes());
    buf.push(b'\n');
    writer
        .write_all(&buf)
        .await
        .map_err(|e| TollgateError::Transport(format!("Failed to write to MCP server: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| TollgateError::Transport(format!("Failed to flush MCP server input: {e}")))
}

async fn read_line<R: AsyncRead + Unpin>(
    lines: &mut Lines<BufReader<R>>,
) -> Result<Option<String>> {
    lines
        .next_line()
        .await
        .map_err(|e| TollgateError::Transport(format!("Failed to read from MCP server: {e}")))
}

/// Transport over any pair of async streams
pub struct StreamTransport<R, W> {
    reader: Option<Lines<BufReader<R>>>,
    writer: Option<W>,
}

impl<R, W> StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Some(BufReader::new(reader).lines()),
            writer: Some(writer),
        }
    }
}

fn closed() -> TollgateError {
    TollgateError::Transport("MCP transport is closed".to_string())
}

#[async_trait]
impl<R, W> Transport for StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn send_line(&mut self, line: &str) -> Result<()> {
        let writer = self.writer.as_mut().ok_or_else(closed)?;
        write_line(writer, line).await
    }

    async fn receive_line(&mut self) -> Result<Option<String>> {
        match self.reader.as_mut() {
            Some(reader) => read_line(reader).await,
            None => Ok(None),
        }
    }

    async fn shutdown(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
        self.reader = None;
    }
}

/// Transport to a tool host spawned as a child process.
///
/// The host's stderr is drained into the debug log so a chatty host
/// never blocks on a full pipe.
pub struct StdioTransport {
    name: String,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<Lines<BufReader<ChildStdout>>>,
}

impl StdioTransport {
    /// Spawn `command` with `args`, adding `env` to the inherited environment
    pub fn spawn(
        name: impl Into<String>,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self> {
        let name = name.into();
        if command.trim().is_empty() {
            return Err(TollgateError::Configuration(format!(
                "MCP server '{name}' has no command"
            )));
        }

        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            TollgateError::Transport(format!("Failed to start MCP server '{name}': {e}"))
        })?;
        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .map(|stdout| BufReader::new(stdout).lines());

        if let Some(stderr) = child.stderr.take() {
            let server = name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server = %server, "stderr: {}", line);
                }
            });
        }

        debug!(server = %name, command = %command, "Spawned MCP server");
        Ok(Self {
            name,
            child,
            stdin,
            stdout,
        })
    }

    /// Spawn the host described by a configuration entry
    pub fn from_config(name: impl Into<String>, config: &ServerConfig) -> Result<Self> {
        Self::spawn(name, &config.command, &config.args, &config.env)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        let stdin = self.stdin.as_mut().ok_or_else(closed)?;
        write_line(stdin, line).await
    }

    async fn receive_line(&mut self) -> Result<Option<String>> {
        match self.stdout.as_mut() {
            Some(stdout) => read_line(stdout).await,
            None => Ok(None),
        }
    }

    async fn shutdown(&mut self) {
        // Closing stdin is the host's signal to exit.
        self.stdin = None;
        self.stdout = None;
        match self.child.wait().await {
            Ok(status) => debug!(server = %self.name, %status, "MCP server exited"),
            Err(e) => warn!(server = %self.name, error = %e, "Failed to reap MCP server"),
        }
    }
}
