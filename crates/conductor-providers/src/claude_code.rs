//! Claude Code CLI client.
//!
//! Runs `claude -p <prompt> --output-format stream-json --verbose` in the
//! execution workspace and yields each stdout line as a JSON chunk. The child
//! is spawned with `kill_on_drop`, so dropping the stream kills the process.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use conductor_core::config::Config;

use crate::{ChunkStream, LlmClient, LlmRequest};

pub struct ClaudeCodeClient {
    cli_path: String,
}

impl ClaudeCodeClient {
    pub fn new(cli_path: impl Into<String>) -> Self {
        Self {
            cli_path: cli_path.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.llm_cli_path())
    }

    /// Command-line arguments for a request.
    pub fn build_args(request: &LlmRequest) -> anyhow::Result<Vec<String>> {
        let mut args = vec![
            "-p".to_string(),
            request.prompt.clone(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
        ];
        if let Some(id) = &request.resume_session_id {
            args.extend(["--resume".to_string(), id.clone()]);
        }
        if let Some(model) = &request.model {
            args.extend(["--model".to_string(), model.clone()]);
        }
        if let Some(turns) = request.max_turns {
            args.extend(["--max-turns".to_string(), turns.to_string()]);
        }
        if let Some(system) = &request.system_prompt {
            args.extend(["--append-system-prompt".to_string(), system.clone()]);
        }
        if let Some(mcp) = &request.mcp_servers {
            args.extend(["--mcp-config".to_string(), serde_json::to_string(mcp)?]);
        }
        if let Some(mode) = &request.permission_mode {
            args.extend(["--permission-mode".to_string(), mode.clone()]);
        }
        if !request.allowed_tools.is_empty() {
            args.extend(["--allowedTools".to_string(), request.allowed_tools.join(",")]);
        }
        Ok(args)
    }
}

/// Bytes of stderr kept for the exit error; older output is discarded.
const STDERR_TAIL: usize = 16 * 1024;

struct CliState {
    child: Child,
    lines: LinesStream<BufReader<ChildStdout>>,
    stderr: Option<JoinHandle<String>>,
    done: bool,
}

/// Read stderr concurrently with stdout so a chatty agent never blocks on a
/// full pipe. Resolves to the last [`STDERR_TAIL`] bytes.
fn drain_stderr(mut pipe: ChildStderr) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut tail = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match pipe.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    tail.extend_from_slice(&buf[..n]);
                    if tail.len() > STDERR_TAIL {
                        let excess = tail.len() - STDERR_TAIL;
                        tail.drain(..excess);
                    }
                }
                Err(e) => {
                    warn!(%e, "Failed to read agent stderr");
                    break;
                }
            }
        }
        String::from_utf8_lossy(&tail).into_owned()
    })
}

/// Parse one stdout line. `None` for blank lines.
fn parse_line(line: &str) -> Option<anyhow::Result<serde_json::Value>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(
        serde_json::from_str(trimmed)
            .map_err(|e| anyhow::anyhow!("Malformed agent output line: {e}")),
    )
}

#[async_trait]
impl LlmClient for ClaudeCodeClient {
    fn id(&self) -> &str {
        "claude-code"
    }

    async fn query(&self, request: &LlmRequest) -> anyhow::Result<ChunkStream> {
        let args = Self::build_args(request)?;
        debug!(cli = %self.cli_path, cwd = %request.cwd.display(), "Spawning coding agent");

        let mut child = Command::new(&self.cli_path)
            .args(&args)
            .current_dir(&request.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow::anyhow!("Failed to start {}: {e}", self.cli_path))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("Agent process has no stdout"))?;
        let stderr = child.stderr.take().map(drain_stderr);
        info!(pid = ?child.id(), "Coding agent started");

        let state = CliState {
            child,
            lines: LinesStream::new(BufReader::new(stdout).lines()),
            stderr,
            done: false,
        };

        let stream = futures::stream::unfold(state, |mut state| async move {
            if state.done {
                return None;
            }
            loop {
                match state.lines.next().await {
                    Some(Ok(line)) => match parse_line(&line) {
                        Some(item) => return Some((item, state)),
                        None => continue,
                    },
                    Some(Err(e)) => {
                        state.done = true;
                        return Some((Err(anyhow::anyhow!("Agent stdout error: {e}")), state));
                    }
                    None => {
                        state.done = true;
                        let status = match state.child.wait().await {
                            Ok(status) => status,
                            Err(e) => {
                                return Some((
                                    Err(anyhow::anyhow!("Failed to wait for agent: {e}")),
                                    state,
                                ));
                            }
                        };
                        if status.success() {
                            return None;
                        }
                        let stderr = match state.stderr.take() {
                            Some(task) => task.await.unwrap_or_else(|e| {
                                warn!(%e, "Agent stderr reader failed");
                                String::new()
                            }),
                            None => String::new(),
                        };
                        let err = anyhow::anyhow!(
                            "Coding agent exited with {status}: {}",
                            stderr.trim()
                        );
                        return Some((Err(err), state));
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }
}
