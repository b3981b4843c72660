//! Workflow runner: drives one execution through its phases.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use futures::Stream;
use pin_project_lite::pin_project;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{error, info};

use conductor_core::config::Config;
use conductor_core::error::Result;
use conductor_core::event::AgentEvent;
use conductor_core::session::{SessionStore, WorkflowSession};
use conductor_providers::LlmClient;

use crate::executions::{ExecutionRegistry, ExecutionStatus};
use crate::workflows::{RunContext, RunOutput, Workflow};
use crate::workspace::Workspace;

/// Events buffered between the runner and the encoder.
const EVENT_BUFFER: usize = 32;

/// Returned by phases when the execution was cancelled.
#[derive(Debug, thiserror::Error)]
#[error("execution cancelled")]
pub struct Cancelled;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Prepare,
    Execute,
    Finalize,
    Done,
    Failed,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Prepare => "prepare",
            RunState::Execute => "execute",
            RunState::Finalize => "finalize",
            RunState::Done => "done",
            RunState::Failed => "failed",
        }
    }

    fn next(self) -> Self {
        match self {
            RunState::Prepare => RunState::Execute,
            RunState::Execute => RunState::Finalize,
            RunState::Finalize | RunState::Done => RunState::Done,
            RunState::Failed => RunState::Failed,
        }
    }
}

/// Where phases send their events.
pub struct EventSink {
    tx: mpsc::Sender<AgentEvent>,
    cancel: CancellationToken,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<AgentEvent>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }

    /// Send one event, waiting for buffer space.
    ///
    /// Fails with [`Cancelled`] once the execution is cancelled or the
    /// consumer has gone away.
    pub async fn emit(&self, event: AgentEvent) -> anyhow::Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Cancelled.into()),
            sent = self.tx.send(event) => sent.map_err(|_| Cancelled.into()),
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

pin_project! {
    /// The runner's event sequence. Dropping it cancels the execution.
    pub struct AgentEventStream {
        #[pin]
        inner: ReceiverStream<AgentEvent>,
        execution_id: String,
        _guard: DropGuard,
    }
}

impl AgentEventStream {
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }
}

impl Stream for AgentEventStream {
    type Item = AgentEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<AgentEvent>> {
        self.project().inner.poll_next(cx)
    }
}

/// Shared collaborators for starting runs.
#[derive(Clone)]
pub struct RunnerDeps {
    pub config: Arc<Config>,
    pub llm: Arc<dyn LlmClient>,
    pub sessions: Arc<dyn SessionStore>,
    pub executions: ExecutionRegistry,
}

/// Drives one execution. Not reusable: [`WorkflowRunner::start`] consumes it.
pub struct WorkflowRunner {
    workflow: Arc<dyn Workflow>,
    ctx: RunContext,
    executions: ExecutionRegistry,
    cancel: CancellationToken,
}

impl WorkflowRunner {
    pub fn new(
        workflow: Arc<dyn Workflow>,
        ctx: RunContext,
        executions: ExecutionRegistry,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            workflow,
            ctx,
            executions,
            cancel,
        }
    }

    /// Create a workspace and execution id for `session`, then start the run.
    pub async fn launch(
        deps: &RunnerDeps,
        workflow: Arc<dyn Workflow>,
        session: WorkflowSession,
        mcp_config: Option<Value>,
    ) -> Result<AgentEventStream> {
        let execution_id = uuid::Uuid::new_v4().to_string();
        let workspace = Workspace::create(&deps.config.workspace_root(), &execution_id).await?;
        let cancel = deps
            .executions
            .register(&execution_id, &session.id, workflow.id(), workspace.path())
            .await;

        let ctx = RunContext {
            execution_id,
            session,
            workspace,
            config: deps.config.clone(),
            llm: deps.llm.clone(),
            sessions: deps.sessions.clone(),
            mcp_config,
            started_at: Instant::now(),
            output: RunOutput::default(),
        };
        Ok(Self::new(workflow, ctx, deps.executions.clone(), cancel).start())
    }

    /// Spawn the run and return its event stream.
    pub fn start(self) -> AgentEventStream {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let execution_id = self.ctx.execution_id.clone();
        let guard = self.cancel.clone().drop_guard();
        tokio::spawn(self.run(tx));
        AgentEventStream {
            inner: ReceiverStream::new(rx),
            execution_id,
            _guard: guard,
        }
    }

    async fn run(mut self, tx: mpsc::Sender<AgentEvent>) -> RunState {
        let sink = EventSink::new(tx, self.cancel.clone());
        let execution_id = self.ctx.execution_id.clone();
        info!(%execution_id, workflow = self.workflow.id(), "Run started");

        let mut state = RunState::Prepare;
        let status = loop {
            if state == RunState::Done {
                break ExecutionStatus::Completed;
            }
            match self.run_phase(state, &sink).await {
                Ok(()) => state = state.next(),
                Err(e) if self.cancel.is_cancelled() || e.downcast_ref::<Cancelled>().is_some() => {
                    info!(%execution_id, phase = state.as_str(), "Run cancelled");
                    break ExecutionStatus::Cancelled;
                }
                Err(e) => {
                    error!(%execution_id, phase = state.as_str(), error = %format!("{e:#}"), "Phase failed");
                    state = RunState::Failed;
                    // The consumer may already be gone; nothing else to report to.
                    let _ = sink.emit(AgentEvent::error(format!("{e:#}"))).await;
                    break ExecutionStatus::Failed;
                }
            }
        };

        info!(
            %execution_id,
            ?status,
            duration_ms = elapsed_ms(self.ctx.started_at),
            "Run finished"
        );
        self.executions.complete(&execution_id, status).await;
        state
    }

    async fn run_phase(&mut self, phase: RunState, sink: &EventSink) -> anyhow::Result<()> {
        sink.emit(progress(phase, "started")).await?;
        match phase {
            RunState::Prepare => self.workflow.prepare(&mut self.ctx, sink).await?,
            RunState::Execute => self.workflow.execute(&mut self.ctx, sink).await?,
            RunState::Finalize => {
                self.workflow.finalize(&mut self.ctx, sink).await?;
                sink.emit(AgentEvent::Annotation(self.report())).await?;
            }
            RunState::Done | RunState::Failed => return Ok(()),
        }
        sink.emit(progress(phase, "complete")).await
    }

    fn report(&self) -> Value {
        let output = &self.ctx.output;
        let mut report = json!({
            "executionId": self.ctx.execution_id,
            "workflow": self.workflow.id(),
            "toolCalls": output.tool_calls,
            "outputs": output.outputs,
            "durationMs": elapsed_ms(self.ctx.started_at),
        });
        if let Some(fields) = report.as_object_mut() {
            for (key, value) in &output.report {
                fields.insert(key.clone(), value.clone());
            }
        }
        report
    }
}

/// Milliseconds since `start`, saturating at `u64::MAX`.
fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn progress(phase: RunState, status: &str) -> AgentEvent {
    AgentEvent::System(json!({ "phase": phase.as_str(), "status": status }))
}
