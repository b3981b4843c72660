//! Conductor agent runtime.
//!
//! A [`WorkflowRunner`] drives one execution through
//! prepare → execute → finalize, yielding [`AgentEvent`]s on a bounded
//! channel. Each execution owns a [`workspace::Workspace`] directory that the
//! [`executions::ExecutionRegistry`] deletes after a delay once the run ends.
//!
//! [`AgentEvent`]: conductor_core::event::AgentEvent

pub mod executions;
pub mod prompt;
pub mod runner;
pub mod sdk;
pub mod workflows;
pub mod workspace;

pub use runner::{AgentEventStream, Cancelled, EventSink, RunState, RunnerDeps, WorkflowRunner};
pub use workflows::{RunContext, RunOutput, Workflow, WorkflowRegistry};
