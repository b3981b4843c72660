use async_trait::async_trait;

use super::Workflow;

pub const ID: &str = "assistant";

/// General-purpose coding agent over the session's project.
pub struct AssistantWorkflow;

#[async_trait]
impl Workflow for AssistantWorkflow {
    fn id(&self) -> &str {
        ID
    }

    fn description(&self) -> &str {
        "General coding assistant"
    }

    fn identity(&self) -> &str {
        "You are a software engineering agent working inside an isolated workspace. \
         Answer the user's request, reading and editing files as needed."
    }
}
