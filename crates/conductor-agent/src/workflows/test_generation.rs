//! Test-generation workflow: scan the inputs for existing tests, ask the
//! agent to fill the gaps, report the test files it wrote.

use std::path::Path;

use async_trait::async_trait;
use serde_json::json;

use conductor_core::event::AgentEvent;

use super::{RunContext, Workflow, steps};
use crate::runner::EventSink;
use crate::workspace::INPUTS_DIR;

pub const ID: &str = "test_generation";

const SOURCE_EXTENSIONS: &[&str] = &[
    "rs", "py", "ts", "tsx", "js", "jsx", "go", "java", "kt", "rb", "cs", "swift",
];

/// True for common test-file naming conventions.
pub fn is_test_file(path: &str) -> bool {
    let p = Path::new(path);
    let in_test_dir = p.components().any(|c| {
        matches!(
            c.as_os_str().to_str(),
            Some("tests" | "test" | "__tests__" | "spec")
        )
    });
    let name = p.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let stem = p.file_stem().and_then(|n| n.to_str()).unwrap_or("");
    in_test_dir
        || name.starts_with("test_")
        || stem.ends_with("_test")
        || stem.ends_with("_spec")
        || stem.ends_with("Test")
        || name.contains(".test.")
        || name.contains(".spec.")
}

fn is_source_file(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| SOURCE_EXTENSIONS.contains(&e))
}

/// Coverage estimate: which source files have a test file named after them.
#[derive(Debug, Default, PartialEq)]
pub struct CoverageScan {
    pub sources: Vec<String>,
    pub tests: Vec<String>,
    pub untested: Vec<String>,
}

pub fn scan_coverage(files: &[String]) -> CoverageScan {
    let mut scan = CoverageScan::default();
    for file in files {
        if is_test_file(file) {
            scan.tests.push(file.clone());
        } else if is_source_file(file) {
            scan.sources.push(file.clone());
        }
    }
    for source in &scan.sources {
        let stem = Path::new(source)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("");
        let covered = scan.tests.iter().any(|t| {
            Path::new(t)
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.contains(stem))
        });
        if !covered {
            scan.untested.push(source.clone());
        }
    }
    scan
}

pub struct TestGenerationWorkflow;

#[async_trait]
impl Workflow for TestGenerationWorkflow {
    fn id(&self) -> &str {
        ID
    }

    fn description(&self) -> &str {
        "Generate automated tests for the referenced source files"
    }

    fn identity(&self) -> &str {
        "You are a test engineer. Write thorough, runnable automated tests for the \
         source files under inputs/, following the conventions of any existing tests. \
         Put every new test file under outputs/tests/."
    }

    async fn prepare(&self, ctx: &mut RunContext, sink: &EventSink) -> anyhow::Result<()> {
        steps::materialize_inputs(ctx, sink).await?;

        let files = ctx.workspace.list_dir(INPUTS_DIR).await?;
        let scan = scan_coverage(&files);
        let coverage = if scan.sources.is_empty() {
            1.0
        } else {
            let tested = scan.sources.len() - scan.untested.len();
            tested as f64 / scan.sources.len() as f64
        };
        ctx.output.report.insert("existingTests".into(), json!(scan.tests));
        ctx.output.report.insert("untestedSources".into(), json!(scan.untested));

        sink.emit(AgentEvent::System(json!({
            "phase": "prepare",
            "status": "coverage",
            "sourceFiles": scan.sources.len(),
            "testFiles": scan.tests.len(),
            "untested": scan.untested,
            "coverage": coverage,
        })))
        .await
    }

    async fn finalize(&self, ctx: &mut RunContext, sink: &EventSink) -> anyhow::Result<()> {
        steps::write_response(ctx).await?;

        let inputs_prefix = format!("{INPUTS_DIR}/");
        let generated: Vec<String> = ctx
            .workspace
            .list_files()
            .await?
            .into_iter()
            .filter(|f| !f.starts_with(&inputs_prefix) && is_test_file(f))
            .collect();
        ctx.output.outputs.extend(generated.iter().cloned());
        ctx.output.report.insert("generatedTests".into(), json!(generated));

        sink.emit(AgentEvent::System(json!({
            "phase": "finalize",
            "status": "tests",
            "files": generated,
        })))
        .await
    }
}
