use crate::error::Result;
use crate::events::{JobOutcome, JobReport};
use crate::runner::JobRunner;
use crate::template::{CommandTemplate, StagedInput};
use crate::types::JobSpec;
use crate::workspace::{Workspace, WorkspaceConfig};
use bytes::Bytes;
use std::time::Duration;
use tracing::info;

/// Subdirectory receiving the uploads, so no input can sit at an output path.
pub const INPUT_DIR: &str = "input";

/// An uploaded file waiting to be staged.
#[derive(Clone, Debug)]
pub struct Upload {
    pub name: String,
    pub bytes: Bytes,
}

impl Upload {
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

/// A finished job together with the workspace holding its outputs.
///
/// The workspace is deleted when this value (or the workspace moved out of it) is dropped, so
/// outputs must be read or streamed before then.
#[derive(Debug)]
pub struct ManagedJob {
    pub report: JobReport,
    pub workspace: Workspace,
    pub inputs: Vec<StagedInput>,
}

impl ManagedJob {
    pub fn outcome(&self) -> JobOutcome {
        self.report.outcome
    }
}

/// Stages `uploads` into the `input` directory of a fresh workspace, runs the rendered template there and returns the
/// outcome with the still-open workspace.
///
/// Any failure after the workspace is opened drops it, removing everything staged so far.
pub async fn run_managed_job(
    runner: &JobRunner,
    config: &WorkspaceConfig,
    uploads: Vec<Upload>,
    template: &CommandTemplate,
    timeout: Option<Duration>,
) -> Result<ManagedJob> {
    let workspace = Workspace::open(config)?;
    let mut inputs = Vec::with_capacity(uploads.len());
    for upload in uploads {
        let path = workspace
            .stage_in(INPUT_DIR, &upload.name, &upload.bytes[..])
            .await?;
        inputs.push(StagedInput {
            key: upload.name,
            path,
        });
    }

    let rendered = template.render(&workspace, &inputs).await?;
    let mut spec = JobSpec::new(rendered.command)
        .with_dir(rendered.dir)
        .with_envs(rendered.envs);
    if let Some(timeout) = timeout {
        spec = spec.with_timeout(timeout);
    }

    let report = runner.run(spec).await?;
    info!(
        job = %report.job_id,
        workspace = %workspace.path().display(),
        outcome = %report.outcome,
        "managed job finished"
    );
    Ok(ManagedJob {
        report,
        workspace,
        inputs,
    })
}
