mod tools;
mod upload;

use self::tools::{ExportKind, DIFF_OUTPUT_DIR};
use self::upload::UploadForm;
use crate::artifact::artifact_response;
use crate::config::{ServiceConfig, ToolConfig};
use crate::error::ApiError;
use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    response::Response,
    routing::{get, post},
    Router,
};
use joblib::{run_managed_job, JobOutcome, JobRunner, WorkspaceConfig};
use std::sync::Arc;
use tracing::info;

type Form = Result<Multipart, MultipartRejection>;

/// Shared state of the HTTP handlers. Immutable after startup.
#[derive(Debug)]
pub struct AnalysisService {
    runner: JobRunner,
    workspace: WorkspaceConfig,
    tools: ToolConfig,
}

impl AnalysisService {
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            runner: JobRunner::new(config.runner.clone()),
            workspace: config.workspace.clone(),
            tools: config.tools.clone(),
        }
    }

    async fn export(&self, kind: ExportKind, multipart: Form) -> Result<Response, ApiError> {
        let mut form = UploadForm::read(multipart).await?;
        let upload = form.single_file()?;
        let timeout = form.timeout()?;
        let is_64_bit = form.flag("is_64_bit", kind.default_64_bit())?;
        let template = tools::ida_export(&self.tools, kind, is_64_bit)?;
        let attachment = format!("{}.{}", upload.name, kind.download_extension());
        info!(
            script = kind.script(),
            upload = %upload.name,
            size = upload.bytes.len(),
            is_64_bit,
            ?timeout,
            "export requested"
        );

        let job =
            run_managed_job(&self.runner, &self.workspace, vec![upload], &template, timeout).await?;
        check_outcome(job.outcome())?;
        let workspace = job.workspace;

        let mut outputs = Vec::with_capacity(kind.outputs().len());
        for name in kind.outputs() {
            let path = workspace.resolve(name)?;
            if tokio::fs::metadata(&path).await.is_err() {
                return Err(ApiError::MissingOutput {
                    tool: "IDA",
                    output: name.to_string(),
                });
            }
            outputs.push(path);
        }
        let artifact = match outputs.as_slice() {
            [single] => single.clone(),
            _ => workspace.package(&outputs, "output.tar.gz").await?,
        };
        artifact_response(workspace, &artifact, &attachment, kind.content_type(), "IDA").await
    }

    async fn compare(&self, multipart: Form) -> Result<Response, ApiError> {
        let mut form = UploadForm::read(multipart).await?;
        let (Some(primary), Some(secondary)) =
            (form.take_file("primary"), form.take_file("secondary"))
        else {
            return Err(ApiError::InvalidRequest(
                "Missing parameter 'primary' or 'secondary'".to_string(),
            ));
        };
        let timeout = form.timeout()?;
        let template = tools::bindiff_compare(&self.tools)?;
        info!(
            primary = primary.bytes.len(),
            secondary = secondary.bytes.len(),
            ?timeout,
            "compare requested"
        );

        let job = run_managed_job(
            &self.runner,
            &self.workspace,
            vec![primary, secondary],
            &template,
            timeout,
        )
        .await?;
        check_outcome(job.outcome())?;
        let output = job
            .workspace
            .single_output(DIFF_OUTPUT_DIR)
            .await
            .map_err(|err| match err {
                joblib::Error::OutputCardinality { found } => ApiError::OutputCardinality {
                    tool: "BinDiff",
                    found,
                },
                err => err.into(),
            })?;
        artifact_response(
            job.workspace,
            &output,
            "BinDiff.sqlite3",
            "application/binary",
            "BinDiff",
        )
        .await
    }
}

fn check_outcome(outcome: JobOutcome) -> Result<(), ApiError> {
    match outcome {
        JobOutcome::Succeeded => Ok(()),
        JobOutcome::TimedOut => Err(ApiError::TimedOut),
        JobOutcome::Failed { code } => Err(ApiError::Failed { code }),
    }
}

async fn bindiff_export(
    State(service): State<Arc<AnalysisService>>,
    multipart: Form,
) -> Result<Response, ApiError> {
    service.export(ExportKind::BinExport, multipart).await
}

async fn bindiff_pickle_export(
    State(service): State<Arc<AnalysisService>>,
    multipart: Form,
) -> Result<Response, ApiError> {
    service.export(ExportKind::BinExportPickle, multipart).await
}

async fn pickle_export(
    State(service): State<Arc<AnalysisService>>,
    multipart: Form,
) -> Result<Response, ApiError> {
    service.export(ExportKind::Pickle, multipart).await
}

async fn bindiff_compare(
    State(service): State<Arc<AnalysisService>>,
    multipart: Form,
) -> Result<Response, ApiError> {
    service.compare(multipart).await
}

async fn health() -> &'static str {
    "ok"
}

pub fn router(service: Arc<AnalysisService>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/bindiff/export", post(bindiff_export))
        .route("/bindiff_pickle/export", post(bindiff_pickle_export))
        .route("/pickle/export", post(pickle_export))
        .route(
            "/bindiff/compare",
            get(bindiff_compare).post(bindiff_compare),
        )
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(service)
}
