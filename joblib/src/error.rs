use std::path::PathBuf;
use std::{io, result};

/// Failures of the job core.
///
/// Expected job outcomes (a timeout, a non-zero exit) are not errors; they are reported through
/// [`crate::JobOutcome`]. These variants cover the cases where no meaningful outcome exists.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid job spec: {0}")]
    InvalidSpec(&'static str),
    #[error("invalid file name {0:?}")]
    InvalidName(String),
    #[error("path {0:?} is outside the workspace")]
    OutsideWorkspace(PathBuf),
    #[error("invalid command template {template:?}: {reason}")]
    InvalidTemplate {
        template: String,
        reason: &'static str,
    },
    #[error("failed to launch {program:?}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed waiting on job process: {0}")]
    Wait(#[source] io::Error),
    #[error("job supervisor exited without reporting")]
    WorkerLost,
    #[error("failed to create workspace under {root:?}: {source}")]
    Workspace {
        root: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("expected exactly one output file, found {found}")]
    OutputCardinality { found: usize },
    #[error("failed to package outputs into {archive:?}: {source}")]
    Package {
        archive: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = result::Result<T, Error>;
