//! Managed execution of external tools against uploaded files.
//!
//! [`JobRunner`] launches one process per call, enforces an optional deadline with a forced kill
//! and classifies the result as a [`JobOutcome`]. [`Workspace`] owns the temporary directory
//! the process reads its inputs from and writes its outputs to. [`run_managed_job`] ties the two
//! together for request handlers.

mod actors;
pub mod error;
mod events;
pub mod managed;
pub mod runner;
pub mod template;
pub mod types;
pub mod workspace;

pub use error::{Error, Result};
pub use events::{JobOutcome, JobReport, Termination};
pub use managed::{run_managed_job, ManagedJob, Upload};
pub use runner::{JobRunner, RunnerConfig};
pub use template::{CommandTemplate, StagedInput};
pub use types::JobSpec;
pub use workspace::{Workspace, WorkspaceConfig};
