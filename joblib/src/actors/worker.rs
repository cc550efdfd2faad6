mod actor;

use crate::error::{Error, Result};
use crate::events::Termination;
use crate::types::{JobSpec, OutputBlob};
use actor::Actor;
use std::{io, process::Stdio, time::Duration};
use tokio::{process, sync::oneshot};

/// What the worker reports once its child has been reaped.
#[derive(Debug)]
pub struct Finished {
    pub termination: Termination,
    pub deadline_elapsed: bool,
    pub stdout: OutputBlob,
    pub stderr: OutputBlob,
    pub elapsed: Duration,
}

/// Handle to the task supervising one child process.
///
/// The supervisor owns the child, its deadline and its output pipes. Dropping the handle before
/// the job finishes kills the child.
pub struct WorkerHandle {
    pid: Option<u32>,
    kill_tx: oneshot::Sender<()>,
    finished_rx: oneshot::Receiver<io::Result<Finished>>,
}

impl WorkerHandle {
    pub fn spawn(
        spec: &JobSpec,
        base_envs: &[(String, String)],
        deadline: Option<Duration>,
    ) -> io::Result<Self> {
        let mut command = process::Command::new(spec.program());
        command
            .args(spec.args())
            .envs(base_envs.iter().cloned())
            .envs(spec.envs().iter().cloned())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = spec.dir() {
            command.current_dir(dir);
        }
        // own process group, so a forced kill also takes down anything the tool spawned
        #[cfg(unix)]
        {
            command.process_group(0);
        }

        let child = command.spawn()?;
        let pid = child.id();
        let (kill_tx, kill_rx) = oneshot::channel();
        let (finished_tx, finished_rx) = oneshot::channel();
        Actor::spawn(child, deadline, kill_rx, finished_tx);
        Ok(Self {
            pid,
            kill_tx,
            finished_rx,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Waits for the child to terminate, naturally or by the deadline.
    pub async fn wait(self) -> Result<Finished> {
        let Self {
            kill_tx,
            finished_rx,
            ..
        } = self;
        let finished = finished_rx.await;
        drop(kill_tx);
        match finished {
            Ok(result) => result.map_err(Error::Wait),
            Err(_) => Err(Error::WorkerLost),
        }
    }
}
