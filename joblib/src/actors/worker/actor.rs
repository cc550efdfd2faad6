use super::Finished;
use crate::events::Termination;

use bytes::{Bytes, BytesMut};
use std::{io, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Child,
    select,
    sync::oneshot,
    task::JoinHandle,
    time::{self, Instant},
};
use tracing::{debug, warn};

/// How long to keep reading the pipes after the child is gone. A detached grandchild can hold
/// them open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

pub struct Actor {
    child: Child,
    deadline: Option<Duration>,
    kill_rx: oneshot::Receiver<()>,
}

impl Actor {
    pub fn spawn(
        child: Child,
        deadline: Option<Duration>,
        kill_rx: oneshot::Receiver<()>,
        finished_tx: oneshot::Sender<io::Result<Finished>>,
    ) {
        let actor = Self {
            child,
            deadline,
            kill_rx,
        };
        tokio::spawn(async move {
            let _ = finished_tx.send(actor.run().await);
        });
    }

    async fn run(mut self) -> io::Result<Finished> {
        let started = Instant::now();
        // grab stdout and stderr and drain them concurrently, a full pipe would stall the child
        let stdout = drain(self.child.stdout.take());
        let stderr = drain(self.child.stderr.take());

        // the countdown belongs to this invocation only and is dropped with it
        let deadline = self.deadline;
        let countdown = async move {
            match deadline {
                Some(deadline) => time::sleep(deadline).await,
                None => futures::future::pending::<()>().await,
            }
        };
        tokio::pin!(countdown);

        let mut deadline_elapsed = false;
        let mut handle_dropped = false;
        let status = loop {
            select! {
                status = self.child.wait() => break status?,
                _ = &mut countdown, if !deadline_elapsed => {
                    deadline_elapsed = true;
                    warn!(deadline = ?self.deadline, "job exceeded its deadline, killing it");
                    self.force_kill();
                }
                _ = &mut self.kill_rx, if !handle_dropped => {
                    // worker handle dropped, make sure we kill the child process before we exit
                    handle_dropped = true;
                    debug!("job abandoned by its caller, killing it");
                    self.force_kill();
                }
            }
        };
        let elapsed = started.elapsed();

        Ok(Finished {
            termination: Termination::from(status),
            deadline_elapsed,
            stdout: collect(stdout, "stdout").await,
            stderr: collect(stderr, "stderr").await,
            elapsed,
        })
    }

    /// Sends a non-cooperative kill to the child's process group, falling back to the child alone.
    fn force_kill(&mut self) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            let pgid = self.child.id().and_then(|pid| i32::try_from(pid).ok());
            if let Some(pgid) = pgid {
                if let Err(errno) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
                    debug!(%errno, "killpg failed, killing the child only");
                }
            }
        }
        if let Err(err) = self.child.start_kill() {
            // already reaped: the exit raced the kill
            debug!(%err, "start_kill failed");
        }
    }
}

fn drain<R>(pipe: Option<R>) -> JoinHandle<Bytes>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = BytesMut::with_capacity(4096);
        if let Some(mut pipe) = pipe {
            loop {
                match pipe.read_buf(&mut buf).await {
                    Ok(n) if n > 0 => {}
                    _ => break,
                }
            }
        }
        buf.freeze()
    })
}

async fn collect(mut task: JoinHandle<Bytes>, stream: &'static str) -> Bytes {
    match time::timeout(DRAIN_GRACE, &mut task).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(err)) => {
            warn!(stream, %err, "output reader failed");
            Bytes::new()
        }
        Err(_) => {
            warn!(stream, "output still open after the job exited, discarding it");
            task.abort();
            Bytes::new()
        }
    }
}
