use crate::actors::worker::WorkerHandle;
use crate::error::{Error, Result};
use crate::events::{JobOutcome, JobReport};
use crate::types::{Envs, JobSpec};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Settings shared by every job a runner launches.
#[derive(Clone, Debug, Default)]
pub struct RunnerConfig {
    /// Environment applied to every job before the job's own overrides.
    pub base_envs: Envs,
    /// Deadline used for jobs whose spec carries none.
    pub default_timeout: Option<Duration>,
}

/// Runs external processes to completion and classifies how they ended.
///
/// The runner holds no per-job state: every call to [`JobRunner::run`] gets its own child process,
/// its own deadline and its own output readers, so the runner can be cloned freely and shared
/// between concurrent requests.
#[derive(Clone, Debug, Default)]
pub struct JobRunner {
    config: Arc<RunnerConfig>,
}

impl JobRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Runs a job and waits for it to terminate.
    ///
    /// Returns `Err` only when no outcome exists: the `JobSpec` is invalid, the executable could not be
    /// launched, or waiting on the process failed. Timeouts and non-zero exits are reported in
    /// the [`JobReport`].
    pub async fn run(&self, spec: JobSpec) -> Result<JobReport> {
        spec.validate()?;
        let job_id = Uuid::new_v4();
        let span = info_span!("job", id = %job_id);
        async move {
            let deadline = spec.timeout().or(self.config.default_timeout);
            info!(command = %spec.display_command(), ?deadline, "launching job");

            let worker = WorkerHandle::spawn(&spec, &self.config.base_envs, deadline).map_err(
                |source| Error::Launch {
                    program: spec.program().to_string(),
                    source,
                },
            )?;
            let pid = worker.pid();
            let finished = worker.wait().await?;

            let outcome = JobOutcome::classify(finished.termination, finished.deadline_elapsed);
            debug!(stdout = %String::from_utf8_lossy(&finished.stdout), "job stdout");
            debug!(stderr = %String::from_utf8_lossy(&finished.stderr), "job stderr");
            match outcome {
                JobOutcome::Succeeded => {
                    info!(elapsed = ?finished.elapsed, "job completed successfully")
                }
                _ => warn!(
                    elapsed = ?finished.elapsed,
                    termination = ?finished.termination,
                    %outcome,
                    "job did not succeed"
                ),
            }

            Ok(JobReport {
                job_id,
                pid,
                outcome,
                termination: finished.termination,
                deadline_elapsed: finished.deadline_elapsed,
                stdout: finished.stdout,
                stderr: finished.stderr,
                elapsed: finished.elapsed,
            })
        }
        .instrument(span)
        .await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::events::Termination;
    use std::time::Instant;

    fn sh(script: &str) -> JobSpec {
        JobSpec::new(["sh", "-c", script])
    }

    /// Zombies count as gone: a reparented orphan may never be reaped inside a container.
    fn process_exists(pid: u32) -> bool {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => !stat
                .rsplit_once(')')
                .map(|(_, rest)| rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
            Err(_) if std::path::Path::new("/proc/self").exists() => false,
            Err(_) => kill(Pid::from_raw(pid as i32), None).is_ok(),
        }
    }

    async fn wait_until_gone(pid: u32) -> bool {
        for _ in 0..50 {
            if !process_exists(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[tokio::test]
    async fn immediate_exit_without_timeout_succeeds() {
        let report = JobRunner::default().run(sh("exit 0")).await.expect("run");
        assert_eq!(report.outcome, JobOutcome::Succeeded);
        assert!(!report.deadline_elapsed);
    }

    #[tokio::test]
    async fn nonzero_exit_codes_are_failures() {
        let runner = JobRunner::default();
        for code in [1, 2, 9, 42, 137] {
            let report = runner.run(sh(&format!("exit {}", code))).await.expect("run");
            assert_eq!(report.outcome, JobOutcome::Failed { code });
            assert_eq!(report.termination, Termination::Exited { code });
        }
    }

    #[tokio::test]
    async fn timeout_kills_the_process() {
        let started = Instant::now();
        let spec = JobSpec::new(["sleep", "5"]).with_timeout(Duration::from_millis(300));
        let report = JobRunner::default().run(spec).await.expect("run");
        assert_eq!(report.outcome, JobOutcome::TimedOut);
        assert!(report.deadline_elapsed);
        assert!(started.elapsed() < Duration::from_secs(4));
        let pid = report.pid.expect("pid");
        assert!(!process_exists(pid), "process {} still running", pid);
    }

    #[tokio::test]
    async fn timeout_takes_down_the_whole_process_group() {
        let spec = sh("sleep 5 & echo $!; wait").with_timeout(Duration::from_millis(500));
        let report = JobRunner::default().run(spec).await.expect("run");
        assert_eq!(report.outcome, JobOutcome::TimedOut);
        let grandchild: u32 = String::from_utf8_lossy(&report.stdout)
            .trim()
            .parse()
            .expect("grandchild pid");
        assert!(wait_until_gone(grandchild).await, "grandchild {} survived", grandchild);
    }

    #[tokio::test]
    async fn generous_timeout_has_no_effect() {
        let runner = JobRunner::default();
        let untimed = runner.run(sh("sleep 0.1; exit 3")).await.expect("run");
        let timed = runner
            .run(sh("sleep 0.1; exit 3").with_timeout(Duration::from_secs(10)))
            .await
            .expect("run");
        assert_eq!(untimed.outcome, JobOutcome::Failed { code: 3 });
        assert_eq!(timed.outcome, untimed.outcome);
        assert!(!timed.deadline_elapsed);
    }

    #[tokio::test]
    async fn self_inflicted_kill_signal_maps_to_timeout() {
        let report = JobRunner::default().run(sh("kill -9 $$")).await.expect("run");
        assert_eq!(report.termination, Termination::Killed { signal: 9 });
        assert_eq!(report.outcome, JobOutcome::TimedOut);
        assert!(!report.deadline_elapsed);
    }

    #[tokio::test]
    async fn other_signals_fail_with_negated_signal() {
        let report = JobRunner::default().run(sh("kill -TERM $$")).await.expect("run");
        assert_eq!(report.outcome, JobOutcome::Failed { code: -15 });
    }

    #[tokio::test]
    async fn output_is_captured_and_large_output_does_not_deadlock() {
        let spec = sh("head -c 1000000 /dev/zero; echo oops 1>&2")
            .with_timeout(Duration::from_secs(10));
        let report = JobRunner::default().run(spec).await.expect("run");
        assert_eq!(report.outcome, JobOutcome::Succeeded);
        assert_eq!(report.stdout.len(), 1_000_000);
        assert_eq!(&report.stderr[..], b"oops\n");
    }

    #[tokio::test]
    async fn environment_and_working_directory_are_applied() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = JobRunner::new(RunnerConfig {
            base_envs: vec![
                ("TVHEADLESS".into(), "base".into()),
                ("KEEP".into(), "kept".into()),
            ],
            default_timeout: None,
        });
        let spec = sh("printf '%s %s %s' \"$TVHEADLESS\" \"$KEEP\" \"$(pwd)\"")
            .with_dir(dir.path())
            .with_env("TVHEADLESS", "true");
        let report = runner.run(spec).await.expect("run");
        let cwd = dir.path().canonicalize().expect("canonical");
        assert_eq!(
            String::from_utf8_lossy(&report.stdout),
            format!("true kept {}", cwd.display())
        );
    }

    #[tokio::test]
    async fn default_timeout_applies_when_spec_has_none() {
        let runner = JobRunner::new(RunnerConfig {
            base_envs: Envs::new(),
            default_timeout: Some(Duration::from_millis(200)),
        });
        let report = runner.run(JobSpec::new(["sleep", "5"])).await.expect("run");
        assert_eq!(report.outcome, JobOutcome::TimedOut);
    }

    #[tokio::test]
    async fn missing_executable_is_a_launch_error() {
        let spec = JobSpec::new(["/nonexistent/definitely-not-a-tool"]);
        let err = JobRunner::default().run(spec).await.unwrap_err();
        assert!(matches!(err, Error::Launch { .. }), "{:?}", err);
    }

    #[tokio::test]
    async fn concurrent_jobs_keep_independent_deadlines() {
        let runner = JobRunner::default();
        let slow = runner.run(JobSpec::new(["sleep", "5"]).with_timeout(Duration::from_millis(300)));
        let fast = runner.run(sh("sleep 0.5").with_timeout(Duration::from_secs(10)));
        let (slow, fast) = tokio::join!(slow, fast);
        assert_eq!(slow.expect("slow").outcome, JobOutcome::TimedOut);
        assert_eq!(fast.expect("fast").outcome, JobOutcome::Succeeded);
    }

    #[tokio::test]
    async fn dropping_the_run_future_kills_the_child() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pidfile = dir.path().join("pid");
        let spec = sh(&format!("echo $$ > {}; exec sleep 5", pidfile.display()));
        let runner = JobRunner::default();
        let abandoned = tokio::time::timeout(Duration::from_millis(500), runner.run(spec)).await;
        assert!(abandoned.is_err());

        let pid: u32 = std::fs::read_to_string(&pidfile)
            .expect("pidfile")
            .trim()
            .parse()
            .expect("pid");
        assert!(wait_until_gone(pid).await, "abandoned job {} is still running", pid);
    }
}
