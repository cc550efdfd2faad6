use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

pub type Envs = Vec<(String, String)>;
pub type JobId = Uuid;
pub type OutputBlob = bytes::Bytes;

/// Immutable description of a single process invocation.
///
/// The first element of the command is the executable; environment overrides are applied on
/// top of the inherited process environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobSpec {
    command: Vec<String>,
    dir: Option<PathBuf>,
    envs: Envs,
    timeout: Option<Duration>,
}

impl JobSpec {
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            dir: None,
            envs: Envs::new(),
            timeout: None,
        }
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn with_envs(mut self, envs: impl IntoIterator<Item = (String, String)>) -> Self {
        self.envs.extend(envs);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Checks the invariants the runner relies on: a non-empty command and a positive timeout.
    pub fn validate(&self) -> Result<()> {
        match self.command.first() {
            None => return Err(Error::InvalidSpec("command is empty")),
            Some(program) if program.is_empty() => {
                return Err(Error::InvalidSpec("executable path is empty"))
            }
            Some(_) => {}
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(Error::InvalidSpec("timeout must be positive"));
        }
        Ok(())
    }

    pub fn program(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or_default()
    }

    pub fn args(&self) -> &[String] {
        self.command.get(1..).unwrap_or_default()
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn envs(&self) -> &[(String, String)] {
        &self.envs
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The command line quoted for log output.
    pub fn display_command(&self) -> String {
        self.command
            .iter()
            .map(|part| format!("'{}'", part))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_command_is_rejected() {
        let spec = JobSpec::new(Vec::<String>::new());
        assert!(matches!(spec.validate(), Err(Error::InvalidSpec(_))));
        assert_eq!(spec.program(), "");
        assert!(spec.args().is_empty());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let spec = JobSpec::new(["true"]).with_timeout(Duration::ZERO);
        assert!(matches!(spec.validate(), Err(Error::InvalidSpec(_))));
    }

    #[test]
    fn builder_keeps_program_and_args_apart() {
        let spec = JobSpec::new(["sh", "-c", "exit 0"])
            .with_dir("/tmp")
            .with_env("TVHEADLESS", "true")
            .with_timeout(Duration::from_secs(3));
        spec.validate().expect("valid spec");
        assert_eq!(spec.program(), "sh");
        assert_eq!(spec.args(), ["-c".to_string(), "exit 0".to_string()]);
        assert_eq!(spec.dir(), Some(Path::new("/tmp")));
        assert_eq!(spec.envs(), [("TVHEADLESS".to_string(), "true".to_string())]);
        assert_eq!(spec.display_command(), "'sh' '-c' 'exit 0'");
    }
}
