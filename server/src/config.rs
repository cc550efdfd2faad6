use clap::Parser;
use joblib::{RunnerConfig, WorkspaceConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// HTTP front end running disassembler and diffing jobs on uploaded binaries
#[derive(Debug, Parser)]
#[clap(name = "analysis-server", version)]
pub struct ServerArgs {
    /// Address to listen on
    #[clap(long, env = "ANALYSIS_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Directory holding the idal / idal64 executables
    #[clap(long, env = "ANALYSIS_IDA_DIR", default_value = "/ida")]
    pub ida_dir: PathBuf,

    /// Prefix under which packages/bindiff/ida/*.py export scripts are installed
    #[clap(long, env = "ANALYSIS_SCRIPT_PREFIX", default_value = "/home")]
    pub script_prefix: PathBuf,

    /// BinDiff installation directory (contains bin/differ)
    #[clap(long, env = "ANALYSIS_BINDIFF_DIR", default_value = "/opt/zynamics/BinDiff")]
    pub bindiff_dir: PathBuf,

    /// Directory receiving the tool's own log files
    #[clap(long, env = "ANALYSIS_TOOL_LOG_DIR", default_value = "/logs")]
    pub tool_log_dir: PathBuf,

    /// Also append the service log to <DIR>/<hostname>-analysis-service.log
    #[clap(long, env = "ANALYSIS_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Parent directory for per-request workspaces (defaults to the system temp dir)
    #[clap(long, env = "ANALYSIS_WORKSPACE_ROOT")]
    pub workspace_root: Option<PathBuf>,

    /// Timeout in seconds applied when a request does not send one
    #[clap(long, env = "ANALYSIS_DEFAULT_TIMEOUT")]
    pub default_timeout: Option<f64>,

    /// Largest accepted request body, in MiB
    #[clap(long, env = "ANALYSIS_MAX_UPLOAD_MB", default_value = "1024")]
    pub max_upload_mb: usize,

    /// Log filter used when RUST_LOG is unset
    #[clap(long, env = "ANALYSIS_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Locations of the external tools.
#[derive(Clone, Debug)]
pub struct ToolConfig {
    pub ida_dir: PathBuf,
    pub script_prefix: PathBuf,
    pub bindiff_dir: PathBuf,
    pub tool_log_dir: PathBuf,
}

/// Everything the service needs, resolved from the command line.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub tools: ToolConfig,
    pub runner: RunnerConfig,
    pub workspace: WorkspaceConfig,
    pub max_upload_bytes: usize,
}

impl ServerArgs {
    pub fn service_config(&self) -> anyhow::Result<ServiceConfig> {
        let default_timeout = match self.default_timeout {
            None => None,
            Some(seconds) => match Duration::try_from_secs_f64(seconds) {
                Ok(timeout) if !timeout.is_zero() => Some(timeout),
                _ => anyhow::bail!("invalid --default-timeout {}: must be positive", seconds),
            },
        };
        Ok(ServiceConfig {
            tools: ToolConfig {
                ida_dir: self.ida_dir.clone(),
                script_prefix: self.script_prefix.clone(),
                bindiff_dir: self.bindiff_dir.clone(),
                tool_log_dir: self.tool_log_dir.clone(),
            },
            runner: RunnerConfig {
                base_envs: Vec::new(),
                default_timeout,
            },
            workspace: WorkspaceConfig {
                root: self.workspace_root.clone(),
                ..WorkspaceConfig::default()
            },
            max_upload_bytes: self.max_upload_mb.saturating_mul(1024 * 1024),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_tool_layout() {
        let args = ServerArgs::try_parse_from(["analysis-server"]).expect("parse");
        let config = args.service_config().expect("config");
        assert_eq!(config.tools.ida_dir, PathBuf::from("/ida"));
        assert_eq!(config.tools.bindiff_dir, PathBuf::from("/opt/zynamics/BinDiff"));
        assert_eq!(config.runner.default_timeout, None);
        assert_eq!(config.max_upload_bytes, 1024 * 1024 * 1024);
    }

    #[test]
    fn default_timeout_is_validated() {
        let args = ServerArgs::try_parse_from(["analysis-server", "--default-timeout=-1"])
            .expect("parse");
        assert!(args.service_config().is_err());

        for rejected in ["0", "0.0", "NaN"] {
            let flag = format!("--default-timeout={}", rejected);
            let args =
                ServerArgs::try_parse_from(["analysis-server", flag.as_str()]).expect("parse");
            assert!(args.service_config().is_err(), "{}", rejected);
        }

        let args = ServerArgs::try_parse_from(["analysis-server", "--default-timeout", "2.5"])
            .expect("parse");
        assert_eq!(
            args.service_config().unwrap().runner.default_timeout,
            Some(Duration::from_millis(2500))
        );
    }
}
