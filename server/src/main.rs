mod artifact;
mod config;
mod error;
mod services;

use clap::Parser;
use config::ServerArgs;
use services::toolservice::{self, AnalysisService};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ServerArgs::parse();
    // keep the guard alive so buffered file output is flushed on exit
    let _guard = init_logging(&args)?;

    let config = args.service_config()?;
    if let Err(err) = std::fs::create_dir_all(&config.tools.tool_log_dir) {
        warn!(dir = %config.tools.tool_log_dir.display(), %err, "tool log directory unavailable");
    }
    let service = Arc::new(AnalysisService::new(&config));
    let app = toolservice::router(service, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    info!(
        addr = %listener.local_addr()?,
        ida = %config.tools.ida_dir.display(),
        bindiff = %config.tools.bindiff_dir.display(),
        "listening"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

fn init_logging(args: &ServerArgs) -> anyhow::Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&args.log_level))?;
    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::never(dir, log_file_name());
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();
    if let Some(dir) = &args.log_dir {
        info!(file = %Path::new(dir).join(log_file_name()).display(), "service log file");
    }
    Ok(guard)
}

fn log_file_name() -> String {
    format!("{}-analysis-service.log", hostname())
}

#[cfg(unix)]
fn hostname() -> String {
    nix::unistd::gethostname()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string())
}

#[cfg(not(unix))]
fn hostname() -> String {
    std::env::var("COMPUTERNAME").unwrap_or_else(|_| "localhost".to_string())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(err) => {
            warn!(error = %err, "cannot listen for ctrl-c, running until killed");
            std::future::pending::<()>().await
        }
    }
}
