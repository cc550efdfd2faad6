mod arg_parser;
mod client_cli;

use arg_parser::{ArgParser, ExportArgs, SubCommand};
use client_cli::{ClientCli, JobOptions};

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ArgParser::parse();
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let client = ClientCli::new(&args.server)?;
    let saved = match args.sub_command {
        SubCommand::Export(export) => run_export(&client, "/bindiff/export", export).await?,
        SubCommand::Pickle(export) => run_export(&client, "/pickle/export", export).await?,
        SubCommand::BindiffPickle(export) => {
            run_export(&client, "/bindiff_pickle/export", export).await?
        }
        SubCommand::Compare {
            primary,
            secondary,
            timeout,
            output,
        } => {
            let options = JobOptions {
                timeout,
                is_64_bit: None,
            };
            client
                .compare(&primary, &secondary, &options, output)
                .await?
        }
    };
    println!("Saved {}", saved.display());
    Ok(())
}

async fn run_export(
    client: &ClientCli,
    route: &str,
    args: ExportArgs,
) -> anyhow::Result<std::path::PathBuf> {
    let options = JobOptions {
        timeout: args.timeout,
        is_64_bit: args.arch.map(|arch| arch.is_64_bit()),
    };
    Ok(client
        .export(route, &args.file, &options, args.output)
        .await?)
}
