use clap::{ArgEnum, Args, Parser, Subcommand};
use std::path::PathBuf;

/// Upload binaries to an analysis server and download the exported results
#[derive(Debug, Parser)]
#[clap(name = "analysis-cli", version)]
pub struct ArgParser {
    /// Base URL of the server
    #[clap(
        short = 's',
        long = "server",
        env = "ANALYSIS_SERVER",
        default_value = "http://127.0.0.1:8080"
    )]
    pub server: String,
    /// The sub-command to use
    #[clap(subcommand)]
    pub sub_command: SubCommand,
}

#[derive(Clone, Debug, PartialEq, Subcommand)]
pub enum SubCommand {
    /// export a binary to BinExport
    Export(ExportArgs),
    /// export a binary to a pickle
    Pickle(ExportArgs),
    /// export a binary to both formats, downloaded as a .tar.gz
    BindiffPickle(ExportArgs),
    /// diff two BinExport files
    Compare {
        /// primary BinExport file
        primary: PathBuf,
        /// secondary BinExport file
        secondary: PathBuf,
        /// seconds the server lets the differ run
        #[clap(long)]
        timeout: Option<f64>,
        /// where to save the result (defaults to the server's file name)
        #[clap(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Debug, PartialEq, Args)]
pub struct ExportArgs {
    /// binary to analyse
    pub file: PathBuf,
    /// seconds the server lets the disassembler run
    #[clap(long)]
    pub timeout: Option<f64>,
    /// architecture; the server picks a per-route default when omitted
    #[clap(long, arg_enum)]
    pub arch: Option<Arch>,
    /// where to save the result (defaults to the server's file name)
    #[clap(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ArgEnum)]
pub enum Arch {
    X86,
    X64,
}

impl Arch {
    pub fn is_64_bit(self) -> bool {
        self == Arch::X64
    }
}
