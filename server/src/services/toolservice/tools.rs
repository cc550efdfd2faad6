use crate::config::ToolConfig;
use joblib::template::{self, CommandTemplate};
use std::path::Path;

/// The IDA based export flavours.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportKind {
    BinExport,
    BinExportPickle,
    Pickle,
}

impl ExportKind {
    pub fn script(&self) -> &'static str {
        match self {
            ExportKind::BinExport => "export_bindiff.py",
            ExportKind::BinExportPickle => "export_bindiff_pickle.py",
            ExportKind::Pickle => "export_pickle.py",
        }
    }

    /// Files the script writes, in the order it expects them on its command line.
    pub fn outputs(&self) -> &'static [&'static str] {
        match self {
            ExportKind::BinExport => &["output.BinExport"],
            ExportKind::BinExportPickle => &["output.BinExport", "output.pickle"],
            ExportKind::Pickle => &["output.pickle"],
        }
    }

    pub fn default_64_bit(&self) -> bool {
        !matches!(self, ExportKind::Pickle)
    }

    /// Extension appended to the uploaded file's name for the download.
    pub fn download_extension(&self) -> &'static str {
        match self {
            ExportKind::BinExport => "BinExport",
            ExportKind::BinExportPickle => "tar.gz",
            ExportKind::Pickle => "pickle",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportKind::BinExportPickle => "application/gzip",
            _ => "application/binary",
        }
    }
}

fn literal(path: &Path) -> String {
    template::escape(&path.to_string_lossy())
}

/// `idal[64] -S<script> "<out>"... -B <input>` run headless, logging to a timestamped file.
pub fn ida_export(tools: &ToolConfig, kind: ExportKind, is_64_bit: bool) -> joblib::Result<CommandTemplate> {
    let ida = tools.ida_dir.join(if is_64_bit { "idal64" } else { "idal" });
    let script = tools
        .script_prefix
        .join("packages/bindiff/ida")
        .join(kind.script());
    let mut script_arg = format!("-S{}", literal(&script));
    for output in kind.outputs() {
        script_arg.push_str(&format!(" \"{{out:{}}}\"", output));
    }
    let log_name = chrono::Local::now()
        .format("ida_%Y-%m-%d_%H-%M-%S%.6f.log")
        .to_string();
    let ida_log = tools.tool_log_dir.join(log_name);

    CommandTemplate::parse([literal(&ida), script_arg, "-B".to_string(), "{input}".to_string()])?
        .with_env("TVHEADLESS", "true")?
        .with_env("IDALOG", &literal(&ida_log))
}

/// Directory the differ writes its single result file into.
pub const DIFF_OUTPUT_DIR: &str = "output";

/// `differ --primary <p> --secondary <s> --output_dir <dir>`, run from inside the output dir.
pub fn bindiff_compare(tools: &ToolConfig) -> joblib::Result<CommandTemplate> {
    let differ = tools.bindiff_dir.join("bin/differ");
    let output_dir = format!("{{dir:{}}}", DIFF_OUTPUT_DIR);
    CommandTemplate::parse([
        literal(&differ),
        "--primary".to_string(),
        "{input:primary}".to_string(),
        "--secondary".to_string(),
        "{input:secondary}".to_string(),
        "--output_dir".to_string(),
        output_dir.clone(),
    ])?
    .with_dir(&output_dir)
}
