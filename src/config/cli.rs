use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportKind {
    /// Test results into a <testsuites> document.
    Xunit,
    /// Test case definitions into a <testcases> document.
    Testcases,
    /// Requirements into a <requirements> document.
    Requirements,
}

#[derive(Debug, Parser)]
#[command(name = "polarion-dump")]
#[command(about = "Convert test execution results into Polarion importer XML")]
pub struct CliArgs {
    /// Input file: CSV, SQLite, JUnit XML, JSON or an Ostriz feed (file/URL)
    pub input_file: String,

    /// TOML configuration file
    #[arg(short, long)]
    pub config_file: PathBuf,

    /// Output file or directory; a generated name is used for directories
    #[arg(short, long)]
    pub output_file: Option<PathBuf>,

    /// Testrun id; overrides the id discovered in the input or config
    #[arg(short, long)]
    pub testrun_id: Option<String>,

    #[arg(long, value_enum, default_value = "xunit")]
    pub export: ExportKind,

    /// Only import SQLite rows inserted before this timestamp
    /// (YYYY-MM-DD HH:MM:SS)
    #[arg(long)]
    pub older_than: Option<String>,

    /// Mark imported SQLite rows as exported after a successful export
    #[arg(long)]
    pub mark_exported: bool,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,
}
