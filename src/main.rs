use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use clap::Parser;

use polarion_dump::config::cli::{CliArgs, ExportKind};
use polarion_dump::core::importers::{self, dbtools};
use polarion_dump::utils::logger;
use polarion_dump::{Config, DumpError, RequirementExport, Result, TestcaseExport, XunitExport};

fn parse_older_than(raw: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| {
            chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(|date| date.and_hms_opt(0, 0, 0).unwrap_or_default())
        })
        .map_err(|_| DumpError::ConfigError {
            message: format!("cannot parse '{raw}' as a timestamp (YYYY-MM-DD HH:MM:SS)"),
        })
}

fn is_sqlite_input(input: &str) -> bool {
    Path::new(input)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| dbtools::SQLITE_EXT.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn run(args: &CliArgs) -> Result<PathBuf> {
    let config = Config::from_toml_file(&args.config_file)?;

    let older_than = args
        .older_than
        .as_deref()
        .map(parse_older_than)
        .transpose()?;

    let data = importers::do_import(&args.input_file, older_than)?;
    tracing::info!(
        "Imported {} records from '{}'",
        data.results.len(),
        args.input_file
    );

    let output = args.output_file.as_deref();
    let written = match args.export {
        ExportKind::Xunit => {
            let testrun_id = args
                .testrun_id
                .clone()
                .or_else(|| data.testrun.clone())
                .or_else(|| config.testrun_id().map(str::to_string))
                .ok_or_else(|| DumpError::MissingTestrunId(args.input_file.clone()))?;

            let mut export = XunitExport::new(&testrun_id, &data, &config);
            let xml = export.export()?;
            export.write_xml(&xml, output)?
        }
        ExportKind::Testcases => {
            let mut export = TestcaseExport::new(&data.results, &config)?;
            let xml = export.export()?;
            TestcaseExport::write_xml(&xml, output)?
        }
        ExportKind::Requirements => {
            let mut export = RequirementExport::new(&data.results, &config);
            let xml = export.export()?;
            RequirementExport::write_xml(&xml, output)?
        }
    };

    if args.mark_exported {
        if is_sqlite_input(&args.input_file) {
            dbtools::mark_exported_sqlite(Path::new(&args.input_file), older_than)?;
            tracing::info!("Marked exported rows in '{}'", args.input_file);
        } else {
            tracing::warn!("--mark-exported only applies to SQLite inputs, ignoring");
        }
    }

    Ok(written)
}

fn main() {
    let args = CliArgs::parse();

    logger::init_cli_logger(args.verbose);

    tracing::info!("Starting polarion-dump CLI");
    if args.verbose {
        tracing::debug!("CLI args: {:?}", args);
    }

    match run(&args) {
        Ok(path) => {
            tracing::info!("Export finished");
            println!("Output saved to: {}", path.display());
        }
        Err(err) => {
            tracing::error!("Export failed: {err}");
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    }
}
