//! Conversion of test execution results into Polarion importer XML.
//!
//! Five input formats (CSV, SQLite, JUnit XML, JSON and Ostriz telemetry
//! feeds) are normalized into the uniform [`domain::ImportedData`]
//! structure, run through a per-project transform layer and serialized into
//! one of the three importer documents: XUnit results, testcase definitions
//! or requirements.

pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

pub use crate::config::Config;
pub use crate::core::exporters::{RequirementExport, TestcaseExport, XunitExport};
pub use crate::core::importers::do_import;
pub use crate::domain::{ImportedData, Record};
pub use crate::utils::error::{DumpError, Result};
