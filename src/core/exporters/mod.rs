//! XML exporters for the three importer queues.

pub mod requirement;
pub mod testcase;
pub mod xunit;

pub use requirement::RequirementExport;
pub use testcase::TestcaseExport;
pub use xunit::XunitExport;
