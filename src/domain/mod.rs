pub mod model;

pub use model::{ImportedData, LookupMethod, Record, Verdict};
