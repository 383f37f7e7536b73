//! The import -> transform -> export pipeline.

pub mod exporters;
pub mod importers;
pub mod properties;
pub mod transform;
