//! I/O modules for reading swath files

pub mod swath_reader;

pub use swath_reader::{JsonSwathSource, SwathRecord, SwathSource};
