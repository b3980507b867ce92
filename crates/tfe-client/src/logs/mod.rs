//! Tailing of remotely generated job logs.

mod reader;
mod source;

pub use reader::LogReader;
pub use source::{CompletionProbe, HttpLogSource, LogSource};
