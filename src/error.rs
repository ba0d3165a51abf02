use std::fmt;

use thiserror::Error;

use crate::types::Strand;

/// Errors raised by the splice-event library.
#[derive(Error, Debug)]
pub enum SpliceError {
    /// An interval was built with `end < start` or a non-positive coordinate.
    #[error("invalid range {chromosome}:{start}-{end} (requires end >= start > 0)")]
    InvalidRange {
        chromosome: String,
        start: i64,
        end: i64,
    },

    /// No reference exons for a chromosome/strand. Callers recover from this.
    #[error("no reference annotation for {chromosome} ({strand})")]
    MissingAnnotation { chromosome: String, strand: Strand },

    /// A junction or annotation line did not have the expected shape.
    #[error("line {line_no}: expected {expected}, got '{line}'")]
    UnparsablePattern {
        line_no: usize,
        line: String,
        expected: &'static str,
    },

    /// PSI or extreme-site lookup on a group without members.
    #[error("site group anchored at {anchor} has no members")]
    EmptyGroup { anchor: u64 },

    #[error("I/O error while reading '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, SpliceError>;

/// Returned by [`crate::pipeline::join_all`] when at least one partition failed.
///
/// `completed` keeps the results of every partition that did finish, in
/// partition order, so callers can still inspect them.
pub struct PartialFailure<T> {
    pub partition: String,
    pub source: SpliceError,
    pub failed: usize,
    pub completed: Vec<T>,
}

impl<T> fmt::Debug for PartialFailure<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartialFailure")
            .field("partition", &self.partition)
            .field("source", &self.source)
            .field("failed", &self.failed)
            .field("completed", &self.completed.len())
            .finish()
    }
}

impl<T> fmt::Display for PartialFailure<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} partition(s) failed, first was '{}': {} ({} completed)",
            self.failed,
            self.partition,
            self.source,
            self.completed.len()
        )
    }
}

impl<T> std::error::Error for PartialFailure<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}
