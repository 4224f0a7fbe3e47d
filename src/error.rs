//! Error types for busmatrix

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BusMatrixError {
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error in {}, line {line_number}: {reason} ({line:?})", path.display())]
    Parse {
        path: PathBuf,
        line_number: usize,
        line: String,
        reason: String,
    },

    #[error("Equivalence class {0} is not in the EC matrix")]
    UnknownEc(u32),

    #[error("Equivalence class {ec} refers to transcript {transcript}, but only {ntranscripts} transcripts are known")]
    UnknownTranscript { ec: u32, transcript: u32, ntranscripts: usize },

    #[error("Matrix shape {shape:?} doesnt match {ngenes} genes x {ncells} cells")]
    ShapeMismatch { shape: (usize, usize), ngenes: usize, ncells: usize },

    #[error("Unsorted input: {current} -> {next}")]
    UnsortedInput { current: String, next: String },
}

pub type Result<T> = std::result::Result<T, BusMatrixError>;

impl BusMatrixError {
    /// Wraps an io error, turning `NotFound` into [`BusMatrixError::FileNotFound`]
    pub fn from_io(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            BusMatrixError::FileNotFound(path.to_path_buf())
        } else {
            BusMatrixError::Io { path: path.to_path_buf(), source }
        }
    }

    pub(crate) fn parse(path: &Path, line_number: usize, line: &str, reason: impl Into<String>) -> Self {
        BusMatrixError::Parse {
            path: path.to_path_buf(),
            line_number,
            line: line.to_string(),
            reason: reason.into(),
        }
    }

    /// Errors that lenient counting may skip over instead of aborting
    pub fn is_record_level(&self) -> bool {
        matches!(self, BusMatrixError::Parse { .. } | BusMatrixError::UnknownEc(_))
    }
}
