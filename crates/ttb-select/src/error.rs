//! Error types for bundle selection.
//!
//! [`SelectError`] covers only the conditions that abort a run: bad
//! configuration inputs, I/O failures on sources or required outputs, and
//! tree traversal failures. Everything recoverable (name conflicts, clashes,
//! patch failures, search ambiguity) is counted and reported instead.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result alias used throughout the engine.
pub type Result<T, E = SelectError> = std::result::Result<T, E>;

/// Fatal errors returned by the selection engine.
#[derive(Debug, Error)]
pub enum SelectError {
    /// An input required for correct operation is unreadable or malformed
    /// (ignore file, search-order file, diff glob, roots, output directory).
    #[error("config error in {}: {message}", path.display())]
    Config {
        /// The offending input.
        path: PathBuf,
        /// What is wrong with it, with a line number when known.
        message: String,
    },

    /// Reading a source file or writing a required output failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// The file being read or written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Walking the overlay or base tree failed.
    #[error("tree walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    /// An overlay file was offered after base-tree processing had started.
    #[error("overlay file {} offered after base-tree selection began", path.display())]
    PhaseOrder {
        /// The late overlay file.
        path: PathBuf,
    },
}

impl SelectError {
    pub(crate) fn config(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Config {
            path: path.into(),
            message: message.into(),
        }
    }

    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_owned(),
            source,
        }
    }

    /// Is this a configuration problem (as opposed to a runtime I/O failure)?
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }
}

/// Attach a path to a bare [`std::io::Error`].
pub(crate) trait IoContext<T> {
    fn at(self, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn at(self, path: &Path) -> Result<T> {
        self.map_err(|e| SelectError::io(path, e))
    }
}
