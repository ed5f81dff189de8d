use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading or writing `.pts` point files.
///
/// Every parse failure names the file and the 1-based line number.
#[derive(Debug, Error)]
pub enum PtsError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{}: file contains no points", path.display())]
    Empty { path: PathBuf },

    #[error("{}:{line}: expected {expected} fields, found {found}", path.display())]
    FieldCount {
        path: PathBuf,
        line: usize,
        expected: FieldSpec,
        found: usize,
    },

    #[error("{}:{line}: cannot parse {token:?} as {kind}", path.display())]
    InvalidNumber {
        path: PathBuf,
        line: usize,
        token: String,
        kind: &'static str,
    },
}

impl PtsError {
    /// Line number the error points at, if it is a parse error.
    pub fn line(&self) -> Option<usize> {
        match self {
            PtsError::FieldCount { line, .. } | PtsError::InvalidNumber { line, .. } => Some(*line),
            PtsError::Io { .. } | PtsError::Empty { .. } => None,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        PtsError::Io {
            path: path.into(),
            source,
        }
    }
}

/// How many whitespace-separated fields a line must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSpec {
    AtLeast(usize),
    Exactly(usize),
}

impl std::fmt::Display for FieldSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldSpec::AtLeast(n) => write!(f, "at least {}", n),
            FieldSpec::Exactly(n) => write!(f, "exactly {}", n),
        }
    }
}

impl FieldSpec {
    pub fn accepts(self, found: usize) -> bool {
        match self {
            FieldSpec::AtLeast(n) => found >= n,
            FieldSpec::Exactly(n) => found == n,
        }
    }
}
