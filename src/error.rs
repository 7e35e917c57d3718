use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReflacError {
    #[error("invalid TRACKINFO line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("TRACKINFO is missing required field {0}")]
    MissingField(&'static str),

    #[error("found {files} audio files in {} but {titles} titles", dir.display())]
    CountMismatch {
        dir: PathBuf,
        files: usize,
        titles: usize,
    },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot tag {}: {source}", path.display())]
    Tag {
        path: PathBuf,
        #[source]
        source: lofty::error::LoftyError,
    },

    #[error("invalid cover {}: {reason}", path.display())]
    InvalidCover { path: PathBuf, reason: String },
}

impl ReflacError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ReflacError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn tag(path: impl Into<PathBuf>, source: lofty::error::LoftyError) -> Self {
        ReflacError::Tag {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(line: usize, reason: impl Into<String>) -> Self {
        ReflacError::Parse {
            line,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReflacError>;
