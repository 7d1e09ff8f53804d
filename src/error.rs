/// Error types shared by the index, discovery and thumbnail code
///
/// Per-file failures (I/O, decode, unsupported format, a single failed row)
/// are reported to the caller of that one file and never abort a batch.
/// Setup failures (opening the database, preparing the schema, opening the
/// scan root) are terminal for the whole operation.
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },

    #[error("unsupported image format {extension:?} for {}", path.display())]
    UnsupportedFormat { path: PathBuf, extension: String },

    #[error("failed to encode thumbnail for {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("database setup failed: {0}")]
    StoreSetup(#[source] rusqlite::Error),

    #[error("database error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("invalid tag color {0:?}, expected #RRGGBB")]
    InvalidColor(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("malformed options: {0}")]
    Options(#[from] serde_json::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation exceeded its deadline")]
    TimedOut,

    #[error("worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error("index connection lock poisoned")]
    Poisoned,
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn decode(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::Decode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// True for failures scoped to a single file or row. Batch operations log
    /// these and move on to the next item.
    pub fn is_per_file(&self) -> bool {
        matches!(
            self,
            Error::Io { .. }
                | Error::Decode { .. }
                | Error::UnsupportedFormat { .. }
                | Error::Encode { .. }
                | Error::Store(_)
        )
    }

    /// True when the thumbnail layer should show a placeholder instead.
    pub fn wants_placeholder(&self) -> bool {
        matches!(
            self,
            Error::Io { .. } | Error::Decode { .. } | Error::UnsupportedFormat { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_file_classification() {
        let io = Error::io("/a/b.png", std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(io.is_per_file());
        assert!(io.wants_placeholder());

        let setup = Error::StoreSetup(rusqlite::Error::InvalidQuery);
        assert!(!setup.is_per_file());
        assert!(!Error::Cancelled.is_per_file());
        assert!(!Error::Cancelled.wants_placeholder());
    }

    #[test]
    fn test_messages_name_the_file() {
        let err = Error::UnsupportedFormat {
            path: PathBuf::from("/photos/clip.avi"),
            extension: "avi".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("/photos/clip.avi"));
        assert!(message.contains("avi"));
    }
}
