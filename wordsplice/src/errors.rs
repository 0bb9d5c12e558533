//! Definition of errors.

use std::path::PathBuf;

pub type Result<T, E = WordspliceError> = core::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum WordspliceError {
    /// The model data is corrupted or does not match the expected format.
    #[error("InvalidModelError: {0}")]
    InvalidModel(String),

    /// A training parameter is out of range.
    #[error("InvalidArgumentError: {arg}: {msg}")]
    InvalidArgument {
        /// Name of the argument.
        arg: &'static str,

        /// Error message.
        msg: String,
    },

    /// The model type name or tag is not registered.
    #[error("unknown model type: {0}")]
    UnknownModelType(String),

    /// A corpus document could not be read.
    #[error("failed to read corpus entry {path:?}: {source}")]
    Corpus {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Decode(#[from] bincode::error::DecodeError),

    #[error(transparent)]
    Encode(#[from] bincode::error::EncodeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl WordspliceError {
    pub(crate) fn invalid_model<S>(msg: S) -> Self
    where
        S: Into<String>,
    {
        Self::InvalidModel(msg.into())
    }

    pub(crate) fn invalid_argument<S>(arg: &'static str, msg: S) -> Self
    where
        S: Into<String>,
    {
        Self::InvalidArgument {
            arg,
            msg: msg.into(),
        }
    }

    pub(crate) fn corpus<P>(path: P, source: std::io::Error) -> Self
    where
        P: Into<PathBuf>,
    {
        Self::Corpus {
            path: path.into(),
            source,
        }
    }
}
