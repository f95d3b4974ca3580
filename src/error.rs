use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading the model bundle or classifying text.
#[derive(Debug, Error)]
pub enum Error {
    /// The category granularity flag is neither `bc` nor `mg`.
    #[error("ntee_type must be 'bc' (broad category) or 'mg' (major group), got '{0}'")]
    InvalidGranularity(String),

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `config.json` is malformed or describes an unsupported model.
    #[error("model config error: {0}")]
    Config(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(tokenizers::Error),

    #[error("pickle error: {0}")]
    Pickle(String),

    /// The label-encoder artifact decoded, but its classes are unusable.
    #[error("label encoder error: {0}")]
    LabelEncoder(String),

    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<tokenizers::Error> for Error {
    fn from(err: tokenizers::Error) -> Self {
        Self::Tokenizer(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
