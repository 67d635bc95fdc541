use std::path::PathBuf;

/// Errors raised by the record model, ruleset loading and storage.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("invalid ruleset: {0}")]
    InvalidRuleset(String),

    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("invalid record id '{0}'")]
    InvalidRecordId(String),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CoreError::Io {
            path: path.into(),
            source,
        }
    }
}
