use std::time::Duration;

use fernbook_core::{CoreError, FieldGroup};

/// A failed call to the generative text service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    /// HTTP status, when the service answered at all.
    pub status: Option<u16>,
    /// Service-reported message, or a description of the network failure.
    pub message: String,
}

impl TransportError {
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }
}

/// Terminal failure of a structured-generation call, raised once every tier is exhausted.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("No model output")]
    NoModelOutput,

    #[error("{0}")]
    Transport(#[from] TransportError),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("payload does not match schema: {0}")]
    Payload(#[source] serde_json::Error),
}

/// Failure of a record refresh.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] CoreError),

    #[error("{group} generation failed: {source}")]
    Generation {
        group: FieldGroup,
        #[source]
        source: GenerationError,
    },
}
