use thiserror::Error;

/// Errors from conversation-store operations (used by the store trait in
/// turnflow-core).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Errors from collaborator calls (normalizer, classifier, planner).
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("{collaborator} failed: {message}")]
    Failed {
        collaborator: &'static str,
        message: String,
    },

    #[error("{collaborator} returned an unusable result: {message}")]
    InvalidResult {
        collaborator: &'static str,
        message: String,
    },

    #[error("{collaborator} timed out")]
    Timeout { collaborator: &'static str },
}

impl CollaboratorError {
    pub fn failed(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self::Failed {
            collaborator,
            message: message.into(),
        }
    }
}
