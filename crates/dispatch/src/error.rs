pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced synchronously when a run is started. Nothing that
/// happens after the run begins is reported through this type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid dispatch input: {message}")]
    InvalidInput { message: String },

    /// The run record could not be created.
    #[error("run log store failed: {message}")]
    Store { message: String },
}

impl Error {
    #[must_use]
    pub fn invalid_input(message: impl std::fmt::Display) -> Self {
        Self::InvalidInput {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn store(message: impl std::fmt::Display) -> Self {
        Self::Store {
            message: message.to_string(),
        }
    }
}
