/// Shared error type used across all context-engine crates.
///
/// Variants track the error kinds enumerated in the core design doc
/// (transient/malformed-output/directive-loop/persistence/not-found/conflict)
/// rather than wrapping every downstream library error 1:1.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transient: {0}")]
    Transient(String),

    #[error("malformed model output: {0}")]
    MalformedModelOutput(String),

    #[error("directive loop bound reached")]
    DirectiveLoopBound,

    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
