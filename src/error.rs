use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the training harness
#[derive(Error, Debug)]
pub enum Error {
    #[error("requested a batch of {requested} transitions but only {available} are stored")]
    InsufficientData { requested: usize, available: usize },

    #[error("gaussian head produced only non-positive draws after {attempts} attempts")]
    DegenerateSample { attempts: usize },

    #[error("covariance is not positive definite: {0}")]
    Covariance(String),

    #[error("shape mismatch: {0}")]
    Shape(String),

    // Collaborator failures are passed through untouched
    #[error(transparent)]
    Environment(Box<dyn std::error::Error + Send + Sync>),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encode(#[from] postcard::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] burn::record::RecorderError),

    #[error("chart error: {0}")]
    Chart(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub fn environment<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Environment(Box::new(error))
    }
}
