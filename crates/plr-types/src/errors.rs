use thiserror::Error;

/// Main error type for the PLR trainer
#[derive(Error, Debug)]
pub enum PlrError {
    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Training error: {0}")]
    Training(#[from] TrainingError),

    #[error("Tracking error: {0}")]
    Tracking(#[from] TrackingError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Dataset download and decoding errors
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Data source not found: {0}")]
    SourceNotFound(String),

    #[error("Download of {url} failed: {message}")]
    DownloadFailed { url: String, message: String },

    #[error("All mirrors failed for {file}")]
    MirrorsExhausted { file: String },

    #[error("Invalid data format: {message}")]
    InvalidFormat { message: String },

    #[error("Data corruption detected: {message}")]
    Corruption { message: String },

    #[error("Image/label count mismatch: {images} images, {labels} labels")]
    LengthMismatch { images: usize, labels: usize },

    #[error("Dataset split '{split}' is empty")]
    EmptyDataset { split: String },
}

/// Model training and evaluation errors
#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("Non-finite training loss {value} at epoch {epoch}, batch {batch}")]
    NonFiniteLoss { epoch: usize, batch: usize, value: f64 },

    #[error("Evaluation saw no samples")]
    EmptyEvaluation,

    #[error("Checkpoint error: {message}")]
    Checkpoint { message: String },
}

/// Experiment tracking errors
#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("No API key configured for online tracking")]
    MissingApiKey,

    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    #[error("Request to {endpoint} failed: {message}")]
    RequestFailed { endpoint: String, message: String },

    #[error("Unexpected response from {endpoint}: {message}")]
    InvalidResponse { endpoint: String, message: String },

    #[error("Run already finished: {run_id}")]
    RunFinished { run_id: String },

    #[error("Code snapshot failed: {message}")]
    Snapshot { message: String },
}

/// Hyperparameter search errors
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Search space is empty")]
    EmptySpace,

    #[error("Invalid range for {name}: low {low}, high {high}")]
    InvalidRange { name: String, low: f64, high: f64 },

    #[error("Unknown parameter: {name}")]
    UnknownParameter { name: String },

    #[error("Parameter {name} is not a {expected}")]
    TypeMismatch { name: String, expected: String },

    #[error("Unknown sampler: {name}")]
    UnknownSampler { name: String },

    #[error("No completed trials")]
    NoCompletedTrials,
}

/// Result type alias for PLR operations
pub type PlrResult<T> = Result<T, PlrError>;
