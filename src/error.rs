//! Error types for the olive oil forecasting platform

use thiserror::Error;

/// Result type alias for platform operations
pub type Result<T> = std::result::Result<T, ForecastError>;

#[derive(Error, Debug)]
pub enum ForecastError {

    // =============================
    // Pipeline Errors
    // =============================

    #[error("Ingestion error: {0}")]
    Ingestion(String),

    #[error("Missing column: {0}")]
    MissingColumn(String),

    #[error("Panel error: {0}")]
    Panel(String),

    #[error("Insufficient data for {segment}: required {required}, got {actual}")]
    InsufficientData {
        segment: String,
        required: usize,
        actual: usize,
    },

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Invalid forecast query: {0}")]
    InvalidQuery(String),

    #[error("Storage error: {0}")]
    Storage(String),

    // =============================
    // Conversational Errors
    // =============================

    #[error("Tool error: {0}")]
    ToolError(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid tool input: {0}")]
    InvalidToolInput(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    // =============================
    // Infrastructure Errors
    // =============================

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Date parse error: {0}")]
    DateError(#[from] chrono::ParseError),

    #[error("SQL error: {0}")]
    SqlError(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
