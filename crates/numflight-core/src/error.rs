//! Error types for numflight.
//!
//! Every failure a client can observe has a kind that survives the trip over
//! the wire: the server answers with a gRPC status code and the client
//! rebuilds the matching [`FlightError`] variant from it.

use thiserror::Error;
use tonic::Status;

/// Main error type for numflight.
#[derive(Debug, Error)]
pub enum FlightError {
    // Codec errors
    #[error("Unsupported element type for column {column}: {data_type}")]
    UnsupportedType { column: String, data_type: String },

    #[error("Cannot encode an empty array map")]
    EmptyInput,

    #[error("Malformed table: {message}")]
    MalformedTable { message: String },

    #[error("Shape {shape:?} does not match {len} elements")]
    InvalidShape { shape: Vec<usize>, len: usize },

    // Envelope errors
    #[error("Invalid command: {message}")]
    InvalidCommand { message: String },

    // Channel errors
    #[error("Connection to {location} failed: {message}")]
    Connection {
        location: String,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Upload for command {command} rejected: {message}")]
    UploadRejected { command: String, message: String },

    #[error("No data found for command: {command}")]
    NotFound { command: String },

    #[error("Compute failed for command {command}: {message}")]
    Compute { command: String, message: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    // Conversions
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for numflight operations.
pub type Result<T> = std::result::Result<T, FlightError>;

impl From<serde_json::Error> for FlightError {
    fn from(err: serde_json::Error) -> Self {
        FlightError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl FlightError {
    /// Build a connection error for `location` from an IO failure.
    pub fn connection(location: impl Into<String>, err: std::io::Error) -> Self {
        FlightError::Connection {
            location: location.into(),
            message: err.to_string(),
            source: Some(err),
        }
    }

    /// Build a connection error for `location` from a transport message.
    pub fn unreachable(location: impl Into<String>, message: impl Into<String>) -> Self {
        FlightError::Connection {
            location: location.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Build a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        FlightError::Protocol {
            message: message.into(),
        }
    }

    /// Build a malformed-table error.
    pub fn malformed(message: impl Into<String>) -> Self {
        FlightError::MalformedTable {
            message: message.into(),
        }
    }
}

impl From<FlightError> for Status {
    /// Server-side mapping onto gRPC codes.
    ///
    /// Compute failures carry the handler's message alone; the client adds the
    /// command back when it rebuilds the error.
    fn from(err: FlightError) -> Self {
        match &err {
            FlightError::NotFound { .. } => Status::not_found(err.to_string()),
            FlightError::Compute { message, .. } => Status::internal(message.clone()),
            FlightError::UnsupportedType { .. }
            | FlightError::EmptyInput
            | FlightError::MalformedTable { .. }
            | FlightError::InvalidShape { .. }
            | FlightError::InvalidCommand { .. }
            | FlightError::Arrow(_) => Status::invalid_argument(err.to_string()),
            _ => Status::internal(err.to_string()),
        }
    }
}
