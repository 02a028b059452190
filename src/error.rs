use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExplainError {
    #[error("Unsupported enumeration order: {order} (must be 1..=3)")]
    UnsupportedOrder { order: usize },

    #[error("Aggregation table capacity exceeded ({capacity} slots)")]
    CapacityExceeded { capacity: usize }, // Fixed-capacity tables never resize; hitting this is a sizing bug

    #[error("Worker thread failed: {0}")]
    WorkerFailure(String),

    #[error("Dimension mismatch in {what}: expected {expected}, got {actual}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] bincode::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt explanation file: {reason}")]
    CorruptFile { reason: String },
}
