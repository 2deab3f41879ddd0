//! Library error taxonomy.

/// Errors surfaced by dataset handling, loss computation, and weight I/O.
#[derive(Debug, thiserror::Error)]
pub enum CoralError {
    /// A batch or dataset is too small or otherwise unusable.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Two shapes that must agree do not.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
