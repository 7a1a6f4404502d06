//! Common error types used throughout heicsync.
//!
//! The first five variants form the conversion taxonomy: a missing source,
//! undecodable pixels, a failed encode, a metadata problem and an I/O failure.
//! `Metadata` is never fatal to a job; the converter downgrades it to a note.

/// Common error type for heicsync.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The source file does not exist.
    #[error("Source not found: {0}")]
    NotFound(String),

    /// The source could not be decoded as an image.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The decoded image could not be encoded into the target format.
    #[error("Encode error: {0}")]
    Encode(String),

    /// EXIF metadata could not be read or written.
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An external tool is missing or exited unsuccessfully.
    #[error("Tool error ({tool}): {message}")]
    Tool { tool: String, message: String },

    /// A database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Invalid input was provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new NotFound error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new Decode error.
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a new Encode error.
    pub fn encode<S: Into<String>>(msg: S) -> Self {
        Self::Encode(msg.into())
    }

    /// Create a new Metadata error.
    pub fn metadata<S: Into<String>>(msg: S) -> Self {
        Self::Metadata(msg.into())
    }

    /// Create a new Tool error.
    pub fn tool<T: Into<String>, S: Into<String>>(tool: T, msg: S) -> Self {
        Self::Tool {
            tool: tool.into(),
            message: msg.into(),
        }
    }

    /// Create a new Database error.
    pub fn database<S: Into<String>>(msg: S) -> Self {
        Self::Database(msg.into())
    }

    /// Create a new InvalidInput error.
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new Internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error should abort the conversion it occurred in.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Metadata(_))
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
