//! Storage error type.

/// Failure reported by a storage port.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The backing store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store answered but a row could not be decoded.
    #[error("corrupt row in {table}: {message}")]
    Corrupt {
        /// Logical table name.
        table: &'static str,
        /// Decoder message.
        message: String,
    },
}

impl StoreError {
    /// Build an [`StoreError::Unavailable`] from any displayable cause.
    pub fn unavailable<E: std::fmt::Display>(err: E) -> Self {
        Self::Unavailable(err.to_string())
    }
}
