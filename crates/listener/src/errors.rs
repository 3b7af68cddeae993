//! Listener error types.

use thiserror::Error;

/// A webhook delivery could not be decoded.
#[derive(Debug, Error)]
pub enum EventError {
    /// The body is not valid JSON of the expected shape.
    #[error("Malformed {event} payload: {message}")]
    Malformed {
        event: &'static str,
        message: String,
    },

    /// A field the tracker needs is absent or empty.
    #[error("{event} payload is missing '{field}'")]
    MissingField {
        event: &'static str,
        field: &'static str,
    },
}
