// Typed errors with thiserror. Every kernel failure is local and returned to the caller.
// See DESIGN.md: Error handling

use thiserror::Error;

/// Signature engine error types.
///
/// Degenerate geometry is deliberately absent: zero-area bounds or zero-length
/// strokes always normalize to neutral feature values instead of failing.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignatureError {
    #[error("No signature content: {0}")]
    EmptyInput(String),

    #[error("Insufficient data for comparison: {0}")]
    InsufficientData(String),

    #[error("Feature schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid raster: {0}")]
    InvalidRaster(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for SignatureError {
    fn from(err: serde_json::Error) -> Self {
        SignatureError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SignatureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = SignatureError::SchemaMismatch("missing key `density`".to_string());
        assert!(err.to_string().contains("density"));
        assert!(err.to_string().starts_with("Feature schema mismatch"));
    }

    #[test]
    fn serde_errors_become_serialization() {
        let parse: std::result::Result<u32, _> = serde_json::from_str("not json");
        let err: SignatureError = parse.unwrap_err().into();
        assert!(matches!(err, SignatureError::Serialization(_)));
    }
}
