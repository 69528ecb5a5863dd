use crate::domain::money::Balance;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Invalid state transition: {0}")]
    State(String),
    #[error("Insufficient funds: available {available}, required {required}")]
    InsufficientFunds { available: Balance, required: Balance },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Gateway error: {0}")]
    Gateway(String),
    #[error("Internal error: {0}")]
    Internal(Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Status code on the request surface.
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::Validation(_) => 400,
            EngineError::InsufficientFunds { .. } => 402,
            EngineError::Forbidden(_) => 403,
            EngineError::NotFound(_) => 404,
            EngineError::Conflict(_) => 409,
            EngineError::State(_) => 422,
            EngineError::Gateway(_) => 502,
            EngineError::Internal(_) => 500,
        }
    }

    /// Message safe to hand back to a caller. Storage details are not exposed.
    pub fn client_message(&self) -> String {
        match self {
            EngineError::Internal(_) => "Internal server error".to_string(),
            EngineError::Gateway(_) => "Payment provider unavailable, try again later".to_string(),
            _ => self.to_string(),
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    pub(crate) fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        EngineError::NotFound(format!("{what} {id}"))
    }
}

impl From<validator::ValidationErrors> for EngineError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<&str> = errors.field_errors().into_keys().collect();
        fields.sort_unstable();
        EngineError::Validation(format!("Invalid {}", fields.join(", ")))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Internal(Box::new(err))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Internal(Box::new(err))
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for EngineError {
    fn from(err: rocksdb::Error) -> Self {
        EngineError::Internal(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(EngineError::Conflict("slot".into()).status_code(), 409);
        assert_eq!(EngineError::State("edge".into()).status_code(), 422);
        assert_eq!(
            EngineError::InsufficientFunds {
                available: Balance::new(10),
                required: Balance::new(20),
            }
            .status_code(),
            402
        );
    }

    #[test]
    fn test_internal_errors_are_redacted() {
        let err: EngineError = std::io::Error::other("disk on fire").into();
        assert_eq!(err.client_message(), "Internal server error");
        assert!(err.to_string().contains("disk on fire"));
    }
}
