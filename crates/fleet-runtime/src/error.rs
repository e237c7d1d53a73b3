//! Error kinds returned to gateway callers.

use fleet_core::{StationError, ValidationError};
use fleet_econ::EconError;
use persistence::PersistError;
use thiserror::Error;

/// Reasons an operation was rejected. Returned only to the requesting session.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed or out-of-range input.
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    /// Caller is not allowed to act on the target.
    #[error("not authorized: {0}")]
    Unauthorized(String),
    /// Crew, hold or seat capacity exhausted.
    #[error("{0}")]
    Capacity(String),
    #[error("insufficient credits: {needed} required")]
    InsufficientCredits { needed: i64 },
    #[error("reserve not met")]
    ReserveNotMet,
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    /// Target exists but is not in a state that allows the operation.
    #[error("{0}")]
    Unavailable(String),
    #[error("{0} has expired")]
    Expired(String),
    #[error(transparent)]
    Station(#[from] StationError),
    #[error(transparent)]
    Econ(#[from] EconError),
    /// Unexpected storage failure; any open transaction was rolled back.
    #[error("storage failure: {0}")]
    Storage(#[from] PersistError),
}

impl From<sqlx::Error> for GatewayError {
    fn from(e: sqlx::Error) -> Self {
        GatewayError::Storage(PersistError::Db(e))
    }
}

impl GatewayError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        GatewayError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        GatewayError::Validation(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        GatewayError::Unavailable(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        GatewayError::Unauthorized(msg.into())
    }

    /// Stable machine-readable kind for the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) | GatewayError::Invalid(_) | GatewayError::Econ(_) => {
                "validation"
            }
            GatewayError::Unauthorized(_) => "unauthorized",
            GatewayError::Capacity(_) => "capacity",
            GatewayError::InsufficientCredits { .. } => "insufficient_credits",
            GatewayError::ReserveNotMet => "reserve_not_met",
            GatewayError::NotFound { .. } => "not_found",
            GatewayError::Unavailable(_) => "unavailable",
            GatewayError::Expired(_) => "expired",
            GatewayError::Station(_) => "conflict",
            GatewayError::Storage(_) => "storage",
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(GatewayError::ReserveNotMet.kind(), "reserve_not_met");
        assert_eq!(
            GatewayError::InsufficientCredits { needed: 5 }.to_string(),
            "insufficient credits: 5 required"
        );
        let e: GatewayError = ValidationError::NonPositive("price").into();
        assert_eq!(e.kind(), "validation");
        assert_eq!(GatewayError::not_found("vessel", "v9").to_string(), "vessel not found: v9");
    }
}
