use std::time::Duration;

use thiserror::Error;

// -----------------------------------------------------------------------------
// ----- GatewayError ----------------------------------------------------------

/// Everything a caller of the gateway can observe. Raw transport errors are
/// wrapped into one of these kinds before they cross the module boundary.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("session could not authenticate: {0}")]
    AuthFailure(String),

    #[error("rate limited by backing store, mandated wait {wait:?}")]
    RateLimited { wait: Duration },

    #[error("object not found")]
    NotFound,

    #[error("transfer failed: {0}")]
    TransferFailure(String),

    #[error("no working relay found")]
    ProxyUnavailable,
}

// -----------------------------------------------------------------------------
// ----- GatewayError: Public --------------------------------------------------

impl GatewayError {
    /// Transient kinds that a retry policy is allowed to re-attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::RateLimited { .. } | GatewayError::TransferFailure(_)
        )
    }

    pub fn transfer(err: impl std::fmt::Display) -> Self {
        GatewayError::TransferFailure(err.to_string())
    }

    pub fn auth(err: impl std::fmt::Display) -> Self {
        GatewayError::AuthFailure(err.to_string())
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            GatewayError::NotFound
        } else {
            GatewayError::TransferFailure(err.to_string())
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
