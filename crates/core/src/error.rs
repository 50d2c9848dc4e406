use uuid::Uuid;

use crate::response::ParseError;
use crate::retry::{FailureKind, ServiceFailure};

/// Turn-level failure. Only text-service and parse failures abort a turn;
/// image failures and invariant violations are logged and degraded.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("malformed response: {0}")]
    MalformedResponse(#[from] ParseError),

    #[error("text service unavailable after {attempts} attempt(s): {message}")]
    ServiceUnavailable { attempts: u32, message: String },

    #[error("text service rate limited after {attempts} attempt(s)")]
    RateLimited { attempts: u32 },

    #[error("text service rejected credentials: {0}")]
    Unauthorized(String),

    #[error("text service timed out after {attempts} attempt(s)")]
    Timeout { attempts: u32 },

    #[error("text service request failed: {0}")]
    RequestFailed(String),

    #[error("image generation failed: {0}")]
    ImageGenerationFailed(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("invalid scenario: {0}")]
    InvalidScenario(String),

    #[error("a turn is already in flight for session {0}")]
    TurnInFlight(Uuid),

    #[error("session {0} has already ended")]
    SessionEnded(Uuid),

    #[error("turn cancelled")]
    Cancelled,
}

impl EngineError {
    /// True when the user can simply resend the same input.
    pub fn is_resendable(&self) -> bool {
        matches!(
            self,
            Self::MalformedResponse(_)
                | Self::ServiceUnavailable { .. }
                | Self::RateLimited { .. }
                | Self::Timeout { .. }
                | Self::RequestFailed(_)
                | Self::TurnInFlight(_)
        )
    }
}

impl From<ServiceFailure> for EngineError {
    fn from(f: ServiceFailure) -> Self {
        match f.kind {
            FailureKind::ServiceUnavailable => Self::ServiceUnavailable {
                attempts: f.attempts,
                message: f.message,
            },
            FailureKind::RateLimited => Self::RateLimited { attempts: f.attempts },
            FailureKind::Unauthorized => Self::Unauthorized(f.message),
            FailureKind::Timeout => Self::Timeout { attempts: f.attempts },
            FailureKind::Rejected => Self::RequestFailed(f.message),
            FailureKind::Cancelled => Self::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_failures_map_to_taxonomy() {
        let err: EngineError = ServiceFailure {
            kind: FailureKind::RateLimited,
            attempts: 4,
            message: "rate limited".into(),
        }
        .into();
        assert!(matches!(err, EngineError::RateLimited { attempts: 4 }));
        assert!(err.is_resendable());

        let err: EngineError = ServiceFailure {
            kind: FailureKind::Unauthorized,
            attempts: 1,
            message: "bad key".into(),
        }
        .into();
        assert!(matches!(err, EngineError::Unauthorized(_)));
        assert!(!err.is_resendable());

        let err: EngineError = ServiceFailure {
            kind: FailureKind::Cancelled,
            attempts: 1,
            message: "cancelled".into(),
        }
        .into();
        assert!(matches!(err, EngineError::Cancelled));
        assert!(!err.is_resendable());
    }

    #[test]
    fn parse_errors_are_malformed_responses() {
        let err: EngineError = ParseError::NoJsonObject.into();
        assert!(matches!(err, EngineError::MalformedResponse(_)));
        assert!(err.is_resendable());
    }
}
