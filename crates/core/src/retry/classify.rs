use rapport_llm::LlmError;

/// Markers in an otherwise unclassified failure that indicate a transient outage.
const TRANSIENT_MARKERS: &[&str] = &["overloaded", "temporarily", "try again", "connection reset"];

/// Coarse failure class of an external call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    ServiceUnavailable,
    RateLimited,
    Unauthorized,
    Timeout,
    /// The request itself was refused (bad request, undecodable response).
    Rejected,
    /// The caller gave up; never produced by the classifier.
    Cancelled,
}

impl FailureKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::ServiceUnavailable | Self::RateLimited | Self::Timeout)
    }
}

/// Maps provider errors to a `FailureKind`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn classify(&self, error: &LlmError) -> FailureKind {
        match error {
            LlmError::Unavailable(_) => FailureKind::ServiceUnavailable,
            LlmError::RateLimited => FailureKind::RateLimited,
            LlmError::Unauthorized(_) => FailureKind::Unauthorized,
            LlmError::Timeout => FailureKind::Timeout,
            LlmError::RequestFailed(msg) => {
                let lower = msg.to_lowercase();
                if TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
                    FailureKind::ServiceUnavailable
                } else {
                    FailureKind::Rejected
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_provider_errors() {
        let c = ErrorClassifier;
        assert_eq!(c.classify(&LlmError::Unavailable("503".into())), FailureKind::ServiceUnavailable);
        assert_eq!(c.classify(&LlmError::RateLimited), FailureKind::RateLimited);
        assert_eq!(c.classify(&LlmError::Unauthorized("401".into())), FailureKind::Unauthorized);
        assert_eq!(c.classify(&LlmError::Timeout), FailureKind::Timeout);
        assert_eq!(c.classify(&LlmError::RequestFailed("400: bad json".into())), FailureKind::Rejected);
    }

    #[test]
    fn transient_request_failures_are_unavailable() {
        let c = ErrorClassifier;
        let err = LlmError::RequestFailed("529: Overloaded".into());
        assert_eq!(c.classify(&err), FailureKind::ServiceUnavailable);
    }

    #[test]
    fn retryable_kinds() {
        assert!(FailureKind::ServiceUnavailable.is_retryable());
        assert!(FailureKind::RateLimited.is_retryable());
        assert!(FailureKind::Timeout.is_retryable());
        assert!(!FailureKind::Unauthorized.is_retryable());
        assert!(!FailureKind::Rejected.is_retryable());
        assert!(!FailureKind::Cancelled.is_retryable());
    }
}
