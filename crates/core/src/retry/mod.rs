mod classify;
mod policy;

pub use classify::{ErrorClassifier, FailureKind};
pub use policy::{RetryPolicy, ServiceFailure, Sleeper, TokioSleeper};
