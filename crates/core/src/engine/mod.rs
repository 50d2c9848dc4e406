mod analysis;
mod in_flight;
mod orchestrator;
mod prompt;

pub use analysis::AnalysisReport;
pub use in_flight::{InFlightSessions, TurnGuard};
pub use orchestrator::{ImageOutcome, SessionOpening, TurnOrchestrator, TurnOutcome, TurnOutput};
pub use prompt::{CONTINUE_SENTINEL, is_silent};
