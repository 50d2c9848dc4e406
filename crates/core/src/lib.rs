//! Turn orchestration engine for simulated social conversations.
//!
//! A `TurnOrchestrator` takes the previous `SessionState`, recent history and
//! the user's input, calls the text service, validates its reply and returns
//! the next state with the messages to render.

pub mod config;
pub mod engine;
pub mod error;
pub mod response;
pub mod retry;
pub mod tracking;
pub mod types;

pub use config::EngineCfg;
pub use engine::{AnalysisReport, SessionOpening, TurnOrchestrator, TurnOutcome, TurnOutput};
pub use error::EngineError;
