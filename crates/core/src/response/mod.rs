mod parser;
mod turn_result;

pub use parser::{Expectation, ParseError, ResponseParser};
pub(crate) use parser::{extract_json_object, preview};
pub use turn_result::{ActionProposal, FeedbackBlock, GoalProposal, TurnResult, VisualProposal};
