use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::types::{DialogueSegment, TraitLabel, TurnFeedback};

fn default_momentum() -> i64 {
    50
}

/// Reads an advisory number sent as an integer, a float or a numeric string
/// ("62.5", "70", "40%"). Floats are rounded; anything else is `None`.
fn loose_number(value: &Value) -> Option<i64> {
    let float = match value {
        Value::Number(n) => return n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok()?,
        _ => return None,
    };
    float.is_finite().then(|| float.round() as i64)
}

fn lenient_momentum<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    Ok(loose_number(&Value::deserialize(deserializer)?).unwrap_or_else(default_momentum))
}

fn lenient_int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    Ok(loose_number(&Value::deserialize(deserializer)?).unwrap_or_default())
}

fn lenient_delta<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
    let delta = lenient_int(deserializer)?;
    Ok(delta.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32)
}

fn lenient_opt_int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    Ok(loose_number(&Value::deserialize(deserializer)?))
}

/// Structured output of one text-generation call.
///
/// Every field except `bodyLanguage` is optional in the wire shape so a
/// terse but valid reply still parses; `ResponseParser` enforces the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResult {
    #[serde(default)]
    pub ai_name: Option<String>,
    #[serde(default)]
    pub dialogue: Vec<DialogueSegment>,
    pub body_language: String,
    #[serde(default)]
    pub internal_thought: Option<String>,
    /// Clamped to 0–100 by the parser.
    #[serde(default = "default_momentum", deserialize_with = "lenient_momentum")]
    pub conversation_momentum: i64,
    #[serde(default)]
    pub feedback: Option<FeedbackBlock>,
    #[serde(default)]
    pub end_conversation: bool,
    #[serde(default)]
    pub should_regenerate_image: bool,
    /// Human-readable note on what changed visually.
    #[serde(default)]
    pub contextual_summary: Option<String>,
    #[serde(default)]
    pub emerging_goal: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_int")]
    pub goal_progress: Option<i64>,
    #[serde(default)]
    pub goal_achieved: bool,
    #[serde(default)]
    pub active_action: Option<ActionProposal>,
    #[serde(default)]
    pub visual_update: Option<VisualProposal>,
    /// Second-person description of what a silent user did.
    #[serde(default)]
    pub inferred_user_action: Option<String>,
    /// Persona replies with actions only; empty dialogue is allowed.
    #[serde(default)]
    pub silent_turn: bool,
    /// Only meaningful on the opening turn.
    #[serde(default)]
    pub backstory: Option<String>,
}

impl TurnResult {
    /// Engagement delta the service proposed (0 without a feedback block).
    pub fn engagement_delta(&self) -> i32 {
        self.feedback.as_ref().map_or(0, |f| f.engagement_delta)
    }

    pub fn momentum(&self) -> u8 {
        self.conversation_momentum.clamp(0, 100) as u8
    }

    pub fn goal_proposal(&self) -> GoalProposal {
        GoalProposal {
            text: self
                .emerging_goal
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_owned),
            progress: self.goal_progress,
            achieved: self.goal_achieved,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackBlock {
    #[serde(default, deserialize_with = "lenient_delta")]
    pub engagement_delta: i32,
    #[serde(default, deserialize_with = "lenient_int")]
    pub effectiveness_score: i64,
    #[serde(default, rename = "trait")]
    pub trait_label: Option<TraitLabel>,
}

impl FeedbackBlock {
    pub fn to_feedback(&self) -> TurnFeedback {
        TurnFeedback {
            engagement_delta: self.engagement_delta,
            effectiveness: self.effectiveness_score.clamp(0, 100) as u8,
            trait_label: self.trait_label.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionProposal {
    pub description: String,
    #[serde(default, deserialize_with = "lenient_int")]
    pub progress: i64,
}

/// Proposed visual fields; `None` means "no change proposed".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualProposal {
    #[serde(default)]
    pub character_description: Option<String>,
    #[serde(default)]
    pub clothing_description: Option<String>,
    #[serde(default)]
    pub held_objects: Option<String>,
    #[serde(default)]
    pub body_position: Option<String>,
    #[serde(default)]
    pub gaze_direction: Option<String>,
    #[serde(default)]
    pub position_relative_to_user: Option<String>,
    #[serde(default)]
    pub environment_description: Option<String>,
    #[serde(default)]
    pub current_action: Option<String>,
}

/// Goal fields of a TurnResult, normalized for the goal lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoalProposal {
    pub text: Option<String>,
    pub progress: Option<i64>,
    pub achieved: bool,
}
