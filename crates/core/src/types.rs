use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

// ── Scenario ───────────────────────────────────────────────────

/// Persona/environment configuration, fixed for the life of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub gender: String,
    /// Free-form descriptor, e.g. "late twenties".
    #[serde(default)]
    pub age: String,
    #[serde(default)]
    pub personality_traits: Vec<String>,
    #[serde(default)]
    pub culture: String,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub stated_goal: Option<String>,
    /// Lets an achieved stated goal start a fresh cycle. `None` defers to
    /// the engine default.
    #[serde(default)]
    pub allow_goal_rearm: Option<bool>,
}

impl Scenario {
    /// Stated goal text, if present and non-blank.
    pub fn goal(&self) -> Option<&str> {
        self.stated_goal
            .as_deref()
            .map(str::trim)
            .filter(|g| !g.is_empty())
    }
}

// ── Visual state ───────────────────────────────────────────────

/// Canonical description of the persona's appearance, pose and surroundings.
/// `character_description` and `clothing_description` are the stable pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstablishedVisuals {
    pub character_description: String,
    pub clothing_description: String,
    pub held_objects: String,
    pub body_position: String,
    pub gaze_direction: String,
    pub position_relative_to_user: String,
    pub environment_description: String,
    pub current_action: String,
}

/// Reference to the image currently representing the persona.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub id: Uuid,
    pub mime_type: String,
    pub data_base64: String,
    /// Turn on which the image was generated (0 = opening).
    pub turn: u32,
}

// ── Lifecycles ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveGoal {
    pub text: String,
    pub progress: u8,
    pub achieved: bool,
    /// Set on the turn `achieved` flips; the goal is cleared next turn.
    pub pending_clear: bool,
}

impl ActiveGoal {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), progress: 0, achieved: false, pending_clear: false }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveAction {
    pub description: String,
    pub progress: u8,
    pub paused: bool,
    /// Set once progress reaches 100; the action is cleared next turn.
    pub pending_clear: bool,
}

impl ActiveAction {
    pub fn new(description: impl Into<String>) -> Self {
        Self { description: description.into(), progress: 0, paused: false, pending_clear: false }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The text service signalled the conversation is over.
    ServiceSignaled,
    /// Engagement reached 100.
    EngagementMaxed,
    /// Engagement stayed at zero for the configured streak.
    LowEngagement,
    /// Configured turn limit reached.
    TurnLimit,
    /// The host ended the session explicitly.
    UserEnded,
}

impl EndReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ServiceSignaled => "service_signaled",
            Self::EngagementMaxed => "engagement_maxed",
            Self::LowEngagement => "low_engagement",
            Self::TurnLimit => "turn_limit",
            Self::UserEnded => "user_ended",
        }
    }

    /// True for exits that count as a successful conversation.
    pub fn is_success(self) -> bool {
        matches!(self, Self::EngagementMaxed)
    }
}

// ── Session state ──────────────────────────────────────────────

/// Full state of one conversation. Replaced wholesale on every successful
/// turn; never mutated in place by a failing turn.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub session_id: Uuid,
    pub scenario: Arc<Scenario>,
    /// Name the persona introduced itself with (falls back to the scenario name).
    pub persona_name: String,
    pub backstory: Option<String>,
    pub established_visuals: EstablishedVisuals,
    /// 0–100.
    pub engagement: i32,
    pub zero_engagement_streak: u32,
    pub active_goal: Option<ActiveGoal>,
    /// A stated goal was achieved and may not re-arm.
    pub stated_goal_spent: bool,
    pub active_action: Option<ActiveAction>,
    /// 0–100, advisory.
    pub conversation_momentum: u8,
    pub current_image: Option<ImageRef>,
    /// Completed user turns.
    pub turn: u32,
    pub ended: Option<EndReason>,
    pub started_at: DateTime<Utc>,
}

impl SessionState {
    pub fn is_ended(&self) -> bool {
        self.ended.is_some()
    }
}

// ── Chat history ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    Persona,
    System,
    Backstory,
    /// A non-verbal turn the engine inferred for the user.
    UserSilentAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    Dialogue,
    Action,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawSegment")]
pub struct DialogueSegment {
    #[serde(rename = "type")]
    pub kind: SegmentKind,
    pub text: String,
}

impl DialogueSegment {
    pub fn dialogue(text: impl Into<String>) -> Self {
        Self { kind: SegmentKind::Dialogue, text: text.into() }
    }

    pub fn action(text: impl Into<String>) -> Self {
        Self { kind: SegmentKind::Action, text: text.into() }
    }
}

/// Services emit either `{"type": "...", "text": "..."}` or a bare string.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawSegment {
    Tagged {
        #[serde(rename = "type", alias = "kind", default = "default_segment_kind")]
        kind: SegmentKind,
        text: String,
    },
    Bare(String),
}

fn default_segment_kind() -> SegmentKind {
    SegmentKind::Dialogue
}

impl From<RawSegment> for DialogueSegment {
    fn from(raw: RawSegment) -> Self {
        match raw {
            RawSegment::Tagged { kind, text } => Self { kind, text },
            RawSegment::Bare(text) => Self::dialogue(text),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    Positive,
    Negative,
}

impl<'de> Deserialize<'de> for Polarity {
    /// Case-insensitive; also takes "+" and "-".
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.trim().to_lowercase().as_str() {
            "positive" | "+" => Ok(Self::Positive),
            "negative" | "-" => Ok(Self::Negative),
            _ => Err(serde::de::Error::unknown_variant(&raw, &["positive", "negative"])),
        }
    }
}

/// Single-word trait the user displayed this turn, with its justification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraitLabel {
    pub label: String,
    pub polarity: Polarity,
    #[serde(default)]
    pub justification: String,
    /// The part of the user's turn that earned the label.
    #[serde(default)]
    pub evidence: Option<String>,
}

impl TraitLabel {
    pub fn new(label: impl Into<String>, polarity: Polarity, justification: impl Into<String>) -> Self {
        Self { label: label.into(), polarity, justification: justification.into(), evidence: None }
    }
}

/// Per-turn assessment of the user's message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnFeedback {
    /// Delta the service proposed; decay is applied separately.
    pub engagement_delta: i32,
    /// 0–100.
    pub effectiveness: u8,
    pub trait_label: Option<TraitLabel>,
}

/// Immutable record appended to conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub sender: Sender,
    pub segments: Vec<DialogueSegment>,
    pub body_language: Option<String>,
    pub internal_thought: Option<String>,
    pub image: Option<ImageRef>,
    pub feedback: Option<TurnFeedback>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(sender: Sender, segments: Vec<DialogueSegment>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            segments,
            body_language: None,
            internal_thought: None,
            image: None,
            feedback: None,
            created_at: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Sender::User, vec![DialogueSegment::dialogue(text)])
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Sender::System, vec![DialogueSegment::dialogue(text)])
    }

    /// Retryable notice for a failed turn, quoting the input so the user can resend it.
    pub fn retry_notice(user_input: &str, error: &crate::error::EngineError) -> Self {
        let text = if user_input.trim().is_empty() {
            format!("Something went wrong ({error}). Tap continue to try again.")
        } else {
            format!("Something went wrong ({error}). Your message was not sent: \"{user_input}\"")
        };
        Self::system(text)
    }

    /// Text of all segments, actions wrapped in asterisks.
    pub fn render_text(&self) -> String {
        self.segments
            .iter()
            .map(|s| match s.kind {
                SegmentKind::Dialogue => s.text.clone(),
                SegmentKind::Action => format!("*{}*", s.text),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}
