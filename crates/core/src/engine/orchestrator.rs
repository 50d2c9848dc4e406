use std::sync::Arc;

use chrono::Utc;
use rapport_llm::provider::{ChatMessage as PromptMessage, StopReason};
use rapport_llm::{CompletionRequest, ImageProvider, ImageRequest, LlmProvider};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::analysis::{AnalysisReport, parse_analysis};
use super::in_flight::InFlightSessions;
use super::prompt::{build_analysis_messages, build_opening_messages, build_turn_messages, is_silent};
use crate::config::EngineCfg;
use crate::error::EngineError;
use crate::response::{Expectation, ResponseParser, TurnResult, preview};
use crate::retry::{FailureKind, RetryPolicy, Sleeper};
use crate::tracking::{
    ActionLifecycleManager, ENGAGEMENT_MAX, ENGAGEMENT_MIN, EngagementTracker, GoalLifecycleManager,
    VisualConsistencyTracker, image_prompt, same_text,
};
use crate::types::{
    ChatMessage, DialogueSegment, EndReason, EstablishedVisuals, ImageRef, Scenario, Sender, SessionState,
};

const ANALYSIS_TEMPERATURE: f32 = 0.3;

/// What happened to the persona image on a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOutcome {
    NotRequested,
    Generated,
    /// Generation was warranted but failed; the previous image stays.
    ReusedPrevious,
}

/// Per-turn annotations for the host.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// Set when this turn ended the session.
    pub ended: Option<EndReason>,
    pub image: ImageOutcome,
    pub visual_summary: Option<String>,
    pub goal_achieved: bool,
    pub action_completed: bool,
}

/// Result of a committed turn.
#[derive(Debug, Clone)]
pub struct TurnOutput {
    pub state: SessionState,
    /// The user's side of the turn (spoken, or the inferred silent action),
    /// carrying the turn's feedback.
    pub user_message: ChatMessage,
    pub reply: ChatMessage,
    pub outcome: TurnOutcome,
}

/// Result of the opening call.
#[derive(Debug, Clone)]
pub struct SessionOpening {
    pub state: SessionState,
    pub backstory: Option<ChatMessage>,
    pub message: ChatMessage,
}

/// Flags produced while composing the next state.
struct Composed {
    state: SessionState,
    regenerate_image: bool,
    goal_achieved: bool,
    action_completed: bool,
}

/// Drives one conversation turn end to end.
///
/// Owns no session state: every call takes the previous `SessionState` and
/// returns a new one, so a failing or cancelled turn leaves the caller's
/// state untouched.
pub struct TurnOrchestrator {
    cfg: EngineCfg,
    text: Arc<dyn LlmProvider>,
    images: Arc<dyn ImageProvider>,
    parser: ResponseParser,
    engagement: EngagementTracker,
    goals: GoalLifecycleManager,
    actions: ActionLifecycleManager,
    visuals: VisualConsistencyTracker,
    text_retry: RetryPolicy,
    image_retry: RetryPolicy,
    in_flight: InFlightSessions,
}

impl TurnOrchestrator {
    pub fn new(cfg: EngineCfg, text: Arc<dyn LlmProvider>, images: Arc<dyn ImageProvider>) -> Self {
        let text_retry = RetryPolicy::new(cfg.retry_max_retries, cfg.retry_backoff(), cfg.text_timeout());
        let image_retry = RetryPolicy::new(cfg.retry_max_retries, cfg.retry_backoff(), cfg.image_timeout());
        Self {
            parser: ResponseParser::new(),
            engagement: EngagementTracker::new(cfg.engagement_decay_per_turn, cfg.low_engagement_streak_limit),
            goals: GoalLifecycleManager::new(cfg.stated_goal_rearm),
            actions: ActionLifecycleManager::new(),
            visuals: VisualConsistencyTracker::new(f64::from(cfg.visual_similarity_threshold)),
            text_retry,
            image_retry,
            in_flight: InFlightSessions::new(),
            cfg,
            text,
            images,
        }
    }

    /// Replace the backoff sleeper of both retry policies.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.text_retry = self.text_retry.with_sleeper(sleeper.clone());
        self.image_retry = self.image_retry.with_sleeper(sleeper);
        self
    }

    pub fn config(&self) -> &EngineCfg {
        &self.cfg
    }

    /// Open a session: validate the scenario, run the opening call and
    /// request the first image.
    pub async fn start_session(&self, scenario: Scenario) -> Result<SessionOpening, EngineError> {
        if scenario.name.trim().is_empty() {
            return Err(EngineError::InvalidScenario("persona name is empty".into()));
        }
        let scenario = Arc::new(scenario);
        let base = SessionState {
            session_id: Uuid::new_v4(),
            persona_name: scenario.name.trim().to_owned(),
            backstory: None,
            established_visuals: EstablishedVisuals {
                environment_description: scenario.environment.trim().to_owned(),
                ..Default::default()
            },
            engagement: self.cfg.initial_engagement.clamp(ENGAGEMENT_MIN, ENGAGEMENT_MAX),
            zero_engagement_streak: 0,
            active_goal: self.goals.initial(&scenario),
            stated_goal_spent: false,
            active_action: None,
            conversation_momentum: 50,
            current_image: None,
            turn: 0,
            ended: None,
            started_at: Utc::now(),
            scenario,
        };

        let uncancelled = CancellationToken::new();
        let raw = self
            .complete_text(
                build_opening_messages(&base),
                self.cfg.text_max_tokens,
                self.cfg.text_temperature,
                &uncancelled,
            )
            .await?;
        let result = self
            .parser
            .parse_expecting(&raw, Expectation::Opening)
            .inspect_err(|e| tracing::warn!(session_id = %base.session_id, error = %e, "opening response rejected"))?;

        let mut visuals = self.visuals.reconcile(&base.established_visuals, result.visual_update.as_ref());
        fill_from_scenario(&mut visuals, &base.scenario);
        let goal = self.goals.advance(
            &base.scenario,
            base.active_goal.as_ref(),
            false,
            &result.goal_proposal(),
        );
        let action = self.actions.advance(None, result.active_action.as_ref());

        let mut state = SessionState {
            persona_name: result.ai_name.clone().unwrap_or_else(|| base.persona_name.clone()),
            backstory: result.backstory.clone(),
            established_visuals: visuals,
            active_goal: goal.goal,
            stated_goal_spent: goal.stated_goal_spent,
            active_action: action.action,
            conversation_momentum: result.momentum(),
            ..base
        };
        state.current_image = self
            .generate_image(&state.established_visuals, state.session_id, 0, &uncancelled)
            .await;

        let backstory = state
            .backstory
            .as_ref()
            .map(|b| ChatMessage::new(Sender::Backstory, vec![DialogueSegment::dialogue(b.clone())]));
        let mut message = persona_message(&result);
        message.image = state.current_image.clone();

        tracing::info!(
            session_id = %state.session_id,
            persona = %state.persona_name,
            engagement = state.engagement,
            goal = ?state.active_goal.as_ref().map(|g| g.text.as_str()),
            image = state.current_image.is_some(),
            "session started"
        );
        Ok(SessionOpening { state, backstory, message })
    }

    /// Run one turn. On any error the caller keeps its previous state.
    ///
    /// Rejects turns on ended sessions and a second concurrent turn for the
    /// same session. If `cancel` fires, in-flight calls finish but their
    /// results are discarded.
    pub async fn process_turn(
        &self,
        state: &SessionState,
        history: &[ChatMessage],
        user_input: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutput, EngineError> {
        if state.is_ended() {
            return Err(EngineError::SessionEnded(state.session_id));
        }
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let _guard = self.in_flight.acquire(state.session_id)?;

        let silent = is_silent(user_input);
        let turn = state.turn + 1;
        tracing::debug!(
            session_id = %state.session_id,
            turn,
            silent,
            input = %preview(user_input, 80),
            "processing turn"
        );

        let messages = build_turn_messages(state, history, user_input, self.cfg.history_window);
        let raw = self
            .complete_text(messages, self.cfg.text_max_tokens, self.cfg.text_temperature, cancel)
            .await?;
        discard_if_cancelled(cancel, state.session_id, "text")?;

        let expect = if silent { Expectation::SilentTurn } else { Expectation::Turn };
        let result = self.parser.parse_expecting(&raw, expect).inspect_err(|e| {
            tracing::warn!(
                session_id = %state.session_id,
                turn,
                error = %e,
                raw_preview = %preview(&raw, 240),
                "turn response rejected"
            )
        })?;

        let Composed { state: mut next, regenerate_image, goal_achieved, action_completed } =
            self.compose(state, &result);
        enforce_invariants(state, &mut next);

        let image = if regenerate_image {
            match self
                .generate_image(&next.established_visuals, next.session_id, next.turn, cancel)
                .await
            {
                Some(img) => {
                    next.current_image = Some(img);
                    ImageOutcome::Generated
                }
                None => ImageOutcome::ReusedPrevious,
            }
        } else {
            ImageOutcome::NotRequested
        };
        discard_if_cancelled(cancel, state.session_id, "image")?;

        let feedback = result.feedback.as_ref().map(|f| f.to_feedback());
        let mut user_message = match result.inferred_user_action.as_deref() {
            Some(action) if silent => {
                ChatMessage::new(Sender::UserSilentAction, vec![DialogueSegment::action(action)])
            }
            _ => ChatMessage::user(user_input.trim()),
        };
        user_message.feedback = feedback;

        let mut reply = persona_message(&result);
        if image == ImageOutcome::Generated {
            reply.image = next.current_image.clone();
        }

        tracing::info!(
            session_id = %next.session_id,
            turn = next.turn,
            engagement = next.engagement,
            delta = result.engagement_delta(),
            momentum = next.conversation_momentum,
            image = ?image,
            ended = ?next.ended,
            "turn committed"
        );

        let outcome = TurnOutcome {
            ended: next.ended,
            image,
            visual_summary: result.contextual_summary.clone(),
            goal_achieved,
            action_completed,
        };
        Ok(TurnOutput { state: next, user_message, reply, outcome })
    }

    /// New state with the active action paused or resumed. No-op without an action.
    pub fn set_action_paused(&self, state: &SessionState, paused: bool) -> SessionState {
        let mut next = state.clone();
        next.active_action = self.actions.set_paused(state.active_action.as_ref(), paused);
        if let Some(a) = &next.active_action {
            tracing::debug!(session_id = %state.session_id, action = %a.description, paused, "action pause toggled");
        }
        next
    }

    /// Produce the post-session analysis. A session that has not ended is
    /// treated as ended by the user.
    pub async fn end_session(
        &self,
        state: &SessionState,
        history: &[ChatMessage],
    ) -> Result<AnalysisReport, EngineError> {
        let mut finished = state.clone();
        finished.ended.get_or_insert(EndReason::UserEnded);

        let raw = self
            .complete_text(
                build_analysis_messages(&finished, history),
                self.cfg.analysis_max_tokens,
                ANALYSIS_TEMPERATURE,
                &CancellationToken::new(),
            )
            .await?;
        let report = parse_analysis(&raw, &finished)?;
        tracing::info!(
            session_id = %finished.session_id,
            turns = report.turns,
            score = report.overall_score,
            end_reason = ?report.end_reason,
            "session analysed"
        );
        Ok(report)
    }

    /// Old state + TurnResult -> new state. Engagement, goal, action and
    /// visuals are applied in that order.
    fn compose(&self, prev: &SessionState, result: &TurnResult) -> Composed {
        let engagement = self
            .engagement
            .apply(prev.engagement, prev.zero_engagement_streak, result.engagement_delta());
        let goal = self.goals.advance(
            &prev.scenario,
            prev.active_goal.as_ref(),
            prev.stated_goal_spent,
            &result.goal_proposal(),
        );
        let action = self
            .actions
            .advance(prev.active_action.as_ref(), result.active_action.as_ref());
        let visuals = self
            .visuals
            .reconcile(&prev.established_visuals, result.visual_update.as_ref());
        let regenerate_image =
            self.visuals
                .should_generate_image(&prev.established_visuals, &visuals, result.should_regenerate_image);

        let turn = prev.turn + 1;
        let ended = if engagement.engagement >= ENGAGEMENT_MAX {
            Some(EndReason::EngagementMaxed)
        } else if result.end_conversation {
            Some(EndReason::ServiceSignaled)
        } else if engagement.should_terminate_low_engagement {
            Some(EndReason::LowEngagement)
        } else if self.cfg.max_turns > 0 && turn >= self.cfg.max_turns {
            Some(EndReason::TurnLimit)
        } else {
            None
        };

        let state = SessionState {
            engagement: engagement.engagement,
            zero_engagement_streak: engagement.zero_streak,
            active_goal: goal.goal,
            stated_goal_spent: goal.stated_goal_spent,
            active_action: action.action,
            established_visuals: visuals,
            conversation_momentum: result.momentum(),
            turn,
            ended,
            ..prev.clone()
        };
        Composed {
            state,
            regenerate_image,
            goal_achieved: goal.newly_achieved,
            action_completed: action.completed,
        }
    }

    async fn complete_text(
        &self,
        messages: Vec<PromptMessage>,
        max_tokens: u32,
        temperature: f32,
        cancel: &CancellationToken,
    ) -> Result<String, EngineError> {
        let request = CompletionRequest { messages, max_tokens, temperature };
        let text = &*self.text;
        let response = self
            .text_retry
            .run("text", cancel, move || text.complete(request.clone()))
            .await?;
        if response.stop_reason == StopReason::MaxTokens {
            tracing::debug!(
                provider = text.name(),
                output_tokens = response.output_tokens,
                "completion hit max tokens"
            );
        }
        Ok(response.content)
    }

    /// Best-effort image generation. Failures are logged and yield `None`.
    async fn generate_image(
        &self,
        visuals: &EstablishedVisuals,
        session_id: Uuid,
        turn: u32,
        cancel: &CancellationToken,
    ) -> Option<ImageRef> {
        let request = ImageRequest { prompt: image_prompt(visuals), size: self.cfg.image_size.clone() };
        let images = &*self.images;
        match self.image_retry.run("image", cancel, move || images.generate(request.clone())).await {
            Ok(img) => Some(ImageRef {
                id: Uuid::new_v4(),
                mime_type: img.mime_type,
                data_base64: img.data_base64,
                turn,
            }),
            Err(failure) if failure.kind == FailureKind::Cancelled => {
                tracing::debug!(%session_id, turn, "image generation cancelled");
                None
            }
            Err(failure) => {
                let error = EngineError::ImageGenerationFailed(failure.to_string());
                tracing::warn!(
                    %session_id,
                    turn,
                    provider = images.name(),
                    error = %error,
                    "image generation failed, keeping previous image"
                );
                None
            }
        }
    }
}

fn discard_if_cancelled(cancel: &CancellationToken, session_id: Uuid, after: &str) -> Result<(), EngineError> {
    if cancel.is_cancelled() {
        tracing::info!(%session_id, after, "turn cancelled, discarding results");
        return Err(EngineError::Cancelled);
    }
    Ok(())
}

fn persona_message(result: &TurnResult) -> ChatMessage {
    let mut m = ChatMessage::new(Sender::Persona, result.dialogue.clone());
    m.body_language = Some(result.body_language.clone());
    m.internal_thought = result.internal_thought.clone();
    m
}

/// Engine-authorized defaults for visual fields the opening left blank.
fn fill_from_scenario(v: &mut EstablishedVisuals, s: &Scenario) {
    if v.character_description.trim().is_empty() {
        let descriptor: Vec<&str> = [s.age.trim(), s.gender.trim()]
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect();
        v.character_description = if descriptor.is_empty() {
            format!("A person named {}", s.name.trim())
        } else {
            format!("A {} named {}", descriptor.join(" "), s.name.trim())
        };
    }
    if v.clothing_description.trim().is_empty() {
        v.clothing_description = "Everyday casual clothes".to_owned();
    }
    if v.environment_description.trim().is_empty() && !s.environment.trim().is_empty() {
        v.environment_description = s.environment.trim().to_owned();
    }
}

/// Re-check cross-turn invariants on a composed state and fall back to the
/// last known-good value on any violation.
fn enforce_invariants(prev: &SessionState, next: &mut SessionState) {
    let report = |what: String| {
        let violation = EngineError::InvariantViolation(what);
        tracing::warn!(session_id = %prev.session_id, error = %violation, "clamped to last known-good value");
    };

    if !(ENGAGEMENT_MIN..=ENGAGEMENT_MAX).contains(&next.engagement) {
        report(format!("engagement {} out of range", next.engagement));
        next.engagement = prev.engagement.clamp(ENGAGEMENT_MIN, ENGAGEMENT_MAX);
    }

    if let (Some(before), Some(after)) = (prev.active_action.as_ref(), next.active_action.as_mut())
        && !before.pending_clear
        && same_text(&before.description, &after.description)
        && after.progress < before.progress
    {
        report(format!("action progress fell from {} to {}", before.progress, after.progress));
        after.progress = before.progress;
    }

    if let Some(goal) = next.active_goal.as_mut()
        && goal.achieved
        && !goal.pending_clear
    {
        report(format!("goal \"{}\" achieved without pending clear", goal.text));
        goal.pending_clear = true;
    }

    if let (Some(before), Some(after)) = (prev.active_goal.as_ref(), next.active_goal.as_ref())
        && before.pending_clear
        && after.achieved
        && same_text(&before.text, &after.text)
    {
        report(format!("goal \"{}\" survived its clearing turn", before.text));
        next.active_goal = None;
    }

    if let Some(action) = next.active_action.as_mut()
        && action.progress > 100
    {
        report(format!("action progress {} above 100", action.progress));
        action.progress = 100;
    }
}
