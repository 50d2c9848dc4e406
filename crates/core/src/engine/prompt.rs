use rapport_llm::provider::ChatMessage as PromptMessage;

use crate::types::{ChatMessage, EstablishedVisuals, Scenario, Sender, SessionState};

/// Input that stands for "the user stays silent and lets the scene continue".
pub const CONTINUE_SENTINEL: &str = "/continue";

/// True for the silent sentinel or input with no visible text.
pub fn is_silent(input: &str) -> bool {
    let trimmed = input.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case(CONTINUE_SENTINEL)
}

const PROMPT_SECTIONS: &[&str] = &[
    // Role
    "You play a person in a live, face-to-face social encounter with the user. \
    Stay fully in character. Never mention that you are an AI, a model, or that this is a simulation.",
    // Voice
    "Speak the way a real person would in this situation: short turns, natural pauses, \
    reactions that match your personality and your current interest in the conversation. \
    Actions go in separate action segments, not inside quoted speech.",
    // Judging the user
    "After every user turn, judge how well it landed for you. engagementDelta is how much \
    your interest changed (-20 to +20). effectivenessScore is 0-100. trait is a single word \
    naming what the user showed (positive or negative) with a one-sentence justification.",
    // Visual continuity
    "Your appearance and clothing are fixed unless something in the scene actually changes them. \
    Repeat characterDescription and clothingDescription exactly as given unless they truly change. \
    Set shouldRegenerateImage only when what the user would see has visibly changed.",
    // Ending
    "Set endConversation to true only when you, in character, are leaving or the encounter is clearly over.",
];

const RESPONSE_SHAPE: &str = r#"Reply with exactly one JSON object and nothing else:
{
  "aiName": "your name",
  "dialogue": [{"type": "action", "text": "..."}, {"type": "dialogue", "text": "..."}],
  "bodyLanguage": "what your body is doing (required)",
  "internalThought": "what you privately think",
  "conversationMomentum": 0-100,
  "feedback": {"engagementDelta": -20..20, "effectivenessScore": 0-100,
               "trait": {"label": "OneWord", "polarity": "positive|negative", "justification": "..."}},
  "endConversation": false,
  "shouldRegenerateImage": false,
  "contextualSummary": "what changed visually, if anything",
  "emergingGoal": "a goal the user could pursue, if one emerges",
  "goalProgress": 0-100,
  "goalAchieved": false,
  "activeAction": {"description": "ongoing activity", "progress": 0-100},
  "visualUpdate": {"characterDescription": "...", "clothingDescription": "...", "heldObjects": "...",
                   "bodyPosition": "...", "gazeDirection": "...", "positionRelativeToUser": "...",
                   "environmentDescription": "...", "currentAction": "..."},
  "inferredUserAction": "only for silent turns, second person",
  "silentTurn": false
}"#;

const SILENT_INSTRUCTION: &str = "The user says nothing this turn and lets the moment play out. \
Decide what they plausibly did and put it in inferredUserAction, written in second person \
(\"You nod and glance at the menu.\", never \"nods\"). Judge that action with the feedback block \
exactly as you would judge speech.";

const OPENING_INSTRUCTION: &str = "Open the scene. Introduce yourself in character with a first line \
and an action. Include aiName, a short backstory (two or three sentences, third person) in \"backstory\", \
and a complete visualUpdate describing your appearance, clothing, pose and the surroundings. \
Leave feedback out: the user has not spoken yet.";

fn persona_section(scenario: &Scenario, persona_name: &str) -> String {
    let mut out = format!("## Character\nName: {persona_name}");
    let fields = [
        ("Gender", scenario.gender.as_str()),
        ("Age", scenario.age.as_str()),
        ("Culture", scenario.culture.as_str()),
        ("Setting", scenario.environment.as_str()),
    ];
    for (label, value) in fields {
        if !value.trim().is_empty() {
            out.push_str(&format!("\n{label}: {value}"));
        }
    }
    if !scenario.personality_traits.is_empty() {
        out.push_str(&format!("\nPersonality: {}", scenario.personality_traits.join(", ")));
    }
    out
}

fn visuals_section(v: &EstablishedVisuals) -> String {
    let fields = [
        ("characterDescription", &v.character_description),
        ("clothingDescription", &v.clothing_description),
        ("heldObjects", &v.held_objects),
        ("bodyPosition", &v.body_position),
        ("gazeDirection", &v.gaze_direction),
        ("positionRelativeToUser", &v.position_relative_to_user),
        ("environmentDescription", &v.environment_description),
        ("currentAction", &v.current_action),
    ];
    let mut out = String::from("## Established visuals");
    for (key, value) in fields {
        if !value.is_empty() {
            out.push_str(&format!("\n{key}: {value}"));
        }
    }
    out
}

fn state_section(state: &SessionState) -> String {
    let mut out = format!(
        "## Current state\nEngagement: {}/100\nConversation momentum: {}/100\nTurn: {}",
        state.engagement,
        state.conversation_momentum,
        state.turn + 1
    );
    match &state.active_goal {
        Some(g) if g.achieved => {
            out.push_str(&format!("\nUser goal: \"{}\" (already achieved)", g.text));
        }
        Some(g) => out.push_str(&format!("\nUser goal: \"{}\" ({}% progress)", g.text, g.progress)),
        None if state.scenario.goal().is_none() => {
            out.push_str("\nUser goal: none yet. Propose one in emergingGoal if it arises naturally.");
        }
        None => {}
    }
    if let Some(a) = &state.active_action {
        let paused = if a.paused { ", paused" } else { "" };
        out.push_str(&format!("\nOngoing activity: \"{}\" ({}%{paused})", a.description, a.progress));
        if a.paused {
            out.push_str(". Do not advance it until it resumes.");
        }
    }
    out
}

fn system_prompt(state: &SessionState) -> String {
    let mut sections: Vec<String> = PROMPT_SECTIONS.iter().map(|s| (*s).to_owned()).collect();
    sections.push(persona_section(&state.scenario, &state.persona_name));
    if let Some(backstory) = &state.backstory {
        sections.push(format!("## Backstory\n{backstory}"));
    }
    sections.push(visuals_section(&state.established_visuals));
    sections.push(state_section(state));
    sections.push(RESPONSE_SHAPE.to_owned());
    sections.join("\n\n")
}

/// The last `window` dialogue messages as prompt messages. System and
/// backstory entries are not part of the dialogue and do not use up the window.
fn history_messages(history: &[ChatMessage], window: usize) -> Vec<PromptMessage> {
    let mut messages: Vec<PromptMessage> = history
        .iter()
        .filter_map(|m| match m.sender {
            Sender::User => Some(PromptMessage::user(m.render_text())),
            Sender::UserSilentAction => Some(PromptMessage::user(format!("(silently) {}", m.render_text()))),
            Sender::Persona => {
                let mut text = m.render_text();
                if let Some(body) = &m.body_language {
                    text.push_str(&format!("\n[body language: {body}]"));
                }
                Some(PromptMessage::assistant(text))
            }
            Sender::System | Sender::Backstory => None,
        })
        .collect();
    let excess = messages.len().saturating_sub(window);
    messages.drain(..excess);
    messages
}

/// Messages for one turn: system context, bounded history, then the input.
pub fn build_turn_messages(
    state: &SessionState,
    history: &[ChatMessage],
    user_input: &str,
    window: usize,
) -> Vec<PromptMessage> {
    let mut messages = vec![PromptMessage::system(system_prompt(state))];
    messages.extend(history_messages(history, window));
    if is_silent(user_input) {
        messages.push(PromptMessage::user(SILENT_INSTRUCTION));
    } else {
        messages.push(PromptMessage::user(user_input.trim()));
    }
    messages
}

/// Messages for the opening call of a session.
pub fn build_opening_messages(state: &SessionState) -> Vec<PromptMessage> {
    vec![
        PromptMessage::system(system_prompt(state)),
        PromptMessage::user(OPENING_INSTRUCTION),
    ]
}

const ANALYSIS_INSTRUCTION: &str = r#"You are a social-skills coach reviewing a finished conversation.
The user practised talking to the character described below. Assess the user, not the character.
Reply with exactly one JSON object and nothing else:
{
  "summary": "two or three sentences",
  "overallScore": 0-100,
  "strengths": ["..."],
  "improvements": ["..."],
  "keyMoments": ["..."],
  "goalOutcome": "how the user's goal went, if there was one"
}"#;

/// Messages for the post-session analysis call. Uses the full history.
pub fn build_analysis_messages(state: &SessionState, history: &[ChatMessage]) -> Vec<PromptMessage> {
    let mut system = format!(
        "{ANALYSIS_INSTRUCTION}\n\n{}",
        persona_section(&state.scenario, &state.persona_name)
    );
    if let Some(goal) = state.scenario.goal() {
        system.push_str(&format!("\nThe user's stated goal: {goal}"));
    }

    let mut transcript = String::from("Transcript:\n");
    for m in history {
        let who = match m.sender {
            Sender::User => "User",
            Sender::UserSilentAction => "User (silent)",
            Sender::Persona => state.persona_name.as_str(),
            Sender::System | Sender::Backstory => continue,
        };
        transcript.push_str(&format!("{who}: {}\n", m.render_text()));
    }
    let reason = state.ended.map_or("still open", |r| r.as_str());
    transcript.push_str(&format!(
        "\nFinal engagement: {}/100 after {} turns. Ended: {reason}.",
        state.engagement, state.turn
    ));

    vec![PromptMessage::system(system), PromptMessage::user(transcript)]
}
