use super::turn_result::TurnResult;

/// Leading words accepted as second person in an inferred user action.
const SECOND_PERSON_OPENERS: &[&str] = &["you", "your", "you're", "you've", "you'd", "you'll"];

/// Why a raw response could not become a `TurnResult`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("no JSON object found in response")]
    NoJsonObject,
    #[error("JSON object is truncated")]
    Truncated,
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("response has no dialogue")]
    EmptyDialogue,
    #[error("response has no body language")]
    EmptyBodyLanguage,
    #[error("silent turn is missing the inferred user action")]
    MissingInferredAction,
    #[error("inferred user action is not in second person: {0}")]
    NotSecondPerson(String),
}

/// What kind of turn the raw text answers. Controls extra validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expectation {
    #[default]
    Turn,
    /// The user stayed silent; an inferred second-person action is required.
    SilentTurn,
    Opening,
}

/// Extracts and validates a `TurnResult` from raw model text. Pure.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseParser;

impl ResponseParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, raw: &str) -> Result<TurnResult, ParseError> {
        self.parse_expecting(raw, Expectation::Turn)
    }

    pub fn parse_expecting(&self, raw: &str, expect: Expectation) -> Result<TurnResult, ParseError> {
        let json = extract_json_object(raw)?;
        let result: TurnResult = serde_json::from_str(json).map_err(|e| {
            tracing::debug!(
                error = %e,
                raw_preview = %preview(raw, 240),
                "turn JSON deserialization failed"
            );
            ParseError::InvalidJson(e.to_string())
        })?;
        validate(result, expect)
    }
}

/// Normalize and check a deserialized result.
fn validate(mut r: TurnResult, expect: Expectation) -> Result<TurnResult, ParseError> {
    r.dialogue.retain_mut(|seg| {
        let trimmed = seg.text.trim();
        if trimmed.len() != seg.text.len() {
            seg.text = trimmed.to_owned();
        }
        !seg.text.is_empty()
    });
    if r.dialogue.is_empty() && !r.silent_turn {
        return Err(ParseError::EmptyDialogue);
    }

    r.body_language = r.body_language.trim().to_owned();
    if r.body_language.is_empty() {
        return Err(ParseError::EmptyBodyLanguage);
    }

    // Advisory field: clamp instead of rejecting.
    r.conversation_momentum = r.conversation_momentum.clamp(0, 100);

    if let Some(fb) = r.feedback.as_mut() {
        fb.effectiveness_score = fb.effectiveness_score.clamp(0, 100);
        fb.trait_label = fb.trait_label.take().and_then(|mut t| {
            t.label = single_word(&t.label)?;
            t.justification = t.justification.trim().to_owned();
            t.evidence = non_blank(t.evidence.take());
            Some(t)
        });
    }

    r.ai_name = non_blank(r.ai_name.take());
    r.internal_thought = non_blank(r.internal_thought.take());
    r.contextual_summary = non_blank(r.contextual_summary.take());
    r.emerging_goal = non_blank(r.emerging_goal.take());
    r.backstory = non_blank(r.backstory.take());
    r.inferred_user_action = non_blank(r.inferred_user_action.take());

    if expect == Expectation::SilentTurn {
        let action = r
            .inferred_user_action
            .as_deref()
            .ok_or(ParseError::MissingInferredAction)?;
        if !is_second_person(action) {
            return Err(ParseError::NotSecondPerson(preview(action, 80)));
        }
    }

    Ok(r)
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_owned()).filter(|v| !v.is_empty())
}

/// First word of a label, stripped of surrounding punctuation.
fn single_word(label: &str) -> Option<String> {
    label
        .split_whitespace()
        .next()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '-'))
        .filter(|w| !w.is_empty())
        .map(str::to_owned)
}

fn is_second_person(text: &str) -> bool {
    text.split_whitespace()
        .next()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
                .to_lowercase()
                .replace('\u{2019}', "'")
        })
        .is_some_and(|w| SECOND_PERSON_OPENERS.contains(&w.as_str()))
}

/// Locate the outermost JSON object in `raw`, tolerating code fences and
/// surrounding prose. Returns a slice of the input.
pub(crate) fn extract_json_object(raw: &str) -> Result<&str, ParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ParseError::NoJsonObject);
    }
    let fenced = strip_fence(trimmed);
    let body = if fenced.contains('{') { fenced } else { trimmed };
    balanced_object(body)
}

/// Content of the first ``` fence (language tag dropped), or the input.
fn strip_fence(text: &str) -> &str {
    let Some(open) = text.find("```") else {
        return text;
    };
    let after = &text[open + 3..];
    let after = match after.find('\n') {
        Some(nl) if after[..nl].trim().chars().all(|c| c.is_ascii_alphanumeric()) => &after[nl + 1..],
        _ => after,
    };
    match after.find("```") {
        Some(close) => &after[..close],
        None => after,
    }
}

/// Slice from the first `{` to its matching `}`, skipping braces inside strings.
fn balanced_object(body: &str) -> Result<&str, ParseError> {
    let start = body.find('{').ok_or(ParseError::NoJsonObject)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in body[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(&body[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    Err(ParseError::Truncated)
}

pub(crate) fn preview(s: &str, max: usize) -> String {
    let mut out: String = s.chars().take(max).collect();
    if s.chars().count() > max {
        out.push_str("...");
    }
    out
}
