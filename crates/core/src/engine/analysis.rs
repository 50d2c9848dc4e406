use serde::{Deserialize, Serialize};

use crate::response::{ParseError, preview};
use crate::types::{EndReason, SessionState};

/// Post-session assessment of the user's conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub summary: String,
    /// 0–100.
    pub overall_score: u8,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    pub key_moments: Vec<String>,
    pub goal_outcome: Option<String>,
    pub turns: u32,
    pub final_engagement: i32,
    pub end_reason: Option<EndReason>,
}

/// Wire shape of the analysis call.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAnalysis {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    overall_score: i64,
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default)]
    improvements: Vec<String>,
    #[serde(default)]
    key_moments: Vec<String>,
    #[serde(default)]
    goal_outcome: Option<String>,
}

fn clean(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse the analysis reply and attach session facts.
pub fn parse_analysis(raw: &str, state: &SessionState) -> Result<AnalysisReport, ParseError> {
    let json = crate::response::extract_json_object(raw)?;
    let parsed: RawAnalysis = serde_json::from_str(json).map_err(|e| {
        tracing::debug!(error = %e, raw_preview = %preview(raw, 240), "analysis JSON deserialization failed");
        ParseError::InvalidJson(e.to_string())
    })?;
    let summary = parsed.summary.trim().to_owned();
    if summary.is_empty() {
        return Err(ParseError::InvalidJson("analysis summary is empty".into()));
    }
    Ok(AnalysisReport {
        summary,
        overall_score: parsed.overall_score.clamp(0, 100) as u8,
        strengths: clean(parsed.strengths),
        improvements: clean(parsed.improvements),
        key_moments: clean(parsed.key_moments),
        goal_outcome: parsed.goal_outcome.map(|g| g.trim().to_owned()).filter(|g| !g.is_empty()),
        turns: state.turn,
        final_engagement: state.engagement,
        end_reason: state.ended,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Scenario;
    use std::sync::Arc;

    fn ended_state() -> SessionState {
        SessionState {
            session_id: uuid::Uuid::new_v4(),
            scenario: Arc::new(serde_json::from_str::<Scenario>(r#"{"name": "Maya"}"#).unwrap()),
            persona_name: "Maya".into(),
            backstory: None,
            established_visuals: Default::default(),
            engagement: 100,
            zero_engagement_streak: 0,
            active_goal: None,
            stated_goal_spent: false,
            active_action: None,
            conversation_momentum: 80,
            current_image: None,
            turn: 7,
            ended: Some(EndReason::EngagementMaxed),
            started_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn parses_and_clamps_score() {
        let raw = r#"Here you go:
        {"summary": " Warm and curious. ", "overallScore": 140,
         "strengths": ["asked follow-ups", " "], "improvements": [], "keyMoments": ["the joke"]}"#;
        let report = parse_analysis(raw, &ended_state()).unwrap();
        assert_eq!(report.summary, "Warm and curious.");
        assert_eq!(report.overall_score, 100);
        assert_eq!(report.strengths, vec!["asked follow-ups".to_string()]);
        assert_eq!(report.goal_outcome, None);
        assert_eq!(report.turns, 7);
        assert_eq!(report.final_engagement, 100);
        assert_eq!(report.end_reason, Some(EndReason::EngagementMaxed));
    }

    #[test]
    fn rejects_missing_summary() {
        let err = parse_analysis(r#"{"overallScore": 50}"#, &ended_state()).unwrap_err();
        assert!(matches!(err, ParseError::InvalidJson(_)));
    }
}
