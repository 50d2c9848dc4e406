use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Environment variable prefix for engine parameters.
const ENV_PREFIX: &str = "RAPPORT_";

/// All engine parameters. Defaults apply unless overridden from the
/// environment (`RAPPORT_<KEY>`, e.g. `RAPPORT_HISTORY_WINDOW=8`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineCfg {
    // prompt context
    pub history_window: usize,

    // engagement
    pub initial_engagement: i32,
    pub engagement_decay_per_turn: i32,
    pub low_engagement_streak_limit: u32,

    // session end
    /// 0 = unlimited.
    pub max_turns: u32,

    // goals
    pub stated_goal_rearm: bool,

    // text service
    pub text_max_tokens: u32,
    pub text_temperature: f32,
    pub analysis_max_tokens: u32,
    pub text_timeout_ms: u64,

    // image service
    pub image_timeout_ms: u64,
    pub image_size: String,

    // retry
    pub retry_max_retries: u32,
    pub retry_backoff_ms: u64,

    // visuals
    pub visual_similarity_threshold: f32,
}

impl Default for EngineCfg {
    fn default() -> Self {
        Self {
            history_window: 12,
            initial_engagement: 50,
            engagement_decay_per_turn: 2,
            low_engagement_streak_limit: 3,
            max_turns: 0,
            stated_goal_rearm: false,
            text_max_tokens: 1024,
            text_temperature: 0.9,
            analysis_max_tokens: 1500,
            text_timeout_ms: 30_000,
            image_timeout_ms: 60_000,
            image_size: "1024x1024".into(),
            retry_max_retries: 3,
            retry_backoff_ms: 1000,
            visual_similarity_threshold: 0.9,
        }
    }
}

impl EngineCfg {
    /// Load from `RAPPORT_*` environment variables over defaults.
    pub fn from_env() -> Self {
        let map: HashMap<String, String> = std::env::vars()
            .filter_map(|(k, v)| {
                k.strip_prefix(ENV_PREFIX)
                    .map(|key| (key.to_ascii_lowercase(), v))
            })
            .collect();
        Self::from_map(&map)
    }

    /// Overlay values from a key/value map; missing or unparseable keys keep defaults.
    pub fn from_map(m: &HashMap<String, String>) -> Self {
        let d = Self::default();
        Self {
            history_window: get_or(m, "history_window", d.history_window),
            initial_engagement: get_or(m, "initial_engagement", d.initial_engagement).clamp(0, 100),
            engagement_decay_per_turn: get_or(m, "engagement_decay_per_turn", d.engagement_decay_per_turn),
            low_engagement_streak_limit: get_or(m, "low_engagement_streak_limit", d.low_engagement_streak_limit).max(1),
            max_turns: get_or(m, "max_turns", d.max_turns),
            stated_goal_rearm: get_or(m, "stated_goal_rearm", d.stated_goal_rearm),
            text_max_tokens: get_or(m, "text_max_tokens", d.text_max_tokens),
            text_temperature: get_or(m, "text_temperature", d.text_temperature),
            analysis_max_tokens: get_or(m, "analysis_max_tokens", d.analysis_max_tokens),
            text_timeout_ms: get_or(m, "text_timeout_ms", d.text_timeout_ms),
            image_timeout_ms: get_or(m, "image_timeout_ms", d.image_timeout_ms),
            image_size: get_or(m, "image_size", d.image_size),
            retry_max_retries: get_or(m, "retry_max_retries", d.retry_max_retries),
            retry_backoff_ms: get_or(m, "retry_backoff_ms", d.retry_backoff_ms),
            visual_similarity_threshold: get_or(m, "visual_similarity_threshold", d.visual_similarity_threshold).clamp(0.0, 1.0),
        }
    }

    pub fn text_timeout(&self) -> Duration {
        Duration::from_millis(self.text_timeout_ms)
    }

    pub fn image_timeout(&self) -> Duration {
        Duration::from_millis(self.image_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// `(key, value, description)` for every parameter, in declaration order.
    pub fn to_entries(&self) -> Vec<(&str, String, &str)> {
        vec![
            ("history_window", self.history_window.to_string(), "Recent messages included in each prompt"),
            ("initial_engagement", self.initial_engagement.to_string(), "Engagement at session start"),
            ("engagement_decay_per_turn", self.engagement_decay_per_turn.to_string(), "Engagement lost every turn"),
            ("low_engagement_streak_limit", self.low_engagement_streak_limit.to_string(), "Zero-engagement turns before termination"),
            ("max_turns", self.max_turns.to_string(), "Turn limit (0 = unlimited)"),
            ("stated_goal_rearm", self.stated_goal_rearm.to_string(), "Stated goal re-arms after achievement"),
            ("text_max_tokens", self.text_max_tokens.to_string(), "Max tokens per turn completion"),
            ("text_temperature", self.text_temperature.to_string(), "Turn completion temperature"),
            ("analysis_max_tokens", self.analysis_max_tokens.to_string(), "Max tokens for the analysis report"),
            ("text_timeout_ms", self.text_timeout_ms.to_string(), "Per-attempt text service timeout ms"),
            ("image_timeout_ms", self.image_timeout_ms.to_string(), "Per-attempt image service timeout ms"),
            ("image_size", self.image_size.clone(), "Requested image size"),
            ("retry_max_retries", self.retry_max_retries.to_string(), "Retries after the first failed attempt"),
            ("retry_backoff_ms", self.retry_backoff_ms.to_string(), "Fixed backoff between attempts ms"),
            ("visual_similarity_threshold", self.visual_similarity_threshold.to_string(), "Similarity at or above which appearance edits are ignored"),
        ]
    }
}

fn get_or<T: std::str::FromStr>(map: &HashMap<String, String>, key: &str, default: T) -> T {
    map.get(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
