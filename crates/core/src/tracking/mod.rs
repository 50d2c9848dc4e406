mod action;
mod engagement;
mod goal;
mod visuals;

pub use action::{ActionLifecycleManager, ActionUpdate};
pub use engagement::{ENGAGEMENT_MAX, ENGAGEMENT_MIN, EngagementTracker, EngagementUpdate};
pub use goal::{GoalLifecycleManager, GoalUpdate};
pub use visuals::{VisualConsistencyTracker, image_prompt};

/// Lowercase, punctuation replaced by spaces, whitespace collapsed.
pub(crate) fn normalize(s: &str) -> String {
    let spaced: String = s
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .flat_map(char::to_lowercase)
        .collect();
    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Same description modulo case, punctuation and spacing.
pub(crate) fn same_text(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}
