use std::collections::HashSet;

use crate::response::VisualProposal;
use crate::types::EstablishedVisuals;

use super::normalize;

/// Owns the canonical visual record across turns.
///
/// Character and clothing descriptions are stable: a proposal replaces them
/// only when the wording differs beyond `similarity_threshold` (word-set
/// Jaccard similarity of the normalized text). Everything else follows the
/// proposal whenever it names a value.
#[derive(Debug, Clone, Copy)]
pub struct VisualConsistencyTracker {
    similarity_threshold: f64,
}

impl Default for VisualConsistencyTracker {
    fn default() -> Self {
        Self::new(0.9)
    }
}

impl VisualConsistencyTracker {
    pub fn new(similarity_threshold: f64) -> Self {
        Self { similarity_threshold: similarity_threshold.clamp(0.0, 1.0) }
    }

    pub fn reconcile(&self, previous: &EstablishedVisuals, proposed: Option<&VisualProposal>) -> EstablishedVisuals {
        let Some(p) = proposed else {
            return previous.clone();
        };
        EstablishedVisuals {
            character_description: self.stable(&previous.character_description, p.character_description.as_deref()),
            clothing_description: self.stable(&previous.clothing_description, p.clothing_description.as_deref()),
            held_objects: volatile(&previous.held_objects, p.held_objects.as_deref()),
            body_position: volatile(&previous.body_position, p.body_position.as_deref()),
            gaze_direction: volatile(&previous.gaze_direction, p.gaze_direction.as_deref()),
            position_relative_to_user: volatile(
                &previous.position_relative_to_user,
                p.position_relative_to_user.as_deref(),
            ),
            environment_description: volatile(
                &previous.environment_description,
                p.environment_description.as_deref(),
            ),
            current_action: volatile(&previous.current_action, p.current_action.as_deref()),
        }
    }

    /// True when the service asked for a new image, or when the environment
    /// or clothing changed this turn. The latter cannot be suppressed.
    pub fn should_generate_image(
        &self,
        previous: &EstablishedVisuals,
        reconciled: &EstablishedVisuals,
        service_flag: bool,
    ) -> bool {
        service_flag
            || normalize(&previous.environment_description) != normalize(&reconciled.environment_description)
            || normalize(&previous.clothing_description) != normalize(&reconciled.clothing_description)
    }

    /// Take the proposed stable field only on a non-trivial difference.
    fn stable(&self, previous: &str, proposed: Option<&str>) -> String {
        let Some(proposed) = proposed.map(str::trim).filter(|p| !p.is_empty()) else {
            return previous.to_owned();
        };
        if previous.trim().is_empty() {
            return proposed.to_owned();
        }
        let similarity = jaccard(previous, proposed);
        if similarity < self.similarity_threshold {
            tracing::debug!(
                similarity,
                previous = %previous,
                proposed = %proposed,
                "stable visual field replaced"
            );
            proposed.to_owned()
        } else {
            previous.to_owned()
        }
    }
}

fn volatile(previous: &str, proposed: Option<&str>) -> String {
    match proposed.map(str::trim) {
        Some(p) if !p.is_empty() => p.to_owned(),
        _ => previous.to_owned(),
    }
}

fn jaccard(a: &str, b: &str) -> f64 {
    let a_norm = normalize(a);
    let b_norm = normalize(b);
    let a: HashSet<&str> = a_norm.split(' ').filter(|w| !w.is_empty()).collect();
    let b: HashSet<&str> = b_norm.split(' ').filter(|w| !w.is_empty()).collect();
    let union = a.union(&b).count();
    if union == 0 {
        return 1.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

/// Image prompt built only from the reconciled visual record.
pub fn image_prompt(v: &EstablishedVisuals) -> String {
    let mut parts = Vec::new();
    let fields = [
        ("", v.character_description.as_str()),
        ("Wearing", v.clothing_description.as_str()),
        ("Holding", v.held_objects.as_str()),
        ("Pose", v.body_position.as_str()),
        ("Looking", v.gaze_direction.as_str()),
        ("Position relative to viewer", v.position_relative_to_user.as_str()),
        ("Currently", v.current_action.as_str()),
        ("Setting", v.environment_description.as_str()),
    ];
    for (label, value) in fields {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        if label.is_empty() {
            parts.push(value.to_owned());
        } else {
            parts.push(format!("{label}: {value}"));
        }
    }
    parts.push("Photorealistic, first-person perspective, natural lighting.".to_owned());
    parts.join(". ")
}
