/// Upper bound of the engagement score; reaching it is a success exit.
pub const ENGAGEMENT_MAX: i32 = 100;
pub const ENGAGEMENT_MIN: i32 = 0;

/// Result of applying one turn's delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngagementUpdate {
    pub engagement: i32,
    pub zero_streak: u32,
    pub should_terminate_low_engagement: bool,
}

/// Bounded session-health score with per-turn decay and a zero-streak
/// termination signal.
#[derive(Debug, Clone, Copy)]
pub struct EngagementTracker {
    decay_per_turn: i32,
    streak_limit: u32,
}

impl EngagementTracker {
    pub fn new(decay_per_turn: i32, streak_limit: u32) -> Self {
        Self { decay_per_turn, streak_limit: streak_limit.max(1) }
    }

    pub fn decay_per_turn(&self) -> i32 {
        self.decay_per_turn
    }

    /// `clamp(current + delta - decay, 0, 100)`, with the zero streak advanced
    /// on results at or below zero and reset otherwise.
    pub fn apply(&self, current: i32, zero_streak: u32, proposed_delta: i32) -> EngagementUpdate {
        let raw = i64::from(current) + i64::from(proposed_delta) - i64::from(self.decay_per_turn);
        let engagement = raw.clamp(i64::from(ENGAGEMENT_MIN), i64::from(ENGAGEMENT_MAX)) as i32;
        let zero_streak = if engagement <= ENGAGEMENT_MIN {
            zero_streak.saturating_add(1)
        } else {
            0
        };
        EngagementUpdate {
            engagement,
            zero_streak,
            should_terminate_low_engagement: zero_streak >= self.streak_limit,
        }
    }
}
