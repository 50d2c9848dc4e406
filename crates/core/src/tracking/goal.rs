use crate::response::GoalProposal;
use crate::types::{ActiveGoal, Scenario};

use super::same_text;

/// Goal slice of the next session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoalUpdate {
    pub goal: Option<ActiveGoal>,
    pub stated_goal_spent: bool,
    /// `achieved` flipped to true on this turn.
    pub newly_achieved: bool,
}

/// State machine for the single active conversational goal.
///
/// A stated goal pins the goal text for the whole session. Without one, any
/// proposed text becomes the new active goal. Achievement is observed on
/// exactly one turn (`pending_clear`) and the goal is cleared on the next.
#[derive(Debug, Clone, Copy, Default)]
pub struct GoalLifecycleManager {
    rearm_stated: bool,
}

impl GoalLifecycleManager {
    pub fn new(rearm_stated: bool) -> Self {
        Self { rearm_stated }
    }

    /// Effective re-arm policy for `scenario` (scenario overrides the default).
    fn rearms(&self, scenario: &Scenario) -> bool {
        scenario.allow_goal_rearm.unwrap_or(self.rearm_stated)
    }

    /// Goal at session start: the stated goal, if any.
    pub fn initial(&self, scenario: &Scenario) -> Option<ActiveGoal> {
        scenario.goal().map(ActiveGoal::new)
    }

    pub fn advance(
        &self,
        scenario: &Scenario,
        current: Option<&ActiveGoal>,
        stated_goal_spent: bool,
        proposal: &GoalProposal,
    ) -> GoalUpdate {
        let stated = scenario.goal();

        if let Some(done) = current.filter(|g| g.pending_clear) {
            return match stated {
                Some(text) if self.rearms(scenario) => {
                    tracing::debug!(goal = %text, "stated goal re-armed");
                    GoalUpdate { goal: Some(ActiveGoal::new(text)), stated_goal_spent: false, newly_achieved: false }
                }
                Some(_) => {
                    tracing::debug!(goal = %done.text, "stated goal cleared after achievement");
                    GoalUpdate { goal: None, stated_goal_spent: true, newly_achieved: false }
                }
                None => match proposal.text.as_deref() {
                    Some(text) if !same_text(text, &done.text) => {
                        tracing::debug!(previous = %done.text, goal = %text, "goal replaced after achievement");
                        let (goal, newly_achieved) = apply(ActiveGoal::new(text), proposal);
                        GoalUpdate { goal: Some(goal), stated_goal_spent, newly_achieved }
                    }
                    _ => GoalUpdate { goal: None, stated_goal_spent, newly_achieved: false },
                },
            };
        }

        let base = match stated {
            Some(_) if stated_goal_spent => None,
            Some(text) => Some(match current {
                Some(g) if g.text == text => g.clone(),
                Some(g) => {
                    tracing::warn!(found = %g.text, stated = %text, "goal text drifted from stated goal, re-pinning");
                    ActiveGoal { text: text.to_owned(), ..g.clone() }
                }
                None => ActiveGoal::new(text),
            }),
            None => match (current, proposal.text.as_deref()) {
                (Some(g), Some(text)) if !same_text(text, &g.text) => {
                    tracing::debug!(previous = %g.text, goal = %text, "goal replaced");
                    Some(ActiveGoal::new(text))
                }
                (None, Some(text)) => {
                    tracing::debug!(goal = %text, "goal proposed");
                    Some(ActiveGoal::new(text))
                }
                (current, _) => current.cloned(),
            },
        };

        match base {
            Some(goal) => {
                let (goal, newly_achieved) = apply(goal, proposal);
                GoalUpdate { goal: Some(goal), stated_goal_spent, newly_achieved }
            }
            None => GoalUpdate { goal: None, stated_goal_spent, newly_achieved: false },
        }
    }
}

/// Apply progress and the achievement boundary to an active goal.
fn apply(mut goal: ActiveGoal, proposal: &GoalProposal) -> (ActiveGoal, bool) {
    if let Some(p) = proposal.progress {
        goal.progress = p.clamp(0, 100) as u8;
    }
    if proposal.achieved && !goal.achieved {
        goal.achieved = true;
        goal.pending_clear = true;
        goal.progress = 100;
        tracing::info!(goal = %goal.text, "goal achieved");
        return (goal, true);
    }
    (goal, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario(goal: Option<&str>) -> Scenario {
        Scenario {
            name: "Maya".into(),
            gender: "female".into(),
            age: "late twenties".into(),
            personality_traits: vec!["witty".into()],
            culture: String::new(),
            environment: "a coffee shop".into(),
            stated_goal: goal.map(str::to_owned),
            allow_goal_rearm: None,
        }
    }

    fn proposal(text: Option<&str>, progress: Option<i64>, achieved: bool) -> GoalProposal {
        GoalProposal { text: text.map(str::to_owned), progress, achieved }
    }

    #[test]
    fn stated_goal_is_pinned() {
        let s = scenario(Some("Ask for her number"));
        let m = GoalLifecycleManager::default();
        let g = m.initial(&s).unwrap();
        let u = m.advance(&s, Some(&g), false, &proposal(Some("Talk about books"), Some(30), false));
        let goal = u.goal.unwrap();
        assert_eq!(goal.text, "Ask for her number");
        assert_eq!(goal.progress, 30);
    }

    #[test]
    fn achieved_is_observed_once_then_cleared() {
        let s = scenario(Some("Ask for her number"));
        let m = GoalLifecycleManager::default();
        let g = m.initial(&s).unwrap();

        let n = m.advance(&s, Some(&g), false, &proposal(None, Some(90), true));
        assert!(n.newly_achieved);
        let achieved = n.goal.unwrap();
        assert!(achieved.achieved && achieved.pending_clear);

        let n1 = m.advance(&s, Some(&achieved), n.stated_goal_spent, &proposal(None, None, false));
        assert_eq!(n1.goal, None);
        assert!(n1.stated_goal_spent);
        assert!(!n1.newly_achieved);

        // Spent stated goals stay gone.
        let n2 = m.advance(&s, None, n1.stated_goal_spent, &proposal(None, Some(10), true));
        assert_eq!(n2.goal, None);
        assert!(!n2.newly_achieved);
    }

    #[test]
    fn stated_goal_rearms_when_scenario_allows() {
        let mut s = scenario(Some("Make her laugh"));
        s.allow_goal_rearm = Some(true);
        let m = GoalLifecycleManager::default();
        let mut done = ActiveGoal::new("Make her laugh");
        done.achieved = true;
        done.pending_clear = true;
        let u = m.advance(&s, Some(&done), false, &proposal(None, None, false));
        assert_eq!(u.goal, Some(ActiveGoal::new("Make her laugh")));
        assert!(!u.stated_goal_spent);
    }

    #[test]
    fn dynamic_goal_is_proposed_and_replaced() {
        let s = scenario(None);
        let m = GoalLifecycleManager::default();
        assert_eq!(m.initial(&s), None);

        let u = m.advance(&s, None, false, &proposal(Some("Learn her favourite band"), Some(5), false));
        let first = u.goal.unwrap();
        assert_eq!(first.text, "Learn her favourite band");

        let u = m.advance(&s, Some(&first), false, &proposal(Some("Plan a second date"), None, false));
        let second = u.goal.unwrap();
        assert_eq!(second.text, "Plan a second date");
        assert_eq!(second.progress, 0);
    }

    #[test]
    fn no_goal_without_proposal() {
        let s = scenario(None);
        let u = GoalLifecycleManager::default().advance(&s, None, false, &proposal(None, Some(40), true));
        assert_eq!(u.goal, None);
        assert!(!u.newly_achieved);
    }

    #[test]
    fn dynamic_goal_clears_and_ignores_repeat_of_finished_text() {
        let s = scenario(None);
        let m = GoalLifecycleManager::default();
        let mut done = ActiveGoal::new("Ask for her number");
        done.achieved = true;
        done.pending_clear = true;

        let u = m.advance(&s, Some(&done), false, &proposal(Some("ask for her number"), Some(100), true));
        assert_eq!(u.goal, None);

        let u = m.advance(&s, Some(&done), false, &proposal(Some("Suggest a walk"), None, false));
        assert_eq!(u.goal.unwrap().text, "Suggest a walk");
    }

    #[test]
    fn progress_is_clamped() {
        let s = scenario(None);
        let m = GoalLifecycleManager::default();
        let g = ActiveGoal::new("Compliment her");
        let u = m.advance(&s, Some(&g), false, &proposal(None, Some(250), false));
        assert_eq!(u.goal.unwrap().progress, 100);
        let u = m.advance(&s, Some(&g), false, &proposal(None, Some(-4), false));
        assert_eq!(u.goal.unwrap().progress, 0);
    }
}
