use crate::response::ActionProposal;
use crate::types::ActiveAction;

use super::same_text;

/// Action slice of the next session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionUpdate {
    pub action: Option<ActiveAction>,
    /// Progress reached 100 on this turn.
    pub completed: bool,
    /// A proposal was ignored because it named a different action.
    pub rejected: bool,
}

/// State machine for one long-running activity with non-decreasing progress.
///
/// `None -> Active -> (Paused <-> Active) -> Completing(100) -> None`. The
/// completing state lasts exactly one turn via `pending_clear`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionLifecycleManager;

impl ActionLifecycleManager {
    pub fn new() -> Self {
        Self
    }

    pub fn advance(&self, current: Option<&ActiveAction>, proposal: Option<&ActionProposal>) -> ActionUpdate {
        let proposal = proposal.filter(|p| !p.description.trim().is_empty());

        if let Some(done) = current.filter(|a| a.pending_clear) {
            tracing::debug!(action = %done.description, "completed action cleared");
            return match proposal {
                Some(p) if !same_text(&p.description, &done.description) => start(p),
                _ => ActionUpdate { action: None, completed: false, rejected: false },
            };
        }

        match (current, proposal) {
            (None, None) => ActionUpdate { action: None, completed: false, rejected: false },
            (None, Some(p)) => start(p),
            (Some(a), None) => ActionUpdate { action: Some(a.clone()), completed: false, rejected: false },
            (Some(a), Some(p)) if same_text(&p.description, &a.description) => {
                let proposed = clamp_progress(p.progress);
                if proposed < a.progress {
                    tracing::debug!(
                        action = %a.description,
                        current = a.progress,
                        proposed,
                        "action progress regression floored"
                    );
                }
                let mut next = a.clone();
                next.progress = a.progress.max(proposed);
                let completed = mark_completion(&mut next);
                ActionUpdate { action: Some(next), completed, rejected: false }
            }
            (Some(a), Some(p)) => {
                tracing::debug!(
                    active = %a.description,
                    proposed = %p.description,
                    "proposal for a different action ignored"
                );
                ActionUpdate { action: Some(a.clone()), completed: false, rejected: true }
            }
        }
    }

    /// Toggle the pause flag. Progress is untouched.
    pub fn set_paused(&self, current: Option<&ActiveAction>, paused: bool) -> Option<ActiveAction> {
        current.map(|a| ActiveAction { paused, ..a.clone() })
    }
}

fn start(p: &ActionProposal) -> ActionUpdate {
    let mut action = ActiveAction::new(p.description.trim());
    action.progress = clamp_progress(p.progress);
    tracing::debug!(action = %action.description, progress = action.progress, "action started");
    let completed = mark_completion(&mut action);
    ActionUpdate { action: Some(action), completed, rejected: false }
}

fn mark_completion(action: &mut ActiveAction) -> bool {
    if action.progress >= 100 && !action.pending_clear {
        action.pending_clear = true;
        return true;
    }
    false
}

fn clamp_progress(p: i64) -> u8 {
    p.clamp(0, 100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prop(description: &str, progress: i64) -> ActionProposal {
        ActionProposal { description: description.into(), progress }
    }

    fn walking(progress: u8) -> ActiveAction {
        ActiveAction { progress, ..ActiveAction::new("walking to the cafe") }
    }

    #[test]
    fn progress_never_decreases() {
        let m = ActionLifecycleManager::new();
        let u = m.advance(Some(&walking(60)), Some(&prop("walking to the cafe", 40)));
        assert_eq!(u.action.unwrap().progress, 60);
    }

    #[test]
    fn sequence_of_proposals_is_monotonic() {
        let m = ActionLifecycleManager::new();
        let mut current = None;
        let mut last = 0;
        for p in [10, 35, 20, 0, 50, 49, 80, 300] {
            let u = m.advance(current.as_ref(), Some(&prop("walking to the cafe", p)));
            let a = u.action.unwrap();
            assert!(a.progress >= last);
            last = a.progress;
            current = Some(a);
        }
        assert_eq!(last, 100);
    }

    #[test]
    fn completion_is_visible_for_one_turn() {
        let m = ActionLifecycleManager::new();
        let u = m.advance(Some(&walking(90)), Some(&prop("Walking to the cafe.", 100)));
        assert!(u.completed);
        let done = u.action.unwrap();
        assert_eq!(done.progress, 100);
        assert!(done.pending_clear);

        let next = m.advance(Some(&done), Some(&prop("walking to the cafe", 100)));
        assert_eq!(next.action, None);
        assert!(!next.completed);
    }

    #[test]
    fn new_action_may_start_on_clearing_turn() {
        let m = ActionLifecycleManager::new();
        let mut done = walking(100);
        done.pending_clear = true;
        let u = m.advance(Some(&done), Some(&prop("ordering coffee", 10)));
        let a = u.action.unwrap();
        assert_eq!(a.description, "ordering coffee");
        assert_eq!(a.progress, 10);
    }

    #[test]
    fn mismatched_description_is_rejected() {
        let m = ActionLifecycleManager::new();
        let u = m.advance(Some(&walking(30)), Some(&prop("dancing", 90)));
        assert!(u.rejected);
        assert_eq!(u.action, Some(walking(30)));
    }

    #[test]
    fn pause_is_orthogonal_to_progress() {
        let m = ActionLifecycleManager::new();
        let paused = m.set_paused(Some(&walking(30)), true).unwrap();
        assert!(paused.paused);
        let u = m.advance(Some(&paused), Some(&prop("walking to the cafe", 45)));
        let a = u.action.unwrap();
        assert!(a.paused);
        assert_eq!(a.progress, 45);
        assert_eq!(m.set_paused(None, true), None);
    }

    #[test]
    fn blank_proposal_is_ignored() {
        let m = ActionLifecycleManager::new();
        let u = m.advance(None, Some(&prop("   ", 20)));
        assert_eq!(u.action, None);
    }
}
