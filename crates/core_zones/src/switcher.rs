//! Per-region app switcher state machine.
//!
//! `Idle -> Active(region) -> Idle`. While a region's shortcut chord is held,
//! repeated triggers cycle through the region's candidate applications;
//! releasing the modifiers commits the selection.

use std::time::Instant;

use crate::{AppId, RegionId};

/// One application offered by the switcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub app_id: AppId,
    pub display_name: String,
    pub is_running: bool,
}

/// Transient state while a switcher chord is held.
#[derive(Debug, Clone)]
pub struct SwitcherState {
    pub region_id: RegionId,
    pub candidates: Vec<Candidate>,
    pub selected_index: usize,
    pub started_at: Instant,
}

impl SwitcherState {
    pub fn selected(&self) -> Option<&Candidate> {
        self.candidates.get(self.selected_index)
    }

    fn advance(&mut self) {
        if !self.candidates.is_empty() {
            self.selected_index = (self.selected_index + 1) % self.candidates.len();
        }
    }
}

/// What a trigger asks the caller to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitcherStep {
    /// No candidates; nothing happens.
    Nothing,
    /// A single candidate: activate it without showing the switcher.
    ActivateNow(Candidate),
    /// The switcher is showing `selected_index` for `region_id`.
    Selecting {
        region_id: RegionId,
        selected_index: usize,
    },
}

/// Order the candidates for a region.
///
/// Running assigned apps come first, in front-to-back window order with
/// duplicates removed; running apps without a visible window follow in
/// configured order; apps that are not running come last, in configured
/// order.
pub fn build_candidates(
    assigned: &[AppId],
    window_order: &[AppId],
    running: &[(AppId, String)],
) -> Vec<Candidate> {
    let display_name = |app_id: &str| {
        running
            .iter()
            .find(|(id, _)| id == app_id)
            .map(|(_, name)| name.clone())
    };

    let mut candidates: Vec<Candidate> = Vec::new();
    let mut push = |app_id: &AppId, name: String, is_running: bool| {
        if !candidates.iter().any(|c| &c.app_id == app_id) {
            candidates.push(Candidate {
                app_id: app_id.clone(),
                display_name: name,
                is_running,
            });
        }
    };

    for app_id in window_order.iter().filter(|a| assigned.contains(a)) {
        if let Some(name) = display_name(app_id.as_str()) {
            push(app_id, name, true);
        }
    }
    for app_id in assigned {
        if let Some(name) = display_name(app_id.as_str()) {
            push(app_id, name, true);
        }
    }
    for app_id in assigned {
        push(app_id, short_name(app_id), false);
    }

    candidates
}

/// Fallback display name for an app that is not running: the last
/// dot-separated component of its identifier.
fn short_name(app_id: &str) -> String {
    app_id.rsplit('.').next().unwrap_or(app_id).to_string()
}

/// Engine-wide switcher. At most one region is active at a time.
#[derive(Debug, Default)]
pub struct FocusCycle {
    state: Option<SwitcherState>,
}

impl FocusCycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Option<&SwitcherState> {
        self.state.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    /// Handle a region shortcut.
    ///
    /// A trigger for the region that is already active advances the
    /// selection with wrap-around. Any other trigger starts afresh with the
    /// candidates produced by `candidates`, abandoning an active switcher
    /// for another region.
    pub fn trigger<F>(&mut self, region_id: RegionId, foreground: Option<&str>, candidates: F) -> SwitcherStep
    where
        F: FnOnce() -> Vec<Candidate>,
    {
        if let Some(state) = self.state.as_mut().filter(|s| s.region_id == region_id) {
            state.advance();
            return SwitcherStep::Selecting {
                region_id,
                selected_index: state.selected_index,
            };
        }

        self.state = None;
        let mut candidates = candidates();
        match candidates.len() {
            0 => SwitcherStep::Nothing,
            1 => SwitcherStep::ActivateNow(candidates.remove(0)),
            _ => {
                let front_is_first = foreground.is_some_and(|f| candidates[0].app_id == f);
                let selected_index = if front_is_first { 1 } else { 0 };
                self.state = Some(SwitcherState {
                    region_id,
                    candidates,
                    selected_index,
                    started_at: Instant::now(),
                });
                SwitcherStep::Selecting {
                    region_id,
                    selected_index,
                }
            }
        }
    }

    /// Leave the active state, returning the selected candidate.
    pub fn commit(&mut self) -> Option<(Candidate, SwitcherState)> {
        let state = self.state.take()?;
        let selected = state.selected()?.clone();
        Some((selected, state))
    }

    /// Leave the active state without selecting anything.
    pub fn cancel(&mut self) -> bool {
        self.state.take().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> Vec<AppId> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn running(list: &[&str]) -> Vec<(AppId, String)> {
        list.iter().map(|s| (s.to_string(), format!("App {}", s))).collect()
    }

    fn candidates(n: usize) -> Vec<Candidate> {
        (0..n)
            .map(|i| Candidate {
                app_id: format!("com.app.{}", i),
                display_name: format!("App {}", i),
                is_running: true,
            })
            .collect()
    }

    #[test]
    fn test_build_candidates_orders_running_by_window_order() {
        let assigned = ids(&["a", "b", "c", "d"]);
        let window_order = ids(&["x", "c", "a", "c", "a"]);
        let c = build_candidates(&assigned, &window_order, &running(&["a", "b", "c", "x"]));

        let order: Vec<_> = c.iter().map(|c| c.app_id.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "b", "d"]);
        assert!(c[0].is_running && c[1].is_running && c[2].is_running);
        assert!(!c[3].is_running);
        assert_eq!(c[0].display_name, "App c");
    }

    #[test]
    fn test_build_candidates_not_running_use_short_name() {
        let c = build_candidates(&ids(&["com.example.Editor"]), &[], &[]);
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].display_name, "Editor");
        assert!(!c[0].is_running);
    }

    #[test]
    fn test_zero_candidates_is_noop() {
        let mut cycle = FocusCycle::new();
        assert_eq!(cycle.trigger(1, None, Vec::new), SwitcherStep::Nothing);
        assert!(!cycle.is_active());
    }

    #[test]
    fn test_single_candidate_activates_immediately() {
        let mut cycle = FocusCycle::new();
        let step = cycle.trigger(1, None, || candidates(1));
        assert_eq!(step, SwitcherStep::ActivateNow(candidates(1).remove(0)));
        assert!(!cycle.is_active());
    }

    #[test]
    fn test_toggle_selects_second_when_front_is_first() {
        let mut cycle = FocusCycle::new();
        let step = cycle.trigger(1, Some("com.app.0"), || candidates(2));
        assert_eq!(step, SwitcherStep::Selecting { region_id: 1, selected_index: 1 });
    }

    #[test]
    fn test_selects_first_when_front_is_elsewhere() {
        let mut cycle = FocusCycle::new();
        let step = cycle.trigger(1, Some("com.other"), || candidates(2));
        assert_eq!(step, SwitcherStep::Selecting { region_id: 1, selected_index: 0 });
    }

    #[test]
    fn test_advance_wraps_around() {
        for n in 2..6 {
            let mut cycle = FocusCycle::new();
            cycle.trigger(7, None, || candidates(n));
            let start = cycle.state().unwrap().selected_index;
            for _ in 0..n {
                cycle.trigger(7, None, || panic!("candidates rebuilt while active"));
            }
            assert_eq!(cycle.state().unwrap().selected_index, start);
        }
    }

    #[test]
    fn test_other_region_starts_fresh() {
        let mut cycle = FocusCycle::new();
        cycle.trigger(1, None, || candidates(3));
        cycle.trigger(1, None, || candidates(3));
        assert_eq!(cycle.state().unwrap().selected_index, 1);

        let step = cycle.trigger(2, None, || candidates(2));
        assert_eq!(step, SwitcherStep::Selecting { region_id: 2, selected_index: 0 });
        assert_eq!(cycle.state().unwrap().region_id, 2);
    }

    #[test]
    fn test_other_region_with_one_candidate_leaves_idle() {
        let mut cycle = FocusCycle::new();
        cycle.trigger(1, None, || candidates(3));
        cycle.trigger(2, None, || candidates(1));
        assert!(!cycle.is_active());
    }

    #[test]
    fn test_commit_returns_selection_and_goes_idle() {
        let mut cycle = FocusCycle::new();
        cycle.trigger(1, None, || candidates(3));
        cycle.trigger(1, None, || candidates(3));
        let (selected, state) = cycle.commit().unwrap();
        assert_eq!(selected.app_id, "com.app.1");
        assert_eq!(state.region_id, 1);
        assert!(!cycle.is_active());
        assert!(cycle.commit().is_none());
    }

    #[test]
    fn test_cancel() {
        let mut cycle = FocusCycle::new();
        assert!(!cycle.cancel());
        cycle.trigger(1, None, || candidates(2));
        assert!(cycle.cancel());
        assert!(!cycle.is_active());
    }
}
