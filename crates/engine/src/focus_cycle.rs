//! Per-region app switcher effects.
//!
//! The state machine lives in [`zonekeeper_core::FocusCycle`]; this module
//! gathers its inputs from the window system, activates or launches the
//! selected app, and publishes switcher changes to the UI.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zonekeeper_core::{build_candidates, Candidate, FocusCycle, Region, RegionId, SwitcherStep};
use zonekeeper_platform::{PlatformError, WindowSystem};

use crate::{EngineEvent, UiEvent};

pub struct FocusCycleController {
    ws: Arc<dyn WindowSystem>,
    cycle: FocusCycle,
    /// Shared with the key tap, which sets it when a cycle shortcut fires
    /// and reports the next full modifier release.
    armed: Arc<AtomicBool>,
    ui: mpsc::UnboundedSender<UiEvent>,
    events: mpsc::Sender<EngineEvent>,
    timeout: Duration,
    /// Timer of a switcher opened without a held chord.
    expiry: Option<JoinHandle<()>>,
    generation: u64,
}

impl FocusCycleController {
    pub fn new(
        ws: Arc<dyn WindowSystem>,
        armed: Arc<AtomicBool>,
        ui: mpsc::UnboundedSender<UiEvent>,
        events: mpsc::Sender<EngineEvent>,
        timeout: Duration,
    ) -> Self {
        Self {
            ws,
            cycle: FocusCycle::new(),
            armed,
            ui,
            events,
            timeout,
            expiry: None,
            generation: 0,
        }
    }

    pub fn active_region(&self) -> Option<RegionId> {
        self.cycle.state().map(|s| s.region_id)
    }

    /// Handle the region's cycle shortcut.
    pub fn trigger(
        &mut self,
        region: &Region,
        confirm_before_launch: bool,
    ) -> Result<SwitcherStep, PlatformError> {
        self.stop_expiry();
        let was_active = self.cycle.is_active();
        let foreground = self.ws.frontmost_application()?.map(|a| a.app_id);

        let ws = &self.ws;
        let step = self.cycle.trigger(region.id, foreground.as_deref(), || {
            let window_order = ws.app_window_order().unwrap_or_else(|e| {
                warn!("Cannot read window order: {}", e);
                Vec::new()
            });
            let running: Vec<(String, String)> = ws
                .running_applications()
                .unwrap_or_else(|e| {
                    warn!("Cannot enumerate applications: {}", e);
                    Vec::new()
                })
                .into_iter()
                .map(|a| (a.app_id, a.display_name))
                .collect();
            build_candidates(&region.assigned_apps, &window_order, &running)
        });

        match &step {
            SwitcherStep::Nothing => {
                debug!("Region '{}' has no apps to cycle", region.name);
                self.disarm(was_active);
            }
            SwitcherStep::ActivateNow(candidate) => {
                self.disarm(was_active);
                self.activate(candidate, confirm_before_launch);
            }
            SwitcherStep::Selecting { .. } => {
                if let Some(state) = self.cycle.state() {
                    let _ = self.ui.send(UiEvent::SwitcherShown {
                        region_id: state.region_id,
                        candidates: state.candidates.clone(),
                        selected_index: state.selected_index,
                    });
                }
            }
        }
        Ok(step)
    }

    /// Keep a switcher that was opened without a held chord until the next
    /// full modifier release, or until the timeout commits it.
    pub fn hold_until_release(&mut self) {
        if !self.cycle.is_active() {
            return;
        }
        self.armed.store(true, Ordering::SeqCst);
        self.stop_expiry();
        self.generation += 1;
        let generation = self.generation;
        let events = self.events.clone();
        let timeout = self.timeout;
        self.expiry = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = events.send(EngineEvent::SwitcherExpired { generation }).await;
        }));
    }

    /// Handle a switcher timeout. Commits when `generation` belongs to the
    /// pending timer.
    pub fn expire(&mut self, generation: u64, confirm_before_launch: bool) -> Option<Candidate> {
        if generation != self.generation || self.expiry.take().is_none() {
            return None;
        }
        debug!("Switcher timed out without a modifier release");
        self.commit(confirm_before_launch)
    }

    /// Activate the selected app and return to idle.
    pub fn commit(&mut self, confirm_before_launch: bool) -> Option<Candidate> {
        self.stop_expiry();
        self.armed.store(false, Ordering::SeqCst);
        let (selected, state) = self.cycle.commit()?;
        let _ = self.ui.send(UiEvent::SwitcherHidden);
        debug!(
            "Switcher for region {} committed after {:?}",
            state.region_id,
            state.started_at.elapsed()
        );
        self.activate(&selected, confirm_before_launch);
        Some(selected)
    }

    /// Abandon the switcher without selecting anything.
    pub fn cancel(&mut self) -> bool {
        self.stop_expiry();
        self.armed.store(false, Ordering::SeqCst);
        let cancelled = self.cycle.cancel();
        if cancelled {
            let _ = self.ui.send(UiEvent::SwitcherHidden);
        }
        cancelled
    }

    fn stop_expiry(&mut self) {
        if let Some(expiry) = self.expiry.take() {
            expiry.abort();
        }
    }

    fn disarm(&mut self, was_active: bool) {
        self.armed.store(false, Ordering::SeqCst);
        if was_active {
            let _ = self.ui.send(UiEvent::SwitcherHidden);
        }
    }

    fn activate(&self, candidate: &Candidate, confirm_before_launch: bool) {
        if candidate.is_running {
            if let Err(e) = self.ws.reopen(&candidate.app_id) {
                debug!("Reopen of {} failed: {}", candidate.app_id, e);
            }
            match self.ws.activate(&candidate.app_id) {
                Ok(()) => info!("Activated {}", candidate.display_name),
                Err(e) => warn!("Failed to activate {}: {}", candidate.app_id, e),
            }
        } else if confirm_before_launch {
            // No confirmation prompt exists yet, so nothing is launched.
            debug!("Not launching {}: confirmation required", candidate.app_id);
        } else {
            match self.ws.launch(&candidate.app_id) {
                Ok(()) => info!("Launching {}", candidate.app_id),
                Err(e) => warn!("Failed to launch {}: {}", candidate.app_id, e),
            }
        }
    }
}

impl Drop for FocusCycleController {
    fn drop(&mut self) {
        self.stop_expiry();
    }
}
