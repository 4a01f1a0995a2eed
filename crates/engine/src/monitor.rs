//! Window event monitor.
//!
//! Keeps one window-created subscription per watched process and the set of
//! windows that have already been placed. Subscriptions are keyed by pid, so
//! two processes of the same app are tracked independently.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use zonekeeper_core::{AppId, WindowId};
use zonekeeper_platform::{
    Pid, PlatformError, RunningApp, SubscriptionId, WindowHandle, WindowSystem,
};

use crate::enforcer::RepositionGate;
use crate::EngineEvent;

pub struct WindowMonitor {
    ws: Arc<dyn WindowSystem>,
    gate: RepositionGate,
    events: mpsc::Sender<EngineEvent>,
    observers: HashMap<Pid, SubscriptionId>,
    positioned: HashSet<WindowId>,
}

impl WindowMonitor {
    pub fn new(
        ws: Arc<dyn WindowSystem>,
        gate: RepositionGate,
        events: mpsc::Sender<EngineEvent>,
    ) -> Self {
        Self {
            ws,
            gate,
            events,
            observers: HashMap::new(),
            positioned: HashSet::new(),
        }
    }

    /// Subscribe to every running process whose app is in `app_ids`.
    pub fn start_monitoring(&mut self, app_ids: &HashSet<AppId>) -> Result<(), PlatformError> {
        for app in self.ws.running_applications()? {
            if app_ids.contains(&app.app_id) {
                self.observe_app(&app);
            }
        }
        debug!("Monitoring {} processes", self.observers.len());
        Ok(())
    }

    /// Subscribe to a single process. Already-observed processes are left
    /// alone.
    pub fn observe_app(&mut self, app: &RunningApp) {
        if self.observers.contains_key(&app.pid) {
            return;
        }

        let gate = self.gate.clone();
        let events = self.events.clone();
        let pid = app.pid;
        let app_id = app.app_id.clone();
        let callback = Box::new(move |window: WindowHandle| {
            if gate.is_active() {
                trace!("Ignoring window {:?} created during placement", window);
                return;
            }
            let event = EngineEvent::WindowCreated {
                pid,
                app_id: app_id.clone(),
                window,
            };
            if events.try_send(event).is_err() {
                warn!("Engine queue full, dropping window-created event for pid {}", pid);
            }
        });

        match self.ws.subscribe_window_created(pid, callback) {
            Ok(id) => {
                debug!("Observing {} (pid {})", app.app_id, pid);
                self.observers.insert(pid, id);
            }
            Err(e) => warn!("Cannot observe {} (pid {}): {}", app.app_id, pid, e),
        }
    }

    /// Drop the subscription for a process, if any.
    pub fn remove_observer(&mut self, pid: Pid) {
        if let Some(id) = self.observers.remove(&pid) {
            if let Err(e) = self.ws.unsubscribe(id) {
                warn!("Failed to unsubscribe pid {}: {}", pid, e);
            }
            debug!("Stopped observing pid {}", pid);
        }
    }

    pub fn stop_all(&mut self) {
        let pids: Vec<Pid> = self.observers.keys().copied().collect();
        for pid in pids {
            self.remove_observer(pid);
        }
    }

    pub fn is_observing(&self, pid: Pid) -> bool {
        self.observers.contains_key(&pid)
    }

    pub fn observed_count(&self) -> usize {
        self.observers.len()
    }

    pub fn mark_window_as_positioned(&mut self, id: WindowId) {
        self.positioned.insert(id);
    }

    pub fn has_positioned_window(&self, id: WindowId) -> bool {
        self.positioned.contains(&id)
    }

    pub fn positioned_count(&self) -> usize {
        self.positioned.len()
    }

    // Entries of terminated processes stay until the next reset.
    pub fn reset_positioned_windows(&mut self) {
        debug!("Resetting {} positioned windows", self.positioned.len());
        self.positioned.clear();
    }
}
