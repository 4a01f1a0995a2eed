//! Focus region manager.
//!
//! Pins one window at a time into the focus region. While pinned, a
//! periodic check compares the window's origin with the pinned target; a
//! drift beyond the tolerance means the user moved it, and the pin is
//! dropped without restoring anything.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zonekeeper_core::{Rect, Region, WindowId};
use zonekeeper_platform::{PlatformError, WindowHandle, WindowSystem};

use crate::enforcer::RepositionGate;
use crate::{EngineEvent, EngineTiming};

/// The currently pinned window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusState {
    pub window: WindowHandle,
    pub window_id: WindowId,
    pub original_frame: Rect,
    pub target_frame: Rect,
}

/// What a focus request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusOutcome {
    /// The window is now pinned at `frame`.
    Focused { window_id: WindowId, frame: Rect },
    /// The window was already pinned and has been restored.
    Unfocused { window_id: WindowId },
}

pub struct FocusRegionManager {
    ws: Arc<dyn WindowSystem>,
    gate: RepositionGate,
    events: mpsc::Sender<EngineEvent>,
    timing: EngineTiming,
    state: Option<FocusState>,
    checker: Option<JoinHandle<()>>,
    generation: u64,
}

impl FocusRegionManager {
    pub fn new(
        ws: Arc<dyn WindowSystem>,
        gate: RepositionGate,
        events: mpsc::Sender<EngineEvent>,
        timing: EngineTiming,
    ) -> Self {
        Self {
            ws,
            gate,
            events,
            timing,
            state: None,
            checker: None,
            generation: 0,
        }
    }

    pub fn state(&self) -> Option<&FocusState> {
        self.state.as_ref()
    }

    pub fn is_window_focused(&self, window_id: WindowId) -> bool {
        self.state.is_some_and(|s| s.window_id == window_id)
    }

    /// Pin `window` into `region`, or release it if it is already pinned.
    ///
    /// A different pinned window is restored first, so at most one window
    /// is ever pinned.
    pub async fn focus_window(
        &mut self,
        window: WindowHandle,
        window_id: WindowId,
        region: &Region,
    ) -> Result<FocusOutcome, PlatformError> {
        if self.is_window_focused(window_id) {
            self.unfocus_window().await?;
            return Ok(FocusOutcome::Unfocused { window_id });
        }

        if self.state.is_some() {
            if let Err(e) = self.unfocus_window().await {
                warn!("Could not restore previously pinned window: {}", e);
            }
        }

        let original_frame = self.ws.get_frame(window)?;
        let target_frame = region.target_frame();
        self.write_frame(window, target_frame).await?;

        self.state = Some(FocusState {
            window,
            window_id,
            original_frame,
            target_frame,
        });
        self.start_checker();
        info!("Pinned window {} into '{}'", window_id, region.name);
        Ok(FocusOutcome::Focused {
            window_id,
            frame: target_frame,
        })
    }

    /// Restore the pinned window's original frame and clear the pin.
    ///
    /// Returns `false` when nothing was pinned. The pin is cleared even when
    /// the restore fails.
    pub async fn unfocus_window(&mut self) -> Result<bool, PlatformError> {
        self.stop_checker();
        let Some(state) = self.state.take() else {
            return Ok(false);
        };
        self.write_frame(state.window, state.original_frame).await?;
        debug!("Restored window {} to {:?}", state.window_id, state.original_frame);
        Ok(true)
    }

    /// Drop the pin without touching geometry.
    pub fn clear_focus(&mut self) -> Option<FocusState> {
        self.stop_checker();
        self.state.take()
    }

    /// Handle a periodic check. Returns the released state when the window
    /// was moved by the user or has disappeared.
    pub fn check_position(&mut self, generation: u64) -> Option<FocusState> {
        if generation != self.generation {
            return None;
        }
        let state = self.state?;
        match self.ws.get_frame(state.window) {
            Ok(frame) => {
                let drift = frame.origin_distance(&state.target_frame);
                if drift <= self.timing.focus_move_tolerance {
                    return None;
                }
                info!("Pinned window {} moved by the user ({}px), releasing", state.window_id, drift);
            }
            Err(e) => debug!("Pinned window {} unreadable, releasing: {}", state.window_id, e),
        }
        self.clear_focus()
    }

    async fn write_frame(&self, window: WindowHandle, frame: Rect) -> Result<(), PlatformError> {
        let _guard = self.gate.enter();
        let result = self.ws.set_frame(window, frame);
        tokio::time::sleep(self.timing.suppression_tail).await;
        result
    }

    fn start_checker(&mut self) {
        self.stop_checker();
        self.generation += 1;
        let generation = self.generation;
        let events = self.events.clone();
        let period = self.timing.focus_check_interval;
        self.checker = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if events.send(EngineEvent::FocusCheck { generation }).await.is_err() {
                    break;
                }
            }
        }));
    }

    fn stop_checker(&mut self) {
        if let Some(checker) = self.checker.take() {
            checker.abort();
        }
    }

    #[cfg(test)]
    fn has_checker(&self) -> bool {
        self.checker.is_some()
    }
}

impl Drop for FocusRegionManager {
    fn drop(&mut self) {
        self.stop_checker();
    }
}
