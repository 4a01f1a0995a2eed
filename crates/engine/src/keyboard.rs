//! Global keyboard handler.
//!
//! One key tap serves every shortcut. The tap callback runs on the window
//! system's input thread, so it only matches against the current shortcut
//! table and hands matches to the coordination loop with `try_send`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, RwLock, Weak};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use zonekeeper_core::{CoreError, KeyboardShortcut, Modifiers, RegionId};
use zonekeeper_platform::{KeyEvent, KeyTapId, PlatformError, TapDecision, WindowSystem};

use crate::EngineEvent;

/// What a shortcut does when pressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortcutAction {
    /// Move the foreground window back into its assigned region.
    ResetWindow,
    /// Pin the foreground window into the focus region.
    FocusWindow,
    /// Cycle between the apps assigned to a region.
    CycleRegion(RegionId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisteredShortcut {
    pub shortcut: KeyboardShortcut,
    pub action: ShortcutAction,
}

type ShortcutTable = Arc<RwLock<Arc<[RegisteredShortcut]>>>;

/// First registered shortcut matching a key press.
pub fn find_match(
    shortcuts: &[RegisteredShortcut],
    modifiers: Modifiers,
    key: char,
) -> Option<ShortcutAction> {
    shortcuts
        .iter()
        .find(|s| s.shortcut.matches(modifiers, key))
        .map(|s| s.action)
}

pub struct KeyboardHandler {
    ws: Arc<dyn WindowSystem>,
    events: mpsc::Sender<EngineEvent>,
    shortcuts: ShortcutTable,
    armed: Arc<AtomicBool>,
    tap: Arc<OnceLock<KeyTapId>>,
}

impl KeyboardHandler {
    pub fn new(
        ws: Arc<dyn WindowSystem>,
        events: mpsc::Sender<EngineEvent>,
        armed: Arc<AtomicBool>,
    ) -> Self {
        let empty: Arc<[RegisteredShortcut]> = Arc::from(Vec::new());
        Self {
            ws,
            events,
            shortcuts: Arc::new(RwLock::new(empty)),
            armed,
            tap: Arc::new(OnceLock::new()),
        }
    }

    pub fn is_installed(&self) -> bool {
        self.tap.get().is_some()
    }

    /// Install the key tap. Installing twice is a no-op.
    pub fn install(&self) -> Result<(), PlatformError> {
        if self.is_installed() {
            return Ok(());
        }

        let shortcuts = self.shortcuts.clone();
        let armed = self.armed.clone();
        let events = self.events.clone();
        let tap_id = self.tap.clone();
        let ws: Weak<dyn WindowSystem> = Arc::downgrade(&self.ws);

        let callback = Box::new(move |event: &KeyEvent| match *event {
            KeyEvent::KeyDown {
                key: Some(key),
                modifiers,
            } => {
                let table = match shortcuts.read() {
                    Ok(table) => table.clone(),
                    Err(poisoned) => poisoned.into_inner().clone(),
                };
                let Some(action) = find_match(&table, modifiers, key) else {
                    return TapDecision::PassThrough;
                };
                if let ShortcutAction::CycleRegion(_) = action {
                    armed.store(true, Ordering::SeqCst);
                }
                if events.try_send(EngineEvent::ShortcutFired(action)).is_err() {
                    warn!("Engine queue full, dropping shortcut {:?}", action);
                }
                TapDecision::Consume
            }
            KeyEvent::KeyDown { key: None, .. } => TapDecision::PassThrough,
            KeyEvent::ModifiersChanged(modifiers) => {
                if modifiers.is_empty()
                    && armed.swap(false, Ordering::SeqCst)
                    && events.try_send(EngineEvent::ModifiersReleased).is_err()
                {
                    warn!("Engine queue full, dropping modifier release");
                }
                TapDecision::PassThrough
            }
            KeyEvent::TapDisabled => {
                warn!("Key tap disabled by the OS, re-enabling");
                if let (Some(ws), Some(id)) = (ws.upgrade(), tap_id.get()) {
                    if let Err(e) = ws.reenable_key_tap(*id) {
                        warn!("Failed to re-enable key tap: {}", e);
                    }
                }
                TapDecision::PassThrough
            }
        });

        let id = self.ws.install_key_tap(callback)?;
        let _ = self.tap.set(id);
        info!("Key tap installed");
        Ok(())
    }

    /// Replace the whole shortcut table.
    ///
    /// Shortcuts without modifiers are rejected and returned as errors; the
    /// rest are registered in order.
    pub fn update_shortcuts(&self, shortcuts: Vec<RegisteredShortcut>) -> Vec<CoreError> {
        let mut rejected = Vec::new();
        let accepted: Vec<RegisteredShortcut> = shortcuts
            .into_iter()
            .filter(|s| match s.shortcut.validate() {
                Ok(()) => true,
                Err(e) => {
                    warn!("Rejecting shortcut for {:?}: {}", s.action, e);
                    rejected.push(e);
                    false
                }
            })
            .collect();

        debug!("Registering {} shortcuts", accepted.len());
        let table: Arc<[RegisteredShortcut]> = Arc::from(accepted);
        match self.shortcuts.write() {
            Ok(mut current) => *current = table,
            Err(poisoned) => *poisoned.into_inner() = table,
        }
        rejected
    }

    pub fn shortcuts(&self) -> Arc<[RegisteredShortcut]> {
        match self.shortcuts.read() {
            Ok(table) => table.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn uninstall(&self) {
        if let Some(id) = self.tap.get() {
            if let Err(e) = self.ws.remove_key_tap(*id) {
                warn!("Failed to remove key tap: {}", e);
            }
        }
    }
}
