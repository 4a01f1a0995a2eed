//! Event coordinator.
//!
//! [`Coordinator::run`] is the only place engine state is mutated. Every
//! reaction (launches, activations, new windows, display changes,
//! shortcuts, UI commands) arrives as an [`EngineEvent`] and is handled to
//! completion before the next one is read, which serializes profile
//! transitions.

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zonekeeper_core::{
    match_profile, DisplayTopology, Profile, ProfileSet, Region, RegionId, SwitcherStep,
};
use zonekeeper_platform::{
    PlatformError, RunningApp, SubscriptionId, WindowHandle, WindowSystem,
};

use crate::enforcer::{Enforcer, PlacementOutcome, RepositionGate};
use crate::focus_cycle::FocusCycleController;
use crate::focus_region::{FocusOutcome, FocusRegionManager};
use crate::keyboard::{KeyboardHandler, RegisteredShortcut, ShortcutAction};
use crate::monitor::WindowMonitor;
use crate::{
    EngineCommand, EngineError, EngineEvent, EngineHandle, EngineSettings, EngineStatus,
    EngineTiming, UiEvent, EVENT_CHANNEL_CAPACITY,
};

const WINDOW_CONTROL: &str = "window control";
const KEY_INTERCEPTION: &str = "key interception";

/// Query the window system for the current display topology.
pub fn capture_topology(ws: &dyn WindowSystem) -> Result<DisplayTopology, PlatformError> {
    Ok(DisplayTopology::new(ws.list_displays()?))
}

/// Start an engine on the current tokio runtime.
///
/// Returns the handle for commands, the UI notification stream and the
/// coordination task.
pub fn spawn_engine(
    ws: Arc<dyn WindowSystem>,
    profiles: Vec<Profile>,
    settings: EngineSettings,
    timing: EngineTiming,
) -> (EngineHandle, mpsc::UnboundedReceiver<UiEvent>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (ui_tx, ui_rx) = mpsc::unbounded_channel();
    let coordinator = Coordinator::new(ws, profiles, settings, timing, tx.clone(), ui_tx);
    let task = tokio::spawn(coordinator.run(rx));
    (EngineHandle::new(tx), ui_rx, task)
}

pub struct Coordinator {
    ws: Arc<dyn WindowSystem>,
    events: mpsc::Sender<EngineEvent>,
    ui: mpsc::UnboundedSender<UiEvent>,
    profiles: ProfileSet,
    settings: EngineSettings,
    enforcer: Enforcer,
    monitor: WindowMonitor,
    focus: FocusRegionManager,
    switcher: FocusCycleController,
    keyboard: KeyboardHandler,
    topology: Option<DisplayTopology>,
    reported_permissions: HashSet<&'static str>,
    system_subscription: Option<SubscriptionId>,
}

impl Coordinator {
    pub fn new(
        ws: Arc<dyn WindowSystem>,
        profiles: Vec<Profile>,
        settings: EngineSettings,
        timing: EngineTiming,
        events: mpsc::Sender<EngineEvent>,
        ui: mpsc::UnboundedSender<UiEvent>,
    ) -> Self {
        let gate = RepositionGate::new();
        let armed = Arc::new(AtomicBool::new(false));
        Self {
            enforcer: Enforcer::new(ws.clone(), gate.clone(), timing),
            monitor: WindowMonitor::new(ws.clone(), gate.clone(), events.clone()),
            focus: FocusRegionManager::new(ws.clone(), gate, events.clone(), timing),
            switcher: FocusCycleController::new(
                ws.clone(),
                armed.clone(),
                ui.clone(),
                events.clone(),
                timing.switcher_timeout,
            ),
            keyboard: KeyboardHandler::new(ws.clone(), events.clone(), armed),
            ws,
            events,
            ui,
            profiles: ProfileSet::new(profiles),
            settings,
            topology: None,
            reported_permissions: HashSet::new(),
            system_subscription: None,
        }
    }

    /// Run until [`EngineEvent::Shutdown`] arrives.
    pub async fn run(mut self, mut rx: mpsc::Receiver<EngineEvent>) {
        self.start().await;

        while let Some(event) = rx.recv().await {
            match event {
                EngineEvent::Shutdown => {
                    info!("Engine shutting down");
                    break;
                }
                EngineEvent::AppLaunched(app) => self.on_app_launched(&app),
                EngineEvent::AppTerminated(app) => self.on_app_terminated(&app),
                EngineEvent::AppActivated(app) => self.on_app_activated(&app).await,
                EngineEvent::WindowCreated { pid, app_id, window } => {
                    debug!("Window {:?} created by {} (pid {})", window, app_id, pid);
                    self.on_window_created(&app_id, window).await;
                }
                EngineEvent::DisplaysChanged => self.on_displays_changed().await,
                EngineEvent::ShortcutFired(action) => self.on_shortcut(action).await,
                EngineEvent::ModifiersReleased => {
                    self.switcher.commit(self.settings.confirm_before_launch);
                }
                EngineEvent::FocusCheck { generation } => {
                    if let Some(released) = self.focus.check_position(generation) {
                        let _ = self.ui.send(UiEvent::FocusReleased {
                            window_id: released.window_id,
                            restored: false,
                        });
                    }
                }
                EngineEvent::SwitcherExpired { generation } => {
                    self.switcher.expire(generation, self.settings.confirm_before_launch);
                }
                EngineEvent::Command(cmd) => self.on_command(cmd).await,
            }
        }

        self.stop();
    }

    /// Subscribe to system events, select a profile, place windows and
    /// register shortcuts.
    async fn start(&mut self) {
        let events = self.events.clone();
        let forward = Box::new(move |event: zonekeeper_platform::SystemEvent| {
            if events.try_send(EngineEvent::from(event)).is_err() {
                warn!("Engine queue full, dropping system event");
            }
        });
        match self.ws.watch_system_events(forward) {
            Ok(id) => self.system_subscription = Some(id),
            Err(e) => warn!("Cannot watch system events: {}", e),
        }

        match self.keyboard.install() {
            Ok(()) => {}
            Err(PlatformError::PermissionDenied(_)) => self.report_permission(KEY_INTERCEPTION),
            Err(e) => warn!("Global shortcuts unavailable: {}", e),
        }

        match self.select_profile() {
            Ok(Some(_)) => self.apply_active_profile().await,
            Ok(None) => {
                info!("No profile matches the current displays");
                self.update_keyboard_shortcuts();
            }
            Err(e) => {
                warn!("Cannot read display topology: {}", e);
                self.update_keyboard_shortcuts();
            }
        }
    }

    fn stop(&mut self) {
        self.focus.clear_focus();
        self.switcher.cancel();
        self.monitor.stop_all();
        self.keyboard.uninstall();
        if let Some(id) = self.system_subscription.take() {
            let _ = self.ws.unsubscribe(id);
        }
    }

    // ---- profile selection ----

    /// Capture the topology and return the matching profile without
    /// activating it.
    fn match_current(&mut self) -> Result<Option<Profile>, PlatformError> {
        let topology = capture_topology(self.ws.as_ref())?;
        debug!("Display topology: {}", topology.fingerprint());
        let matched = match_profile(self.profiles.profiles(), &topology).cloned();
        self.topology = Some(topology);
        Ok(matched)
    }

    /// Capture, match and activate. `None` leaves the active profile as is.
    fn select_profile(&mut self) -> Result<Option<Profile>, PlatformError> {
        let Some(matched) = self.match_current()? else {
            return Ok(None);
        };
        self.activate(matched.id).map(Some).or(Ok(None))
    }

    fn activate(&mut self, id: zonekeeper_core::ProfileId) -> Result<Profile, EngineError> {
        let profile = self.profiles.activate(id)?.clone();
        info!("Activated profile '{}'", profile.name);
        let _ = self.ui.send(UiEvent::ProfileActivated {
            id: profile.id,
            name: profile.name.clone(),
        });
        Ok(profile)
    }

    /// Re-derive everything that depends on the active profile.
    async fn apply_active_profile(&mut self) {
        self.monitor.reset_positioned_windows();
        self.monitor.stop_all();
        self.enforce_active().await;

        let app_ids: HashSet<String> = self
            .active_regions()
            .iter()
            .flat_map(|r| r.assigned_apps.iter().cloned())
            .collect();
        if let Err(e) = self.monitor.start_monitoring(&app_ids) {
            warn!("Cannot start monitoring: {}", e);
        }
        self.update_keyboard_shortcuts();
    }

    fn active_regions(&self) -> Vec<Region> {
        self.profiles
            .active()
            .map(|p| p.regions.clone())
            .unwrap_or_default()
    }

    // ---- placement ----

    async fn enforce_active(&mut self) -> usize {
        let regions = self.active_regions();
        self.enforce_regions(&regions).await
    }

    async fn enforce_regions(&mut self, regions: &[Region]) -> usize {
        if !self.has_window_control() {
            return 0;
        }
        let placed = self.enforcer.enforce_all(regions).await;
        let mut applied = 0;
        for (window, outcome) in placed {
            if outcome.is_applied() {
                applied += 1;
                self.mark_positioned(window);
            }
        }
        applied
    }

    /// Place `window` unless it has been placed already.
    async fn place_new_window(&mut self, region: &Region, window: WindowHandle) {
        let window_id = match self.ws.stable_id(window) {
            Ok(id) => id,
            Err(e) => {
                debug!("Window {:?} vanished: {}", window, e);
                return;
            }
        };
        if self.monitor.has_positioned_window(window_id) || !self.has_window_control() {
            return;
        }
        match self.enforcer.enforce(region, window).await {
            Ok(outcome) if outcome.is_applied() => self.monitor.mark_window_as_positioned(window_id),
            Ok(_) => {}
            Err(e) => warn!("Failed to place window in '{}': {}", region.name, e),
        }
    }

    fn mark_positioned(&mut self, window: WindowHandle) {
        match self.ws.stable_id(window) {
            Ok(id) => self.monitor.mark_window_as_positioned(id),
            Err(e) => debug!("Window {:?} vanished: {}", window, e),
        }
    }

    fn region_for_app(&self, app_id: &str) -> Option<Region> {
        self.profiles.active()?.region_for_app(app_id).cloned()
    }

    fn has_window_control(&mut self) -> bool {
        if self.ws.permissions().window_control {
            return true;
        }
        self.report_permission(WINDOW_CONTROL);
        false
    }

    fn report_permission(&mut self, capability: &'static str) {
        if self.reported_permissions.insert(capability) {
            warn!("Permission for {} is unavailable; related features are disabled", capability);
            let _ = self.ui.send(UiEvent::PermissionUnavailable(capability));
        }
    }

    // ---- event handlers ----

    fn on_app_launched(&mut self, app: &RunningApp) {
        if self.region_for_app(&app.app_id).is_some() {
            self.monitor.observe_app(app);
        }
    }

    fn on_app_terminated(&mut self, app: &RunningApp) {
        self.monitor.remove_observer(app.pid);
    }

    async fn on_app_activated(&mut self, app: &RunningApp) {
        if !self.settings.reposition_on_launch {
            return;
        }
        let Some(region) = self.region_for_app(&app.app_id) else {
            return;
        };
        match self.ws.frontmost_window(app.pid) {
            Ok(Some(window)) => self.place_new_window(&region, window).await,
            Ok(None) => {}
            Err(e) => debug!("No frontmost window for {}: {}", app.app_id, e),
        }
    }

    async fn on_window_created(&mut self, app_id: &str, window: WindowHandle) {
        if !self.settings.reposition_on_launch {
            return;
        }
        if let Some(region) = self.region_for_app(app_id) {
            self.place_new_window(&region, window).await;
        }
    }

    async fn on_displays_changed(&mut self) {
        info!("Display configuration changed");
        self.release_focus();
        self.switcher.cancel();
        self.monitor.reset_positioned_windows();

        let matched = match self.match_current() {
            Ok(matched) => matched,
            Err(e) => {
                warn!("Cannot read display topology: {}", e);
                return;
            }
        };

        match matched {
            Some(profile)
                if self.settings.auto_switch_profiles
                    && self.profiles.active_id() != Some(profile.id) =>
            {
                if let Err(e) = self.activate(profile.id) {
                    warn!("Cannot activate '{}': {}", profile.name, e);
                    return;
                }
                self.apply_active_profile().await;
            }
            _ => {
                let regions = self.active_regions();
                let connected: Vec<Region> = regions
                    .iter()
                    .filter(|r| self.topology.as_ref().is_some_and(|t| t.display(r.display_id).is_some()))
                    .cloned()
                    .collect();
                if connected.len() < regions.len() {
                    info!(
                        "Skipping {} regions on disconnected displays",
                        regions.len() - connected.len()
                    );
                }
                self.enforce_regions(&connected).await;
            }
        }
    }

    /// Drop the focus pin without restoring, telling the UI it is gone.
    fn release_focus(&mut self) {
        if let Some(state) = self.focus.clear_focus() {
            let _ = self.ui.send(UiEvent::FocusReleased {
                window_id: state.window_id,
                restored: false,
            });
        }
    }

    async fn on_shortcut(&mut self, action: ShortcutAction) {
        debug!("Shortcut fired: {:?}", action);
        let result = match action {
            ShortcutAction::ResetWindow => self.reset_foreground_window().await.map(|_| ()),
            ShortcutAction::FocusWindow => self.focus_foreground_window(None).await.map(|_| ()),
            ShortcutAction::CycleRegion(region_id) => self.cycle_focus(region_id, false),
        };
        if let Err(e) = result {
            debug!("Shortcut {:?} did nothing: {}", action, e);
        }
    }

    // ---- operations shared by shortcuts and commands ----

    async fn reset_foreground_window(&mut self) -> Result<PlacementOutcome, EngineError> {
        let app = self
            .ws
            .frontmost_application()?
            .ok_or(EngineError::NoForegroundApp)?;
        let region = self
            .region_for_app(&app.app_id)
            .ok_or_else(|| EngineError::Unassigned(app.app_id.clone()))?;
        self.enforce_app(&region, &app.app_id).await
    }

    async fn enforce_app(&mut self, region: &Region, app_id: &str) -> Result<PlacementOutcome, EngineError> {
        let app = self
            .ws
            .running_applications()?
            .into_iter()
            .find(|a| a.app_id == app_id)
            .ok_or_else(|| PlatformError::AppNotRunning(app_id.to_string()))?;
        let window = self
            .ws
            .frontmost_window(app.pid)?
            .ok_or_else(|| EngineError::NoWindow(app_id.to_string()))?;
        if !self.has_window_control() {
            return Err(PlatformError::PermissionDenied(WINDOW_CONTROL).into());
        }
        let outcome = self.enforcer.enforce(region, window).await?;
        if outcome.is_applied() {
            self.mark_positioned(window);
        }
        Ok(outcome)
    }

    async fn focus_foreground_window(
        &mut self,
        region_id: Option<RegionId>,
    ) -> Result<FocusOutcome, EngineError> {
        let profile = self.profiles.active().ok_or(EngineError::NoActiveProfile)?;
        let region = match region_id {
            Some(id) => profile.region(id).ok_or(EngineError::RegionNotFound(id))?,
            None => profile.focus_region().ok_or(EngineError::NoFocusRegion)?,
        }
        .clone();

        let app = self
            .ws
            .frontmost_application()?
            .ok_or(EngineError::NoForegroundApp)?;
        let window = self
            .ws
            .frontmost_window(app.pid)?
            .ok_or_else(|| EngineError::NoWindow(app.app_id.clone()))?;
        let window_id = self.ws.stable_id(window)?;
        if !self.has_window_control() {
            return Err(PlatformError::PermissionDenied(WINDOW_CONTROL).into());
        }

        let outcome = self.focus.focus_window(window, window_id, &region).await?;
        let event = match outcome {
            FocusOutcome::Focused { window_id, frame } => UiEvent::FocusPinned { window_id, frame },
            FocusOutcome::Unfocused { window_id } => UiEvent::FocusReleased {
                window_id,
                restored: true,
            },
        };
        let _ = self.ui.send(event);
        Ok(outcome)
    }

    async fn unfocus_window(&mut self) -> Result<bool, EngineError> {
        let window_id = self.focus.state().map(|s| s.window_id);
        let restored = self.focus.unfocus_window().await?;
        if let (true, Some(window_id)) = (restored, window_id) {
            let _ = self.ui.send(UiEvent::FocusReleased {
                window_id,
                restored: true,
            });
        }
        Ok(restored)
    }

    fn cycle_focus(&mut self, region_id: RegionId, commit: bool) -> Result<(), EngineError> {
        let region = self
            .profiles
            .active()
            .ok_or(EngineError::NoActiveProfile)?
            .region(region_id)
            .cloned()
            .ok_or(EngineError::RegionNotFound(region_id))?;
        let confirm = self.settings.confirm_before_launch;
        let step = self.switcher.trigger(&region, confirm)?;
        if commit && matches!(step, SwitcherStep::Selecting { .. }) {
            self.switcher.commit(confirm);
        }
        Ok(())
    }

    /// Rebuild the shortcut table from the settings and the active profile.
    /// Returns how many shortcuts ended up registered.
    fn update_keyboard_shortcuts(&mut self) -> usize {
        let mut table = Vec::new();
        if let Some(shortcut) = self.settings.reset_shortcut {
            table.push(RegisteredShortcut {
                shortcut,
                action: ShortcutAction::ResetWindow,
            });
        }
        if let Some(shortcut) = self.settings.focus_shortcut {
            table.push(RegisteredShortcut {
                shortcut,
                action: ShortcutAction::FocusWindow,
            });
        }
        for region in self.active_regions() {
            if let Some(shortcut) = region.keyboard_shortcut {
                table.push(RegisteredShortcut {
                    shortcut,
                    action: ShortcutAction::CycleRegion(region.id),
                });
            }
        }
        self.keyboard.update_shortcuts(table);
        self.keyboard.shortcuts().len()
    }

    fn status(&self) -> EngineStatus {
        EngineStatus {
            active_profile: self.profiles.active().map(|p| (p.id, p.name.clone())),
            profile_count: self.profiles.profiles().len(),
            topology_fingerprint: self.topology.as_ref().map(|t| t.fingerprint()),
            observed_processes: self.monitor.observed_count(),
            positioned_windows: self.monitor.positioned_count(),
            focused_window: self.focus.state().map(|s| s.window_id),
            switcher_region: self.switcher.active_region(),
            registered_shortcuts: self.keyboard.shortcuts().len(),
            permissions: self.ws.permissions(),
        }
    }

    async fn reload(&mut self, profiles: Vec<Profile>, settings: EngineSettings) -> Option<Profile> {
        info!("Reloading {} profiles", profiles.len());
        self.release_focus();
        self.switcher.cancel();
        self.profiles.replace(profiles);
        self.settings = settings;

        match self.select_profile() {
            Ok(Some(profile)) => {
                self.apply_active_profile().await;
                Some(profile)
            }
            Ok(None) => {
                self.deactivate_monitoring();
                None
            }
            Err(e) => {
                warn!("Cannot read display topology: {}", e);
                self.deactivate_monitoring();
                None
            }
        }
    }

    /// Nothing is active after a reload: drop per-process state tied to the
    /// old profile.
    fn deactivate_monitoring(&mut self) {
        self.monitor.stop_all();
        self.monitor.reset_positioned_windows();
        self.update_keyboard_shortcuts();
    }

    async fn on_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::GetActiveProfile(respond) => {
                let _ = respond.send(self.profiles.active().cloned());
            }
            EngineCommand::GetActiveRegions(respond) => {
                let _ = respond.send(self.active_regions());
            }
            EngineCommand::ListProfiles(respond) => {
                let _ = respond.send(self.profiles.profiles().to_vec());
            }
            EngineCommand::SetActiveProfile { id, respond } => {
                let result = self.activate(id);
                if result.is_ok() {
                    self.release_focus();
                    self.switcher.cancel();
                    self.apply_active_profile().await;
                }
                reply(respond, result);
            }
            EngineCommand::AutoSelectProfile(respond) => {
                let result = self.auto_select().await;
                reply(respond, result);
            }
            EngineCommand::EnforceRegion {
                region_id,
                app_id,
                respond,
            } => {
                let result = match self.profiles.active().and_then(|p| p.region(region_id)).cloned() {
                    Some(region) => self.enforce_app(&region, &app_id).await,
                    None => Err(EngineError::RegionNotFound(region_id)),
                };
                reply(respond, result);
            }
            EngineCommand::EnforceAllRegions { regions, respond } => {
                let applied = match regions {
                    Some(regions) => self.enforce_regions(&regions).await,
                    None => self.enforce_active().await,
                };
                let _ = respond.send(applied);
            }
            EngineCommand::UpdateKeyboardShortcuts(respond) => {
                let _ = respond.send(self.update_keyboard_shortcuts());
            }
            EngineCommand::CycleFocus {
                region_id,
                commit,
                respond,
            } => {
                let result = self.cycle_focus(region_id, commit);
                if result.is_ok() && !commit {
                    // No chord is held, so no release would ever close it.
                    self.switcher.hold_until_release();
                }
                reply(respond, result);
            }
            EngineCommand::FocusWindow { region_id, respond } => {
                let result = self.focus_foreground_window(region_id).await;
                reply(respond, result);
            }
            EngineCommand::UnfocusWindow(respond) => {
                let result = self.unfocus_window().await;
                reply(respond, result);
            }
            EngineCommand::Status(respond) => {
                let _ = respond.send(self.status());
            }
            EngineCommand::Reload {
                profiles,
                settings,
                respond,
            } => {
                let selected = self.reload(profiles, settings).await;
                let _ = respond.send(selected);
            }
        }
    }

    /// Select the profile matching the current displays. Unlike the
    /// display-change path this ignores `auto_switch_profiles`.
    async fn auto_select(&mut self) -> Result<Option<Profile>, EngineError> {
        let Some(matched) = self.match_current()? else {
            return Ok(None);
        };
        if self.profiles.active_id() != Some(matched.id) {
            self.activate(matched.id)?;
            self.apply_active_profile().await;
        }
        Ok(self.profiles.active().cloned())
    }
}

fn reply<T>(respond: oneshot::Sender<Result<T, EngineError>>, result: Result<T, EngineError>) {
    if let Err(e) = &result {
        debug!("Command failed: {}", e);
    }
    let _ = respond.send(result);
}
