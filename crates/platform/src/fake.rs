//! In-memory window system.
//!
//! Drives the engine without any OS interaction: tests spawn apps, open
//! windows, drag them around and press keys, then inspect the resulting
//! geometry and the list of adapter calls the engine made.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use zonekeeper_core::{AppId, DisplayInfo, Modifiers, Point, Rect, WindowId};

use crate::{
    KeyEvent, KeyTapCallback, KeyTapId, Permissions, Pid, PlatformError, Result, RunningApp,
    SubscriptionId, SystemEvent, SystemEventCallback, TapDecision, WindowCreatedCallback,
    WindowHandle, WindowKind, WindowSystem,
};

type CreatedFn = Arc<dyn Fn(WindowHandle) + Send + Sync>;
type SystemFn = Arc<dyn Fn(SystemEvent) + Send + Sync>;
type TapFn = Arc<dyn Fn(&KeyEvent) -> TapDecision + Send + Sync>;

/// Offset between window handles and their stable ids, so tests cannot
/// confuse the two.
const STABLE_ID_OFFSET: u64 = 10_000;

#[derive(Debug, Clone)]
struct FakeWindow {
    pid: Pid,
    frame: Rect,
    kind: WindowKind,
}

struct FakeState {
    displays: Vec<DisplayInfo>,
    apps: Vec<RunningApp>,
    windows: HashMap<WindowHandle, FakeWindow>,
    /// Front to back.
    z_order: Vec<WindowHandle>,
    frontmost_pid: Option<Pid>,
    installable: HashMap<AppId, String>,
    created_subs: HashMap<SubscriptionId, (Pid, CreatedFn)>,
    system_subs: HashMap<SubscriptionId, SystemFn>,
    key_tap: Option<(KeyTapId, TapFn)>,
    tap_reenabled: usize,
    max_size: Option<(i32, i32)>,
    echo_created_on_move: bool,
    fail_geometry: bool,
    fail_displays: bool,
    permissions: Permissions,
    next_pid: Pid,
    next_handle: u64,
    next_subscription: u64,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            displays: vec![DisplayInfo::new(1, 1920, 1080, true)],
            apps: Vec::new(),
            windows: HashMap::new(),
            z_order: Vec::new(),
            frontmost_pid: None,
            installable: HashMap::new(),
            created_subs: HashMap::new(),
            system_subs: HashMap::new(),
            key_tap: None,
            tap_reenabled: 0,
            max_size: None,
            echo_created_on_move: false,
            fail_geometry: false,
            fail_displays: false,
            permissions: Permissions::ALL,
            next_pid: 100,
            next_handle: 1,
            next_subscription: 1,
        }
    }
}

impl FakeState {
    fn app_by_pid(&self, pid: Pid) -> Option<&RunningApp> {
        self.apps.iter().find(|a| a.pid == pid)
    }

    fn app_by_id(&self, app_id: &str) -> Option<&RunningApp> {
        self.apps.iter().find(|a| a.app_id == app_id)
    }

    fn window(&self, window: WindowHandle) -> Result<&FakeWindow> {
        self.windows.get(&window).ok_or(PlatformError::WindowGone(window))
    }

    fn system_callbacks(&self) -> Vec<SystemFn> {
        self.system_subs.values().cloned().collect()
    }

    fn created_callbacks(&self, pid: Pid) -> Vec<CreatedFn> {
        self.created_subs
            .values()
            .filter(|(p, _)| *p == pid)
            .map(|(_, cb)| cb.clone())
            .collect()
    }

    fn raise_app(&mut self, pid: Pid) {
        let (mut front, back): (Vec<WindowHandle>, Vec<WindowHandle>) = self
            .z_order
            .iter()
            .copied()
            .partition(|w| self.windows.get(w).is_some_and(|fw| fw.pid == pid));
        front.extend(back);
        self.z_order = front;
        self.frontmost_pid = Some(pid);
    }

    fn spawn(&mut self, app_id: &str, name: &str) -> RunningApp {
        let app = RunningApp {
            pid: self.next_pid,
            app_id: app_id.to_string(),
            display_name: name.to_string(),
        };
        self.next_pid += 1;
        self.apps.push(app.clone());
        app
    }
}

/// A window system that lives entirely in memory.
pub struct FakeWindowSystem {
    state: Mutex<FakeState>,
    calls: Mutex<Vec<String>>,
}

impl Default for FakeWindowSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeWindowSystem {
    /// One built-in 1920x1080 display, no applications.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_displays(displays: Vec<DisplayInfo>) -> Self {
        let fake = Self::new();
        fake.state().displays = displays;
        fake
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn note(&self, call: impl Into<String>) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(call.into());
    }

    fn broadcast(&self, event: SystemEvent) {
        let callbacks = self.state().system_callbacks();
        for cb in callbacks {
            cb(event.clone());
        }
    }

    // ---- scenario drivers ----

    /// Replace the display list and announce the change.
    pub fn set_displays(&self, displays: Vec<DisplayInfo>) {
        self.state().displays = displays;
        self.broadcast(SystemEvent::DisplaysChanged);
    }

    /// Start an application and announce the launch.
    pub fn spawn_app(&self, app_id: &str, name: &str) -> Pid {
        let app = self.state().spawn(app_id, name);
        let pid = app.pid;
        self.broadcast(SystemEvent::AppLaunched(app));
        pid
    }

    /// Make `app_id` launchable through [`WindowSystem::launch`].
    pub fn register_installed(&self, app_id: &str, name: &str) {
        self.state().installable.insert(app_id.to_string(), name.to_string());
    }

    /// Open a normal window on top of the stack.
    pub fn open_window(&self, pid: Pid, frame: Rect) -> WindowHandle {
        self.open_window_of_kind(pid, frame, WindowKind::Normal)
    }

    pub fn open_window_of_kind(&self, pid: Pid, frame: Rect, kind: WindowKind) -> WindowHandle {
        let (handle, callbacks) = {
            let mut st = self.state();
            let handle = WindowHandle(st.next_handle);
            st.next_handle += 1;
            st.windows.insert(handle, FakeWindow { pid, frame, kind });
            st.z_order.insert(0, handle);
            (handle, st.created_callbacks(pid))
        };
        for cb in callbacks {
            cb(handle);
        }
        handle
    }

    /// The user brings an application to the foreground.
    pub fn focus_app(&self, pid: Pid) {
        let app = {
            let mut st = self.state();
            st.raise_app(pid);
            st.app_by_pid(pid).cloned()
        };
        if let Some(app) = app {
            self.broadcast(SystemEvent::AppActivated(app));
        }
    }

    /// Quit an application, closing its windows.
    pub fn terminate(&self, pid: Pid) {
        let app = {
            let mut st = self.state();
            let app = st.app_by_pid(pid).cloned();
            st.apps.retain(|a| a.pid != pid);
            st.windows.retain(|_, w| w.pid != pid);
            let live: Vec<WindowHandle> = st.z_order.iter().copied().filter(|w| st.windows.contains_key(w)).collect();
            st.z_order = live;
            if st.frontmost_pid == Some(pid) {
                st.frontmost_pid = None;
            }
            app
        };
        if let Some(app) = app {
            self.broadcast(SystemEvent::AppTerminated(app));
        }
    }

    /// The user drags a window; no notification is generated.
    pub fn drag_window(&self, window: WindowHandle, frame: Rect) {
        if let Some(w) = self.state().windows.get_mut(&window) {
            w.frame = frame;
        }
    }

    /// Pid of a running application.
    pub fn running_pid(&self, app_id: &str) -> Option<Pid> {
        self.state().app_by_id(app_id).map(|a| a.pid)
    }

    pub fn frame(&self, window: WindowHandle) -> Option<Rect> {
        self.state().windows.get(&window).map(|w| w.frame)
    }

    /// Clamp every size write, like a window manager enforcing a maximum.
    pub fn set_max_size(&self, max: Option<(i32, i32)>) {
        self.state().max_size = max;
    }

    /// Re-announce a window as created whenever it is moved, the way some
    /// window systems echo programmatic moves.
    pub fn set_echo_created_on_move(&self, echo: bool) {
        self.state().echo_created_on_move = echo;
    }

    pub fn set_fail_geometry(&self, fail: bool) {
        self.state().fail_geometry = fail;
    }

    pub fn set_fail_displays(&self, fail: bool) {
        self.state().fail_displays = fail;
    }

    pub fn set_permissions(&self, permissions: Permissions) {
        self.state().permissions = permissions;
    }

    /// Deliver a key-down through the installed tap.
    pub fn press_key(&self, modifiers: Modifiers, key: char) -> Option<TapDecision> {
        self.send_key_event(KeyEvent::KeyDown {
            key: Some(key),
            modifiers,
        })
    }

    /// Deliver a modifier change through the installed tap.
    pub fn set_held_modifiers(&self, modifiers: Modifiers) -> Option<TapDecision> {
        self.send_key_event(KeyEvent::ModifiersChanged(modifiers))
    }

    /// Simulate the OS disabling the tap.
    pub fn disable_tap(&self) -> Option<TapDecision> {
        self.send_key_event(KeyEvent::TapDisabled)
    }

    fn send_key_event(&self, event: KeyEvent) -> Option<TapDecision> {
        let tap = self.state().key_tap.as_ref().map(|(_, cb)| cb.clone())?;
        Some(tap(&event))
    }

    pub fn has_key_tap(&self) -> bool {
        self.state().key_tap.is_some()
    }

    pub fn tap_reenable_count(&self) -> usize {
        self.state().tap_reenabled
    }

    /// Pids with at least one window-created subscription, sorted.
    pub fn subscribed_pids(&self) -> Vec<Pid> {
        let mut pids: Vec<Pid> = self.state().created_subs.values().map(|(p, _)| *p).collect();
        pids.sort_unstable();
        pids.dedup();
        pids
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn calls_contains(&self, call: &str) -> bool {
        self.calls().iter().any(|c| c == call)
    }

    pub fn call_count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl WindowSystem for FakeWindowSystem {
    fn list_displays(&self) -> Result<Vec<DisplayInfo>> {
        let st = self.state();
        if st.fail_displays {
            return Err(PlatformError::DisplayQueryFailed("injected failure".into()));
        }
        Ok(st.displays.clone())
    }

    fn running_applications(&self) -> Result<Vec<RunningApp>> {
        Ok(self.state().apps.clone())
    }

    fn frontmost_application(&self) -> Result<Option<RunningApp>> {
        let st = self.state();
        Ok(st.frontmost_pid.and_then(|pid| st.app_by_pid(pid).cloned()))
    }

    fn app_window_order(&self) -> Result<Vec<AppId>> {
        let st = self.state();
        Ok(st
            .z_order
            .iter()
            .filter_map(|w| st.windows.get(w))
            .filter_map(|w| st.app_by_pid(w.pid))
            .map(|a| a.app_id.clone())
            .collect())
    }

    fn frontmost_window(&self, pid: Pid) -> Result<Option<WindowHandle>> {
        let st = self.state();
        Ok(st
            .z_order
            .iter()
            .copied()
            .find(|w| st.windows.get(w).is_some_and(|fw| fw.pid == pid)))
    }

    fn window_kind(&self, window: WindowHandle) -> Result<WindowKind> {
        Ok(self.state().window(window)?.kind)
    }

    fn get_frame(&self, window: WindowHandle) -> Result<Rect> {
        let st = self.state();
        if st.fail_geometry {
            return Err(PlatformError::GeometryReadFailed("injected failure".into()));
        }
        Ok(st.window(window)?.frame)
    }

    fn set_position(&self, window: WindowHandle, origin: Point) -> Result<()> {
        self.note("set_position");
        let callbacks = {
            let mut st = self.state();
            if st.fail_geometry {
                return Err(PlatformError::GeometryWriteFailed("injected failure".into()));
            }
            let echo = st.echo_created_on_move;
            let w = st.windows.get_mut(&window).ok_or(PlatformError::WindowGone(window))?;
            w.frame.x = origin.x;
            w.frame.y = origin.y;
            let pid = w.pid;
            if echo {
                st.created_callbacks(pid)
            } else {
                Vec::new()
            }
        };
        for cb in callbacks {
            cb(window);
        }
        Ok(())
    }

    fn set_size(&self, window: WindowHandle, width: i32, height: i32) -> Result<()> {
        self.note("set_size");
        let mut st = self.state();
        if st.fail_geometry {
            return Err(PlatformError::GeometryWriteFailed("injected failure".into()));
        }
        let (width, height) = match st.max_size {
            Some((max_w, max_h)) => (width.min(max_w), height.min(max_h)),
            None => (width, height),
        };
        let w = st.windows.get_mut(&window).ok_or(PlatformError::WindowGone(window))?;
        w.frame.width = width;
        w.frame.height = height;
        Ok(())
    }

    fn stable_id(&self, window: WindowHandle) -> Result<WindowId> {
        self.state().window(window)?;
        Ok(window.0 + STABLE_ID_OFFSET)
    }

    fn subscribe_window_created(
        &self,
        pid: Pid,
        callback: WindowCreatedCallback,
    ) -> Result<SubscriptionId> {
        self.note(format!("subscribe:{}", pid));
        let mut st = self.state();
        let id = SubscriptionId(st.next_subscription);
        st.next_subscription += 1;
        st.created_subs.insert(id, (pid, Arc::from(callback)));
        Ok(id)
    }

    fn unsubscribe(&self, subscription: SubscriptionId) -> Result<()> {
        self.note("unsubscribe");
        let mut st = self.state();
        st.created_subs.remove(&subscription);
        st.system_subs.remove(&subscription);
        Ok(())
    }

    fn activate(&self, app_id: &str) -> Result<()> {
        self.note(format!("activate:{}", app_id));
        let app = {
            let mut st = self.state();
            let app = st
                .app_by_id(app_id)
                .cloned()
                .ok_or_else(|| PlatformError::AppNotRunning(app_id.to_string()))?;
            st.raise_app(app.pid);
            app
        };
        self.broadcast(SystemEvent::AppActivated(app));
        Ok(())
    }

    fn reopen(&self, app_id: &str) -> Result<()> {
        self.note(format!("reopen:{}", app_id));
        if self.state().app_by_id(app_id).is_none() {
            return Err(PlatformError::AppNotRunning(app_id.to_string()));
        }
        Ok(())
    }

    fn launch(&self, app_id: &str) -> Result<()> {
        self.note(format!("launch:{}", app_id));
        let name = self
            .state()
            .installable
            .get(app_id)
            .cloned()
            .ok_or_else(|| PlatformError::LaunchFailed(app_id.to_string(), "not installed".into()))?;
        self.spawn_app(app_id, &name);
        Ok(())
    }

    fn install_key_tap(&self, callback: KeyTapCallback) -> Result<KeyTapId> {
        self.note("install_key_tap");
        let mut st = self.state();
        if !st.permissions.key_interception {
            return Err(PlatformError::PermissionDenied("key interception"));
        }
        let id = KeyTapId(st.next_subscription);
        st.next_subscription += 1;
        st.key_tap = Some((id, Arc::from(callback)));
        Ok(id)
    }

    fn reenable_key_tap(&self, tap: KeyTapId) -> Result<()> {
        self.note("reenable_key_tap");
        let mut st = self.state();
        if st.key_tap.as_ref().is_some_and(|(id, _)| *id == tap) {
            st.tap_reenabled += 1;
            Ok(())
        } else {
            Err(PlatformError::KeyTapFailed("unknown tap".into()))
        }
    }

    fn remove_key_tap(&self, tap: KeyTapId) -> Result<()> {
        self.note("remove_key_tap");
        let mut st = self.state();
        if st.key_tap.as_ref().is_some_and(|(id, _)| *id == tap) {
            st.key_tap = None;
        }
        Ok(())
    }

    fn watch_system_events(&self, callback: SystemEventCallback) -> Result<SubscriptionId> {
        let mut st = self.state();
        let id = SubscriptionId(st.next_subscription);
        st.next_subscription += 1;
        st.system_subs.insert(id, Arc::from(callback));
        Ok(id)
    }

    fn permissions(&self) -> Permissions {
        self.state().permissions
    }
}
