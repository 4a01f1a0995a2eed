//! Win32 window system backend.
//!
//! # Architecture
//!
//! Hooks need a thread with a message loop. [`Win32WindowSystem::new`]
//! spawns one, which owns:
//! - A hidden top-level window receiving `WM_DISPLAYCHANGE` and a polling
//!   timer that diffs the running process list
//! - One `SetWinEventHook` for foreground changes and one for window show
//! - A `WH_KEYBOARD_LL` hook for the key tap
//!
//! Hook procedures have no user data pointer, so subscriptions live in a
//! global mutex-protected registry. Callbacks are cloned out of the
//! registry and invoked after the lock is released.
//!
//! Application identifiers are executable file names (`notepad.exe`).

use std::ffi::c_void;
use std::sync::{mpsc, Arc, Mutex, MutexGuard};

use tracing::{debug, error, warn};
use windows::core::{PCWSTR, PWSTR};
use windows::Win32::Foundation::{CloseHandle, BOOL, HWND, LPARAM, LRESULT, RECT, WPARAM};
use windows::Win32::Graphics::Gdi::{
    EnumDisplayMonitors, GetMonitorInfoW, HDC, HMONITOR, MONITORINFO, MONITORINFOF_PRIMARY,
};
use windows::Win32::System::Threading::{
    OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32, PROCESS_QUERY_LIMITED_INFORMATION,
};
use windows::Win32::UI::Accessibility::{SetWinEventHook, UnhookWinEvent, HWINEVENTHOOK};
use windows::Win32::UI::HiDpi::{
    SetProcessDpiAwarenessContext, DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2,
};
use windows::Win32::UI::Input::KeyboardAndMouse::{
    VK_CONTROL, VK_LCONTROL, VK_LMENU, VK_LSHIFT, VK_LWIN, VK_MENU, VK_RCONTROL, VK_RMENU,
    VK_RSHIFT, VK_RWIN, VK_SHIFT,
};
use windows::Win32::UI::WindowsAndMessaging::{
    CallNextHookEx, CreateWindowExW, DefWindowProcW, DispatchMessageW, EnumWindows, GetAncestor,
    GetClassNameW, GetForegroundWindow, GetMessageW, GetWindow, GetWindowLongW, GetWindowRect,
    GetWindowThreadProcessId, IsIconic, IsWindowVisible, PostMessageW, RegisterClassW,
    SetForegroundWindow, SetTimer, SetWindowPos, SetWindowsHookExW, ShowWindow,
    UnhookWindowsHookEx, EVENT_OBJECT_SHOW, EVENT_SYSTEM_FOREGROUND, GA_ROOT, GWL_EXSTYLE,
    GW_OWNER, HHOOK, KBDLLHOOKSTRUCT, MSG, SWP_NOACTIVATE, SWP_NOMOVE, SWP_NOSIZE, SWP_NOZORDER,
    SW_RESTORE, WH_KEYBOARD_LL, WINDOW_EX_STYLE, WINEVENT_OUTOFCONTEXT, WM_DISPLAYCHANGE,
    WM_KEYDOWN, WM_KEYUP, WM_SYSKEYDOWN, WM_SYSKEYUP, WM_TIMER, WM_USER, WNDCLASSW, WS_EX_TOOLWINDOW,
    WS_POPUP,
};

use zonekeeper_core::{AppId, DisplayInfo, Modifiers, Point, Rect, WindowId};

use crate::{
    KeyEvent, KeyTapCallback, KeyTapId, Permissions, Pid, PlatformError, Result, RunningApp,
    SubscriptionId, SystemEvent, SystemEventCallback, TapDecision, WindowCreatedCallback,
    WindowHandle, WindowKind, WindowSystem,
};

/// Custom message: drop and reinstall the keyboard hook.
const WM_REHOOK_KEYBOARD: u32 = WM_USER + 201;

/// Custom message: leave the message loop.
const WM_QUIT_HOOKS: u32 = WM_USER + 202;

/// Custom message: drop the keyboard hook without reinstalling it.
const WM_UNHOOK_KEYBOARD: u32 = WM_USER + 203;

/// WinEvent ranges to hook, one event each.
const WIN_EVENT_RANGES: [(u32, u32); 2] = [
    (EVENT_SYSTEM_FOREGROUND, EVENT_SYSTEM_FOREGROUND),
    (EVENT_OBJECT_SHOW, EVENT_OBJECT_SHOW),
];

/// Timer used to poll for launched and terminated processes.
const PROCESS_POLL_TIMER: usize = 1;
const PROCESS_POLL_INTERVAL_MS: u32 = 1000;

const OBJID_WINDOW: i32 = 0;
const CHILDID_SELF: i32 = 0;

/// Class name of standard dialog boxes.
const DIALOG_CLASS: &str = "#32770";

type CreatedFn = Arc<dyn Fn(WindowHandle) + Send + Sync>;
type SystemFn = Arc<dyn Fn(SystemEvent) + Send + Sync>;
type TapFn = Arc<dyn Fn(&KeyEvent) -> TapDecision + Send + Sync>;

/// Subscriptions shared between the API surface and the hook procedures.
struct Registry {
    created: Vec<(SubscriptionId, Pid, CreatedFn)>,
    system: Vec<(SubscriptionId, SystemFn)>,
    tap: Option<(KeyTapId, TapFn)>,
    modifiers: Modifiers,
    known_apps: Vec<RunningApp>,
    next_id: u64,
}

static REGISTRY: Mutex<Registry> = Mutex::new(Registry {
    created: Vec::new(),
    system: Vec::new(),
    tap: None,
    modifiers: Modifiers::NONE,
    known_apps: Vec::new(),
    next_id: 1,
});

/// The installed keyboard hook, as a raw handle value.
impl Registry {
    /// Forget the tap if it is still the registered one.
    fn clear_tap(&mut self, tap: KeyTapId) -> bool {
        if self.tap.as_ref().is_some_and(|(id, _)| *id == tap) {
            self.tap = None;
            true
        } else {
            false
        }
    }
}

static KEYBOARD_HOOK: Mutex<Option<isize>> = Mutex::new(None);

fn registry() -> MutexGuard<'static, Registry> {
    REGISTRY.lock().unwrap_or_else(|e| e.into_inner())
}

/// Opt into Per-Monitor Aware V2 before any window is created.
pub fn set_dpi_awareness() -> bool {
    unsafe { SetProcessDpiAwarenessContext(DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2).is_ok() }
}

fn hwnd_of(window: WindowHandle) -> HWND {
    HWND(window.0 as usize as *mut c_void)
}

fn handle_of(hwnd: HWND) -> WindowHandle {
    WindowHandle(hwnd.0 as usize as u64)
}

/// Window system backed by the Win32 API.
pub struct Win32WindowSystem {
    hook_hwnd: isize,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Win32WindowSystem {
    /// Spawn the hook thread and wait until its hooks are installed.
    ///
    /// Also makes the process per-monitor DPI aware so that every frame is
    /// in physical pixels.
    pub fn new() -> Result<Self> {
        if !set_dpi_awareness() {
            warn!("Failed to set DPI awareness (may already be set)");
        }
        registry().known_apps = enumerate_apps()?;

        let (init_tx, init_rx) = mpsc::channel::<Result<isize>>();
        let thread = std::thread::spawn(move || unsafe {
            let class_name: Vec<u16> = "ZonekeeperHookClass\0".encode_utf16().collect();
            let wc = WNDCLASSW {
                lpfnWndProc: Some(hook_window_proc),
                lpszClassName: PCWSTR(class_name.as_ptr()),
                ..Default::default()
            };
            RegisterClassW(&wc);

            let hwnd = match CreateWindowExW(
                WINDOW_EX_STYLE::default(),
                PCWSTR(class_name.as_ptr()),
                None,
                WS_POPUP,
                0,
                0,
                0,
                0,
                None,
                None,
                None,
                None,
            ) {
                Ok(hwnd) => hwnd,
                Err(e) => {
                    let _ = init_tx.send(Err(PlatformError::SubscriptionFailed(e.to_string())));
                    return;
                }
            };

            let mut win_event_hooks: Vec<HWINEVENTHOOK> = Vec::with_capacity(WIN_EVENT_RANGES.len());
            for (min, max) in WIN_EVENT_RANGES {
                let hook = SetWinEventHook(min, max, None, Some(win_event_proc), 0, 0, WINEVENT_OUTOFCONTEXT);
                if hook.is_invalid() {
                    for hook in win_event_hooks {
                        let _ = UnhookWinEvent(hook);
                    }
                    let _ = init_tx.send(Err(PlatformError::SubscriptionFailed(format!(
                        "SetWinEventHook({:#x}) returned null",
                        min
                    ))));
                    return;
                }
                win_event_hooks.push(hook);
            }

            if let Err(e) = install_keyboard_hook() {
                warn!("Keyboard hook unavailable: {}", e);
            }
            SetTimer(Some(hwnd), PROCESS_POLL_TIMER, PROCESS_POLL_INTERVAL_MS, None);

            let _ = init_tx.send(Ok(hwnd.0 as isize));

            let mut msg = MSG::default();
            loop {
                if !GetMessageW(&mut msg, None, 0, 0).as_bool() {
                    break;
                }
                if msg.message == WM_QUIT_HOOKS {
                    break;
                }
                let _ = DispatchMessageW(&msg);
            }

            for hook in win_event_hooks {
                let _ = UnhookWinEvent(hook);
            }
            uninstall_keyboard_hook();
        });

        let hook_hwnd = init_rx
            .recv()
            .map_err(|_| PlatformError::SubscriptionFailed("hook thread init failed".into()))??;
        debug!("Win32 hook thread started");

        Ok(Self {
            hook_hwnd,
            thread: Some(thread),
        })
    }

    fn post(&self, msg: u32) -> Result<()> {
        unsafe {
            PostMessageW(
                Some(HWND(self.hook_hwnd as *mut c_void)),
                msg,
                WPARAM(0),
                LPARAM(0),
            )
        }
        .map_err(|e| PlatformError::KeyTapFailed(e.to_string()))
    }

    fn windows_of(&self, app_id: &str) -> Result<Vec<HWND>> {
        Ok(top_level_windows()?
            .into_iter()
            .filter(|&hwnd| app_of_window(hwnd).is_some_and(|a| a.app_id.eq_ignore_ascii_case(app_id)))
            .collect())
    }
}

impl Drop for Win32WindowSystem {
    fn drop(&mut self) {
        let _ = self.post(WM_QUIT_HOOKS);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        debug!("Win32 hook thread stopped");
    }
}

impl WindowSystem for Win32WindowSystem {
    fn list_displays(&self) -> Result<Vec<DisplayInfo>> {
        let mut monitors: Vec<(RECT, bool)> = Vec::new();
        let ok = unsafe {
            EnumDisplayMonitors(
                None,
                None,
                Some(monitor_enum_proc),
                LPARAM(&mut monitors as *mut _ as isize),
            )
        };
        if !ok.as_bool() {
            return Err(PlatformError::DisplayQueryFailed("EnumDisplayMonitors failed".into()));
        }
        Ok(monitors
            .into_iter()
            .enumerate()
            .map(|(i, (rc, primary))| {
                DisplayInfo::new(i as u32 + 1, rc.right - rc.left, rc.bottom - rc.top, primary)
                    .at(rc.left, rc.top)
            })
            .collect())
    }

    fn running_applications(&self) -> Result<Vec<RunningApp>> {
        enumerate_apps()
    }

    fn frontmost_application(&self) -> Result<Option<RunningApp>> {
        let hwnd = unsafe { GetForegroundWindow() };
        if hwnd.is_invalid() {
            return Ok(None);
        }
        Ok(app_of_window(hwnd))
    }

    fn app_window_order(&self) -> Result<Vec<AppId>> {
        Ok(top_level_windows()?
            .into_iter()
            .filter_map(app_of_window)
            .map(|a| a.app_id)
            .collect())
    }

    fn frontmost_window(&self, pid: Pid) -> Result<Option<WindowHandle>> {
        Ok(top_level_windows()?
            .into_iter()
            .find(|&hwnd| pid_of(hwnd) == pid)
            .map(handle_of))
    }

    fn window_kind(&self, window: WindowHandle) -> Result<WindowKind> {
        let hwnd = hwnd_of(window);
        let ex_style = unsafe { GetWindowLongW(hwnd, GWL_EXSTYLE) } as u32;
        if ex_style & WS_EX_TOOLWINDOW.0 != 0 {
            return Ok(WindowKind::Floating);
        }
        if class_name(hwnd) == DIALOG_CLASS {
            return Ok(WindowKind::Dialog);
        }
        if unsafe { GetWindow(hwnd, GW_OWNER) }.is_ok_and(|owner| !owner.is_invalid()) {
            return Ok(WindowKind::Sheet);
        }
        Ok(WindowKind::Normal)
    }

    fn get_frame(&self, window: WindowHandle) -> Result<Rect> {
        let mut rc = RECT::default();
        unsafe { GetWindowRect(hwnd_of(window), &mut rc) }
            .map_err(|_| PlatformError::WindowGone(window))?;
        Ok(Rect::new(rc.left, rc.top, rc.right - rc.left, rc.bottom - rc.top))
    }

    fn set_position(&self, window: WindowHandle, origin: Point) -> Result<()> {
        unsafe {
            SetWindowPos(
                hwnd_of(window),
                None,
                origin.x,
                origin.y,
                0,
                0,
                SWP_NOSIZE | SWP_NOZORDER | SWP_NOACTIVATE,
            )
        }
        .map_err(|e| PlatformError::GeometryWriteFailed(e.to_string()))
    }

    fn set_size(&self, window: WindowHandle, width: i32, height: i32) -> Result<()> {
        unsafe {
            SetWindowPos(
                hwnd_of(window),
                None,
                0,
                0,
                width,
                height,
                SWP_NOMOVE | SWP_NOZORDER | SWP_NOACTIVATE,
            )
        }
        .map_err(|e| PlatformError::GeometryWriteFailed(e.to_string()))
    }

    fn stable_id(&self, window: WindowHandle) -> Result<WindowId> {
        // HWNDs are not reused while the window lives.
        Ok(window.0)
    }

    fn subscribe_window_created(
        &self,
        pid: Pid,
        callback: WindowCreatedCallback,
    ) -> Result<SubscriptionId> {
        let mut reg = registry();
        let id = SubscriptionId(reg.next_id);
        reg.next_id += 1;
        reg.created.push((id, pid, Arc::from(callback)));
        Ok(id)
    }

    fn unsubscribe(&self, subscription: SubscriptionId) -> Result<()> {
        let mut reg = registry();
        reg.created.retain(|(id, _, _)| *id != subscription);
        reg.system.retain(|(id, _)| *id != subscription);
        Ok(())
    }

    fn activate(&self, app_id: &str) -> Result<()> {
        let hwnd = self
            .windows_of(app_id)?
            .into_iter()
            .next()
            .ok_or_else(|| PlatformError::AppNotRunning(app_id.to_string()))?;
        unsafe {
            if IsIconic(hwnd).as_bool() {
                let _ = ShowWindow(hwnd, SW_RESTORE);
            }
            if !SetForegroundWindow(hwnd).as_bool() {
                warn!("SetForegroundWindow refused for {}", app_id);
            }
        }
        Ok(())
    }

    fn reopen(&self, app_id: &str) -> Result<()> {
        let windows = self.windows_of(app_id)?;
        if windows.is_empty() {
            return Err(PlatformError::AppNotRunning(app_id.to_string()));
        }
        for hwnd in windows {
            unsafe {
                if IsIconic(hwnd).as_bool() {
                    let _ = ShowWindow(hwnd, SW_RESTORE);
                }
            }
        }
        Ok(())
    }

    fn launch(&self, app_id: &str) -> Result<()> {
        // `start` resolves App Paths registrations as well as PATH.
        std::process::Command::new("cmd")
            .args(["/C", "start", "", app_id])
            .spawn()
            .map(|_| ())
            .map_err(|e| PlatformError::LaunchFailed(app_id.to_string(), e.to_string()))
    }

    fn install_key_tap(&self, callback: KeyTapCallback) -> Result<KeyTapId> {
        let mut reg = registry();
        let id = KeyTapId(reg.next_id);
        reg.next_id += 1;
        reg.tap = Some((id, Arc::from(callback)));
        drop(reg);
        self.post(WM_REHOOK_KEYBOARD)?;
        Ok(id)
    }

    fn reenable_key_tap(&self, tap: KeyTapId) -> Result<()> {
        if !registry().tap.as_ref().is_some_and(|(id, _)| *id == tap) {
            return Err(PlatformError::KeyTapFailed("unknown tap".into()));
        }
        self.post(WM_REHOOK_KEYBOARD)
    }

    fn remove_key_tap(&self, tap: KeyTapId) -> Result<()> {
        if !registry().clear_tap(tap) {
            return Ok(());
        }
        // The hook belongs to the hook thread; only it may unhook.
        self.post(WM_UNHOOK_KEYBOARD)
    }

    fn watch_system_events(&self, callback: SystemEventCallback) -> Result<SubscriptionId> {
        let mut reg = registry();
        let id = SubscriptionId(reg.next_id);
        reg.next_id += 1;
        reg.system.push((id, Arc::from(callback)));
        Ok(id)
    }

    fn permissions(&self) -> Permissions {
        // Windows has no per-app consent for either capability.
        Permissions::ALL
    }
}

// ---- enumeration helpers ----

/// Visible, unowned, non-tool top-level windows in z-order (front first).
fn top_level_windows() -> Result<Vec<HWND>> {
    let mut windows: Vec<HWND> = Vec::new();
    unsafe { EnumWindows(Some(enum_windows_proc), LPARAM(&mut windows as *mut _ as isize)) }
        .map_err(|e| PlatformError::AppQueryFailed(e.to_string()))?;
    Ok(windows)
}

unsafe extern "system" fn enum_windows_proc(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let windows = &mut *(lparam.0 as *mut Vec<HWND>);
    if !IsWindowVisible(hwnd).as_bool() {
        return BOOL(1);
    }
    let ex_style = GetWindowLongW(hwnd, GWL_EXSTYLE) as u32;
    let owned = GetWindow(hwnd, GW_OWNER).is_ok_and(|o| !o.is_invalid());
    if ex_style & WS_EX_TOOLWINDOW.0 == 0 && !owned {
        windows.push(hwnd);
    }
    BOOL(1)
}

unsafe extern "system" fn monitor_enum_proc(
    hmonitor: HMONITOR,
    _hdc: HDC,
    _rect: *mut RECT,
    lparam: LPARAM,
) -> BOOL {
    let monitors = &mut *(lparam.0 as *mut Vec<(RECT, bool)>);
    let mut info = MONITORINFO {
        cbSize: std::mem::size_of::<MONITORINFO>() as u32,
        ..Default::default()
    };
    if GetMonitorInfoW(hmonitor, &mut info).as_bool() {
        // No reliable built-in flag exists; the primary display stands in.
        monitors.push((info.rcMonitor, info.dwFlags & MONITORINFOF_PRIMARY != 0));
    }
    BOOL(1)
}

fn enumerate_apps() -> Result<Vec<RunningApp>> {
    let mut apps: Vec<RunningApp> = Vec::new();
    for hwnd in top_level_windows()? {
        if let Some(app) = app_of_window(hwnd) {
            if !apps.iter().any(|a| a.pid == app.pid) {
                apps.push(app);
            }
        }
    }
    Ok(apps)
}

fn pid_of(hwnd: HWND) -> Pid {
    let mut pid = 0u32;
    unsafe { GetWindowThreadProcessId(hwnd, Some(&mut pid)) };
    pid
}

fn app_of_window(hwnd: HWND) -> Option<RunningApp> {
    let pid = pid_of(hwnd);
    let path = process_image(pid)?;
    let app_id = path.rsplit('\\').next().unwrap_or(&path).to_string();
    let display_name = app_id
        .rsplit_once('.')
        .map(|(stem, _)| stem.to_string())
        .unwrap_or_else(|| app_id.clone());
    Some(RunningApp {
        pid,
        app_id,
        display_name,
    })
}

fn process_image(pid: Pid) -> Option<String> {
    unsafe {
        let process = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid).ok()?;
        let mut buf = [0u16; 1024];
        let mut len = buf.len() as u32;
        let result = QueryFullProcessImageNameW(
            process,
            PROCESS_NAME_WIN32,
            PWSTR(buf.as_mut_ptr()),
            &mut len,
        );
        let _ = CloseHandle(process);
        result.ok()?;
        Some(String::from_utf16_lossy(&buf[..len as usize]))
    }
}

fn class_name(hwnd: HWND) -> String {
    let mut buf = [0u16; 256];
    let len = unsafe { GetClassNameW(hwnd, &mut buf) };
    String::from_utf16_lossy(&buf[..len.max(0) as usize])
}

// ---- event delivery ----

fn broadcast(event: SystemEvent) {
    let callbacks: Vec<SystemFn> = registry().system.iter().map(|(_, cb)| cb.clone()).collect();
    for cb in callbacks {
        cb(event.clone());
    }
}

fn poll_processes() {
    let current = match enumerate_apps() {
        Ok(apps) => apps,
        Err(e) => {
            debug!("Process poll failed: {}", e);
            return;
        }
    };
    let (launched, terminated) = {
        let mut reg = registry();
        let launched: Vec<RunningApp> = current
            .iter()
            .filter(|a| !reg.known_apps.iter().any(|k| k.pid == a.pid))
            .cloned()
            .collect();
        let terminated: Vec<RunningApp> = reg
            .known_apps
            .iter()
            .filter(|k| !current.iter().any(|a| a.pid == k.pid))
            .cloned()
            .collect();
        reg.known_apps = current;
        (launched, terminated)
    };
    for app in launched {
        broadcast(SystemEvent::AppLaunched(app));
    }
    for app in terminated {
        broadcast(SystemEvent::AppTerminated(app));
    }
}

unsafe extern "system" fn hook_window_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| match msg {
        WM_DISPLAYCHANGE => {
            broadcast(SystemEvent::DisplaysChanged);
            Some(LRESULT(0))
        }
        WM_TIMER if wparam.0 == PROCESS_POLL_TIMER => {
            poll_processes();
            Some(LRESULT(0))
        }
        WM_REHOOK_KEYBOARD => {
            uninstall_keyboard_hook();
            if let Err(e) = install_keyboard_hook() {
                error!("Failed to reinstall keyboard hook: {}", e);
            }
            Some(LRESULT(0))
        }
        WM_UNHOOK_KEYBOARD => {
            uninstall_keyboard_hook();
            debug!("Keyboard hook removed");
            Some(LRESULT(0))
        }
        _ => None,
    }));

    match result {
        Ok(Some(lresult)) => lresult,
        Ok(None) => DefWindowProcW(hwnd, msg, wparam, lparam),
        Err(e) => {
            error!("Panic in hook_window_proc: {:?}", e);
            DefWindowProcW(hwnd, msg, wparam, lparam)
        }
    }
}

unsafe extern "system" fn win_event_proc(
    _hook: HWINEVENTHOOK,
    event: u32,
    hwnd: HWND,
    id_object: i32,
    id_child: i32,
    _event_thread: u32,
    _event_time: u32,
) {
    if id_object != OBJID_WINDOW || id_child != CHILDID_SELF || hwnd.is_invalid() {
        return;
    }
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        if GetAncestor(hwnd, GA_ROOT) != hwnd {
            return;
        }
        match event {
            EVENT_OBJECT_SHOW => {
                let pid = pid_of(hwnd);
                let callbacks: Vec<CreatedFn> = registry()
                    .created
                    .iter()
                    .filter(|(_, p, _)| *p == pid)
                    .map(|(_, _, cb)| cb.clone())
                    .collect();
                for cb in callbacks {
                    cb(handle_of(hwnd));
                }
            }
            EVENT_SYSTEM_FOREGROUND => {
                if let Some(app) = app_of_window(hwnd) {
                    broadcast(SystemEvent::AppActivated(app));
                }
            }
            _ => {}
        }
    }));
    if let Err(e) = result {
        error!("Panic in win_event_proc: {:?}", e);
    }
}

// ---- keyboard hook ----

fn install_keyboard_hook() -> Result<()> {
    let hook = unsafe { SetWindowsHookExW(WH_KEYBOARD_LL, Some(keyboard_proc), None, 0) }
        .map_err(|e| PlatformError::KeyTapFailed(e.to_string()))?;
    *KEYBOARD_HOOK.lock().unwrap_or_else(|e| e.into_inner()) = Some(hook.0 as isize);
    Ok(())
}

fn uninstall_keyboard_hook() {
    if let Some(raw) = KEYBOARD_HOOK.lock().unwrap_or_else(|e| e.into_inner()).take() {
        let _ = unsafe { UnhookWindowsHookEx(HHOOK(raw as *mut c_void)) };
    }
}

/// Modifier bit for a virtual-key code, if it is a modifier key.
fn modifier_for_vk(vk: u32) -> Option<Modifiers> {
    let is = |k: windows::Win32::UI::Input::KeyboardAndMouse::VIRTUAL_KEY| vk == k.0 as u32;
    if is(VK_LWIN) || is(VK_RWIN) {
        Some(Modifiers::CMD)
    } else if is(VK_SHIFT) || is(VK_LSHIFT) || is(VK_RSHIFT) {
        Some(Modifiers::SHIFT)
    } else if is(VK_MENU) || is(VK_LMENU) || is(VK_RMENU) {
        Some(Modifiers::OPTION)
    } else if is(VK_CONTROL) || is(VK_LCONTROL) || is(VK_RCONTROL) {
        Some(Modifiers::CONTROL)
    } else {
        None
    }
}

/// Canonical character for a US-layout virtual-key code.
fn char_for_vk(vk: u32) -> Option<char> {
    match vk {
        0x30..=0x39 => char::from_u32(vk),
        0x41..=0x5A => char::from_u32(vk + 0x20),
        0x20 => Some(' '),
        0xBA => Some(';'),
        0xBB => Some('='),
        0xBC => Some(','),
        0xBD => Some('-'),
        0xBE => Some('.'),
        0xBF => Some('/'),
        0xC0 => Some('`'),
        0xDB => Some('['),
        0xDC => Some('\\'),
        0xDD => Some(']'),
        0xDE => Some('\''),
        _ => None,
    }
}

/// Translate one low-level keyboard message into a tap event.
fn translate_key(message: u32, vk: u32) -> Option<KeyEvent> {
    let down = message == WM_KEYDOWN || message == WM_SYSKEYDOWN;
    let up = message == WM_KEYUP || message == WM_SYSKEYUP;
    let mut reg = registry();
    if let Some(bit) = modifier_for_vk(vk) {
        let before = reg.modifiers;
        let mut after = Modifiers::NONE;
        for m in before.iter() {
            let m = Modifiers::from(m);
            if !(up && m == bit) {
                after = after | m;
            }
        }
        if down {
            after = after | bit;
        }
        reg.modifiers = after;
        return (after != before).then_some(KeyEvent::ModifiersChanged(after));
    }
    down.then(|| KeyEvent::KeyDown {
        key: char_for_vk(vk),
        modifiers: reg.modifiers,
    })
}

unsafe extern "system" fn keyboard_proc(code: i32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    if code >= 0 {
        let info = &*(lparam.0 as *const KBDLLHOOKSTRUCT);
        let decision = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let event = translate_key(wparam.0 as u32, info.vkCode)?;
            let tap = registry().tap.as_ref().map(|(_, cb)| cb.clone())?;
            Some(tap(&event))
        }));
        match decision {
            Ok(Some(TapDecision::Consume)) => return LRESULT(1),
            Ok(_) => {}
            Err(e) => error!("Panic in keyboard_proc: {:?}", e),
        }
    }
    CallNextHookEx(None, code, wparam, lparam)
}
