//! Zonekeeper Platform Adapter
//!
//! The [`WindowSystem`] trait is the engine's only view of the operating
//! system. It covers:
//! - Display enumeration
//! - Window geometry reads and writes
//! - Window kind detection (normal vs. dialog/sheet/floating)
//! - Per-process "window created" subscriptions
//! - Application enumeration, activation and launching
//! - A system-wide low-level key tap
//! - Application lifecycle and display-change notifications
//!
//! Backends:
//! - [`win32::Win32WindowSystem`] on Windows
//! - [`fake::FakeWindowSystem`] (feature `test-utils`), fully in memory

use thiserror::Error;
use zonekeeper_core::{AppId, DisplayInfo, Modifiers, Point, Rect, WindowId};

#[cfg(any(test, feature = "test-utils"))]
pub mod fake;

#[cfg(windows)]
pub mod win32;

/// Process identifier.
pub type Pid = u32;

/// Errors that can occur while talking to the window system.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Failed to enumerate displays: {0}")]
    DisplayQueryFailed(String),

    #[error("Failed to enumerate applications: {0}")]
    AppQueryFailed(String),

    #[error("Failed to read window geometry: {0}")]
    GeometryReadFailed(String),

    #[error("Failed to write window geometry: {0}")]
    GeometryWriteFailed(String),

    #[error("Window {0:?} no longer exists")]
    WindowGone(WindowHandle),

    #[error("Application {0} is not running")]
    AppNotRunning(AppId),

    #[error("Failed to launch application {0}: {1}")]
    LaunchFailed(AppId, String),

    #[error("Failed to install subscription: {0}")]
    SubscriptionFailed(String),

    #[error("Failed to install key tap: {0}")]
    KeyTapFailed(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(&'static str),
}

pub type Result<T> = std::result::Result<T, PlatformError>;

/// Opaque handle to a live window.
///
/// Handles are only meaningful while the window exists; use
/// [`WindowSystem::stable_id`] for identity across events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub u64);

/// Window role as far as placement is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    /// A regular document/application window.
    Normal,
    Dialog,
    Sheet,
    /// Panels, palettes, tooltips and other floating system windows.
    Floating,
}

impl WindowKind {
    /// Only normal windows take part in placement.
    pub fn is_placeable(self) -> bool {
        self == WindowKind::Normal
    }
}

/// A running application process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningApp {
    pub pid: Pid,
    pub app_id: AppId,
    pub display_name: String,
}

/// Application lifecycle and display notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemEvent {
    AppLaunched(RunningApp),
    AppTerminated(RunningApp),
    /// An application came to the foreground.
    AppActivated(RunningApp),
    /// Displays were added, removed or changed resolution.
    DisplaysChanged,
}

/// Raw input delivered to the key tap callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEvent {
    /// A key went down. `key` is the canonical character for the physical
    /// key, if it has one.
    KeyDown { key: Option<char>, modifiers: Modifiers },
    /// The set of held modifiers changed.
    ModifiersChanged(Modifiers),
    /// The OS disabled the tap (timeout or policy); it must be re-enabled.
    TapDisabled,
}

/// What the key tap does with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapDecision {
    PassThrough,
    /// Swallow the event so the foreground application never sees it.
    Consume,
}

/// Handle for a window-created or system-event subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle for an installed key tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyTapId(pub u64);

/// OS permissions the engine depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions {
    /// Reading and writing other applications' window geometry.
    pub window_control: bool,
    /// Intercepting global keyboard input.
    pub key_interception: bool,
}

impl Permissions {
    pub const ALL: Permissions = Permissions {
        window_control: true,
        key_interception: true,
    };
}

/// Callback invoked with each newly created window of a process.
pub type WindowCreatedCallback = Box<dyn Fn(WindowHandle) + Send + Sync>;

/// Callback invoked with application lifecycle and display notifications.
pub type SystemEventCallback = Box<dyn Fn(SystemEvent) + Send + Sync>;

/// Callback invoked on the tap thread for every key event.
///
/// Must return quickly: the physical key is held until it does.
pub type KeyTapCallback = Box<dyn Fn(&KeyEvent) -> TapDecision + Send + Sync>;

/// Capabilities the placement engine needs from the operating system.
///
/// Callbacks may be invoked on arbitrary threads and must never call back
/// into long-running work; implementations may hold internal locks while
/// collecting callbacks but must release them before invoking one.
pub trait WindowSystem: Send + Sync {
    /// All active displays.
    fn list_displays(&self) -> Result<Vec<DisplayInfo>>;

    /// Every running application with a user interface.
    fn running_applications(&self) -> Result<Vec<RunningApp>>;

    /// The application currently in the foreground.
    fn frontmost_application(&self) -> Result<Option<RunningApp>>;

    /// Owning application of every on-screen window, front to back.
    /// An app appears once per window.
    fn app_window_order(&self) -> Result<Vec<AppId>>;

    /// Frontmost window of a process.
    fn frontmost_window(&self, pid: Pid) -> Result<Option<WindowHandle>>;

    fn window_kind(&self, window: WindowHandle) -> Result<WindowKind>;

    fn get_frame(&self, window: WindowHandle) -> Result<Rect>;

    fn set_position(&self, window: WindowHandle, origin: Point) -> Result<()>;

    fn set_size(&self, window: WindowHandle, width: i32, height: i32) -> Result<()>;

    /// Write position, then size. Some window managers clamp the size
    /// relative to the current position, so the order matters.
    fn set_frame(&self, window: WindowHandle, frame: Rect) -> Result<()> {
        self.set_position(window, frame.origin())?;
        self.set_size(window, frame.width, frame.height)
    }

    /// Identifier that stays the same for the lifetime of the window.
    fn stable_id(&self, window: WindowHandle) -> Result<WindowId>;

    /// Receive each window created by `pid`.
    fn subscribe_window_created(
        &self,
        pid: Pid,
        callback: WindowCreatedCallback,
    ) -> Result<SubscriptionId>;

    fn unsubscribe(&self, subscription: SubscriptionId) -> Result<()>;

    /// Bring an application to the foreground.
    fn activate(&self, app_id: &str) -> Result<()>;

    /// Ask a running application to reopen (show a window if it has none).
    fn reopen(&self, app_id: &str) -> Result<()>;

    /// Start an application. Does not wait for its first window.
    fn launch(&self, app_id: &str) -> Result<()>;

    /// Install the system-wide key tap.
    fn install_key_tap(&self, callback: KeyTapCallback) -> Result<KeyTapId>;

    /// Re-enable a tap the OS disabled.
    fn reenable_key_tap(&self, tap: KeyTapId) -> Result<()>;

    fn remove_key_tap(&self, tap: KeyTapId) -> Result<()>;

    /// Receive application lifecycle and display notifications.
    fn watch_system_events(&self, callback: SystemEventCallback) -> Result<SubscriptionId>;

    /// Current permission state.
    fn permissions(&self) -> Permissions;
}
