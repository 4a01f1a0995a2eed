//! Zonekeeper Engine
//!
//! The window-placement engine. One coordination task owns every piece of
//! mutable state (active profile, positioned windows, switcher and focus
//! state) and consumes a bounded channel of [`EngineEvent`]s. Window system
//! callbacks and the key tap only ever send into that channel.
//!
//! Components:
//! - [`enforcer`]: moves a window into its region, suppressing self-feedback
//! - [`monitor`]: per-process window-created subscriptions and the
//!   positioned-window set
//! - [`focus_cycle`]: drives the per-region app switcher
//! - [`focus_region`]: pins a window into the focus region
//! - [`keyboard`]: the global shortcut table and key tap
//! - [`coordinator`]: the event loop tying it all together

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use zonekeeper_core::{
    AppId, Candidate, KeyboardShortcut, Profile, ProfileId, Rect, Region, RegionId, WindowId,
};
use zonekeeper_platform::{Permissions, Pid, WindowHandle};

pub mod coordinator;
pub mod enforcer;
mod error;
pub mod focus_cycle;
pub mod focus_region;
pub mod keyboard;
pub mod monitor;

pub use coordinator::{capture_topology, spawn_engine, Coordinator};
pub use enforcer::{Enforcer, PlacementOutcome, RepositionGate};
pub use error::EngineError;
pub use focus_region::{FocusOutcome, FocusState};
pub use keyboard::{RegisteredShortcut, ShortcutAction};

/// Capacity of the coordination channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Delays and tolerances used by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineTiming {
    /// Wait after a geometry write before reading the frame back.
    pub settle_delay: Duration,
    /// Extra time the reposition gate stays closed after the read-back,
    /// covering notifications that lag the write.
    pub suppression_tail: Duration,
    /// Interval of the pinned-window position check.
    pub focus_check_interval: Duration,
    /// Manhattan distance a pinned window may drift before it counts as a
    /// manual move.
    pub focus_move_tolerance: i32,
    /// How long a switcher opened by a command, with no chord held, stays
    /// open before it commits on its own.
    pub switcher_timeout: Duration,
}

impl Default for EngineTiming {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(100),
            suppression_tail: Duration::from_millis(200),
            focus_check_interval: Duration::from_millis(500),
            focus_move_tolerance: 20,
            switcher_timeout: Duration::from_secs(3),
        }
    }
}

/// Global behaviour switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Activate the matching profile when the display topology changes.
    pub auto_switch_profiles: bool,
    /// Place windows as their apps launch or come to the foreground.
    pub reposition_on_launch: bool,
    /// Never launch a stopped app from the switcher.
    pub confirm_before_launch: bool,
    /// Moves the foreground window back into its assigned region.
    pub reset_shortcut: Option<KeyboardShortcut>,
    /// Pins the foreground window into the focus region.
    pub focus_shortcut: Option<KeyboardShortcut>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            auto_switch_profiles: true,
            reposition_on_launch: true,
            confirm_before_launch: false,
            reset_shortcut: None,
            focus_shortcut: None,
        }
    }
}

/// Everything the coordination loop reacts to.
#[derive(Debug)]
pub enum EngineEvent {
    /// A watched process created a window.
    WindowCreated {
        pid: Pid,
        app_id: AppId,
        window: WindowHandle,
    },
    AppLaunched(zonekeeper_platform::RunningApp),
    AppTerminated(zonekeeper_platform::RunningApp),
    AppActivated(zonekeeper_platform::RunningApp),
    DisplaysChanged,
    /// A registered shortcut was pressed.
    ShortcutFired(ShortcutAction),
    /// Every modifier was released while the switcher was armed.
    ModifiersReleased,
    /// Periodic pinned-window check. Stale generations are ignored.
    FocusCheck { generation: u64 },
    /// A command-opened switcher timed out. Stale generations are ignored.
    SwitcherExpired { generation: u64 },
    /// A request from the configuration/UI surface.
    Command(EngineCommand),
    Shutdown,
}

impl From<zonekeeper_platform::SystemEvent> for EngineEvent {
    fn from(event: zonekeeper_platform::SystemEvent) -> Self {
        use zonekeeper_platform::SystemEvent;
        match event {
            SystemEvent::AppLaunched(app) => EngineEvent::AppLaunched(app),
            SystemEvent::AppTerminated(app) => EngineEvent::AppTerminated(app),
            SystemEvent::AppActivated(app) => EngineEvent::AppActivated(app),
            SystemEvent::DisplaysChanged => EngineEvent::DisplaysChanged,
        }
    }
}

/// Requests answered by the coordination loop.
#[derive(Debug)]
pub enum EngineCommand {
    GetActiveProfile(oneshot::Sender<Option<Profile>>),
    GetActiveRegions(oneshot::Sender<Vec<Region>>),
    ListProfiles(oneshot::Sender<Vec<Profile>>),
    SetActiveProfile {
        id: ProfileId,
        respond: oneshot::Sender<Result<Profile, EngineError>>,
    },
    AutoSelectProfile(oneshot::Sender<Result<Option<Profile>, EngineError>>),
    EnforceRegion {
        region_id: RegionId,
        app_id: AppId,
        respond: oneshot::Sender<Result<PlacementOutcome, EngineError>>,
    },
    /// `None` enforces the active profile's regions.
    EnforceAllRegions {
        regions: Option<Vec<Region>>,
        respond: oneshot::Sender<usize>,
    },
    UpdateKeyboardShortcuts(oneshot::Sender<usize>),
    CycleFocus {
        region_id: RegionId,
        /// Commit immediately instead of waiting for a modifier release.
        commit: bool,
        respond: oneshot::Sender<Result<(), EngineError>>,
    },
    /// `None` uses the active profile's focus region.
    FocusWindow {
        region_id: Option<RegionId>,
        respond: oneshot::Sender<Result<FocusOutcome, EngineError>>,
    },
    UnfocusWindow(oneshot::Sender<Result<bool, EngineError>>),
    Status(oneshot::Sender<EngineStatus>),
    /// Replace profiles and settings, then reselect a profile.
    Reload {
        profiles: Vec<Profile>,
        settings: EngineSettings,
        respond: oneshot::Sender<Option<Profile>>,
    },
}

/// Snapshot of the engine for status queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
    pub active_profile: Option<(ProfileId, String)>,
    pub profile_count: usize,
    /// Fingerprint of the topology at the last capture.
    pub topology_fingerprint: Option<String>,
    pub observed_processes: usize,
    pub positioned_windows: usize,
    pub focused_window: Option<WindowId>,
    pub switcher_region: Option<RegionId>,
    pub registered_shortcuts: usize,
    pub permissions: Permissions,
}

/// Notifications for whatever presents the engine to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    ProfileActivated { id: ProfileId, name: String },
    SwitcherShown {
        region_id: RegionId,
        candidates: Vec<Candidate>,
        selected_index: usize,
    },
    SwitcherHidden,
    FocusPinned { window_id: WindowId, frame: Rect },
    FocusReleased { window_id: WindowId, restored: bool },
    /// Reported once per capability.
    PermissionUnavailable(&'static str),
}

/// Cloneable front door to a running engine.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineEvent>,
}

impl EngineHandle {
    pub fn new(tx: mpsc::Sender<EngineEvent>) -> Self {
        Self { tx }
    }

    /// Inject an event, as a window system callback would.
    pub async fn notify(&self, event: EngineEvent) -> Result<(), EngineError> {
        self.tx.send(event).await.map_err(|_| EngineError::Stopped)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> EngineCommand,
    ) -> Result<T, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.notify(EngineEvent::Command(make(tx))).await?;
        rx.await.map_err(|_| EngineError::Stopped)
    }

    pub async fn active_profile(&self) -> Result<Option<Profile>, EngineError> {
        self.request(EngineCommand::GetActiveProfile).await
    }

    pub async fn active_regions(&self) -> Result<Vec<Region>, EngineError> {
        self.request(EngineCommand::GetActiveRegions).await
    }

    pub async fn profiles(&self) -> Result<Vec<Profile>, EngineError> {
        self.request(EngineCommand::ListProfiles).await
    }

    pub async fn set_active_profile(&self, id: ProfileId) -> Result<Profile, EngineError> {
        self.request(|respond| EngineCommand::SetActiveProfile { id, respond })
            .await?
    }

    pub async fn auto_select_profile(&self) -> Result<Option<Profile>, EngineError> {
        self.request(EngineCommand::AutoSelectProfile).await?
    }

    pub async fn enforce_region(
        &self,
        region_id: RegionId,
        app_id: impl Into<AppId>,
    ) -> Result<PlacementOutcome, EngineError> {
        let app_id = app_id.into();
        self.request(|respond| EngineCommand::EnforceRegion {
            region_id,
            app_id,
            respond,
        })
        .await?
    }

    /// Returns how many windows were placed.
    pub async fn enforce_all_regions(
        &self,
        regions: Option<Vec<Region>>,
    ) -> Result<usize, EngineError> {
        self.request(|respond| EngineCommand::EnforceAllRegions { regions, respond })
            .await
    }

    /// Returns how many shortcuts are registered afterwards.
    pub async fn update_keyboard_shortcuts(&self) -> Result<usize, EngineError> {
        self.request(EngineCommand::UpdateKeyboardShortcuts).await
    }

    pub async fn cycle_focus(&self, region_id: RegionId, commit: bool) -> Result<(), EngineError> {
        self.request(|respond| EngineCommand::CycleFocus {
            region_id,
            commit,
            respond,
        })
        .await?
    }

    pub async fn focus_window(
        &self,
        region_id: Option<RegionId>,
    ) -> Result<FocusOutcome, EngineError> {
        self.request(|respond| EngineCommand::FocusWindow { region_id, respond })
            .await?
    }

    /// Returns whether a window was pinned.
    pub async fn unfocus_window(&self) -> Result<bool, EngineError> {
        self.request(EngineCommand::UnfocusWindow).await?
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.request(EngineCommand::Status).await
    }

    pub async fn reload(
        &self,
        profiles: Vec<Profile>,
        settings: EngineSettings,
    ) -> Result<Option<Profile>, EngineError> {
        self.request(|respond| EngineCommand::Reload {
            profiles,
            settings,
            respond,
        })
        .await
    }

    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.notify(EngineEvent::Shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timing() {
        let t = EngineTiming::default();
        assert_eq!(t.settle_delay, Duration::from_millis(100));
        assert_eq!(t.suppression_tail, Duration::from_millis(200));
        assert_eq!(t.focus_check_interval, Duration::from_millis(500));
        assert_eq!(t.focus_move_tolerance, 20);
        assert_eq!(t.switcher_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_default_settings() {
        let s = EngineSettings::default();
        assert!(s.auto_switch_profiles);
        assert!(s.reposition_on_launch);
        assert!(!s.confirm_before_launch);
    }

    #[tokio::test]
    async fn test_handle_reports_stopped_engine() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let handle = EngineHandle::new(tx);
        assert!(matches!(handle.status().await, Err(EngineError::Stopped)));
    }
}
