//! End-to-end engine behaviour against the in-memory window system.
//!
//! Every test runs on a paused clock, so placement delays and focus checks
//! complete instantly and deterministically.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use zonekeeper_core::{DisplayInfo, DisplayTopology, Modifiers, Profile, Rect, Region};
use zonekeeper_engine::{
    spawn_engine, EngineError, EngineHandle, EngineSettings, EngineTiming, FocusOutcome,
    PlacementOutcome, UiEvent,
};
use zonekeeper_platform::fake::FakeWindowSystem;
use zonekeeper_platform::{Permissions, Pid, WindowHandle};

struct Harness {
    ws: Arc<FakeWindowSystem>,
    handle: EngineHandle,
    ui: UnboundedReceiver<UiEvent>,
    task: JoinHandle<()>,
}

impl Harness {
    async fn start(ws: FakeWindowSystem, profiles: Vec<Profile>, settings: EngineSettings) -> Self {
        let ws = Arc::new(ws);
        let (handle, ui, task) = spawn_engine(ws.clone(), profiles, settings, EngineTiming::default());
        let harness = Self { ws, handle, ui, task };
        harness.settle().await;
        harness
    }

    /// Wait until every queued event, and whatever it queued in turn, has
    /// been handled.
    async fn settle(&self) {
        for _ in 0..3 {
            self.handle.status().await.unwrap();
        }
    }

    /// Launch an app and wait for the engine to start observing it.
    async fn launch(&self, app_id: &str) -> Pid {
        let pid = self.ws.spawn_app(app_id, app_id);
        self.settle().await;
        pid
    }

    async fn open(&self, pid: Pid, frame: Rect) -> WindowHandle {
        let w = self.ws.open_window(pid, frame);
        self.settle().await;
        w
    }

    fn ui_events(&mut self) -> Vec<UiEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.ui.try_recv() {
            events.push(event);
        }
        events
    }
}

fn builtin() -> DisplayInfo {
    DisplayInfo::new(1, 1920, 1080, true)
}

fn external() -> DisplayInfo {
    DisplayInfo::new(2, 2560, 1440, false).at(1920, 0)
}

fn left(padding: i32) -> Region {
    Region::new(1, "Left", 1, Rect::new(0, 0, 960, 1080))
        .with_apps(["com.app.a"])
        .with_padding(padding)
}

fn laptop_profile(regions: Vec<Region>) -> Profile {
    let mut profile = Profile::new(1, "Laptop", DisplayTopology::new(vec![builtin()]));
    profile.regions = regions;
    profile
}

fn desk_profile() -> Profile {
    Profile::new(2, "Desk", DisplayTopology::new(vec![builtin(), external()]))
        .with_region(
            Region::new(20, "Main", 2, Rect::new(1920, 0, 1280, 1440)).with_apps(["com.app.a"]),
        )
        .with_region(Region::new(21, "Focus", 2, Rect::new(2200, 100, 2000, 1200)).as_focus_region())
}

fn shortcut(s: &str) -> zonekeeper_core::KeyboardShortcut {
    s.parse().unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_scenario_launch_places_window_in_region() {
    let h = Harness::start(FakeWindowSystem::new(), vec![laptop_profile(vec![left(0)])], EngineSettings::default()).await;

    let status = h.handle.status().await.unwrap();
    assert_eq!(status.topology_fingerprint.as_deref(), Some("builtin:1920x1080"));
    assert_eq!(status.active_profile, Some((1, "Laptop".to_string())));

    let pid = h.launch("com.app.a").await;
    let w = h.open(pid, Rect::new(200, 200, 640, 480)).await;

    assert_eq!(h.ws.frame(w), Some(Rect::new(0, 0, 960, 1080)));
    assert_eq!(h.handle.status().await.unwrap().positioned_windows, 1);
}

#[tokio::test(start_paused = true)]
async fn test_scenario_padding_is_applied() {
    let h = Harness::start(FakeWindowSystem::new(), vec![laptop_profile(vec![left(10)])], EngineSettings::default()).await;

    let pid = h.launch("com.app.a").await;
    let w = h.open(pid, Rect::new(200, 200, 640, 480)).await;

    assert_eq!(h.ws.frame(w), Some(Rect::new(10, 10, 940, 1060)));
}

#[tokio::test(start_paused = true)]
async fn test_scenario_display_change_reselects_profile() {
    let ws = FakeWindowSystem::with_displays(vec![builtin(), external()]);
    let profiles = vec![laptop_profile(vec![left(0)]), desk_profile()];
    let mut h = Harness::start(ws, profiles, EngineSettings::default()).await;
    assert_eq!(h.handle.status().await.unwrap().active_profile, Some((2, "Desk".to_string())));

    let pid = h.launch("com.app.a").await;
    let w = h.open(pid, Rect::new(0, 0, 400, 400)).await;
    assert_eq!(h.ws.frame(w), Some(Rect::new(1920, 0, 1280, 1440)));

    h.ws.focus_app(pid);
    let pinned = h.handle.focus_window(None).await.unwrap();
    assert!(matches!(pinned, FocusOutcome::Focused { .. }));
    assert!(h.handle.status().await.unwrap().focused_window.is_some());
    h.ui_events();

    h.ws.set_displays(vec![builtin()]);
    h.settle().await;

    let status = h.handle.status().await.unwrap();
    assert_eq!(status.active_profile, Some((1, "Laptop".to_string())));
    assert_eq!(status.topology_fingerprint.as_deref(), Some("builtin:1920x1080"));
    assert_eq!(status.focused_window, None);
    assert_eq!(status.positioned_windows, 1);
    assert_eq!(h.ws.frame(w), Some(Rect::new(0, 0, 960, 1080)));

    let events = h.ui_events();
    assert!(events.iter().any(|e| matches!(e, UiEvent::FocusReleased { restored: false, .. })));
    assert!(events.contains(&UiEvent::ProfileActivated {
        id: 1,
        name: "Laptop".to_string()
    }));
}

#[tokio::test(start_paused = true)]
async fn test_display_change_without_auto_switch_keeps_profile() {
    let ws = FakeWindowSystem::with_displays(vec![builtin(), external()]);
    let settings = EngineSettings {
        auto_switch_profiles: false,
        ..EngineSettings::default()
    };
    let h = Harness::start(ws, vec![laptop_profile(vec![left(0)]), desk_profile()], settings).await;

    h.ws.set_displays(vec![builtin()]);
    h.settle().await;

    let status = h.handle.status().await.unwrap();
    assert_eq!(status.active_profile, Some((2, "Desk".to_string())));
    assert_eq!(status.topology_fingerprint.as_deref(), Some("builtin:1920x1080"));
}

#[tokio::test(start_paused = true)]
async fn test_regions_on_disconnected_display_are_not_enforced() {
    let ws = FakeWindowSystem::with_displays(vec![builtin(), external()]);
    let settings = EngineSettings {
        auto_switch_profiles: false,
        ..EngineSettings::default()
    };
    let h = Harness::start(ws, vec![laptop_profile(vec![left(0)]), desk_profile()], settings).await;
    let pid = h.launch("com.app.a").await;
    let w = h.open(pid, Rect::new(0, 0, 400, 400)).await;
    assert_eq!(h.ws.frame(w), Some(Rect::new(1920, 0, 1280, 1440)));

    h.ws.drag_window(w, Rect::new(100, 100, 400, 400));
    h.ws.set_displays(vec![builtin()]);
    h.settle().await;

    assert_eq!(h.ws.frame(w), Some(Rect::new(100, 100, 400, 400)));
    assert_eq!(h.handle.status().await.unwrap().active_profile, Some((2, "Desk".to_string())));
}

#[tokio::test(start_paused = true)]
async fn test_unmatched_topology_leaves_state_untouched() {
    let h = Harness::start(FakeWindowSystem::new(), vec![laptop_profile(vec![left(0)])], EngineSettings::default()).await;

    h.ws.set_displays(vec![DisplayInfo::new(1, 3024, 1964, true)]);
    h.settle().await;

    assert_eq!(h.handle.status().await.unwrap().active_profile, Some((1, "Laptop".to_string())));
}

#[tokio::test(start_paused = true)]
async fn test_self_triggered_events_are_suppressed() {
    let ws = FakeWindowSystem::new();
    ws.set_echo_created_on_move(true);
    let h = Harness::start(ws, vec![laptop_profile(vec![left(0)])], EngineSettings::default()).await;

    let pid = h.launch("com.app.a").await;
    h.ws.clear_calls();
    h.open(pid, Rect::new(200, 200, 640, 480)).await;
    h.settle().await;

    assert_eq!(h.ws.call_count("set_position"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_positioned_window_is_not_moved_again() {
    let h = Harness::start(FakeWindowSystem::new(), vec![laptop_profile(vec![left(0)])], EngineSettings::default()).await;
    let pid = h.launch("com.app.a").await;
    let w = h.open(pid, Rect::new(200, 200, 640, 480)).await;

    let dragged = Rect::new(500, 300, 700, 500);
    h.ws.drag_window(w, dragged);
    h.ws.focus_app(pid);
    h.settle().await;

    assert_eq!(h.ws.frame(w), Some(dragged));
}

#[tokio::test(start_paused = true)]
async fn test_activation_places_window_before_subscription_exists() {
    let h = Harness::start(FakeWindowSystem::new(), vec![laptop_profile(vec![left(0)])], EngineSettings::default()).await;

    // The window appears before the engine has seen the launch.
    let pid = h.ws.spawn_app("com.app.a", "A");
    let w = h.ws.open_window(pid, Rect::new(200, 200, 640, 480));
    h.ws.focus_app(pid);
    h.settle().await;

    assert_eq!(h.ws.frame(w), Some(Rect::new(0, 0, 960, 1080)));
}

#[tokio::test(start_paused = true)]
async fn test_reposition_on_launch_disabled() {
    let settings = EngineSettings {
        reposition_on_launch: false,
        ..EngineSettings::default()
    };
    let h = Harness::start(FakeWindowSystem::new(), vec![laptop_profile(vec![left(0)])], settings).await;

    let pid = h.launch("com.app.a").await;
    let w = h.open(pid, Rect::new(200, 200, 640, 480)).await;
    h.ws.focus_app(pid);
    h.settle().await;

    assert_eq!(h.ws.frame(w), Some(Rect::new(200, 200, 640, 480)));
}

#[tokio::test(start_paused = true)]
async fn test_startup_places_running_apps() {
    let ws = FakeWindowSystem::new();
    let pid = ws.spawn_app("com.app.a", "A");
    let w = ws.open_window(pid, Rect::new(200, 200, 640, 480));

    let h = Harness::start(ws, vec![laptop_profile(vec![left(0)])], EngineSettings::default()).await;

    assert_eq!(h.ws.frame(w), Some(Rect::new(0, 0, 960, 1080)));
    let status = h.handle.status().await.unwrap();
    assert_eq!(status.observed_processes, 1);
    assert_eq!(status.positioned_windows, 1);
}

#[tokio::test(start_paused = true)]
async fn test_dialogs_are_not_placed() {
    let h = Harness::start(FakeWindowSystem::new(), vec![laptop_profile(vec![left(0)])], EngineSettings::default()).await;
    let pid = h.launch("com.app.a").await;

    let dialog = h.ws.open_window_of_kind(pid, Rect::new(300, 300, 200, 100), zonekeeper_platform::WindowKind::Dialog);
    h.settle().await;

    assert_eq!(h.ws.frame(dialog), Some(Rect::new(300, 300, 200, 100)));
    assert_eq!(h.handle.status().await.unwrap().positioned_windows, 0);
}

#[tokio::test(start_paused = true)]
async fn test_reset_shortcut_moves_window_back() {
    let settings = EngineSettings {
        reset_shortcut: Some(shortcut("ctrl+option+r")),
        ..EngineSettings::default()
    };
    let h = Harness::start(FakeWindowSystem::new(), vec![laptop_profile(vec![left(0)])], settings).await;
    let pid = h.launch("com.app.a").await;
    let w = h.open(pid, Rect::new(200, 200, 640, 480)).await;
    h.ws.drag_window(w, Rect::new(500, 300, 700, 500));
    h.ws.focus_app(pid);
    h.settle().await;

    let decision = h.ws.press_key(Modifiers::CONTROL | Modifiers::OPTION | Modifiers::SHIFT, 'R');
    assert_eq!(decision, Some(zonekeeper_platform::TapDecision::Consume));
    h.settle().await;

    assert_eq!(h.ws.frame(w), Some(Rect::new(0, 0, 960, 1080)));
}

#[tokio::test(start_paused = true)]
async fn test_unregistered_key_passes_through() {
    let h = Harness::start(FakeWindowSystem::new(), vec![laptop_profile(vec![left(0)])], EngineSettings::default()).await;
    assert_eq!(
        h.ws.press_key(Modifiers::CMD, 'q'),
        Some(zonekeeper_platform::TapDecision::PassThrough)
    );
}

#[tokio::test(start_paused = true)]
async fn test_region_shortcut_cycles_and_commits_on_release() {
    let region = Region::new(1, "Left", 1, Rect::new(0, 0, 960, 1080))
        .with_apps(["com.app.a", "com.app.b"])
        .with_shortcut(shortcut("ctrl+option+1"));
    let mut h = Harness::start(FakeWindowSystem::new(), vec![laptop_profile(vec![region])], EngineSettings::default()).await;

    let a = h.launch("com.app.a").await;
    let b = h.launch("com.app.b").await;
    h.open(b, Rect::new(0, 0, 100, 100)).await;
    h.open(a, Rect::new(0, 0, 100, 100)).await;
    h.ws.focus_app(a);
    h.settle().await;
    h.ui_events();
    h.ws.clear_calls();

    h.ws.press_key(Modifiers::CONTROL | Modifiers::OPTION, '1');
    h.settle().await;
    assert_eq!(h.handle.status().await.unwrap().switcher_region, Some(1));
    match h.ui_events().as_slice() {
        [UiEvent::SwitcherShown { candidates, selected_index: 1, .. }] => {
            assert_eq!(candidates.len(), 2);
            assert_eq!(candidates[1].app_id, "com.app.b");
        }
        other => panic!("unexpected {:?}", other),
    }

    h.ws.set_held_modifiers(Modifiers::CONTROL);
    h.settle().await;
    assert!(!h.ws.calls_contains("activate:com.app.b"));

    h.ws.set_held_modifiers(Modifiers::NONE);
    h.settle().await;
    assert!(h.ws.calls_contains("activate:com.app.b"));
    assert_eq!(h.handle.status().await.unwrap().switcher_region, None);
    assert!(h.ui_events().contains(&UiEvent::SwitcherHidden));
}

fn two_app_region() -> Region {
    Region::new(1, "Left", 1, Rect::new(0, 0, 960, 1080)).with_apps(["com.app.a", "com.app.b"])
}

/// Starts with a and b running, a frontmost, and the call log cleared.
async fn two_app_harness() -> Harness {
    let mut h = Harness::start(FakeWindowSystem::new(), vec![laptop_profile(vec![two_app_region()])], EngineSettings::default()).await;
    let a = h.launch("com.app.a").await;
    let b = h.launch("com.app.b").await;
    h.open(b, Rect::new(0, 0, 100, 100)).await;
    h.open(a, Rect::new(0, 0, 100, 100)).await;
    h.ws.focus_app(a);
    h.settle().await;
    h.ui_events();
    h.ws.clear_calls();
    h
}

#[tokio::test(start_paused = true)]
async fn test_command_cycle_commits_on_modifier_release() {
    let mut h = two_app_harness().await;

    h.handle.cycle_focus(1, false).await.unwrap();
    h.settle().await;
    assert_eq!(h.handle.status().await.unwrap().switcher_region, Some(1));
    assert!(!h.ws.calls_contains("activate:com.app.b"));

    h.ws.set_held_modifiers(Modifiers::NONE);
    h.settle().await;
    assert!(h.ws.calls_contains("activate:com.app.b"));
    assert_eq!(h.handle.status().await.unwrap().switcher_region, None);
    assert!(h.ui_events().contains(&UiEvent::SwitcherHidden));
}

#[tokio::test(start_paused = true)]
async fn test_command_cycle_commits_after_timeout() {
    let mut h = two_app_harness().await;

    h.handle.cycle_focus(1, false).await.unwrap();
    h.settle().await;
    assert_eq!(h.handle.status().await.unwrap().switcher_region, Some(1));

    tokio::time::sleep(Duration::from_secs(1)).await;
    h.settle().await;
    assert_eq!(h.handle.status().await.unwrap().switcher_region, Some(1));

    tokio::time::sleep(Duration::from_secs(3)).await;
    h.settle().await;
    assert!(h.ws.calls_contains("activate:com.app.b"));
    assert_eq!(h.handle.status().await.unwrap().switcher_region, None);
    assert!(h.ui_events().contains(&UiEvent::SwitcherHidden));
}

#[tokio::test(start_paused = true)]
async fn test_repeated_command_cycle_restarts_timeout() {
    let mut h = two_app_harness().await;

    h.handle.cycle_focus(1, false).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    h.handle.cycle_focus(1, false).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    h.settle().await;
    assert_eq!(h.handle.status().await.unwrap().switcher_region, Some(1));

    tokio::time::sleep(Duration::from_secs(2)).await;
    h.settle().await;
    assert_eq!(h.handle.status().await.unwrap().switcher_region, None);
    assert!(h.ui_events().contains(&UiEvent::SwitcherHidden));
}

#[tokio::test(start_paused = true)]
async fn test_focus_shortcut_toggles_pin() {
    let settings = EngineSettings {
        focus_shortcut: Some(shortcut("ctrl+option+f")),
        ..EngineSettings::default()
    };
    let focus = Region::new(9, "Focus", 1, Rect::new(400, 100, 1120, 880)).as_focus_region();
    let h = Harness::start(FakeWindowSystem::new(), vec![laptop_profile(vec![left(0), focus])], settings).await;
    let pid = h.launch("com.app.other").await;
    let w = h.open(pid, Rect::new(10, 20, 300, 300)).await;
    h.ws.focus_app(pid);
    h.settle().await;

    h.ws.press_key(Modifiers::CONTROL | Modifiers::OPTION, 'f');
    h.settle().await;
    assert_eq!(h.ws.frame(w), Some(Rect::new(400, 100, 1120, 880)));
    assert!(h.handle.status().await.unwrap().focused_window.is_some());

    h.ws.press_key(Modifiers::CONTROL | Modifiers::OPTION, 'f');
    h.settle().await;
    assert_eq!(h.ws.frame(w), Some(Rect::new(10, 20, 300, 300)));
    assert!(h.handle.status().await.unwrap().focused_window.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_manual_move_releases_pin() {
    let focus = Region::new(9, "Focus", 1, Rect::new(400, 100, 1120, 880)).as_focus_region();
    let mut h = Harness::start(FakeWindowSystem::new(), vec![laptop_profile(vec![focus])], EngineSettings::default()).await;
    let pid = h.launch("com.app.other").await;
    let w = h.open(pid, Rect::new(10, 20, 300, 300)).await;
    h.ws.focus_app(pid);
    h.handle.focus_window(None).await.unwrap();
    h.ui_events();

    let moved = Rect::new(900, 600, 1120, 880);
    h.ws.drag_window(w, moved);
    tokio::time::sleep(Duration::from_millis(1200)).await;
    h.settle().await;

    assert!(h.handle.status().await.unwrap().focused_window.is_none());
    assert_eq!(h.ws.frame(w), Some(moved));
    assert!(h
        .ui_events()
        .iter()
        .any(|e| matches!(e, UiEvent::FocusReleased { restored: false, .. })));
}

#[tokio::test(start_paused = true)]
async fn test_unfocus_restores_original_frame() {
    let focus = Region::new(9, "Focus", 1, Rect::new(400, 100, 1120, 880)).as_focus_region();
    let h = Harness::start(FakeWindowSystem::new(), vec![laptop_profile(vec![focus])], EngineSettings::default()).await;
    let pid = h.launch("com.app.other").await;
    let w = h.open(pid, Rect::new(10, 20, 300, 300)).await;
    h.ws.focus_app(pid);

    h.handle.focus_window(None).await.unwrap();
    assert!(h.handle.unfocus_window().await.unwrap());
    assert_eq!(h.ws.frame(w), Some(Rect::new(10, 20, 300, 300)));
    assert!(!h.handle.unfocus_window().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_focus_without_focus_region_fails() {
    let h = Harness::start(FakeWindowSystem::new(), vec![laptop_profile(vec![left(0)])], EngineSettings::default()).await;
    let pid = h.launch("com.app.a").await;
    h.open(pid, Rect::new(0, 0, 100, 100)).await;
    h.ws.focus_app(pid);

    assert!(matches!(h.handle.focus_window(None).await, Err(EngineError::NoFocusRegion)));
}

#[tokio::test(start_paused = true)]
async fn test_confirm_before_launch_is_silent() {
    let region = Region::new(1, "Left", 1, Rect::new(0, 0, 960, 1080)).with_apps(["com.app.b"]);
    let settings = EngineSettings {
        confirm_before_launch: true,
        ..EngineSettings::default()
    };
    let h = Harness::start(FakeWindowSystem::new(), vec![laptop_profile(vec![region])], settings).await;
    h.ws.register_installed("com.app.b", "B");

    h.handle.cycle_focus(1, true).await.unwrap();
    h.settle().await;

    assert!(!h.ws.calls_contains("launch:com.app.b"));
}

#[tokio::test(start_paused = true)]
async fn test_cycle_launches_stopped_app_and_places_it() {
    let region = Region::new(1, "Left", 1, Rect::new(0, 0, 960, 1080)).with_apps(["com.app.b"]);
    let h = Harness::start(FakeWindowSystem::new(), vec![laptop_profile(vec![region])], EngineSettings::default()).await;
    h.ws.register_installed("com.app.b", "B");

    h.handle.cycle_focus(1, true).await.unwrap();
    h.settle().await;
    assert!(h.ws.calls_contains("launch:com.app.b"));

    let pid = h.ws.running_pid("com.app.b").unwrap();
    let w = h.open(pid, Rect::new(300, 300, 300, 300)).await;
    assert_eq!(h.ws.frame(w), Some(Rect::new(0, 0, 960, 1080)));
}

#[tokio::test(start_paused = true)]
async fn test_missing_window_control_is_reported_once() {
    let ws = FakeWindowSystem::new();
    ws.set_permissions(Permissions {
        window_control: false,
        key_interception: true,
    });
    let mut h = Harness::start(ws, vec![laptop_profile(vec![left(0)])], EngineSettings::default()).await;

    let pid = h.launch("com.app.a").await;
    let w = h.open(pid, Rect::new(200, 200, 640, 480)).await;
    h.ws.open_window(pid, Rect::new(200, 200, 640, 480));
    h.settle().await;

    assert_eq!(h.ws.frame(w), Some(Rect::new(200, 200, 640, 480)));
    let reports = h
        .ui_events()
        .into_iter()
        .filter(|e| *e == UiEvent::PermissionUnavailable("window control"))
        .count();
    assert_eq!(reports, 1);
}

#[tokio::test(start_paused = true)]
async fn test_missing_key_interception_degrades() {
    let ws = FakeWindowSystem::new();
    ws.set_permissions(Permissions {
        window_control: true,
        key_interception: false,
    });
    let mut h = Harness::start(ws, vec![laptop_profile(vec![left(0)])], EngineSettings::default()).await;

    assert!(!h.ws.has_key_tap());
    assert!(h
        .ui_events()
        .contains(&UiEvent::PermissionUnavailable("key interception")));

    let pid = h.launch("com.app.a").await;
    let w = h.open(pid, Rect::new(200, 200, 640, 480)).await;
    assert_eq!(h.ws.frame(w), Some(Rect::new(0, 0, 960, 1080)));
}

#[tokio::test(start_paused = true)]
async fn test_profile_commands() {
    let ws = FakeWindowSystem::with_displays(vec![builtin(), external()]);
    let h = Harness::start(ws, vec![laptop_profile(vec![left(0)]), desk_profile()], EngineSettings::default()).await;

    assert_eq!(h.handle.profiles().await.unwrap().len(), 2);
    assert_eq!(h.handle.active_profile().await.unwrap().map(|p| p.id), Some(2));

    let laptop = h.handle.set_active_profile(1).await.unwrap();
    assert!(laptop.is_active);
    assert_eq!(h.handle.active_regions().await.unwrap(), vec![left(0)]);
    let flags: Vec<bool> = h.handle.profiles().await.unwrap().iter().map(|p| p.is_active).collect();
    assert_eq!(flags, vec![true, false]);

    let selected = h.handle.auto_select_profile().await.unwrap();
    assert_eq!(selected.map(|p| p.id), Some(2));

    assert!(matches!(
        h.handle.set_active_profile(99).await,
        Err(EngineError::Core(zonekeeper_core::CoreError::ProfileNotFound(99)))
    ));
    assert_eq!(h.handle.active_profile().await.unwrap().map(|p| p.id), Some(2));
}

#[tokio::test(start_paused = true)]
async fn test_enforce_commands() {
    let h = Harness::start(FakeWindowSystem::new(), vec![laptop_profile(vec![left(5)])], EngineSettings::default()).await;
    let pid = h.launch("com.app.a").await;
    let w = h.open(pid, Rect::new(200, 200, 640, 480)).await;
    h.ws.drag_window(w, Rect::new(1, 1, 1, 1));

    let outcome = h.handle.enforce_region(1, "com.app.a").await.unwrap();
    assert!(matches!(outcome, PlacementOutcome::Applied { .. }));
    assert_eq!(h.ws.frame(w), Some(Rect::new(5, 5, 950, 1070)));

    assert!(matches!(
        h.handle.enforce_region(42, "com.app.a").await,
        Err(EngineError::RegionNotFound(42))
    ));

    h.ws.drag_window(w, Rect::new(1, 1, 1, 1));
    assert_eq!(h.handle.enforce_all_regions(None).await.unwrap(), 1);
    assert_eq!(h.ws.frame(w), Some(Rect::new(5, 5, 950, 1070)));

    let elsewhere = vec![Region::new(3, "Right", 1, Rect::new(960, 0, 960, 1080)).with_apps(["com.app.a"])];
    assert_eq!(h.handle.enforce_all_regions(Some(elsewhere)).await.unwrap(), 1);
    assert_eq!(h.ws.frame(w), Some(Rect::new(960, 0, 960, 1080)));
}

#[tokio::test(start_paused = true)]
async fn test_update_shortcuts_counts_valid_registrations() {
    let region = left(0).with_shortcut(shortcut("ctrl+1"));
    let settings = EngineSettings {
        reset_shortcut: Some(shortcut("ctrl+option+r")),
        focus_shortcut: Some(shortcut("f")),
        ..EngineSettings::default()
    };
    let h = Harness::start(FakeWindowSystem::new(), vec![laptop_profile(vec![region])], settings).await;

    assert_eq!(h.handle.update_keyboard_shortcuts().await.unwrap(), 2);
    assert_eq!(
        h.ws.press_key(Modifiers::NONE, 'f'),
        Some(zonekeeper_platform::TapDecision::PassThrough)
    );
}

#[tokio::test(start_paused = true)]
async fn test_reload_replaces_profiles() {
    let h = Harness::start(FakeWindowSystem::new(), vec![laptop_profile(vec![left(0)])], EngineSettings::default()).await;

    let mut replacement = laptop_profile(vec![left(0).with_padding(40)]);
    replacement.id = 7;
    replacement.name = "Laptop v2".to_string();
    let selected = h.handle.reload(vec![replacement], EngineSettings::default()).await.unwrap();

    assert_eq!(selected.map(|p| p.id), Some(7));
    let status = h.handle.status().await.unwrap();
    assert_eq!(status.profile_count, 1);
    assert_eq!(status.active_profile, Some((7, "Laptop v2".to_string())));
}

#[tokio::test(start_paused = true)]
async fn test_reload_with_unreadable_displays_stops_monitoring() {
    let h = Harness::start(FakeWindowSystem::new(), vec![laptop_profile(vec![left(0)])], EngineSettings::default()).await;
    let pid = h.launch("com.app.a").await;
    h.open(pid, Rect::new(200, 200, 640, 480)).await;
    assert_eq!(h.ws.subscribed_pids().len(), 1);
    assert_eq!(h.handle.status().await.unwrap().positioned_windows, 1);

    h.ws.set_fail_displays(true);
    let selected = h.handle.reload(vec![laptop_profile(vec![left(0)])], EngineSettings::default()).await.unwrap();

    assert_eq!(selected, None);
    assert!(h.ws.subscribed_pids().is_empty());
    let status = h.handle.status().await.unwrap();
    assert_eq!(status.active_profile, None);
    assert_eq!(status.positioned_windows, 0);
}

fn pinnable_profile() -> Profile {
    laptop_profile(vec![
        left(0),
        Region::new(9, "Focus", 1, Rect::new(400, 100, 1120, 880)).as_focus_region(),
    ])
}

/// Pins a window of a fresh app and drains the UI events.
async fn pinned_harness() -> Harness {
    let mut h = Harness::start(FakeWindowSystem::new(), vec![pinnable_profile()], EngineSettings::default()).await;
    let pid = h.launch("com.app.other").await;
    h.open(pid, Rect::new(10, 20, 300, 300)).await;
    h.ws.focus_app(pid);
    h.settle().await;
    h.handle.focus_window(None).await.unwrap();
    assert!(h.handle.status().await.unwrap().focused_window.is_some());
    h.ui_events();
    h
}

#[tokio::test(start_paused = true)]
async fn test_reload_reports_released_pin() {
    let mut h = pinned_harness().await;

    h.handle.reload(vec![pinnable_profile()], EngineSettings::default()).await.unwrap();

    assert_eq!(h.handle.status().await.unwrap().focused_window, None);
    assert!(h
        .ui_events()
        .iter()
        .any(|e| matches!(e, UiEvent::FocusReleased { restored: false, .. })));
}

#[tokio::test(start_paused = true)]
async fn test_profile_switch_reports_released_pin() {
    let mut h = pinned_harness().await;

    h.handle.set_active_profile(1).await.unwrap();

    assert_eq!(h.handle.status().await.unwrap().focused_window, None);
    assert!(h
        .ui_events()
        .iter()
        .any(|e| matches!(e, UiEvent::FocusReleased { restored: false, .. })));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_releases_resources() {
    let h = Harness::start(FakeWindowSystem::new(), vec![laptop_profile(vec![left(0)])], EngineSettings::default()).await;
    h.launch("com.app.a").await;
    assert!(h.ws.has_key_tap());
    assert_eq!(h.ws.subscribed_pids().len(), 1);

    h.handle.shutdown().await.unwrap();
    h.task.await.unwrap();

    assert!(!h.ws.has_key_tap());
    assert!(h.ws.subscribed_pids().is_empty());
    assert!(matches!(h.handle.status().await, Err(EngineError::Stopped)));
}
