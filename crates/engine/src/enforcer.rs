//! Window placement enforcement.
//!
//! Moving a window makes some window systems emit the same notifications a
//! brand new window would. Every write therefore happens inside the
//! [`RepositionGate`], which the monitor's callbacks consult before
//! forwarding anything.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};
use zonekeeper_core::{app_region_map, Rect, Region};
use zonekeeper_platform::{PlatformError, WindowHandle, WindowKind, WindowSystem};

use crate::EngineTiming;

/// Shared "placement in progress" flag.
///
/// Counts nested placements so overlapping ones cannot reopen the gate
/// early.
#[derive(Debug, Clone, Default)]
pub struct RepositionGate(Arc<AtomicUsize>);

impl RepositionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any placement is in progress.
    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::SeqCst) > 0
    }

    /// Close the gate until the returned guard is dropped.
    pub fn enter(&self) -> GateGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        GateGuard(self.0.clone())
    }
}

/// Keeps the [`RepositionGate`] closed while alive.
#[derive(Debug)]
pub struct GateGuard(Arc<AtomicUsize>);

impl Drop for GateGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Result of a single placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementOutcome {
    /// The window is not a normal window and was left alone.
    Skipped(WindowKind),
    /// Geometry was written. `actual` is what the window system reported
    /// afterwards, which may differ from `target` when it clamps.
    Applied { target: Rect, actual: Option<Rect> },
}

impl PlacementOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, PlacementOutcome::Applied { .. })
    }
}

/// Places windows into regions.
pub struct Enforcer {
    ws: Arc<dyn WindowSystem>,
    gate: RepositionGate,
    timing: EngineTiming,
}

impl Enforcer {
    pub fn new(ws: Arc<dyn WindowSystem>, gate: RepositionGate, timing: EngineTiming) -> Self {
        Self { ws, gate, timing }
    }

    pub fn gate(&self) -> &RepositionGate {
        &self.gate
    }

    /// Move `window` into `region`.
    ///
    /// The frame is written once, position first. A clamped result is
    /// logged and left as is.
    pub async fn enforce(
        &self,
        region: &Region,
        window: WindowHandle,
    ) -> Result<PlacementOutcome, PlatformError> {
        let kind = self.ws.window_kind(window)?;
        if !kind.is_placeable() {
            debug!("Skipping {:?} window {:?}", kind, window);
            return Ok(PlacementOutcome::Skipped(kind));
        }

        let target = region.target_frame();
        if target.is_degenerate() {
            warn!(
                "Region '{}' has padding {} larger than its frame; target is {:?}",
                region.name, region.padding, target
            );
        }

        let _guard = self.gate.enter();
        let written = self.ws.set_frame(window, target);

        tokio::time::sleep(self.timing.settle_delay).await;
        let actual = match written {
            Ok(()) => self.ws.get_frame(window).ok(),
            Err(_) => None,
        };
        tokio::time::sleep(self.timing.suppression_tail).await;

        written?;
        match actual {
            Some(actual) if actual != target => debug!(
                "Window {:?} settled at {:?} instead of {:?} in region '{}'",
                window, actual, target, region.name
            ),
            _ => debug!("Placed window {:?} in region '{}'", window, region.name),
        }
        Ok(PlacementOutcome::Applied { target, actual })
    }

    /// Place the frontmost window of every running app assigned to one of
    /// `regions`. An app listed in several regions goes to the last one.
    ///
    /// Failures are logged per window; the rest still get placed.
    pub async fn enforce_all(
        &self,
        regions: &[Region],
    ) -> Vec<(WindowHandle, PlacementOutcome)> {
        let map = app_region_map(regions);
        if map.is_empty() {
            return Vec::new();
        }

        let running = match self.ws.running_applications() {
            Ok(apps) => apps,
            Err(e) => {
                warn!("Cannot enumerate applications: {}", e);
                return Vec::new();
            }
        };

        let mut placed = Vec::new();
        for app in running {
            let Some(region) = map.get(&app.app_id) else {
                continue;
            };
            let window = match self.ws.frontmost_window(app.pid) {
                Ok(Some(window)) => window,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Cannot find a window for {}: {}", app.app_id, e);
                    continue;
                }
            };
            match self.enforce(region, window).await {
                Ok(outcome) => placed.push((window, outcome)),
                Err(e) => warn!("Failed to place {} in '{}': {}", app.app_id, region.name, e),
            }
        }
        placed
    }
}

#[cfg(test)]
mod tests {
    use zonekeeper_platform::fake::FakeWindowSystem;

    use super::*;

    fn setup() -> (Arc<FakeWindowSystem>, Enforcer) {
        let ws = Arc::new(FakeWindowSystem::new());
        let enforcer = Enforcer::new(ws.clone(), RepositionGate::new(), EngineTiming::default());
        (ws, enforcer)
    }

    fn left() -> Region {
        Region::new(1, "Left", 1, Rect::new(0, 0, 960, 1080)).with_apps(["com.app.a"])
    }

    #[test]
    fn test_gate_counts_nested_guards() {
        let gate = RepositionGate::new();
        assert!(!gate.is_active());
        let a = gate.enter();
        let b = gate.clone().enter();
        drop(a);
        assert!(gate.is_active());
        drop(b);
        assert!(!gate.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_enforce_applies_padding() {
        let (ws, enforcer) = setup();
        let pid = ws.spawn_app("com.app.a", "A");
        let w = ws.open_window(pid, Rect::new(300, 300, 400, 400));

        let outcome = enforcer.enforce(&left().with_padding(10), w).await.unwrap();

        let expected = Rect::new(10, 10, 940, 1060);
        assert_eq!(outcome, PlacementOutcome::Applied { target: expected, actual: Some(expected) });
        assert_eq!(ws.frame(w), Some(expected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_enforce_is_idempotent() {
        let (ws, enforcer) = setup();
        let pid = ws.spawn_app("com.app.a", "A");
        let w = ws.open_window(pid, Rect::new(300, 300, 400, 400));

        let first = enforcer.enforce(&left(), w).await.unwrap();
        let second = enforcer.enforce(&left(), w).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(ws.frame(w), Some(Rect::new(0, 0, 960, 1080)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_enforce_skips_dialogs() {
        let (ws, enforcer) = setup();
        let pid = ws.spawn_app("com.app.a", "A");
        let w = ws.open_window_of_kind(pid, Rect::new(5, 5, 50, 50), WindowKind::Dialog);
        ws.clear_calls();

        let outcome = enforcer.enforce(&left(), w).await.unwrap();
        assert_eq!(outcome, PlacementOutcome::Skipped(WindowKind::Dialog));
        assert!(ws.calls().is_empty());
        assert_eq!(ws.frame(w), Some(Rect::new(5, 5, 50, 50)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_enforce_accepts_clamped_size_without_retry() {
        let (ws, enforcer) = setup();
        let pid = ws.spawn_app("com.app.a", "A");
        let w = ws.open_window(pid, Rect::new(0, 0, 100, 100));
        ws.set_max_size(Some((800, 600)));
        ws.clear_calls();

        let outcome = enforcer.enforce(&left(), w).await.unwrap();
        assert_eq!(
            outcome,
            PlacementOutcome::Applied {
                target: Rect::new(0, 0, 960, 1080),
                actual: Some(Rect::new(0, 0, 800, 600)),
            }
        );
        assert_eq!(ws.calls(), vec!["set_position", "set_size"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_is_held_during_placement() {
        let (ws, enforcer) = setup();
        let pid = ws.spawn_app("com.app.a", "A");
        let w = ws.open_window(pid, Rect::new(0, 0, 100, 100));
        let gate = enforcer.gate().clone();

        let region = left();
        let placing = enforcer.enforce(&region, w);
        tokio::pin!(placing);
        tokio::select! {
            _ = &mut placing => panic!("placement finished without sleeping"),
            _ = tokio::time::sleep(std::time::Duration::from_millis(250)) => {}
        }
        assert!(gate.is_active());
        placing.await.unwrap();
        assert!(!gate.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_geometry_failure_is_reported_and_gate_reopens() {
        let (ws, enforcer) = setup();
        let pid = ws.spawn_app("com.app.a", "A");
        let w = ws.open_window(pid, Rect::new(0, 0, 100, 100));
        ws.set_fail_geometry(true);

        assert!(enforcer.enforce(&left(), w).await.is_err());
        assert!(!enforcer.gate().is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_enforce_all_last_region_wins() {
        let (ws, enforcer) = setup();
        let a = ws.spawn_app("com.app.a", "A");
        let b = ws.spawn_app("com.app.b", "B");
        let wa = ws.open_window(a, Rect::new(0, 0, 100, 100));
        let wb = ws.open_window(b, Rect::new(0, 0, 100, 100));
        ws.spawn_app("com.app.unassigned", "U");

        let regions = vec![
            Region::new(1, "Left", 1, Rect::new(0, 0, 960, 1080)).with_apps(["com.app.a", "com.app.b"]),
            Region::new(2, "Right", 1, Rect::new(960, 0, 960, 1080)).with_apps(["com.app.b"]),
        ];
        let placed = enforcer.enforce_all(&regions).await;

        assert_eq!(placed.len(), 2);
        assert_eq!(ws.frame(wa), Some(Rect::new(0, 0, 960, 1080)));
        assert_eq!(ws.frame(wb), Some(Rect::new(960, 0, 960, 1080)));
    }
}
