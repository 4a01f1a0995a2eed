//! Zonekeeper Core Model
//!
//! Platform-agnostic data model for region-based window placement.
//!
//! This crate holds everything the placement engine reasons about without
//! touching the operating system:
//! - Screen geometry ([`Rect`], [`Point`])
//! - Display topology fingerprints and profile matching ([`topology`])
//! - Regions, profiles and the exclusive active-profile transition ([`profile`])
//! - Keyboard shortcuts and modifier matching ([`shortcut`])
//! - The per-region app switcher state machine ([`switcher`])

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod profile;
pub mod shortcut;
pub mod switcher;
pub mod topology;

pub use profile::{app_region_map, Profile, ProfileId, ProfileSet, Region, RegionId};
pub use shortcut::{KeyboardShortcut, Modifier, Modifiers};
pub use switcher::{build_candidates, Candidate, FocusCycle, SwitcherState, SwitcherStep};
pub use topology::{match_profile, DisplayInfo, DisplayTopology};

/// Stable identifier for a window, as resolved by the window-system adapter.
pub type WindowId = u64;

/// Identifier of a physical display.
pub type DisplayId = u32;

/// Application identifier (bundle id on macOS, executable name on Windows).
pub type AppId = String;

/// Errors raised while building or validating model values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("Keyboard shortcut for key '{0}' has no modifiers")]
    ShortcutWithoutModifiers(char),

    #[error("Invalid keyboard shortcut string: {0}")]
    InvalidShortcut(String),

    #[error("Profile {0} not found")]
    ProfileNotFound(ProfileId),
}

/// A point in screen coordinates (pixels, top-left origin).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// A rectangle in screen coordinates (pixels, top-left origin).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    /// Create a new rectangle.
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Top-left corner.
    pub fn origin(&self) -> Point {
        Point::new(self.x, self.y)
    }

    /// Shrink every side by `padding`.
    ///
    /// No clamping happens: a padding larger than half the width or height
    /// yields a non-positive dimension, which callers report as a
    /// configuration problem.
    pub fn inset(&self, padding: i32) -> Self {
        Self {
            x: self.x + padding,
            y: self.y + padding,
            width: self.width - padding * 2,
            height: self.height - padding * 2,
        }
    }

    /// Whether the rectangle has a non-positive width or height.
    pub fn is_degenerate(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Manhattan distance between the origins of two rectangles.
    pub fn origin_distance(&self, other: &Rect) -> i32 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }
}
