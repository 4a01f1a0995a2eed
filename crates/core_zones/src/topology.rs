//! Display topology fingerprints.
//!
//! A topology is the set of connected displays. Its fingerprint only depends
//! on the multiset of `(built-in, resolution)` pairs, so the same monitors
//! plugged into different ports, in a different arrangement, produce the
//! same fingerprint.

use serde::{Deserialize, Serialize};

use crate::{DisplayId, Point, Profile};

/// A single connected display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayInfo {
    /// Display identifier reported by the window system.
    #[serde(default)]
    pub id: DisplayId,
    /// Horizontal resolution in pixels.
    pub width: i32,
    /// Vertical resolution in pixels.
    pub height: i32,
    /// Top-left corner in the global coordinate space. Never persisted.
    #[serde(skip)]
    pub position: Point,
    /// Whether this is the machine's built-in panel.
    #[serde(default)]
    pub is_built_in: bool,
}

impl DisplayInfo {
    pub fn new(id: DisplayId, width: i32, height: i32, is_built_in: bool) -> Self {
        Self {
            id,
            width,
            height,
            position: Point::default(),
            is_built_in,
        }
    }

    /// Set the display's position in the global coordinate space.
    pub fn at(mut self, x: i32, y: i32) -> Self {
        self.position = Point::new(x, y);
        self
    }

    fn fingerprint_part(&self) -> String {
        let kind = if self.is_built_in { "builtin" } else { "external" };
        format!("{}:{}x{}", kind, self.width, self.height)
    }
}

/// Serialized shape of a topology: only the display list is stored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TopologyRecord {
    #[serde(default)]
    displays: Vec<DisplayInfo>,
}

/// The set of displays connected at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "TopologyRecord", into = "TopologyRecord")]
pub struct DisplayTopology {
    /// Displays ordered by id.
    pub displays: Vec<DisplayInfo>,
    /// Number of displays that are not built-in.
    pub external_monitor_count: usize,
}

impl From<TopologyRecord> for DisplayTopology {
    fn from(record: TopologyRecord) -> Self {
        Self::new(record.displays)
    }
}

impl From<DisplayTopology> for TopologyRecord {
    fn from(topology: DisplayTopology) -> Self {
        Self {
            displays: topology.displays,
        }
    }
}

impl DisplayTopology {
    /// Build a topology from a display list, sorting by id for determinism.
    pub fn new(mut displays: Vec<DisplayInfo>) -> Self {
        displays.sort_by_key(|d| d.id);
        let external_monitor_count = displays.iter().filter(|d| !d.is_built_in).count();
        Self {
            displays,
            external_monitor_count,
        }
    }

    /// Canonical, position-independent summary of the display set.
    ///
    /// Built-in displays come first, then resolution ascending. Each entry is
    /// rendered as `builtin:WxH` or `external:WxH` and entries are joined by `|`.
    pub fn fingerprint(&self) -> String {
        let mut ordered: Vec<&DisplayInfo> = self.displays.iter().collect();
        ordered.sort_by_key(|d| (!d.is_built_in, d.width, d.height));
        ordered
            .iter()
            .map(|d| d.fingerprint_part())
            .collect::<Vec<_>>()
            .join("|")
    }

    /// Look up a display by id.
    pub fn display(&self, id: DisplayId) -> Option<&DisplayInfo> {
        self.displays.iter().find(|d| d.id == id)
    }
}

/// Find the profile bound to `topology`.
///
/// The first profile in stored order whose fingerprint equals the
/// topology's fingerprint wins. `None` means the caller keeps whatever
/// profile was active before.
pub fn match_profile<'a>(profiles: &'a [Profile], topology: &DisplayTopology) -> Option<&'a Profile> {
    let fingerprint = topology.fingerprint();
    profiles
        .iter()
        .find(|p| p.display_topology.fingerprint() == fingerprint)
}
