//! Regions and profiles.
//!
//! A [`Profile`] is a named set of [`Region`]s bound to a display topology.
//! At most one profile is active at a time; activation is runtime state and
//! is never persisted.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{AppId, CoreError, DisplayId, DisplayTopology, KeyboardShortcut, Rect};

/// Unique identifier for a profile.
pub type ProfileId = u64;

/// Unique identifier for a region.
pub type RegionId = u64;

/// A named, padded rectangle on a display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: RegionId,
    pub name: String,
    /// Display the region was drawn on.
    #[serde(default)]
    pub display_id: DisplayId,
    /// Applications placed into this region, in configured order.
    #[serde(default)]
    pub assigned_apps: Vec<AppId>,
    /// Shortcut cycling focus between the assigned applications.
    #[serde(default)]
    pub keyboard_shortcut: Option<KeyboardShortcut>,
    /// Inset applied on every side of `frame`.
    #[serde(default)]
    pub padding: i32,
    /// Whether this region pins arbitrary windows instead of assigned apps.
    #[serde(default)]
    pub is_focus_region: bool,
    /// Region bounds in the adapter's coordinate space.
    pub frame: Rect,
}

impl Region {
    pub fn new(id: RegionId, name: impl Into<String>, display_id: DisplayId, frame: Rect) -> Self {
        Self {
            id,
            name: name.into(),
            display_id,
            frame,
            assigned_apps: Vec::new(),
            keyboard_shortcut: None,
            padding: 0,
            is_focus_region: false,
        }
    }

    pub fn with_apps<I, S>(mut self, apps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<AppId>,
    {
        self.assigned_apps = apps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_padding(mut self, padding: i32) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_shortcut(mut self, shortcut: KeyboardShortcut) -> Self {
        self.keyboard_shortcut = Some(shortcut);
        self
    }

    pub fn as_focus_region(mut self) -> Self {
        self.is_focus_region = true;
        self
    }

    /// The rectangle windows are placed into: `frame` inset by `padding`.
    pub fn target_frame(&self) -> Rect {
        self.frame.inset(self.padding)
    }

    pub fn is_assigned(&self, app_id: &str) -> bool {
        self.assigned_apps.iter().any(|a| a == app_id)
    }
}

/// A named set of regions bound to one display topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    pub name: String,
    /// Topology this profile applies to (only its fingerprint matters).
    #[serde(default)]
    pub display_topology: DisplayTopology,
    #[serde(default)]
    pub regions: Vec<Region>,
    /// Runtime-only activation flag.
    #[serde(skip)]
    pub is_active: bool,
}

impl Profile {
    pub fn new(id: ProfileId, name: impl Into<String>, display_topology: DisplayTopology) -> Self {
        Self {
            id,
            name: name.into(),
            display_topology,
            regions: Vec::new(),
            is_active: false,
        }
    }

    pub fn with_region(mut self, region: Region) -> Self {
        self.regions.push(region);
        self
    }

    /// Union of every region's assigned apps, first occurrence order.
    pub fn assigned_app_ids(&self) -> Vec<AppId> {
        let mut ids: Vec<AppId> = Vec::new();
        for app in self.regions.iter().flat_map(|r| r.assigned_apps.iter()) {
            if !ids.contains(app) {
                ids.push(app.clone());
            }
        }
        ids
    }

    /// Region an application is placed into.
    ///
    /// When an app is assigned to several regions the last one wins, the
    /// same rule [`app_region_map`] applies.
    pub fn region_for_app(&self, app_id: &str) -> Option<&Region> {
        self.regions.iter().rev().find(|r| r.is_assigned(app_id))
    }

    pub fn region(&self, id: RegionId) -> Option<&Region> {
        self.regions.iter().find(|r| r.id == id)
    }

    /// The first region flagged as the focus region.
    pub fn focus_region(&self) -> Option<&Region> {
        self.regions.iter().find(|r| r.is_focus_region)
    }
}

/// Build an identifier → region map; later regions overwrite earlier ones.
pub fn app_region_map(regions: &[Region]) -> HashMap<AppId, &Region> {
    let mut map = HashMap::new();
    for region in regions {
        for app in &region.assigned_apps {
            map.insert(app.clone(), region);
        }
    }
    map
}

/// Ordered profiles with an exclusive active flag.
#[derive(Debug, Clone, Default)]
pub struct ProfileSet {
    profiles: Vec<Profile>,
}

impl ProfileSet {
    /// Create a set; every profile starts inactive.
    pub fn new(mut profiles: Vec<Profile>) -> Self {
        for p in &mut profiles {
            p.is_active = false;
        }
        Self { profiles }
    }

    pub fn profiles(&self) -> &[Profile] {
        &self.profiles
    }

    pub fn get(&self, id: ProfileId) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    pub fn active(&self) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.is_active)
    }

    pub fn active_id(&self) -> Option<ProfileId> {
        self.active().map(|p| p.id)
    }

    /// Mark `id` active and every other profile inactive.
    pub fn activate(&mut self, id: ProfileId) -> Result<&Profile, CoreError> {
        if !self.profiles.iter().any(|p| p.id == id) {
            return Err(CoreError::ProfileNotFound(id));
        }
        for p in &mut self.profiles {
            p.is_active = p.id == id;
        }
        self.active().ok_or(CoreError::ProfileNotFound(id))
    }

    /// Replace every profile. All replacements start inactive.
    pub fn replace(&mut self, profiles: Vec<Profile>) {
        *self = Self::new(profiles);
    }
}
