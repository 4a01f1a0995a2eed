//! Keyboard shortcuts.
//!
//! Shortcuts are written as `modifier+modifier+key`, e.g. `cmd+shift+r`.
//! Matching is tolerant of extra held modifiers: only the configured subset
//! has to be down.

use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::CoreError;

/// A single modifier key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modifier {
    /// Command on macOS, the Windows key elsewhere.
    Cmd,
    Shift,
    /// Option on macOS, Alt elsewhere.
    Option,
    Control,
}

impl Modifier {
    const ALL: [Modifier; 4] = [Modifier::Control, Modifier::Option, Modifier::Shift, Modifier::Cmd];

    fn bit(self) -> u8 {
        match self {
            Modifier::Cmd => 0b0001,
            Modifier::Shift => 0b0010,
            Modifier::Option => 0b0100,
            Modifier::Control => 0b1000,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Modifier::Cmd => "cmd",
            Modifier::Shift => "shift",
            Modifier::Option => "option",
            Modifier::Control => "control",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "cmd" | "command" | "win" | "super" | "meta" => Some(Modifier::Cmd),
            "shift" => Some(Modifier::Shift),
            "option" | "opt" | "alt" => Some(Modifier::Option),
            "ctrl" | "control" => Some(Modifier::Control),
            _ => None,
        }
    }
}

/// An unordered set of modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Modifiers(u8);

impl Modifiers {
    pub const NONE: Modifiers = Modifiers(0);
    pub const CMD: Modifiers = Modifiers(0b0001);
    pub const SHIFT: Modifiers = Modifiers(0b0010);
    pub const OPTION: Modifiers = Modifiers(0b0100);
    pub const CONTROL: Modifiers = Modifiers(0b1000);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether every modifier in `other` is also in `self`.
    pub fn contains(self, other: Modifiers) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, modifier: Modifier) {
        self.0 |= modifier.bit();
    }

    pub fn has(self, modifier: Modifier) -> bool {
        self.0 & modifier.bit() != 0
    }

    /// Iterate the modifiers in canonical order (control, option, shift, cmd).
    pub fn iter(self) -> impl Iterator<Item = Modifier> {
        Modifier::ALL.into_iter().filter(move |m| self.has(*m))
    }
}

impl BitOr for Modifiers {
    type Output = Modifiers;

    fn bitor(self, rhs: Self) -> Self::Output {
        Modifiers(self.0 | rhs.0)
    }
}

impl From<Modifier> for Modifiers {
    fn from(modifier: Modifier) -> Self {
        Modifiers(modifier.bit())
    }
}

/// A modifier chord plus a single character key.
///
/// Equality ignores the case of the key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyboardShortcut {
    pub modifiers: Modifiers,
    pub key: char,
}

impl KeyboardShortcut {
    /// Create a shortcut. At least one modifier is required so that plain
    /// typing is never hijacked.
    pub fn new(modifiers: Modifiers, key: char) -> Result<Self, CoreError> {
        let shortcut = Self { modifiers, key };
        shortcut.validate()?;
        Ok(shortcut)
    }

    /// Reject shortcuts without modifiers.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.modifiers.is_empty() {
            return Err(CoreError::ShortcutWithoutModifiers(self.key));
        }
        Ok(())
    }

    /// Whether a key press with `pressed` modifiers and `key` triggers this shortcut.
    ///
    /// Every configured modifier must be held; extra modifiers are tolerated.
    pub fn matches(&self, pressed: Modifiers, key: char) -> bool {
        pressed.contains(self.modifiers) && keys_equal(self.key, key)
    }
}

fn keys_equal(a: char, b: char) -> bool {
    a.to_lowercase().eq(b.to_lowercase())
}

impl PartialEq for KeyboardShortcut {
    fn eq(&self, other: &Self) -> bool {
        self.modifiers == other.modifiers && keys_equal(self.key, other.key)
    }
}

impl Eq for KeyboardShortcut {}

impl fmt::Display for KeyboardShortcut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for m in self.modifiers.iter() {
            write!(f, "{}+", m.name())?;
        }
        write!(f, "{}", self.key.to_lowercase())
    }
}

impl FromStr for KeyboardShortcut {
    type Err = CoreError;

    /// Parse `cmd+shift+r`. A shortcut without modifiers parses; it is
    /// rejected later, when it is registered.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('+').map(str::trim).collect();
        let Some((key_part, modifier_parts)) = parts.split_last() else {
            return Err(CoreError::InvalidShortcut(s.to_string()));
        };

        let mut chars = key_part.chars();
        let key = match (chars.next(), chars.next()) {
            (Some(c), None) => c,
            _ => return Err(CoreError::InvalidShortcut(s.to_string())),
        };

        let mut modifiers = Modifiers::NONE;
        for part in modifier_parts {
            let m = Modifier::parse(part).ok_or_else(|| CoreError::InvalidShortcut(s.to_string()))?;
            modifiers.insert(m);
        }

        Ok(Self { modifiers, key })
    }
}

impl TryFrom<String> for KeyboardShortcut {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<KeyboardShortcut> for String {
    fn from(shortcut: KeyboardShortcut) -> Self {
        shortcut.to_string()
    }
}
