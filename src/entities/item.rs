use serde::{Deserialize, Serialize};
use std::fmt;

use crate::world::position::Position;

/// Stable server-assigned identity of one item instance.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Serial(pub u32);

impl Serial {
    pub const NONE: Serial = Serial(0);

    pub fn is_assigned(self) -> bool {
        self.0 != 0
    }

    /// Accepts `0x`-prefixed hex or plain decimal.
    pub fn parse(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        let parsed = match trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => trimmed.parse::<u32>().ok()?,
        };
        Some(Serial(parsed))
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// Rule graphic value meaning "any graphic".
pub const ANY_GRAPHIC: i32 = -1;

/// Rule hue value meaning "any hue".
pub const ANY_HUE: u16 = u16::MAX;

pub fn graphic_matches(rule_graphic: i32, graphic: u16) -> bool {
    rule_graphic == ANY_GRAPHIC || rule_graphic == i32::from(graphic)
}

pub fn hue_matches(rule_hue: u16, hue: u16) -> bool {
    rule_hue == ANY_HUE || rule_hue == hue
}

/// Snapshot of an item as the world currently knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemInfo {
    pub serial: Serial,
    pub graphic: u16,
    #[serde(default)]
    pub hue: u16,
    #[serde(default = "default_amount")]
    pub amount: u16,
    /// Immediate parent container; `None` when the item lies on the ground.
    #[serde(default)]
    pub container: Option<Serial>,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub is_corpse: bool,
    #[serde(default)]
    pub is_human_corpse: bool,
    #[serde(default)]
    pub is_locked: bool,
    /// Static tile height from the item data; 0 when the item defines none.
    #[serde(default)]
    pub height: u8,
}

fn default_amount() -> u16 {
    1
}

impl ItemInfo {
    pub fn new(serial: Serial, graphic: u16) -> Self {
        Self {
            serial,
            graphic,
            hue: 0,
            amount: 1,
            container: None,
            position: Position::default(),
            is_corpse: false,
            is_human_corpse: false,
            is_locked: false,
            height: 0,
        }
    }

    pub fn with_hue(mut self, hue: u16) -> Self {
        self.hue = hue;
        self
    }

    pub fn with_amount(mut self, amount: u16) -> Self {
        self.amount = amount;
        self
    }

    pub fn inside(mut self, container: Serial) -> Self {
        self.container = Some(container);
        self
    }

    pub fn at(mut self, position: Position) -> Self {
        self.container = None;
        self.position = position;
        self
    }

    pub fn corpse(mut self, human: bool) -> Self {
        self.is_corpse = true;
        self.is_human_corpse = human;
        self
    }

    pub fn on_ground(&self) -> bool {
        self.container.is_none()
    }
}

/// Display name plus tooltip property text received from the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemProperties {
    pub name: String,
    pub properties: String,
}

impl ItemProperties {
    pub fn new(name: impl Into<String>, properties: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: properties.into(),
        }
    }

    /// Text the loot regex is evaluated against.
    pub fn searchable_text(&self) -> String {
        if self.properties.is_empty() {
            return self.name.clone();
        }
        format!("{}\n{}", self.name, self.properties)
    }
}
