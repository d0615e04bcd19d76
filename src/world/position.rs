use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: u16,
    pub y: u16,
    #[serde(default)]
    pub z: i8,
}

impl Position {
    pub fn new(x: u16, y: u16, z: i8) -> Self {
        Self { x, y, z }
    }

    /// Tile distance as the server measures range: the larger axis delta.
    pub fn distance(self, other: Position) -> u32 {
        let dx = (i32::from(self.x) - i32::from(other.x)).unsigned_abs();
        let dy = (i32::from(self.y) - i32::from(other.y)).unsigned_abs();
        dx.max(dy)
    }

    pub fn offset(self, dx: i16, dy: i16) -> Option<Self> {
        let x = i32::from(self.x) + i32::from(dx);
        let y = i32::from(self.y) + i32::from(dy);
        if x < 0 || y < 0 || x > i32::from(u16::MAX) || y > i32::from(u16::MAX) {
            return None;
        }
        Some(Self {
            x: x as u16,
            y: y as u16,
            z: self.z,
        })
    }
}

/// Where a dropped item lands. `DEFAULT` asks the server to pick a slot
/// inside the destination container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DropPoint {
    pub x: u16,
    pub y: u16,
    pub z: i8,
}

impl DropPoint {
    pub const DEFAULT: DropPoint = DropPoint {
        x: 0xFFFF,
        y: 0xFFFF,
        z: 0,
    };

    pub fn new(x: u16, y: u16, z: i8) -> Self {
        Self { x, y, z }
    }

    pub fn is_default(self) -> bool {
        self == Self::DEFAULT
    }
}

impl Default for DropPoint {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<Position> for DropPoint {
    fn from(position: Position) -> Self {
        Self {
            x: position.x,
            y: position.y,
            z: position.z,
        }
    }
}
