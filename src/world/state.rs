use crate::entities::item::{ItemInfo, Serial};
use crate::world::position::{DropPoint, Position};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

/// Read access to the client's view of the world.
///
/// Every lookup may miss at any time: items leave the world between a scan
/// and the frame that acts on it.
pub trait WorldLookup: Send + Sync {
    fn item(&self, serial: Serial) -> Option<ItemInfo>;

    /// Direct children of `container`, in stable order.
    fn contents(&self, container: Serial) -> Vec<ItemInfo>;

    /// Items lying on the ground within `radius` tiles of `center`.
    fn ground_items_within(&self, center: Position, radius: u32) -> Vec<ItemInfo>;

    fn player_position(&self) -> Position;

    fn player_backpack(&self) -> Option<Serial>;

    /// Container of the currently open secure-trade window, if any.
    fn trade_container(&self) -> Option<Serial>;

    /// Walks up the container chain to the outermost item on the ground.
    fn root_item(&self, item: &ItemInfo) -> Option<ItemInfo> {
        let mut current = item.clone();
        // Bounded walk; malformed parent cycles must not hang a frame.
        for _ in 0..32 {
            match current.container {
                None => return Some(current),
                Some(parent) => current = self.item(parent)?,
            }
        }
        None
    }

    /// Distance from the player to wherever `item` physically is. Items
    /// carried by the player (parent chain ends at a non-world serial) have
    /// no distance.
    fn distance_to_player(&self, item: &ItemInfo) -> Option<u32> {
        let root = self.root_item(item)?;
        Some(self.player_position().distance(root.position))
    }
}

#[derive(Debug, Default)]
struct WorldInner {
    items: BTreeMap<Serial, ItemInfo>,
    player_position: Position,
    backpack: Option<Serial>,
    trade_container: Option<Serial>,
}

/// In-memory world model used by the replay binary and by tests.
#[derive(Debug, Default)]
pub struct WorldState {
    inner: RwLock<WorldInner>,
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, item: ItemInfo) {
        self.write(|inner| {
            inner.items.insert(item.serial, item);
        });
    }

    /// Removes the item and everything nested inside it.
    pub fn remove(&self, serial: Serial) -> Option<ItemInfo> {
        self.write(|inner| {
            let removed = inner.items.remove(&serial)?;
            let mut pending = vec![serial];
            while let Some(parent) = pending.pop() {
                let children: Vec<Serial> = inner
                    .items
                    .values()
                    .filter(|child| child.container == Some(parent))
                    .map(|child| child.serial)
                    .collect();
                for child in children {
                    inner.items.remove(&child);
                    pending.push(child);
                }
            }
            Some(removed)
        })
    }

    pub fn len(&self) -> usize {
        self.read(|inner| inner.items.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_player_position(&self, position: Position) {
        self.write(|inner| inner.player_position = position);
    }

    pub fn set_backpack(&self, backpack: Option<Serial>) {
        self.write(|inner| inner.backpack = backpack);
    }

    pub fn set_trade_container(&self, container: Option<Serial>) {
        self.write(|inner| inner.trade_container = container);
    }

    /// Applies a completed drop the way the server would echo it back.
    pub fn apply_drop(&self, serial: Serial, point: DropPoint, destination: Serial) -> bool {
        self.write(|inner| {
            let target_exists = inner.items.contains_key(&destination);
            let Some(item) = inner.items.get_mut(&serial) else {
                return false;
            };
            if destination.is_assigned() {
                if !target_exists {
                    return false;
                }
                item.container = Some(destination);
                if !point.is_default() {
                    item.position = Position::new(point.x, point.y, point.z);
                }
            } else {
                item.container = None;
                item.position = Position::new(point.x, point.y, point.z);
            }
            true
        })
    }

    fn read<T>(&self, f: impl FnOnce(&WorldInner) -> T) -> T {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write<T>(&self, f: impl FnOnce(&mut WorldInner) -> T) -> T {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

impl WorldLookup for WorldState {
    fn item(&self, serial: Serial) -> Option<ItemInfo> {
        self.read(|inner| inner.items.get(&serial).cloned())
    }

    fn contents(&self, container: Serial) -> Vec<ItemInfo> {
        self.read(|inner| {
            inner
                .items
                .values()
                .filter(|item| item.container == Some(container))
                .cloned()
                .collect()
        })
    }

    fn ground_items_within(&self, center: Position, radius: u32) -> Vec<ItemInfo> {
        self.read(|inner| {
            inner
                .items
                .values()
                .filter(|item| item.on_ground() && item.position.distance(center) <= radius)
                .cloned()
                .collect()
        })
    }

    fn player_position(&self) -> Position {
        self.read(|inner| inner.player_position)
    }

    fn player_backpack(&self) -> Option<Serial> {
        self.read(|inner| inner.backpack)
    }

    fn trade_container(&self) -> Option<Serial> {
        self.read(|inner| inner.trade_container)
    }
}
