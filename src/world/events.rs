use crate::entities::item::Serial;
use crate::world::position::Position;

/// Notifications from the network layer that can make an item lootable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorldEvent {
    ItemCreated(Serial),
    ItemUpdated(Serial),
    ContainerOpened(Serial),
    PropertiesReceived(Serial),
    /// Periodic player position report, drives ground scavenging.
    PositionChanged(Position),
}
