use crate::automation::autoloot::LootRule;
use crate::automation::organizer::OrganizerConfig;
use crate::automation::selection::Destination;
use crate::dispatch::queue::MoveRequest;
use crate::entities::item::{ItemInfo, ItemProperties, Serial};
use crate::error::FixtureError;
use crate::session::Session;
use crate::world::events::WorldEvent;
use crate::world::position::Position;
use crate::world::properties::PropertyCache;
use crate::world::state::WorldState;
use serde::Deserialize;
use std::path::Path;
use std::sync::atomic::Ordering;

fn default_frames() -> u64 {
    200
}

fn default_frame_ms() -> u64 {
    50
}

/// Scripted world and user actions replayed by the binary.
#[derive(Debug, Clone, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub player: Position,
    #[serde(default)]
    pub backpack: Option<Serial>,
    #[serde(default)]
    pub trade_container: Option<Serial>,
    #[serde(default)]
    pub items: Vec<ItemInfo>,
    /// When present these replace whatever the rule store holds.
    #[serde(default)]
    pub loot_rules: Option<Vec<LootRule>>,
    #[serde(default)]
    pub organizers: Option<Vec<OrganizerConfig>>,
    #[serde(default)]
    pub script: Vec<ScriptStep>,
    #[serde(default = "default_frames")]
    pub frames: u64,
    #[serde(default = "default_frame_ms")]
    pub frame_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptStep {
    /// Milliseconds since replay start.
    pub at: u64,
    #[serde(flatten)]
    pub action: ScriptAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "do", rename_all = "snake_case")]
pub enum ScriptAction {
    ItemCreated { serial: Serial },
    ContainerOpened { serial: Serial },
    PositionChanged { position: Position },
    Properties {
        serial: Serial,
        name: String,
        #[serde(default)]
        properties: String,
    },
    Select { serials: Vec<Serial> },
    Toggle { serial: Serial },
    MoveToContainer { serial: Serial },
    MoveToGround { position: Position },
    MoveToTrade,
    CancelSelection,
    Organize { name: String },
    OrganizeAll,
    LootContainer { serial: Serial },
    HoldCursor { holding: bool },
    ClearLoot,
}

impl ScriptAction {
    pub fn destination(&self) -> Option<Destination> {
        match self {
            ScriptAction::MoveToContainer { serial } => Some(Destination::Container(*serial)),
            ScriptAction::MoveToGround { position } => Some(Destination::Ground(*position)),
            _ => None,
        }
    }

    /// Tooltip payload for `Properties` steps.
    pub fn properties(&self) -> Option<(Serial, ItemProperties)> {
        match self {
            ScriptAction::Properties {
                serial,
                name,
                properties,
            } => Some((*serial, ItemProperties::new(name.clone(), properties.clone()))),
            _ => None,
        }
    }
}

impl Fixture {
    pub fn load(path: &Path) -> Result<Self, FixtureError> {
        let data = std::fs::read_to_string(path).map_err(|source| FixtureError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&data).map_err(|source| FixtureError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(data: &str) -> Result<Self, serde_yaml::Error> {
        let mut fixture: Fixture = serde_yaml::from_str(data)?;
        fixture.script.sort_by_key(|step| step.at);
        Ok(fixture)
    }

    pub fn build_world(&self) -> WorldState {
        let world = WorldState::new();
        world.set_player_position(self.player);
        world.set_backpack(self.backpack);
        world.set_trade_container(self.trade_container);
        for item in &self.items {
            world.insert(item.clone());
        }
        world
    }
}

/// A move the session sent during replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayDispatch {
    pub at: u64,
    pub request: MoveRequest,
}

/// Runs `fixture.frames` session ticks, applying each script step on the
/// first frame at or after its time. `world` and `properties` must be the
/// instances the session was built on.
pub fn replay(
    fixture: &Fixture,
    world: &WorldState,
    properties: &PropertyCache,
    session: &mut Session,
) -> Vec<ReplayDispatch> {
    let events = session.autoloot().subscriber();
    let mut steps = fixture.script.iter().peekable();
    let mut dispatched = Vec::new();

    for frame in 0..fixture.frames {
        let now = frame.saturating_mul(fixture.frame_ms);
        while let Some(step) = steps.next_if(|step| step.at <= now) {
            tracing::debug!(target: "lootkit", at = step.at, action = ?step.action, "script step");
            let event = apply(&step.action, world, properties, session);
            if let Some(event) = event {
                if events.send(event).is_err() {
                    tracing::warn!(target: "lootkit", "auto-loot event channel closed");
                }
            }
        }
        for serial in properties.take_requests() {
            tracing::debug!(target: "lootkit", %serial, "tooltip requested");
        }
        if let Some(request) = session.tick(now).dispatched() {
            dispatched.push(ReplayDispatch { at: now, request });
        }
    }
    dispatched
}

fn apply(
    action: &ScriptAction,
    world: &WorldState,
    properties: &PropertyCache,
    session: &Session,
) -> Option<WorldEvent> {
    if let Some(destination) = action.destination() {
        session.selection().set_destination(destination);
        return None;
    }
    if let Some((serial, props)) = action.properties() {
        properties.insert(serial, props);
        return Some(WorldEvent::PropertiesReceived(serial));
    }
    match action {
        ScriptAction::ItemCreated { serial } => return Some(WorldEvent::ItemCreated(*serial)),
        ScriptAction::ContainerOpened { serial } => {
            return Some(WorldEvent::ContainerOpened(*serial))
        }
        ScriptAction::PositionChanged { position } => {
            world.set_player_position(*position);
            return Some(WorldEvent::PositionChanged(*position));
        }
        ScriptAction::Select { serials } => {
            session.selection().select_many(serials.iter().copied());
        }
        ScriptAction::Toggle { serial } => {
            session.selection().toggle_select(*serial);
        }
        ScriptAction::MoveToTrade => {
            if !session.selection().set_trade_destination() {
                tracing::warn!(target: "lootkit::selection", "no trade window open");
            }
        }
        ScriptAction::CancelSelection => {
            session.selection().cancel();
        }
        ScriptAction::Organize { name } => {
            session.organizer().run(name);
        }
        ScriptAction::OrganizeAll => {
            session.organizer().run_all();
        }
        ScriptAction::LootContainer { serial } => {
            session.autoloot().loot_container(*serial);
        }
        ScriptAction::HoldCursor { holding } => {
            session.cursor_flag().store(*holding, Ordering::Release);
        }
        ScriptAction::ClearLoot => {
            session.autoloot().clear();
        }
        ScriptAction::Properties { .. }
        | ScriptAction::MoveToContainer { .. }
        | ScriptAction::MoveToGround { .. } => {}
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::state::WorldLookup;

    const SAMPLE: &str = r#"
player: { x: 100, y: 100 }
backpack: 1073741825
items:
  - { serial: 1073741825, graphic: 3701, container: 5 }
  - { serial: 1073742080, graphic: 8198, is_corpse: true, position: { x: 101, y: 100 } }
  - { serial: 1073742081, graphic: 3821, amount: 120, container: 1073742080 }
loot_rules:
  - { graphic: 3821, name: gold }
script:
  - { at: 500, do: select, serials: [1073742081] }
  - { at: 0, do: container_opened, serial: 1073742080 }
  - { at: 700, do: move_to_ground, position: { x: 90, y: 91, z: 2 } }
  - { at: 900, do: move_to_trade }
frames: 40
"#;

    #[test]
    fn parses_and_sorts_script() {
        let fixture = Fixture::parse(SAMPLE).expect("parse");
        assert_eq!(fixture.items.len(), 3);
        assert_eq!(fixture.frame_ms, 50);
        assert_eq!(fixture.frames, 40);
        let at: Vec<u64> = fixture.script.iter().map(|step| step.at).collect();
        assert_eq!(at, vec![0, 500, 700, 900]);
        assert_eq!(
            fixture.script[0].action,
            ScriptAction::ContainerOpened {
                serial: Serial(1_073_742_080)
            }
        );
        assert_eq!(
            fixture.script[2].action.destination(),
            Some(Destination::Ground(Position::new(90, 91, 2)))
        );
        assert_eq!(fixture.script[3].action, ScriptAction::MoveToTrade);
        let rules = fixture.loot_rules.as_ref().expect("rules");
        assert_eq!(rules[0].hue, crate::entities::item::ANY_HUE);
    }

    #[test]
    fn builds_world_from_items() {
        let fixture = Fixture::parse(SAMPLE).expect("parse");
        let world = fixture.build_world();
        let gold = world.item(Serial(1_073_742_081)).expect("gold");
        assert_eq!(gold.amount, 120);
        assert_eq!(world.distance_to_player(&gold), Some(1));
        assert_eq!(world.player_backpack(), Some(Serial(1_073_741_825)));
    }

    #[test]
    fn replay_loots_corpse_then_moves_selection_to_ground() {
        use crate::config::AutomationSettings;
        use crate::dispatch::queue::RequestSource;
        use crate::net::protocol::LoopbackProtocol;
        use crate::persistence::store::LoadedRules;
        use crate::world::position::DropPoint;
        use std::sync::Arc;

        let fixture = Fixture::parse(SAMPLE).expect("parse");
        let world = Arc::new(fixture.build_world());
        let cache = Arc::new(PropertyCache::new(16));
        let protocol = Arc::new(LoopbackProtocol::new(Arc::clone(&world)));
        let mut session = Session::new(
            &AutomationSettings::default(),
            world.clone(),
            cache.clone(),
            protocol,
        );
        session.install_rules(LoadedRules {
            loot_rules: fixture.loot_rules.clone().unwrap_or_default(),
            ..LoadedRules::default()
        });

        let sent = replay(&fixture, &world, &cache, &mut session);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].at, 0);
        assert_eq!(sent[0].request.source, RequestSource::AutoLoot);
        assert_eq!(sent[0].request.destination, Serial(1_073_741_825));
        assert_eq!(sent[1].at, 800);
        assert_eq!(sent[1].request.source, RequestSource::Selection);
        assert_eq!(sent[1].request.destination, Serial::NONE);
        assert_eq!(sent[1].request.point, DropPoint::new(90, 91, 2));

        let gold = world.item(Serial(1_073_742_081)).expect("gold");
        assert!(gold.on_ground());
        assert_eq!(gold.position, Position::new(90, 91, 2));
    }

    #[test]
    fn unknown_action_is_rejected() {
        let bad = "script:\n  - { at: 0, do: explode }\n";
        assert!(Fixture::parse(bad).is_err());
    }
}
