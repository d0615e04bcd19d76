use lootkit::{
    AutomationSettings, Destination, ItemInfo, LootRule, MoveRequest, OrganizerConfig,
    OrganizerItemRule, Position, PropertyCache, ProtocolCall, RecordingProtocol, RequestSource,
    RuleStore, Serial, Session, TickOutcome, WorldEvent, WorldState, ANY_GRAPHIC, ANY_HUE,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

const BACKPACK: Serial = Serial(0x4000_0001);
const CORPSE: Serial = Serial(0x4000_0100);
const HOME: Position = Position { x: 1000, y: 1000, z: 0 };

struct Harness {
    world: Arc<WorldState>,
    properties: Arc<PropertyCache>,
    protocol: Arc<RecordingProtocol>,
    session: Session,
}

impl Harness {
    fn new(settings: AutomationSettings) -> Self {
        let world = Arc::new(WorldState::new());
        world.set_player_position(HOME);
        world.set_backpack(Some(BACKPACK));
        world.insert(ItemInfo::new(BACKPACK, 0x0E75).at(HOME));
        let properties = Arc::new(PropertyCache::new(64));
        let protocol = Arc::new(RecordingProtocol::new());
        let session = Session::new(
            &settings,
            world.clone(),
            properties.clone(),
            protocol.clone(),
        );
        Self {
            world,
            properties,
            protocol,
            session,
        }
    }

    fn with_rules(settings: AutomationSettings, rules: Vec<LootRule>) -> Self {
        let harness = Self::new(settings);
        harness.session.autoloot().install_rules(rules);
        harness
    }

    fn corpse_with(&self, items: &[ItemInfo]) {
        let position = HOME.offset(1, 0).unwrap_or(HOME);
        self.world.insert(ItemInfo::new(CORPSE, 0x2006).corpse(false).at(position));
        for item in items {
            self.world.insert(item.clone().inside(CORPSE));
        }
    }

    fn send(&self, event: WorldEvent) {
        self.session
            .autoloot()
            .subscriber()
            .send(event)
            .expect("engine receiver alive");
    }

    /// Ticks every `step` ms over `[from, to)` and returns dispatch times.
    fn run(&mut self, from: u64, to: u64, step: u64) -> Vec<(u64, MoveRequest)> {
        let mut sent = Vec::new();
        let mut now = from;
        while now < to {
            if let Some(request) = self.session.tick(now).dispatched() {
                sent.push((now, request));
            }
            now += step;
        }
        sent
    }
}

fn settings_with_delay(delay: u64) -> AutomationSettings {
    AutomationSettings {
        dispatch_delay_ms: delay,
        ..AutomationSettings::default()
    }
}

#[test]
fn three_requests_are_spaced_by_the_delay() {
    let mut harness = Harness::new(settings_with_delay(1000));
    let queue = harness.session.queue();
    for raw in 1..=3 {
        let serial = Serial(raw);
        harness.world.insert(ItemInfo::new(serial, 0x0EED).at(HOME));
        queue.enqueue(MoveRequest::new(serial, BACKPACK, 1, RequestSource::Manual));
    }

    let sent = harness.run(0, 3_000, 100);
    let times: Vec<u64> = sent.iter().map(|(at, _)| *at).collect();
    assert_eq!(times, vec![0, 1_000, 2_000]);
    assert_eq!(harness.protocol.dropped(), vec![Serial(1), Serial(2), Serial(3)]);
}

#[test]
fn repeated_events_enqueue_an_item_once() {
    let gold = ItemInfo::new(Serial(0x4000_0200), 0x0EED).with_amount(500);
    let mut harness = Harness::with_rules(
        AutomationSettings::default(),
        vec![LootRule::new(0x0EED, ANY_HUE, "gold")],
    );
    harness.corpse_with(&[gold.clone()]);
    harness.session.cursor_flag().store(true, Ordering::Release);

    harness.send(WorldEvent::ContainerOpened(CORPSE));
    harness.send(WorldEvent::ContainerOpened(CORPSE));
    harness.send(WorldEvent::ItemCreated(gold.serial));
    assert_eq!(harness.session.tick(0), TickOutcome::CursorBusy);
    assert_eq!(harness.session.queue().len(), 1);
    assert!(harness.session.autoloot().is_tracking(gold.serial));

    harness.session.cursor_flag().store(false, Ordering::Release);
    let sent = harness.run(50, 2_000, 50);
    assert_eq!(sent.len(), 1);
    assert_eq!(
        harness.protocol.calls(),
        vec![
            ProtocolCall::PickUp {
                serial: gold.serial,
                amount: 500
            },
            ProtocolCall::Drop {
                serial: gold.serial,
                point: lootkit::DropPoint::DEFAULT,
                destination: BACKPACK
            },
        ]
    );
    assert!(!harness.session.autoloot().is_tracking(gold.serial));
}

#[test]
fn any_hue_rule_loots_colored_item() {
    let cloth = ItemInfo::new(Serial(0x4000_0300), 0x1F03).with_hue(0x0047);
    let mut harness = Harness::with_rules(
        AutomationSettings::default(),
        vec![LootRule::new(0x1F03, ANY_HUE, "")],
    );
    harness.corpse_with(&[cloth.clone()]);
    harness.send(WorldEvent::ContainerOpened(CORPSE));

    let sent = harness.run(0, 100, 50);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1.serial, cloth.serial);
    assert_eq!(sent[0].1.destination, BACKPACK);
}

#[test]
fn deselected_item_is_skipped_at_its_turn() {
    let mut harness = Harness::new(settings_with_delay(500));
    let (a, b) = (Serial(0x4000_0401), Serial(0x4000_0402));
    harness.world.insert(ItemInfo::new(a, 0x0F7A).inside(CORPSE));
    harness.world.insert(ItemInfo::new(b, 0x0F7B).inside(CORPSE));
    harness.world.insert(ItemInfo::new(CORPSE, 0x2006).corpse(false).at(HOME));

    let selection = harness.session.selection();
    selection.set_destination(Destination::Container(BACKPACK));
    assert!(selection.toggle_select(a));
    assert!(selection.toggle_select(b));
    assert!(!selection.toggle_select(a));

    let sent = harness.run(0, 2_000, 100);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, 0);
    assert_eq!(harness.protocol.dropped(), vec![b]);
    assert!(!selection.is_active());
}

#[test]
fn closed_trade_window_ends_the_selection_session() {
    let mut harness = Harness::new(settings_with_delay(100));
    let item = Serial(0x4000_0403);
    let bag = Serial(0x4000_0404);
    harness.world.insert(ItemInfo::new(item, 0x0F7A).inside(BACKPACK));
    harness.world.insert(ItemInfo::new(bag, 0x0E76).inside(BACKPACK));
    harness.world.set_trade_container(Some(Serial(0x4000_0777)));

    let selection = harness.session.selection();
    assert!(selection.toggle_select(item));
    assert!(selection.set_trade_destination());
    harness.world.set_trade_container(None);

    assert!(harness.run(0, 1_000, 100).is_empty());
    assert_eq!(selection.selected_count(), 0);
    assert_eq!(selection.pending(), 0);
    assert!(!selection.is_active());

    selection.set_destination(Destination::Container(bag));
    assert!(harness.run(1_000, 2_000, 100).is_empty());
    assert!(harness.protocol.calls().is_empty());
}

#[test]
fn organizer_excludes_target_bag_inside_source() {
    let mut harness = Harness::new(settings_with_delay(100));
    let pouch = Serial(0x4000_0500);
    harness
        .world
        .insert(ItemInfo::new(pouch, 0x0F7A).inside(BACKPACK));
    let graphics = [0x0F7A, 0x0F7B, 0x0F7A, 0x0E21, 0x0F7B, 0x1BFB, 0x0EED, 0x0F88, 0x0F8D];
    for (index, graphic) in graphics.iter().enumerate() {
        harness
            .world
            .insert(ItemInfo::new(Serial(0x4000_0600 + index as u32), *graphic).inside(BACKPACK));
    }

    let organizer = harness.session.organizer();
    organizer.upsert(
        OrganizerConfig::new("regs", Serial::NONE, pouch)
            .with_item(OrganizerItemRule::new(0x0F7A, ANY_HUE))
            .with_item(OrganizerItemRule::new(0x0F7B, ANY_HUE)),
    );
    assert!(organizer.add_item("regs", OrganizerItemRule::new(0x0E21, ANY_HUE)));
    assert!(organizer.remove_item("regs", 0x0E21, ANY_HUE));
    assert_eq!(organizer.run("regs"), 4);

    let sent = harness.run(0, 1_000, 50);
    assert_eq!(sent.len(), 4);
    assert!(sent
        .iter()
        .all(|(_, request)| request.destination == pouch && request.serial != pouch));
}

#[test]
fn engine_ignores_events_until_rules_arrive() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = RuleStore::from_root(dir.path());
    store
        .save_loot_rules(&[LootRule::new(0x0EED, ANY_HUE, "gold")])
        .expect("seed rules");

    let gold = ItemInfo::new(Serial(0x4000_0700), 0x0EED);
    let mut harness = Harness::new(AutomationSettings::default());
    harness.corpse_with(&[gold.clone()]);
    harness.send(WorldEvent::ContainerOpened(CORPSE));
    assert_eq!(harness.session.tick(0), TickOutcome::Idle { dropped: 0 });
    assert!(!harness.session.rules_loaded());

    harness.session.load_rules_from(store);
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut now = 0;
    while !harness.session.rules_loaded() {
        assert!(Instant::now() < deadline, "rules never loaded");
        std::thread::sleep(Duration::from_millis(1));
        now += 1;
        harness.session.tick(now);
    }
    assert!(harness.protocol.calls().is_empty());

    harness.send(WorldEvent::ContainerOpened(CORPSE));
    let sent = harness.run(now + 1, now + 100, 10);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1.serial, gold.serial);
}

#[test]
fn vanished_item_is_dropped_and_released() {
    let gold = ItemInfo::new(Serial(0x4000_0800), 0x0EED);
    let bones = ItemInfo::new(Serial(0x4000_0801), 0x0ECA);
    let mut harness = Harness::with_rules(
        AutomationSettings::default(),
        vec![LootRule::new(ANY_GRAPHIC, ANY_HUE, "everything")],
    );
    harness.corpse_with(&[gold.clone(), bones.clone()]);
    harness.session.cursor_flag().store(true, Ordering::Release);
    harness.send(WorldEvent::ContainerOpened(CORPSE));
    harness.session.tick(0);
    assert_eq!(harness.session.queue().len(), 2);

    harness.world.remove(gold.serial);
    harness.session.cursor_flag().store(false, Ordering::Release);
    match harness.session.tick(10) {
        TickOutcome::Dispatched { request, dropped } => {
            assert_eq!(request.serial, bones.serial);
            assert_eq!(dropped, 1);
        }
        other => panic!("expected dispatch, got {:?}", other),
    }
    assert!(!harness.session.autoloot().is_tracking(gold.serial));
}

#[test]
fn tooltip_rule_waits_for_properties() {
    let scroll = ItemInfo::new(Serial(0x4000_0900), 0x1F4C);
    let mut harness = Harness::with_rules(
        AutomationSettings::default(),
        vec![LootRule::new(ANY_GRAPHIC, ANY_HUE, "slayers").with_regex("(?i)slayer")],
    );
    harness.corpse_with(&[scroll.clone()]);
    harness.send(WorldEvent::ContainerOpened(CORPSE));
    harness.session.tick(0);
    assert!(harness.properties.is_requested(scroll.serial));
    assert!(harness.protocol.calls().is_empty());

    harness.properties.insert(
        scroll.serial,
        lootkit::ItemProperties::new("a scroll", "Repond Slayer"),
    );
    harness.send(WorldEvent::PropertiesReceived(scroll.serial));
    let sent = harness.run(10, 100, 10);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1.serial, scroll.serial);
}

#[test]
fn delay_change_applies_to_next_dispatch() {
    let mut harness = Harness::new(settings_with_delay(1_000));
    let queue = harness.session.queue();
    for raw in 1..=2 {
        harness.world.insert(ItemInfo::new(Serial(raw), 0x0EED).at(HOME));
        queue.enqueue(MoveRequest::new(Serial(raw), BACKPACK, 1, RequestSource::Manual));
    }
    assert!(harness.session.tick(0).dispatched().is_some());
    harness.session.apply_settings(&settings_with_delay(200));
    assert_eq!(harness.session.tick(500), TickOutcome::Throttled);
    assert!(harness.session.tick(1_000).dispatched().is_some());
}

#[test]
fn shutdown_saves_edited_rules() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = RuleStore::from_root(dir.path());
    let mut harness = Harness::with_rules(AutomationSettings::default(), Vec::new());
    harness.session.save_rules_to(store.clone());
    harness.session.autoloot().add_rule(0x0EED, ANY_HUE, "gold");
    harness
        .session
        .organizer()
        .upsert(OrganizerConfig::new("gems", Serial::NONE, Serial(0x4000_0A00)));

    let report = harness.session.shutdown().expect("store configured");
    assert!(report.errors.is_empty());
    assert_eq!(store.load_loot_rules().expect("load").len(), 1);
    assert_eq!(store.load_organizers().expect("load")[0].name, "gems");
}

#[test]
fn autosave_writes_dirty_rules_on_interval() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = RuleStore::from_root(dir.path());
    let settings = AutomationSettings {
        autosave_interval_secs: 1,
        ..AutomationSettings::default()
    };
    let mut harness = Harness::with_rules(settings, Vec::new());
    harness.session.save_rules_to(store.clone());
    harness.session.autoloot().add_rule(0x0EED, ANY_HUE, "gold");

    harness.session.tick(999);
    assert!(store.load_loot_rules().expect("load").is_empty());
    harness.session.tick(1_000);
    assert_eq!(store.load_loot_rules().expect("load").len(), 1);
}
