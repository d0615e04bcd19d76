use crate::config::AutomationSettings;
use crate::dispatch::queue::{DispatchQueue, MoveRequest, RequestSource};
use crate::dispatch::tracking::{CooldownSet, DedupSet};
use crate::entities::item::{
    graphic_matches, hue_matches, ItemInfo, ItemProperties, Serial, ANY_GRAPHIC, ANY_HUE,
};
use crate::world::events::WorldEvent;
use crate::world::properties::PropertySource;
use crate::world::state::WorldLookup;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock};

/// Ground scavenging only looks at items this close to the player.
pub const SCAVENGE_RADIUS: u32 = 3;

fn any_graphic() -> i32 {
    ANY_GRAPHIC
}

fn any_hue() -> u16 {
    ANY_HUE
}

fn new_rule_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

/// One user-defined loot filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LootRule {
    #[serde(default = "new_rule_id")]
    pub id: String,
    #[serde(default = "any_graphic")]
    pub graphic: i32,
    #[serde(default = "any_hue")]
    pub hue: u16,
    /// Empty disables the text check.
    #[serde(default)]
    pub regex: String,
    /// Label shown to the user.
    #[serde(default)]
    pub name: String,
    #[serde(skip)]
    compiled: OnceLock<Option<Regex>>,
}

impl PartialEq for LootRule {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.equivalent(other.graphic, other.hue, &other.regex)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleMatch {
    Matched,
    NoMatch,
    /// Graphic and hue fit but the name/property text is not known yet.
    NeedsProperties,
}

impl LootRule {
    pub fn new(graphic: i32, hue: u16, name: impl Into<String>) -> Self {
        Self {
            id: new_rule_id(),
            graphic,
            hue,
            regex: String::new(),
            name: name.into(),
            compiled: OnceLock::new(),
        }
    }

    pub fn with_regex(mut self, regex: impl Into<String>) -> Self {
        self.regex = regex.into();
        self.compiled = OnceLock::new();
        self
    }

    pub fn equivalent(&self, graphic: i32, hue: u16, regex: &str) -> bool {
        self.graphic == graphic && self.hue == hue && self.regex == regex
    }

    /// Compiled pattern, built on first use. An invalid pattern never
    /// matches and is reported once.
    fn pattern(&self) -> Option<&Regex> {
        self.compiled
            .get_or_init(|| {
                match RegexBuilder::new(&self.regex).multi_line(true).build() {
                    Ok(regex) => Some(regex),
                    Err(err) => {
                        tracing::warn!(
                            target: "lootkit::autoloot",
                            rule = %self.id,
                            pattern = %self.regex,
                            error = %err,
                            "invalid loot rule pattern, rule disabled"
                        );
                        None
                    }
                }
            })
            .as_ref()
    }

    pub fn evaluate(&self, item: &ItemInfo, properties: Option<&ItemProperties>) -> RuleMatch {
        if !graphic_matches(self.graphic, item.graphic) || !hue_matches(self.hue, item.hue) {
            return RuleMatch::NoMatch;
        }
        if self.regex.is_empty() {
            return RuleMatch::Matched;
        }
        let Some(properties) = properties else {
            return RuleMatch::NeedsProperties;
        };
        match self.pattern() {
            Some(regex) if regex.is_match(&properties.searchable_text()) => RuleMatch::Matched,
            _ => RuleMatch::NoMatch,
        }
    }
}

/// Runtime switches for the loot engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LootSettings {
    pub enabled: bool,
    pub corpse_radius: u32,
    pub loot_human_corpses: bool,
    pub scavenger_enabled: bool,
    pub loot_bag: Option<Serial>,
}

impl Default for LootSettings {
    fn default() -> Self {
        Self::from(&AutomationSettings::default())
    }
}

impl From<&AutomationSettings> for LootSettings {
    fn from(settings: &AutomationSettings) -> Self {
        Self {
            enabled: settings.autoloot_enabled,
            corpse_radius: settings.loot_radius,
            loot_human_corpses: settings.loot_human_corpses,
            scavenger_enabled: settings.scavenger_enabled,
            loot_bag: settings.loot_bag,
        }
    }
}

/// Event-driven matcher feeding lootable items into the dispatch queue.
///
/// World events are delivered through a channel (`subscriber`) and consumed
/// by `tick`, so producers never call into matching logic directly.
pub struct AutoLootEngine {
    world: Arc<dyn WorldLookup>,
    properties: Arc<dyn PropertySource>,
    queue: Arc<DispatchQueue>,
    settings: RwLock<LootSettings>,
    rules: RwLock<Vec<LootRule>>,
    loaded: AtomicBool,
    dirty: AtomicBool,
    in_flight: DedupSet,
    cooldown: CooldownSet,
    awaiting_properties: Mutex<HashSet<Serial>>,
    batch_total: AtomicUsize,
    clock: AtomicU64,
    events_tx: Mutex<Sender<WorldEvent>>,
    events_rx: Mutex<Receiver<WorldEvent>>,
}

impl AutoLootEngine {
    pub fn new(
        world: Arc<dyn WorldLookup>,
        properties: Arc<dyn PropertySource>,
        queue: Arc<DispatchQueue>,
        settings: LootSettings,
        cooldown_ms: u64,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            world,
            properties,
            queue,
            settings: RwLock::new(settings),
            rules: RwLock::new(Vec::new()),
            loaded: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
            in_flight: DedupSet::new(),
            cooldown: CooldownSet::new(cooldown_ms),
            awaiting_properties: Mutex::new(HashSet::new()),
            batch_total: AtomicUsize::new(0),
            clock: AtomicU64::new(0),
            events_tx: Mutex::new(events_tx),
            events_rx: Mutex::new(events_rx),
        }
    }

    /// Sender for world events; clone freely across producer threads.
    pub fn subscriber(&self) -> Sender<WorldEvent> {
        self.events_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn settings(&self) -> LootSettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_settings(&self, settings: LootSettings) {
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = settings;
    }

    pub fn set_cooldown_window(&self, cooldown_ms: u64) {
        self.cooldown.set_window(cooldown_ms);
    }

    /// Consumer-side step: handles queued events and releases expired
    /// cooldowns. Call before the dispatch queue runs in the same frame.
    pub fn tick(&self, now: u64) {
        self.clock.fetch_max(now, Ordering::AcqRel);
        let events: Vec<WorldEvent> = {
            let receiver = self.events_rx.lock().unwrap_or_else(PoisonError::into_inner);
            receiver.try_iter().collect()
        };
        for event in events {
            self.handle_event(event);
        }
        self.awaiting().retain(|serial| self.world.item(*serial).is_some());

        let pending = self.queue.pending_for(RequestSource::AutoLoot);
        if pending == 0 {
            self.batch_total.store(0, Ordering::Release);
        }
        let idle = pending == 0 && self.in_flight.is_empty();
        let released = self.cooldown.sweep(now, idle);
        if released > 0 {
            tracing::debug!(target: "lootkit::autoloot", released, "cooldown window elapsed");
        }
    }

    pub fn handle_event(&self, event: WorldEvent) {
        match event {
            WorldEvent::ItemCreated(serial)
            | WorldEvent::ItemUpdated(serial)
            | WorldEvent::ContainerOpened(serial) => self.consider(serial),
            WorldEvent::PropertiesReceived(serial) => {
                let was_waiting = self.awaiting().remove(&serial);
                if was_waiting {
                    self.consider(serial);
                }
            }
            WorldEvent::PositionChanged(position) => {
                if !self.settings().scavenger_enabled {
                    return;
                }
                for item in self.world.ground_items_within(position, SCAVENGE_RADIUS) {
                    if !item.is_corpse && !item.is_locked {
                        self.evaluate_candidate(&item);
                    }
                }
            }
        }
    }

    /// Re-derives why `serial` might be lootable and acts on it.
    fn consider(&self, serial: Serial) {
        let Some(item) = self.world.item(serial) else {
            return;
        };
        let settings = self.settings();
        if item.is_corpse {
            if self.corpse_allowed(&item, &settings) {
                self.loot_contents(&item);
            }
            return;
        }
        match item.container {
            Some(parent) => {
                let Some(corpse) = self.world.item(parent).filter(|parent| parent.is_corpse) else {
                    return;
                };
                if self.corpse_allowed(&corpse, &settings) {
                    self.evaluate_candidate(&item);
                }
            }
            None => {
                let near = self
                    .world
                    .distance_to_player(&item)
                    .is_some_and(|distance| distance <= SCAVENGE_RADIUS);
                if settings.scavenger_enabled && near && !item.is_locked {
                    self.evaluate_candidate(&item);
                }
            }
        }
    }

    fn corpse_allowed(&self, corpse: &ItemInfo, settings: &LootSettings) -> bool {
        if corpse.is_human_corpse && !settings.loot_human_corpses {
            return false;
        }
        self.world
            .distance_to_player(corpse)
            .is_some_and(|distance| distance <= settings.corpse_radius)
    }

    fn loot_contents(&self, container: &ItemInfo) {
        for item in self.world.contents(container.serial) {
            self.evaluate_candidate(&item);
        }
    }

    /// Loots a container on request, skipping the corpse and distance gates.
    /// Returns how many items were queued.
    pub fn loot_container(&self, container: Serial) -> usize {
        let before = self.batch_total.load(Ordering::Acquire);
        if self.world.item(container).is_none() {
            return 0;
        }
        for item in self.world.contents(container) {
            self.evaluate_candidate(&item);
        }
        self.batch_total.load(Ordering::Acquire).saturating_sub(before)
    }

    fn evaluate_candidate(&self, item: &ItemInfo) {
        if !self.loaded.load(Ordering::Acquire) || !self.settings().enabled {
            return;
        }
        if self.in_flight.contains(item.serial) || self.cooldown.contains(item.serial) {
            return;
        }
        match self.match_rules(item) {
            (RuleMatch::Matched, Some(rule_id)) => {
                tracing::debug!(
                    target: "lootkit::autoloot",
                    serial = %item.serial,
                    graphic = item.graphic,
                    hue = item.hue,
                    rule = %rule_id,
                    "loot rule matched"
                );
                self.enqueue_loot(item);
            }
            (RuleMatch::NeedsProperties, _) => {
                self.awaiting().insert(item.serial);
                self.properties.request(item.serial);
            }
            _ => {}
        }
    }

    /// First matching rule wins; text is fetched at most once per candidate.
    fn match_rules(&self, item: &ItemInfo) -> (RuleMatch, Option<String>) {
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        let mut fetched: Option<Option<ItemProperties>> = None;
        let mut waiting = false;
        for rule in rules.iter() {
            let mut verdict = rule.evaluate(item, None);
            if verdict == RuleMatch::NeedsProperties {
                let properties =
                    fetched.get_or_insert_with(|| self.properties.properties(item.serial));
                verdict = rule.evaluate(item, properties.as_ref());
            }
            match verdict {
                RuleMatch::Matched => return (RuleMatch::Matched, Some(rule.id.clone())),
                RuleMatch::NeedsProperties => waiting = true,
                RuleMatch::NoMatch => {}
            }
        }
        if waiting {
            (RuleMatch::NeedsProperties, None)
        } else {
            (RuleMatch::NoMatch, None)
        }
    }

    fn enqueue_loot(&self, item: &ItemInfo) {
        let Some(destination) = self
            .settings()
            .loot_bag
            .or_else(|| self.world.player_backpack())
        else {
            tracing::warn!(
                target: "lootkit::autoloot",
                serial = %item.serial,
                "no loot bag or backpack, skipping"
            );
            return;
        };
        if item.container == Some(destination) {
            return;
        }
        if !self.in_flight.insert(item.serial) {
            return;
        }
        let now = self.clock.load(Ordering::Acquire);
        self.queue.enqueue(MoveRequest::new(
            item.serial,
            destination,
            item.amount,
            RequestSource::AutoLoot,
        ));
        self.batch_total.fetch_add(1, Ordering::AcqRel);
        self.cooldown.insert(item.serial, now);
    }

    /// Dispatch-side bookkeeping for a request this engine produced.
    pub fn finished(&self, request: &MoveRequest, dispatched: bool) {
        self.in_flight.remove(request.serial);
        if dispatched {
            self.cooldown.touch(self.clock.load(Ordering::Acquire));
        }
    }

    pub fn is_in_progress(&self) -> bool {
        self.queue.pending_for(RequestSource::AutoLoot) > 0
    }

    /// Fraction of the current batch already handed off, in `0.0..=1.0`.
    pub fn progress(&self) -> f32 {
        let total = self.batch_total.load(Ordering::Acquire);
        if total == 0 {
            return 1.0;
        }
        let pending = self.queue.pending_for(RequestSource::AutoLoot).min(total);
        1.0 - pending as f32 / total as f32
    }

    /// Drops every pending loot move and forgets them.
    pub fn clear(&self) -> usize {
        let removed = self.queue.clear_source(RequestSource::AutoLoot);
        for request in &removed {
            self.in_flight.remove(request.serial);
        }
        self.batch_total.store(0, Ordering::Release);
        self.awaiting().clear();
        removed.len()
    }

    /// Items held back until their properties arrive.
    pub fn awaiting_count(&self) -> usize {
        self.awaiting().len()
    }

    fn awaiting(&self) -> MutexGuard<'_, HashSet<Serial>> {
        self.awaiting_properties
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_tracking(&self, serial: Serial) -> bool {
        self.in_flight.contains(serial)
    }

    pub fn is_cooling_down(&self, serial: Serial) -> bool {
        self.cooldown.contains(serial)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Replaces the rule set once loading finished; matching starts now.
    pub fn install_rules(&self, rules: Vec<LootRule>) {
        *self.rules.write().unwrap_or_else(PoisonError::into_inner) = rules;
        self.loaded.store(true, Ordering::Release);
        self.dirty.store(false, Ordering::Release);
    }

    pub fn rules(&self) -> Vec<LootRule> {
        self.rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Adds a graphic/hue rule, or returns the id of an equivalent one.
    pub fn add_rule(&self, graphic: i32, hue: u16, name: &str) -> String {
        self.add_rule_entry(LootRule::new(graphic, hue, name))
    }

    pub fn add_rule_entry(&self, rule: LootRule) -> String {
        let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = rules
            .iter()
            .find(|existing| existing.equivalent(rule.graphic, rule.hue, &rule.regex))
        {
            return existing.id.clone();
        }
        let id = rule.id.clone();
        rules.push(rule);
        self.dirty.store(true, Ordering::Release);
        id
    }

    pub fn remove_rule(&self, id: &str) -> bool {
        let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        let before = rules.len();
        rules.retain(|rule| rule.id != id);
        let removed = rules.len() != before;
        if removed {
            self.dirty.store(true, Ordering::Release);
        }
        removed
    }

    /// Returns true once per batch of rule edits.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }
}
