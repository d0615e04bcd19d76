use crate::dispatch::queue::{DispatchQueue, MoveRequest, RequestSource};
use crate::entities::item::{hue_matches, Serial, ANY_HUE};
use crate::world::state::WorldLookup;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

fn enabled() -> bool {
    true
}

fn any_hue() -> u16 {
    ANY_HUE
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizerItemRule {
    pub graphic: u16,
    #[serde(default = "any_hue")]
    pub hue: u16,
    #[serde(default = "enabled")]
    pub enabled: bool,
}

impl OrganizerItemRule {
    pub fn new(graphic: u16, hue: u16) -> Self {
        Self {
            graphic,
            hue,
            enabled: true,
        }
    }

    pub fn matches(&self, graphic: u16, hue: u16) -> bool {
        self.enabled && self.graphic == graphic && hue_matches(self.hue, hue)
    }
}

/// A named "move these kinds of items from here to there" rule set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizerConfig {
    pub name: String,
    /// `Serial::NONE` means the player's backpack.
    #[serde(default)]
    pub source: Serial,
    pub target: Serial,
    #[serde(default = "enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub items: Vec<OrganizerItemRule>,
}

impl OrganizerConfig {
    pub fn new(name: impl Into<String>, source: Serial, target: Serial) -> Self {
        Self {
            name: name.into(),
            source,
            target,
            enabled: true,
            items: Vec::new(),
        }
    }

    pub fn with_item(mut self, rule: OrganizerItemRule) -> Self {
        self.items.push(rule);
        self
    }
}

/// Manually triggered bulk mover. Shares the dispatch queue with the loot
/// engine but not its tracking sets, so an item may be queued by both.
pub struct Organizer {
    world: Arc<dyn WorldLookup>,
    queue: Arc<DispatchQueue>,
    configs: RwLock<Vec<OrganizerConfig>>,
    dirty: AtomicBool,
}

impl Organizer {
    pub fn new(world: Arc<dyn WorldLookup>, queue: Arc<DispatchQueue>) -> Self {
        Self {
            world,
            queue,
            configs: RwLock::new(Vec::new()),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn install(&self, configs: Vec<OrganizerConfig>) {
        *self.configs.write().unwrap_or_else(PoisonError::into_inner) = configs;
        self.dirty.store(false, Ordering::Release);
    }

    pub fn configs(&self) -> Vec<OrganizerConfig> {
        self.configs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn config(&self, name: &str) -> Option<OrganizerConfig> {
        self.configs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|config| config.name == name)
            .cloned()
    }

    /// Adds or replaces the config with the same name.
    pub fn upsert(&self, config: OrganizerConfig) {
        let mut configs = self.configs.write().unwrap_or_else(PoisonError::into_inner);
        match configs.iter_mut().find(|existing| existing.name == config.name) {
            Some(existing) => *existing = config,
            None => configs.push(config),
        }
        self.dirty.store(true, Ordering::Release);
    }

    pub fn remove(&self, name: &str) -> bool {
        self.edit(|configs| {
            let before = configs.len();
            configs.retain(|config| config.name != name);
            configs.len() != before
        })
    }

    pub fn rename(&self, name: &str, new_name: &str) -> bool {
        self.edit(|configs| {
            if configs.iter().any(|config| config.name == new_name) {
                return false;
            }
            match configs.iter_mut().find(|config| config.name == name) {
                Some(config) => {
                    config.name = new_name.to_string();
                    true
                }
                None => false,
            }
        })
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        self.edit(|configs| match configs.iter_mut().find(|config| config.name == name) {
            Some(config) => {
                config.enabled = enabled;
                true
            }
            None => false,
        })
    }

    /// Adds an item rule unless an identical graphic/hue pair exists.
    pub fn add_item(&self, name: &str, rule: OrganizerItemRule) -> bool {
        self.edit(|configs| {
            let Some(config) = configs.iter_mut().find(|config| config.name == name) else {
                return false;
            };
            if config
                .items
                .iter()
                .any(|existing| existing.graphic == rule.graphic && existing.hue == rule.hue)
            {
                return false;
            }
            config.items.push(rule);
            true
        })
    }

    pub fn remove_item(&self, name: &str, graphic: u16, hue: u16) -> bool {
        self.edit(|configs| {
            let Some(config) = configs.iter_mut().find(|config| config.name == name) else {
                return false;
            };
            let before = config.items.len();
            config
                .items
                .retain(|rule| !(rule.graphic == graphic && rule.hue == hue));
            config.items.len() != before
        })
    }

    fn edit(&self, f: impl FnOnce(&mut Vec<OrganizerConfig>) -> bool) -> bool {
        let mut configs = self.configs.write().unwrap_or_else(PoisonError::into_inner);
        let changed = f(&mut configs);
        if changed {
            self.dirty.store(true, Ordering::Release);
        }
        changed
    }

    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    /// Runs one named config. Returns how many items were queued.
    pub fn run(&self, name: &str) -> usize {
        match self.config(name) {
            Some(config) => self.organize(&config),
            None => {
                tracing::warn!(target: "lootkit::organizer", name, "unknown organizer");
                0
            }
        }
    }

    /// Runs every enabled config in order; returns the total queued.
    pub fn run_all(&self) -> usize {
        self.configs()
            .iter()
            .filter(|config| config.enabled)
            .map(|config| self.organize(config))
            .sum()
    }

    /// Single pass over the direct contents of the source container.
    pub fn organize(&self, config: &OrganizerConfig) -> usize {
        let source = if config.source.is_assigned() {
            Some(config.source)
        } else {
            self.world.player_backpack()
        };
        let Some(source) = source.filter(|source| self.world.item(*source).is_some()) else {
            tracing::warn!(
                target: "lootkit::organizer",
                name = %config.name,
                "source container not found"
            );
            return 0;
        };
        if !config.target.is_assigned() || self.world.item(config.target).is_none() {
            tracing::warn!(
                target: "lootkit::organizer",
                name = %config.name,
                "target container not found"
            );
            return 0;
        }

        let requests: Vec<MoveRequest> = self
            .world
            .contents(source)
            .into_iter()
            .filter(|item| item.serial != config.target)
            .filter(|item| {
                config
                    .items
                    .iter()
                    .any(|rule| rule.matches(item.graphic, item.hue))
            })
            .map(|item| {
                MoveRequest::new(item.serial, config.target, item.amount, RequestSource::Organizer)
            })
            .collect();
        let matched = requests.len();
        self.queue.enqueue_all(requests);
        tracing::info!(
            target: "lootkit::organizer",
            name = %config.name,
            matched,
            "organizer queued items"
        );
        matched
    }
}
