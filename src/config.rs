use crate::dispatch::queue::DEFAULT_DISPATCH_DELAY_MS;
use crate::dispatch::tracking::DEFAULT_COOLDOWN_MS;
use crate::entities::item::Serial;
use crate::error::ConfigError;
use crate::world::properties::DEFAULT_PROPERTY_CACHE_CAPACITY;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct AppConfig {
    pub fixture: PathBuf,
    pub root: PathBuf,
    pub settings: AutomationSettings,
}

impl AppConfig {
    pub fn from_args(args: &[String]) -> Result<Self, ConfigError> {
        if args.len() < 2 {
            return Err(ConfigError::Usage(
                "usage: lootkit <fixture.yaml> [data_root]".to_string(),
            ));
        }

        let fixture = Path::new(&args[1]).to_path_buf();
        let root = if args.len() > 2 {
            PathBuf::from(&args[2])
        } else {
            fixture
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."))
        };
        let mut settings = AutomationSettings::default();
        settings.apply_env(|key| std::env::var(key).ok());
        Ok(Self {
            fixture,
            root,
            settings,
        })
    }
}

/// Tunables for the automation subsystem. Every field can be overridden by
/// a `LOOTKIT_*` environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationSettings {
    pub dispatch_delay_ms: u64,
    pub cooldown_ms: u64,
    pub autoloot_enabled: bool,
    /// Max tile distance to a corpse for it to be looted.
    pub loot_radius: u32,
    pub loot_human_corpses: bool,
    pub scavenger_enabled: bool,
    /// Falls back to the player's backpack when unset.
    pub loot_bag: Option<Serial>,
    pub property_cache_capacity: usize,
    /// 0 disables periodic rule saving.
    pub autosave_interval_secs: u64,
    pub log_level: String,
}

impl Default for AutomationSettings {
    fn default() -> Self {
        Self {
            dispatch_delay_ms: DEFAULT_DISPATCH_DELAY_MS,
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            autoloot_enabled: true,
            loot_radius: 3,
            loot_human_corpses: false,
            scavenger_enabled: false,
            loot_bag: None,
            property_cache_capacity: DEFAULT_PROPERTY_CACHE_CAPACITY,
            autosave_interval_secs: 0,
            log_level: "info".to_string(),
        }
    }
}

impl AutomationSettings {
    /// Applies overrides from `lookup`. Unparseable values are reported and
    /// leave the current value in place.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        override_with(&lookup, "LOOTKIT_DISPATCH_DELAY_MS", &mut self.dispatch_delay_ms, parse_u64);
        override_with(&lookup, "LOOTKIT_COOLDOWN_MS", &mut self.cooldown_ms, parse_u64);
        override_with(&lookup, "LOOTKIT_AUTOLOOT", &mut self.autoloot_enabled, parse_bool);
        override_with(&lookup, "LOOTKIT_LOOT_RADIUS", &mut self.loot_radius, |value| {
            value.parse::<u32>().ok()
        });
        override_with(&lookup, "LOOTKIT_LOOT_HUMANS", &mut self.loot_human_corpses, parse_bool);
        override_with(&lookup, "LOOTKIT_SCAVENGER", &mut self.scavenger_enabled, parse_bool);
        override_with(&lookup, "LOOTKIT_LOOT_BAG", &mut self.loot_bag, |value| {
            Serial::parse(value).map(|serial| serial.is_assigned().then_some(serial))
        });
        override_with(
            &lookup,
            "LOOTKIT_PROPERTY_CACHE",
            &mut self.property_cache_capacity,
            |value| value.parse::<usize>().ok(),
        );
        override_with(
            &lookup,
            "LOOTKIT_AUTOSAVE_SECS",
            &mut self.autosave_interval_secs,
            parse_u64,
        );
        if let Some(level) = lookup("LOOTKIT_LOG_LEVEL") {
            let level = level.trim();
            if !level.is_empty() {
                self.log_level = level.to_string();
            }
        }
    }
}

fn override_with<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
    parse: impl Fn(&str) -> Option<T>,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match parse(raw.trim()) {
        Some(value) => *slot = value,
        None => {
            tracing::warn!(target: "lootkit::config", key, value = %raw, "invalid setting ignored");
        }
    }
}

fn parse_u64(value: &str) -> Option<u64> {
    value.parse::<u64>().ok()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
