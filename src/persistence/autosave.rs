use crate::automation::autoloot::AutoLootEngine;
use crate::automation::organizer::Organizer;
use crate::persistence::store::RuleStore;

/// Interval-driven save of edited rule sets, measured in session ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutosaveConfig {
    pub interval_seconds: u64,
}

impl AutosaveConfig {
    pub fn interval_ms(self) -> Option<u64> {
        if self.interval_seconds == 0 {
            None
        } else {
            Some(self.interval_seconds.max(1).saturating_mul(1_000))
        }
    }
}

#[derive(Debug, Clone)]
pub struct AutosaveState {
    interval_ms: Option<u64>,
    next_due: Option<u64>,
}

impl AutosaveState {
    pub fn new(config: AutosaveConfig, now: u64) -> Self {
        let interval_ms = config.interval_ms();
        let next_due = interval_ms.map(|interval| now.saturating_add(interval));
        Self {
            interval_ms,
            next_due,
        }
    }

    pub fn due(&self, now: u64) -> bool {
        self.next_due.is_some_and(|next| now >= next)
    }

    pub fn mark_saved(&mut self, now: u64) {
        if let Some(interval) = self.interval_ms {
            self.next_due = Some(now.saturating_add(interval));
        }
    }
}

#[derive(Debug, Default)]
pub struct AutosaveReport {
    pub saved_loot_rules: Option<usize>,
    pub saved_organizers: Option<usize>,
    pub errors: Vec<String>,
}

/// Writes whichever rule sets changed since the last save. With `force`,
/// both are written regardless.
pub fn save_rules(
    autoloot: &AutoLootEngine,
    organizer: &Organizer,
    store: &RuleStore,
    force: bool,
) -> AutosaveReport {
    let mut report = AutosaveReport::default();
    if autoloot.take_dirty() || force {
        let rules = autoloot.rules();
        match store.save_loot_rules(&rules) {
            Ok(()) => report.saved_loot_rules = Some(rules.len()),
            Err(err) => report.errors.push(err.to_string()),
        }
    }
    if organizer.take_dirty() || force {
        let configs = organizer.configs();
        match store.save_organizers(&configs) {
            Ok(()) => report.saved_organizers = Some(configs.len()),
            Err(err) => report.errors.push(err.to_string()),
        }
    }
    for err in &report.errors {
        tracing::warn!(target: "lootkit::store", error = %err, "rule save failed");
    }
    report
}
