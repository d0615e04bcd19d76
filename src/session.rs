use crate::automation::autoloot::{AutoLootEngine, LootSettings};
use crate::automation::organizer::Organizer;
use crate::automation::selection::SelectionDispatcher;
use crate::config::AutomationSettings;
use crate::dispatch::queue::{DispatchHook, DispatchQueue, MoveRequest, RequestSource, TickOutcome};
use crate::net::protocol::Protocol;
use crate::persistence::autosave::{save_rules, AutosaveConfig, AutosaveReport, AutosaveState};
use crate::persistence::loader::RuleLoad;
use crate::persistence::store::{LoadedRules, RuleStore};
use crate::world::properties::PropertySource;
use crate::world::state::WorldLookup;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Owns one instance of each engine plus the queue they share.
///
/// Producers get `Arc` handles to the engines and may use them from any
/// thread; the owning loop calls `tick` once per frame and is the only
/// consumer of the dispatch queue.
pub struct Session {
    world: Arc<dyn WorldLookup>,
    protocol: Arc<dyn Protocol>,
    queue: Arc<DispatchQueue>,
    autoloot: Arc<AutoLootEngine>,
    selection: Arc<SelectionDispatcher>,
    organizer: Arc<Organizer>,
    cursor_holding: Arc<AtomicBool>,
    store: Option<RuleStore>,
    loader: Option<RuleLoad>,
    autosave: AutosaveState,
}

impl Session {
    pub fn new(
        settings: &AutomationSettings,
        world: Arc<dyn WorldLookup>,
        properties: Arc<dyn PropertySource>,
        protocol: Arc<dyn Protocol>,
    ) -> Self {
        let queue = Arc::new(DispatchQueue::new(settings.dispatch_delay_ms));
        let autoloot = Arc::new(AutoLootEngine::new(
            Arc::clone(&world),
            properties,
            Arc::clone(&queue),
            LootSettings::from(settings),
            settings.cooldown_ms,
        ));
        let selection = Arc::new(SelectionDispatcher::new(Arc::clone(&world), Arc::clone(&queue)));
        let organizer = Arc::new(Organizer::new(Arc::clone(&world), Arc::clone(&queue)));
        let autosave = AutosaveState::new(
            AutosaveConfig {
                interval_seconds: settings.autosave_interval_secs,
            },
            0,
        );
        Self {
            world,
            protocol,
            queue,
            autoloot,
            selection,
            organizer,
            cursor_holding: Arc::new(AtomicBool::new(false)),
            store: None,
            loader: None,
            autosave,
        }
    }

    /// Starts loading persisted rules in the background; later saves go
    /// to the same store.
    pub fn load_rules_from(&mut self, store: RuleStore) {
        self.loader = Some(RuleLoad::spawn(store.clone()));
        self.store = Some(store);
    }

    /// Uses `store` for saving only.
    pub fn save_rules_to(&mut self, store: RuleStore) {
        self.store = Some(store);
    }

    pub fn install_rules(&self, loaded: LoadedRules) {
        tracing::info!(
            target: "lootkit",
            loot_rules = loaded.loot_rules.len(),
            organizers = loaded.organizers.len(),
            errors = loaded.errors.len(),
            "rules installed"
        );
        self.autoloot.install_rules(loaded.loot_rules);
        self.organizer.install(loaded.organizers);
    }

    pub fn rules_loaded(&self) -> bool {
        self.autoloot.is_loaded()
    }

    pub fn queue(&self) -> Arc<DispatchQueue> {
        Arc::clone(&self.queue)
    }

    pub fn autoloot(&self) -> Arc<AutoLootEngine> {
        Arc::clone(&self.autoloot)
    }

    pub fn selection(&self) -> Arc<SelectionDispatcher> {
        Arc::clone(&self.selection)
    }

    pub fn organizer(&self) -> Arc<Organizer> {
        Arc::clone(&self.organizer)
    }

    /// Flag the UI sets while the user drags an item by hand.
    pub fn cursor_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cursor_holding)
    }

    /// Hot-reloads tunables; the dispatch delay applies from the next send.
    pub fn apply_settings(&self, settings: &AutomationSettings) {
        self.queue.set_delay(settings.dispatch_delay_ms);
        self.autoloot.set_settings(LootSettings::from(settings));
        self.autoloot.set_cooldown_window(settings.cooldown_ms);
    }

    /// One frame: install finished rule loads, feed events to the loot
    /// engine, send at most one move, then housekeeping.
    pub fn tick(&mut self, now: u64) -> TickOutcome {
        if let Some(loader) = self.loader.as_mut() {
            if let Some(loaded) = loader.poll() {
                self.loader = None;
                self.install_rules(loaded);
            }
        }

        self.autoloot.tick(now);
        let router = Router {
            world: self.world.as_ref(),
            autoloot: &self.autoloot,
            selection: &self.selection,
        };
        let outcome = self.queue.process_tick(
            now,
            self.cursor_holding.load(Ordering::Acquire),
            self.protocol.as_ref(),
            &router,
        );
        self.selection.maintain();

        if self.autosave.due(now) {
            if let Some(store) = self.store.as_ref() {
                save_rules(&self.autoloot, &self.organizer, store, false);
            }
            self.autosave.mark_saved(now);
        }
        outcome
    }

    /// Writes both rule sets now.
    pub fn save(&self) -> Option<AutosaveReport> {
        let store = self.store.as_ref()?;
        Some(save_rules(&self.autoloot, &self.organizer, store, true))
    }

    /// Drops everything still pending and saves rules. Moves already sent
    /// are not affected.
    pub fn shutdown(self) -> Option<AutosaveReport> {
        let dropped = self.autoloot.clear() + self.selection.cancel() + self.queue.clear().len();
        tracing::info!(target: "lootkit", dropped, "session shutdown");
        if self.loader.is_some() {
            // Rules never finished loading; saving now would overwrite them.
            return None;
        }
        self.save()
    }
}

/// Sends each popped request through the checks of the engine that made it.
struct Router<'a> {
    world: &'a dyn WorldLookup,
    autoloot: &'a AutoLootEngine,
    selection: &'a SelectionDispatcher,
}

impl DispatchHook for Router<'_> {
    fn resolve(&self, request: MoveRequest) -> Option<MoveRequest> {
        if request.source == RequestSource::Selection {
            return self.selection.resolve(request);
        }
        let item = self.world.item(request.serial)?;
        if request.destination.is_assigned() {
            self.world.item(request.destination)?;
            if item.container == Some(request.destination) {
                return None;
            }
        }
        Some(request)
    }

    fn finished(&self, request: &MoveRequest, dispatched: bool) {
        match request.source {
            RequestSource::AutoLoot => self.autoloot.finished(request, dispatched),
            RequestSource::Selection => self.selection.finished(request, dispatched),
            RequestSource::Organizer | RequestSource::Manual => {}
        }
    }
}
