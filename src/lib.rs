pub mod automation;
mod config;
pub mod dispatch;
pub mod entities;
pub mod error;
pub mod fixture;
pub mod net;
pub mod persistence;
pub mod session;
pub mod telemetry;
pub mod world;

pub use automation::autoloot::{AutoLootEngine, LootRule, LootSettings, RuleMatch};
pub use automation::organizer::{Organizer, OrganizerConfig, OrganizerItemRule};
pub use automation::selection::{Destination, SelectionDispatcher};
pub use config::{AppConfig, AutomationSettings};
pub use dispatch::queue::{
    DispatchHook, DispatchQueue, MoveRequest, PassThrough, RequestSource, TickOutcome,
};
pub use dispatch::tracking::{CooldownSet, DedupSet};
pub use entities::item::{ItemInfo, ItemProperties, Serial, ANY_GRAPHIC, ANY_HUE};
pub use error::{AppError, ConfigError, FixtureError, StoreError};
pub use net::packet::PacketWriter;
pub use net::protocol::{
    LoopbackProtocol, PacketProtocol, Protocol, ProtocolCall, RecordingProtocol,
};
pub use persistence::store::{LoadedRules, RuleStore};
pub use session::Session;
pub use world::events::WorldEvent;
pub use world::position::{DropPoint, Position};
pub use world::properties::{PropertyCache, PropertySource};
pub use world::state::{WorldLookup, WorldState};

use std::sync::Arc;

pub fn run(args: &[String]) -> Result<(), AppError> {
    let config = config::AppConfig::from_args(args)?;
    let log_path = telemetry::logging::init(&config.root, &config.settings.log_level)
        .map_err(AppError::Logging)?;
    let fixture = fixture::Fixture::load(&config.fixture)?;

    let world = Arc::new(fixture.build_world());
    let properties = Arc::new(PropertyCache::new(config.settings.property_cache_capacity));
    let protocol = Arc::new(LoopbackProtocol::new(Arc::clone(&world)));
    let mut session = Session::new(
        &config.settings,
        world.clone(),
        properties.clone(),
        protocol.clone(),
    );

    // Fixture rules replace the stored ones for this run; the store is
    // loaded up front so replay starts with rules installed.
    let store = RuleStore::from_root(&config.root);
    let mut loaded = store.load_all();
    if let Some(rules) = fixture.loot_rules.clone() {
        loaded.loot_rules = rules;
    }
    if let Some(organizers) = fixture.organizers.clone() {
        loaded.organizers = organizers;
    }
    session.install_rules(loaded);
    session.save_rules_to(store.clone());

    println!("lootkit: replay");
    println!("- fixture: {}", config.fixture.display());
    println!("- items: {}", world.len());
    println!("- frames: {} x {}ms", fixture.frames, fixture.frame_ms);
    println!("- log: {}", log_path.display());

    let sent = fixture::replay(&fixture, &world, &properties, &mut session);
    for dispatch in &sent {
        let request = dispatch.request;
        let point = if request.point.is_default() {
            String::new()
        } else {
            format!(" @ ({}, {}, {})", request.point.x, request.point.y, request.point.z)
        };
        println!(
            "{:>8}ms  {:<9} {} x{} -> {}{}",
            dispatch.at,
            format!("{:?}", request.source),
            request.serial,
            request.amount,
            request.destination,
            point
        );
    }
    println!("- dispatched: {} (protocol calls: {})", sent.len(), protocol.calls().len());

    if let Some(report) = session.shutdown() {
        if let Some(first) = report.errors.first() {
            println!("- rule save failed: {}", first);
        } else {
            println!("- rules saved to {}", store.dir().display());
        }
    }
    Ok(())
}
