pub mod events;
pub mod position;
pub mod properties;
pub mod state;
