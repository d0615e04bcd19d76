pub mod autoloot;
pub mod organizer;
pub mod selection;
