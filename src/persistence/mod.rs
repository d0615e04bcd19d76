pub mod autosave;
pub mod loader;
pub mod store;
