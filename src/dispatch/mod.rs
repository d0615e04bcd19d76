pub mod queue;
pub mod tracking;
