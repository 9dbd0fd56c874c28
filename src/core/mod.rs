pub mod common;
pub mod events;
pub mod node;
pub mod persistent_storage;
pub mod pod;
pub mod scheduler;
pub mod snapshot;
