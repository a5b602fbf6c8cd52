//! Data models for snapshots, presence state, events, and mod listings.

pub mod event;
pub mod mods;
pub mod presence;
pub mod snapshot;

pub use event::*;
pub use mods::*;
pub use presence::*;
pub use snapshot::*;
