//! Game simulation modules

pub mod action;
pub mod clock;
pub mod combat;
pub mod physics;
pub mod snapshot;
pub mod store;

pub use action::{ActionError, ActionOutcome, ActionProcessor};
pub use clock::{SimulationClock, SnapshotSink};
pub use physics::ArenaBounds;
pub use store::{MatchStore, PlayerState, StoreError};
