//! Test harness
//!
//! In-memory engine, canned avatar loader and the randomized simulator used by
//! the unit tests, the integration tests and the `checkin-sim` binary.

mod engine;
mod loader;
mod simulator;

pub use engine::{RecordingEngine, ResolvedMarker};
pub use loader::{solid_picture, StaticAvatarLoader};
pub use simulator::{
    run_simulator, SimulatorConfig, SimulatorReport, SimulatorStats, Violation,
};
