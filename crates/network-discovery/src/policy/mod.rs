//! Policy lifecycle: the registry of running policies and the runner that
//! executes one policy on its schedule.

pub mod manager;
pub mod runner;

pub use manager::{PolicyManager, CAPABILITIES};
pub use runner::{
    to_entities, PolicyRunner, RunContext, RunOutcome, RunnerSettings, RunnerState,
    DEFAULT_TIMEOUT,
};
