//! The worker pool: fixed slot table, per-slot state machine, reactive
//! scheduler, and the registry of live process/timer resources.

mod config;
mod engine;
mod registry;
mod slot;

pub use config::PoolConfig;
pub use engine::{EngineError, EngineHandle, EngineSnapshot, PoolEngine};
pub use registry::{SlotRegistry, TimerHandle};
pub use slot::{SlotState, WorkerSlot};
