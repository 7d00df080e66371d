//! Healing: per-target execution arena and the healing state machine.

mod arena;
mod executor;

pub use arena::{ActiveSlot, ExecutionArena};
pub use executor::HealingExecutor;
