//! Scheduler facade and dispatcher.
//!
//! Split into focused submodules:
//! - `core`: Scheduler struct, builder, shared state and accessors
//! - `scheduling`: schedule / cancel / priority update / queries
//! - `execution`: dispatch cycle and worker body
//! - `lifecycle`: start, stop, shutdown and the periodic dispatcher thread

mod core;
mod execution;
mod lifecycle;
mod scheduling;

pub use self::core::{Scheduler, SchedulerBuilder};
