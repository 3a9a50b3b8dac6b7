//! Resource-bounded admission control
//!
//! - [`ResourcePool`]: CPU slots, one per concurrently running step by default
//! - [`MemoryBudget`] / [`MemoryGate`]: per-container memory allocation and
//!   live checks against OS-reported available memory

pub mod memory;
pub mod pool;

pub use memory::{
    effective_concurrency, FixedMemory, MemoryBudget, MemoryGate, MemoryProbe, MemoryWait,
    SystemMemory, DEFAULT_FLOOR_MB, DEFAULT_HEADROOM,
};
pub use pool::{AcquireMode, Acquired, PoolError, PoolPermit, PoolStatus, ResourcePool};

use sysinfo::System;

/// Logical CPU count as seen by sysinfo, never below 1
pub fn detect_cpu_cores() -> usize {
    let mut sys = System::new();
    sys.refresh_cpu_all();
    let cores = sys.cpus().len();
    if cores > 0 {
        cores
    } else {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}
