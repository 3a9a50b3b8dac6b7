//! Memory budgeting and live memory gating

use crate::termination::ShutdownSignal;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sysinfo::System;
use tokio::time::Instant;
use tracing::{debug, info};

const BYTES_PER_MB: u64 = 1024 * 1024;

pub const DEFAULT_HEADROOM: f64 = 0.20;
pub const DEFAULT_FLOOR_MB: u64 = 256;

/// Source of OS memory figures
pub trait MemoryProbe: Send + Sync {
    fn total_mb(&self) -> u64;
    fn available_mb(&self) -> u64;
}

/// Live figures from the host via sysinfo
pub struct SystemMemory {
    sys: Mutex<System>,
}

impl SystemMemory {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        Self {
            sys: Mutex::new(sys),
        }
    }
}

impl Default for SystemMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SystemMemory {
    fn total_mb(&self) -> u64 {
        let sys = self.sys.lock().unwrap_or_else(|e| e.into_inner());
        sys.total_memory() / BYTES_PER_MB
    }

    fn available_mb(&self) -> u64 {
        let mut sys = self.sys.lock().unwrap_or_else(|e| e.into_inner());
        sys.refresh_memory();
        sys.available_memory() / BYTES_PER_MB
    }
}

/// Fixed figures, adjustable at runtime; for tests and dry runs
#[derive(Debug)]
pub struct FixedMemory {
    total_mb: u64,
    available_mb: AtomicU64,
}

impl FixedMemory {
    pub fn new(total_mb: u64, available_mb: u64) -> Self {
        Self {
            total_mb,
            available_mb: AtomicU64::new(available_mb),
        }
    }

    pub fn set_available_mb(&self, mb: u64) {
        self.available_mb.store(mb, Ordering::SeqCst);
    }
}

impl MemoryProbe for FixedMemory {
    fn total_mb(&self) -> u64 {
        self.total_mb
    }

    fn available_mb(&self) -> u64 {
        self.available_mb.load(Ordering::SeqCst)
    }
}

/// How memory is split between concurrently running containers
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MemoryBudget {
    pub total_mb: u64,
    /// Fraction withheld from containers, in `[0, 1]`
    pub headroom: f64,
    pub parallelism: usize,
    pub floor_mb: u64,
}

impl MemoryBudget {
    pub fn new(total_mb: u64, headroom: f64, parallelism: usize, floor_mb: u64) -> Self {
        let headroom = if headroom.is_finite() {
            headroom.clamp(0.0, 1.0)
        } else {
            DEFAULT_HEADROOM
        };
        Self {
            total_mb,
            headroom,
            parallelism: parallelism.max(1),
            floor_mb: floor_mb.max(1),
        }
    }

    /// Memory left for containers once headroom is withheld from `mb`
    pub fn usable_mb(&self, mb: u64) -> u64 {
        (mb as f64 * (1.0 - self.headroom)).floor() as u64
    }

    /// `total * (1 - headroom) / parallelism`, never below the floor
    pub fn per_container_mb(&self) -> u64 {
        let share = self.usable_mb(self.total_mb) / self.parallelism as u64;
        share.max(self.floor_mb)
    }

    /// An explicitly configured allocation wins over the computed one, but is
    /// still floored
    pub fn resolve(&self, configured_mb: Option<u64>) -> u64 {
        match configured_mb {
            Some(mb) if mb > 0 => mb.max(self.floor_mb),
            _ => self.per_container_mb(),
        }
    }
}

/// `min(cpu_limit, memory_limit)`, never below 1
pub fn effective_concurrency(
    cpu_limit: usize,
    available_mb: u64,
    headroom: f64,
    per_container_mb: u64,
) -> usize {
    let usable = MemoryBudget::new(available_mb, headroom, 1, 1).usable_mb(available_mb);
    let memory_limit = (usable / per_container_mb.max(1)) as usize;
    cpu_limit.max(1).min(memory_limit.max(1))
}

/// Outcome of [`MemoryGate::wait_for_memory`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryWait {
    pub available: bool,
    pub attempts: u32,
    pub available_mb: u64,
}

pub struct MemoryGate {
    probe: Arc<dyn MemoryProbe>,
    poll_interval: Duration,
}

impl MemoryGate {
    pub fn new(probe: Arc<dyn MemoryProbe>, poll_interval: Duration) -> Self {
        Self {
            probe,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    pub fn probe(&self) -> &Arc<dyn MemoryProbe> {
        &self.probe
    }

    pub fn memory_available(&self, required_mb: u64) -> bool {
        self.probe.available_mb() >= required_mb
    }

    /// Polls until `required_mb` is free, the timeout elapses, or shutdown
    pub async fn wait_for_memory(
        &self,
        required_mb: u64,
        timeout: Duration,
        shutdown: &ShutdownSignal,
    ) -> MemoryWait {
        let deadline = Instant::now() + timeout;
        let mut attempts = 0;
        loop {
            attempts += 1;
            let available_mb = self.probe.available_mb();
            if available_mb >= required_mb {
                debug!(required_mb, available_mb, attempts, "Memory available");
                return MemoryWait {
                    available: true,
                    attempts,
                    available_mb,
                };
            }

            let now = Instant::now();
            if now >= deadline || shutdown.is_triggered() {
                info!(
                    required_mb,
                    available_mb, attempts, "Gave up waiting for memory"
                );
                return MemoryWait {
                    available: false,
                    attempts,
                    available_mb,
                };
            }

            let wait = self.poll_interval.min(deadline - now);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.triggered() => {}
            }
        }
    }
}
