use crate::termination::ShutdownSignal;
use crate::util::kv::KvWriter;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Not enough free slots right now (or before the wait timed out)
    #[error("resource pool exhausted: requested {requested}, available {available}")]
    Exhausted { requested: usize, available: usize },

    #[error("requested {requested} slots but pool capacity is {capacity}")]
    ExceedsCapacity { requested: usize, capacity: usize },

    #[error("cannot acquire zero slots")]
    ZeroSlots,

    #[error("acquire cancelled by shutdown")]
    Cancelled,
}

impl PoolError {
    /// Value reported as `acquire_status`
    pub fn acquire_status(&self) -> &'static str {
        match self {
            PoolError::Exhausted { .. } => "exhausted",
            PoolError::ExceedsCapacity { .. } | PoolError::ZeroSlots => "invalid",
            PoolError::Cancelled => "cancelled",
        }
    }

    pub fn to_kv(&self) -> String {
        let mut w = KvWriter::new();
        w.field("acquire_status", self.acquire_status());
        w.field("error", self);
        w.finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireMode {
    /// Fail with [`PoolError::Exhausted`] instead of waiting
    NonBlocking,
    /// Wait for releases, re-checking at least every `poll_interval`
    Blocking {
        timeout: Duration,
        poll_interval: Duration,
    },
}

/// Successful acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acquired {
    pub acquired: usize,
}

impl Acquired {
    pub fn to_kv(&self) -> String {
        let mut w = KvWriter::new();
        w.field("acquire_status", "acquired");
        w.field("acquired", self.acquired);
        w.finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub capacity: usize,
    pub available: usize,
    pub in_use: usize,
}

impl PoolStatus {
    pub fn to_kv(&self) -> String {
        let mut w = KvWriter::new();
        w.field("capacity", self.capacity)
            .field("available", self.available)
            .field("in_use", self.in_use);
        w.finish()
    }
}

#[derive(Debug)]
struct Counters {
    available: usize,
    in_use: usize,
}

/// CPU-slot admission control for one orchestrator run
///
/// Counters live behind a mutex; `available + in_use == capacity` holds
/// whenever the lock is released.
#[derive(Debug)]
pub struct ResourcePool {
    capacity: usize,
    counters: Mutex<Counters>,
    released: Notify,
}

impl ResourcePool {
    /// Sizes the pool from the requested capacity and the detected CPU count
    pub fn new(requested: Option<usize>) -> Self {
        Self::with_cpu_cores(requested, super::detect_cpu_cores())
    }

    /// `capacity = max(1, min(requested, cpu_cores))`; no request means all cores
    pub fn with_cpu_cores(requested: Option<usize>, cpu_cores: usize) -> Self {
        let cpu_cores = cpu_cores.max(1);
        let capacity = requested.unwrap_or(cpu_cores).min(cpu_cores).max(1);
        debug!(capacity, cpu_cores, ?requested, "Resource pool initialised");
        Self {
            capacity,
            counters: Mutex::new(Counters {
                available: capacity,
                in_use: 0,
            }),
            released: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // A panic while holding the lock cannot leave the counters half-updated,
    // so a poisoned mutex is still safe to use.
    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn status(&self) -> PoolStatus {
        let c = self.lock();
        PoolStatus {
            capacity: self.capacity,
            available: c.available,
            in_use: c.in_use,
        }
    }

    fn check_request(&self, n: usize) -> Result<(), PoolError> {
        if n == 0 {
            return Err(PoolError::ZeroSlots);
        }
        if n > self.capacity {
            return Err(PoolError::ExceedsCapacity {
                requested: n,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Non-blocking acquire
    pub fn try_acquire(&self, n: usize) -> Result<Acquired, PoolError> {
        self.check_request(n)?;
        let mut c = self.lock();
        if c.available >= n {
            c.available -= n;
            c.in_use += n;
            trace!(acquired = n, available = c.available, "Pool slots acquired");
            Ok(Acquired { acquired: n })
        } else {
            Err(PoolError::Exhausted {
                requested: n,
                available: c.available,
            })
        }
    }

    pub async fn acquire(
        &self,
        n: usize,
        mode: AcquireMode,
        shutdown: &ShutdownSignal,
    ) -> Result<Acquired, PoolError> {
        let (timeout, poll_interval) = match mode {
            AcquireMode::NonBlocking => return self.try_acquire(n),
            AcquireMode::Blocking {
                timeout,
                poll_interval,
            } => (timeout, poll_interval),
        };

        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.released.notified();
            match self.try_acquire(n) {
                Ok(acquired) => return Ok(acquired),
                Err(PoolError::Exhausted { available, .. }) => {
                    if shutdown.is_triggered() {
                        return Err(PoolError::Cancelled);
                    }
                    let now = Instant::now();
                    if now >= deadline {
                        warn!(requested = n, available, "Timed out waiting for pool slots");
                        return Err(PoolError::Exhausted {
                            requested: n,
                            available,
                        });
                    }
                    let wait = poll_interval.min(deadline - now);
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep(wait) => {}
                        _ = shutdown.triggered() => return Err(PoolError::Cancelled),
                    }
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Acquire returning a permit that gives the slots back when dropped
    pub async fn acquire_permit(
        self: &Arc<Self>,
        n: usize,
        mode: AcquireMode,
        shutdown: &ShutdownSignal,
    ) -> Result<PoolPermit, PoolError> {
        let acquired = self.acquire(n, mode, shutdown).await?;
        Ok(PoolPermit {
            pool: Arc::clone(self),
            slots: acquired.acquired,
        })
    }

    /// Returns slots to the pool, clamped to capacity. Returns how many were
    /// actually returned.
    pub fn release(&self, n: usize) -> usize {
        let returned = {
            let mut c = self.lock();
            let returned = n.min(c.in_use);
            if returned < n {
                warn!(
                    requested = n,
                    in_use = c.in_use,
                    "Release exceeds slots in use; clamping to capacity"
                );
            }
            c.in_use -= returned;
            c.available += returned;
            trace!(released = returned, available = c.available, "Pool slots released");
            returned
        };
        if returned > 0 {
            self.released.notify_waiters();
        }
        returned
    }
}

/// Slots held by one step; released on drop
#[derive(Debug)]
pub struct PoolPermit {
    pool: Arc<ResourcePool>,
    slots: usize,
}

impl PoolPermit {
    pub fn slots(&self) -> usize {
        self.slots
    }
}

impl Drop for PoolPermit {
    fn drop(&mut self) {
        self.pool.release(self.slots);
    }
}
