//! NodePoolHealth — a bounded-window tracker of registration outcomes per
//! pool, used to gate the `NodeRegistrationHealthy` status condition.
//!
//! Grounded in the sharded node registry's per-key locking idiom: instead of
//! a single global lock, each pool's ring lives behind its own map-shard
//! lock (via `DashMap`'s entry API), so updates to different pools never
//! contend with each other.

use dashmap::DashMap;
use uuid::Uuid;

/// Fixed ring capacity. Not configurable — see the design notes on why this
/// specific threshold was chosen.
const RING_CAPACITY: usize = 4;

/// Derived classification of a pool's recent registration outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Unknown,
    Healthy,
    Unhealthy,
}

/// A fixed-capacity circular buffer of registration outcomes. `true` means a
/// claim registered successfully; `false` means a registration failure.
#[derive(Debug, Clone, Default)]
struct Ring {
    slots: [Option<bool>; RING_CAPACITY],
    cursor: usize,
}

impl Ring {
    fn update(&mut self, outcome: bool) {
        self.slots[self.cursor] = Some(outcome);
        self.cursor = (self.cursor + 1) % RING_CAPACITY;
    }

    fn status(&self) -> Status {
        let trues = self.slots.iter().filter(|s| **s == Some(true)).count();
        let falses = self.slots.iter().filter(|s| **s == Some(false)).count();
        // Failures dominate: two or more failures anywhere in the window mark
        // the pool unhealthy even if a success also landed in the window.
        if falses >= 2 {
            Status::Unhealthy
        } else if trues >= 1 {
            Status::Healthy
        } else {
            Status::Unknown
        }
    }

    /// Reset and seed so the ring classifies as `status` on the next read.
    fn seed(&mut self, status: Status) {
        self.slots = [None; RING_CAPACITY];
        self.cursor = 0;
        match status {
            Status::Unknown => {}
            Status::Healthy => self.update(true),
            Status::Unhealthy => {
                self.update(false);
                self.update(false);
            }
        }
    }
}

/// Per-pool registration-health tracker. Cheap to clone (it's an `Arc`-like
/// handle over the shared map) and safe to share across reconciler workers.
#[derive(Debug, Default)]
pub struct NodePoolHealth {
    rings: DashMap<Uuid, Ring>,
}

impl NodePoolHealth {
    pub fn new() -> Self {
        Self { rings: DashMap::new() }
    }

    /// Record a registration outcome for `pool_uid`.
    pub fn update(&self, pool_uid: Uuid, outcome: bool) {
        self.rings.entry(pool_uid).or_default().update(outcome);
    }

    /// Current classification for `pool_uid`; `Unknown` if never observed.
    pub fn status(&self, pool_uid: Uuid) -> Status {
        self.rings.get(&pool_uid).map(|r| r.status()).unwrap_or(Status::Unknown)
    }

    /// Reset the ring and seed it so the next read reports `status` — used
    /// by the registration-health controller to rehydrate from a pool's
    /// persisted condition on restart, and to force `Unknown` on reset.
    pub fn set_status(&self, pool_uid: Uuid, status: Status) {
        self.rings.entry(pool_uid).or_default().seed(status);
    }

    /// Discard any ring entry for `pool_uid` — used when a pool's owning
    /// reference no longer resolves to the currently observed pool.
    pub fn forget(&self, pool_uid: Uuid) {
        self.rings.remove(&pool_uid);
    }

    /// Classification the ring *would* report after `outcome`, without
    /// mutating the shared state. Backed by a copy of the ring.
    pub fn dry_run(&self, pool_uid: Uuid, outcome: bool) -> Status {
        let mut copy = self.rings.get(&pool_uid).map(|r| r.clone()).unwrap_or_default();
        copy.update(outcome);
        copy.status()
    }
}
