//! ResourceList — component-wise quantities for cpu, memory, ephemeral-storage,
//! pods, nodes, and extended resources.
//!
//! Quantities are stored as plain integers in each resource's natural base
//! unit (milli-cores for cpu, bytes for memory/ephemeral-storage, count for
//! everything else) so arithmetic never needs to round-trip through a
//! string-based quantity parser.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::{Add, Sub};

pub type Quantity = i64;

pub const CPU: &str = "cpu";
pub const MEMORY: &str = "memory";
pub const EPHEMERAL_STORAGE: &str = "ephemeral-storage";
pub const PODS: &str = "pods";
pub const NODES: &str = "nodes";

/// A component-wise map of resource name to quantity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceList(BTreeMap<String, Quantity>);

impl ResourceList {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (impl Into<String>, Quantity)>) -> Self {
        let mut m = BTreeMap::new();
        for (k, v) in pairs {
            m.insert(k.into(), v);
        }
        Self(m)
    }

    /// `BaseResources` for the counter: cpu/memory/ephemeral-storage/pods/nodes
    /// pinned to zero so a pool with no claims reports an explicit zero
    /// rather than an absent key.
    pub fn base() -> Self {
        Self::from_pairs([(CPU, 0), (MEMORY, 0), (EPHEMERAL_STORAGE, 0), (PODS, 0), (NODES, 0)])
    }

    pub fn get(&self, key: &str) -> Quantity {
        self.0.get(key).copied().unwrap_or(0)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Quantity) {
        self.0.insert(key.into(), value);
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Component-wise subtraction, floored at zero per key (never negative).
    pub fn subtract_floored(&self, other: &ResourceList) -> ResourceList {
        let mut out = self.clone();
        for (key, v) in other.0.iter() {
            let cur = out.get(key);
            out.set(key.clone(), (cur - v).max(0));
        }
        out
    }

    /// Subtract a single quantity from one key, floored at zero.
    pub fn subtract_key_floored(&self, key: &str, amount: Quantity) -> ResourceList {
        let mut out = self.clone();
        let cur = out.get(key);
        out.set(key, (cur - amount).max(0));
        out
    }

    /// Does `self` fit within `capacity` — i.e. is every requested quantity
    /// less than or equal to the corresponding capacity quantity?
    pub fn fits_within(&self, capacity: &ResourceList) -> bool {
        self.0.iter().all(|(k, v)| capacity.get(k) >= *v)
    }
}

/// Is `key` one of the baseline resources every node carries, as opposed to
/// a provider- or device-plugin-defined extended resource (e.g.
/// `nvidia.com/gpu`)?
pub fn is_base_resource(key: &str) -> bool {
    matches!(key, CPU | MEMORY | EPHEMERAL_STORAGE | PODS | NODES)
}

impl Add for ResourceList {
    type Output = ResourceList;
    fn add(self, rhs: ResourceList) -> ResourceList {
        &self + &rhs
    }
}

impl Add for &ResourceList {
    type Output = ResourceList;
    fn add(self, rhs: &ResourceList) -> ResourceList {
        let mut out = self.clone();
        for (key, v) in rhs.0.iter() {
            let cur = out.get(key);
            out.set(key.clone(), cur + v);
        }
        out
    }
}

impl Sub for &ResourceList {
    type Output = ResourceList;
    fn sub(self, rhs: &ResourceList) -> ResourceList {
        self.subtract_floored(rhs)
    }
}

/// Reserved capacity an instance type's kernel and system daemons consume,
/// plus the scheduler's eviction threshold. `Overhead.total()` is the sum of
/// the three, which is what gets subtracted from raw `Capacity`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Overhead {
    pub kube_reserved: ResourceList,
    pub system_reserved: ResourceList,
    pub eviction_threshold: ResourceList,
}

impl Overhead {
    pub fn total(&self) -> ResourceList {
        &(&self.kube_reserved + &self.system_reserved) + &self.eviction_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtract_floors_at_zero() {
        let capacity = ResourceList::from_pairs([("memory", 1000)]);
        let overhead = ResourceList::from_pairs([("memory", 5000)]);
        let result = capacity.subtract_floored(&overhead);
        assert_eq!(result.get("memory"), 0);
    }

    #[test]
    fn overhead_total_sums_components() {
        let overhead = Overhead {
            kube_reserved: ResourceList::from_pairs([(CPU, 100)]),
            system_reserved: ResourceList::from_pairs([(CPU, 50)]),
            eviction_threshold: ResourceList::from_pairs([(CPU, 25)]),
        };
        assert_eq!(overhead.total().get(CPU), 175);
    }

    #[test]
    fn fits_within_checks_every_key() {
        let request = ResourceList::from_pairs([(CPU, 100), (MEMORY, 200)]);
        let capacity = ResourceList::from_pairs([(CPU, 100), (MEMORY, 199)]);
        assert!(!request.fits_within(&capacity));

        let capacity = ResourceList::from_pairs([(CPU, 100), (MEMORY, 200)]);
        assert!(request.fits_within(&capacity));
    }

    #[test]
    fn base_pins_known_keys_to_zero() {
        let base = ResourceList::base();
        assert_eq!(base.get(CPU), 0);
        assert_eq!(base.get(NODES), 0);
    }

    #[test]
    fn is_base_resource_distinguishes_extended_resources() {
        assert!(is_base_resource(CPU));
        assert!(is_base_resource(NODES));
        assert!(!is_base_resource("nvidia.com/gpu"));
    }
}
