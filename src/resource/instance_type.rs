//! InstanceType — a provider-published shape of compute capacity, together
//! with its offerings (purchase option x zone x price) and its memoized
//! Allocatable capacity.

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::offering::{Offering, Offerings};
use super::requirements::Requirements;
use super::resource_list::{Overhead, ResourceList, MEMORY};
use crate::error::{Error, Result};

/// A published instance shape. `Allocatable` is derived from `Capacity` and
/// `Overhead` the first time it's read and cached for the lifetime of this
/// value — callers that need a fresh figure (e.g. after a provider refresh)
/// construct a new `InstanceType` rather than mutate this one in place.
#[derive(Debug, Serialize, Deserialize)]
pub struct InstanceType {
    pub name: String,
    pub requirements: Requirements,
    pub offerings: Vec<Offering>,
    pub capacity: ResourceList,
    pub overhead: Overhead,

    #[serde(skip)]
    allocatable: OnceCell<ResourceList>,
}

impl Clone for InstanceType {
    fn clone(&self) -> Self {
        // Deliberately does not clone the memoized value: a clone is a
        // logically distinct instance and must recompute its own cache.
        Self {
            name: self.name.clone(),
            requirements: self.requirements.clone(),
            offerings: self.offerings.clone(),
            capacity: self.capacity.clone(),
            overhead: self.overhead.clone(),
            allocatable: OnceCell::new(),
        }
    }
}

impl InstanceType {
    pub fn new(
        name: impl Into<String>,
        requirements: Requirements,
        offerings: Vec<Offering>,
        capacity: ResourceList,
        overhead: Overhead,
    ) -> Self {
        Self {
            name: name.into(),
            requirements,
            offerings,
            capacity,
            overhead,
            allocatable: OnceCell::new(),
        }
    }

    /// Capacity minus overhead, with any `hugepages-*` capacity further
    /// subtracted from memory. Never negative in any component. Computed
    /// once and cached.
    pub fn allocatable(&self) -> &ResourceList {
        self.allocatable.get_or_init(|| self.compute_allocatable())
    }

    fn compute_allocatable(&self) -> ResourceList {
        let mut allocatable = self.capacity.subtract_floored(&self.overhead.total());

        let hugepages_total: i64 = self
            .capacity
            .keys()
            .filter(|k| k.starts_with("hugepages-"))
            .map(|k| self.capacity.get(k))
            .sum();

        if hugepages_total > 0 {
            allocatable = allocatable.subtract_key_floored(MEMORY, hugepages_total);
        }

        allocatable
    }

    fn offerings(&self) -> Offerings {
        Offerings::new(self.offerings.clone())
    }
}

/// Whether `Truncate` must fail when a truncation can't satisfy min-values,
/// or should proceed anyway ("best effort").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinValuesPolicy {
    Strict,
    BestEffort,
}

/// An ordered list of instance types, queryable the way the selection engine
/// needs: cheapest-first ordering, min-values accounting, truncation.
#[derive(Debug, Clone, Default)]
pub struct InstanceTypes(pub Vec<InstanceType>);

impl InstanceTypes {
    pub fn new(types: Vec<InstanceType>) -> Self {
        Self(types)
    }

    pub fn compatible(&self, requirements: &Requirements) -> InstanceTypes {
        InstanceTypes(
            self.0
                .iter()
                .filter(|it| it.offerings().available().has_compatible(requirements))
                .cloned()
                .collect(),
        )
    }

    /// Stable sort ascending by the minimum price among each type's available
    /// & compatible offerings; a type with no qualifying offering sorts as
    /// `+infinity` (i.e. last).
    pub fn order_by_price(&self, requirements: &Requirements) -> InstanceTypes {
        let mut ordered = self.0.clone();
        ordered.sort_by(|a, b| {
            let pa = a.offerings().min_compatible_available_price(requirements);
            let pb = b.offerings().min_compatible_available_price(requirements);
            pa.total_cmp(&pb)
        });
        InstanceTypes(ordered)
    }

    /// For each requirement in `requirements` carrying `min_values`, find the
    /// shortest prefix (in the list's current order) at which the number of
    /// distinct values instance types expose under that key reaches the
    /// threshold. Returns the largest such prefix length across all
    /// min-values requirements, plus, on failure, which keys never reached
    /// their threshold and how many distinct values they did accumulate.
    pub fn satisfies_min_values(&self, requirements: &Requirements) -> Result<usize> {
        let min_value_reqs: Vec<_> = requirements
            .iter()
            .filter_map(|r| r.min_values.map(|m| (r.key.clone(), m)))
            .collect();

        if min_value_reqs.is_empty() {
            return Ok(self.0.len());
        }

        let mut seen: HashMap<String, std::collections::HashSet<String>> =
            min_value_reqs.iter().map(|(k, _)| (k.clone(), Default::default())).collect();
        let mut needed_prefix = 0;
        let mut satisfied_at: HashMap<String, usize> = HashMap::new();

        for (idx, it) in self.0.iter().enumerate() {
            for (key, min) in &min_value_reqs {
                if satisfied_at.contains_key(key) {
                    continue;
                }
                if let Some(req) = it.requirements.get(key) {
                    for v in &req.values {
                        seen.get_mut(key).unwrap().insert(v.clone());
                    }
                }
                if seen[key].len() >= *min {
                    satisfied_at.insert(key.clone(), idx + 1);
                }
            }
            if satisfied_at.len() == min_value_reqs.len() {
                needed_prefix = idx + 1;
                break;
            }
        }

        if satisfied_at.len() < min_value_reqs.len() {
            let violators: std::collections::BTreeMap<String, usize> = min_value_reqs
                .iter()
                .filter(|(k, _)| !satisfied_at.contains_key(k))
                .map(|(k, _)| (k.clone(), seen[k].len()))
                .collect();
            return Err(Error::MinValuesViolated { violators });
        }

        Ok(needed_prefix)
    }

    /// The cheapest `max_items` instance types (by `order_by_price`); unless
    /// `policy` is best-effort, fails if that truncation can't satisfy
    /// min-values requirements.
    pub fn truncate(
        &self,
        requirements: &Requirements,
        max_items: usize,
        policy: MinValuesPolicy,
    ) -> Result<InstanceTypes> {
        let ordered = self.order_by_price(requirements);
        let truncated = InstanceTypes(ordered.0.into_iter().take(max_items).collect());

        match truncated.satisfies_min_values(requirements) {
            Ok(_) => Ok(truncated),
            Err(e) if policy == MinValuesPolicy::BestEffort => {
                let _ = e;
                Ok(truncated)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::resource_list::CPU;

    fn basic(capacity: ResourceList, overhead: Overhead) -> InstanceType {
        InstanceType::new("m5.large", Requirements::new(), vec![], capacity, overhead)
    }

    #[test]
    fn allocatable_subtracts_overhead() {
        let capacity = ResourceList::from_pairs([(CPU, 2000), (MEMORY, 8_000_000_000)]);
        let overhead = Overhead {
            kube_reserved: ResourceList::from_pairs([(MEMORY, 500_000_000)]),
            system_reserved: ResourceList::from_pairs([(MEMORY, 100_000_000)]),
            eviction_threshold: ResourceList::from_pairs([(MEMORY, 100_000_000)]),
        };
        let it = basic(capacity, overhead);
        assert_eq!(it.allocatable().get(MEMORY), 7_300_000_000);
        assert_eq!(it.allocatable().get(CPU), 2000);
    }

    #[test]
    fn allocatable_subtracts_hugepages_from_memory() {
        let capacity = ResourceList::from_pairs([
            (MEMORY, 8_000_000_000),
            ("hugepages-2Mi", 1_000_000_000),
        ]);
        let it = basic(capacity, Overhead::default());
        assert_eq!(it.allocatable().get(MEMORY), 7_000_000_000);
    }

    #[test]
    fn allocatable_never_negative() {
        let capacity = ResourceList::from_pairs([(MEMORY, 100)]);
        let overhead = Overhead {
            kube_reserved: ResourceList::from_pairs([(MEMORY, 1000)]),
            ..Default::default()
        };
        let it = basic(capacity, overhead);
        assert_eq!(it.allocatable().get(MEMORY), 0);
    }

    #[test]
    fn allocatable_is_memoized() {
        let it = basic(ResourceList::from_pairs([(MEMORY, 100)]), Overhead::default());
        let first = it.allocatable() as *const ResourceList;
        let second = it.allocatable() as *const ResourceList;
        assert_eq!(first, second);
    }

    #[test]
    fn clone_does_not_share_memoized_slot() {
        let it = basic(ResourceList::from_pairs([(MEMORY, 100)]), Overhead::default());
        let _ = it.allocatable();
        let cloned = it.clone();
        // a fresh clone must recompute rather than reuse the original's cell
        assert_eq!(cloned.allocatable().get(MEMORY), 100);
        assert_ne!(
            it.allocatable() as *const ResourceList,
            cloned.allocatable() as *const ResourceList
        );
    }

    fn with_offering(name: &str, zone: &str, price: f64) -> InstanceType {
        InstanceType::new(
            name,
            Requirements::new(),
            vec![Offering::new(zone, crate::resource::offering::CapacityType::OnDemand, price)],
            ResourceList::new(),
            Overhead::default(),
        )
    }

    #[test]
    fn order_by_price_is_ascending() {
        let types = InstanceTypes::new(vec![
            with_offering("big", "us-east-1a", 2.0),
            with_offering("small", "us-east-1a", 0.5),
            with_offering("medium", "us-east-1a", 1.0),
        ]);
        let ordered = types.order_by_price(&Requirements::new());
        let names: Vec<_> = ordered.0.iter().map(|it| it.name.as_str()).collect();
        assert_eq!(names, vec!["small", "medium", "big"]);
    }

    #[test]
    fn order_by_price_puts_no_qualifying_offering_last() {
        let mut req = Requirements::new();
        req.insert(crate::resource::requirements::Requirement::new(
            crate::resource::offering::ZONE_KEY,
            crate::resource::requirements::Operator::In,
            vec!["us-west-2a".into()],
        ));
        let types = InstanceTypes::new(vec![
            with_offering("matches", "us-west-2a", 5.0),
            with_offering("no-match", "us-east-1a", 0.1),
        ]);
        let ordered = types.order_by_price(&req);
        assert_eq!(ordered.0[0].name, "matches");
        assert_eq!(ordered.0[1].name, "no-match");
    }

    #[test]
    fn satisfies_min_values_finds_shortest_prefix() {
        let mut req = Requirements::new();
        req.insert(
            crate::resource::requirements::Requirement::new(
                "node.kubernetes.io/instance-type-family",
                crate::resource::requirements::Operator::Exists,
                vec![],
            )
            .with_min_values(2),
        );

        let mut a = with_offering("a", "us-east-1a", 1.0);
        a.requirements.insert(crate::resource::requirements::Requirement::new(
            "node.kubernetes.io/instance-type-family",
            crate::resource::requirements::Operator::In,
            vec!["m5".into()],
        ));
        let mut b = with_offering("b", "us-east-1a", 2.0);
        b.requirements.insert(crate::resource::requirements::Requirement::new(
            "node.kubernetes.io/instance-type-family",
            crate::resource::requirements::Operator::In,
            vec!["c5".into()],
        ));
        let c = with_offering("c", "us-east-1a", 3.0);

        let types = InstanceTypes::new(vec![a, b, c]);
        let needed = types.satisfies_min_values(&req).unwrap();
        assert_eq!(needed, 2);
    }

    #[test]
    fn satisfies_min_values_errors_naming_offending_keys() {
        let mut req = Requirements::new();
        req.insert(
            crate::resource::requirements::Requirement::new(
                "node.kubernetes.io/instance-type-family",
                crate::resource::requirements::Operator::Exists,
                vec![],
            )
            .with_min_values(5),
        );
        let types = InstanceTypes::new(vec![with_offering("only-one", "us-east-1a", 1.0)]);
        let err = types.satisfies_min_values(&req).unwrap_err();
        match err {
            Error::MinValuesViolated { violators } => {
                assert_eq!(
                    violators.get("node.kubernetes.io/instance-type-family"),
                    Some(&0)
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn truncate_is_a_permutation_prefix_of_order_by_price() {
        let types = InstanceTypes::new(vec![
            with_offering("big", "us-east-1a", 2.0),
            with_offering("small", "us-east-1a", 0.5),
            with_offering("medium", "us-east-1a", 1.0),
        ]);
        let req = Requirements::new();
        let truncated = types.truncate(&req, 2, MinValuesPolicy::Strict).unwrap();
        assert_eq!(truncated.0.len(), 2);
        assert_eq!(truncated.0[0].name, "small");
        assert_eq!(truncated.0[1].name, "medium");
    }

    #[test]
    fn truncate_best_effort_proceeds_despite_min_values_violation() {
        let mut req = Requirements::new();
        req.insert(
            crate::resource::requirements::Requirement::new(
                "node.kubernetes.io/instance-type-family",
                crate::resource::requirements::Operator::Exists,
                vec![],
            )
            .with_min_values(5),
        );
        let types = InstanceTypes::new(vec![with_offering("only-one", "us-east-1a", 1.0)]);
        let truncated = types.truncate(&req, 1, MinValuesPolicy::BestEffort).unwrap();
        assert_eq!(truncated.0.len(), 1);

        let err = types.truncate(&req, 1, MinValuesPolicy::Strict).unwrap_err();
        assert!(matches!(err, Error::MinValuesViolated { .. }));
    }
}
