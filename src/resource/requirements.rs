//! Requirements — the scheduling-constraint value type shared by NodePools,
//! NodeClaims, and InstanceType/Offering labels.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Well-known label keys the engine treats specially for compatibility
/// purposes (`AllowUndefinedWellKnownLabels`): a key absent from one side of a
/// comparison is never itself a source of incompatibility.
pub const WELL_KNOWN_LABELS: &[&str] = &[
    "kubernetes.io/arch",
    "kubernetes.io/os",
    "node.kubernetes.io/instance-type",
    "topology.kubernetes.io/zone",
    "karpenter.sh/capacity-type",
    "karpenter.sh/nodepool",
];

pub fn is_well_known(key: &str) -> bool {
    WELL_KNOWN_LABELS.contains(&key)
}

/// Comparison semantics for a single requirement key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
    Gt,
    Lt,
}

/// A single requirement: `key` `operator` `values`, with an optional
/// `min_values` constraint used by instance-type-set selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requirement {
    pub key: String,
    pub operator: Operator,
    pub values: Vec<String>,
    pub min_values: Option<usize>,
}

impl Requirement {
    pub fn new(key: impl Into<String>, operator: Operator, values: Vec<String>) -> Self {
        Self {
            key: key.into(),
            operator,
            values,
            min_values: None,
        }
    }

    pub fn with_min_values(mut self, min_values: usize) -> Self {
        self.min_values = Some(min_values);
        self
    }

    /// Validate the shape invariants from the data model: `Gt`/`Lt` carry
    /// exactly one non-negative integer, `In`/`NotIn` carry at least one value.
    pub fn validate(&self) -> Result<()> {
        match self.operator {
            Operator::Gt | Operator::Lt => {
                if self.values.len() != 1 {
                    return Err(Error::RequirementParse(format!(
                        "{} requirement on {:?} must carry exactly one value",
                        if self.operator == Operator::Gt { "Gt" } else { "Lt" },
                        self.key
                    )));
                }
                let n: i64 = self.values[0].parse().map_err(|_| {
                    Error::RequirementParse(format!(
                        "{:?} on key {} is not an integer",
                        self.values[0], self.key
                    ))
                })?;
                if n < 0 {
                    return Err(Error::RequirementParse(format!(
                        "Gt/Lt bound on key {} must be non-negative, got {}",
                        self.key, n
                    )));
                }
            }
            Operator::In | Operator::NotIn => {
                if self.values.is_empty() {
                    return Err(Error::RequirementParse(format!(
                        "In/NotIn requirement on key {} must carry at least one value",
                        self.key
                    )));
                }
            }
            Operator::Exists | Operator::DoesNotExist => {}
        }
        Ok(())
    }

    /// Does this requirement admit the given concrete label value?
    pub fn has(&self, value: &str) -> bool {
        match self.operator {
            Operator::In => self.values.iter().any(|v| v == value),
            Operator::NotIn => !self.values.iter().any(|v| v == value),
            Operator::Exists => true,
            Operator::DoesNotExist => false,
            Operator::Gt => bound(&self.values).map(|b| parse(value).map(|v| v > b).unwrap_or(false)).unwrap_or(false),
            Operator::Lt => bound(&self.values).map(|b| parse(value).map(|v| v < b).unwrap_or(false)).unwrap_or(false),
        }
    }
}

fn parse(value: &str) -> Option<i64> {
    value.parse().ok()
}

fn bound(values: &[String]) -> Option<i64> {
    values.first().and_then(|v| v.parse().ok())
}

/// An ordered collection of requirements keyed by label key — ordering is
/// preserved (the data model calls for "ordered map key -> {operator,
/// values, minValues}") but lookups are still by key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Requirements(IndexMap<String, Requirement>);

impl Requirements {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    pub fn from_iter(reqs: impl IntoIterator<Item = Requirement>) -> Self {
        let mut m = IndexMap::new();
        for r in reqs {
            m.insert(r.key.clone(), r);
        }
        Self(m)
    }

    pub fn insert(&mut self, requirement: Requirement) {
        self.0.insert(requirement.key.clone(), requirement);
    }

    pub fn get(&self, key: &str) -> Option<&Requirement> {
        self.0.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Requirement> {
        self.0.values()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Two requirement sets are compatible iff every key shared between them
    /// admits at least one common value.
    pub fn compatible(&self, other: &Requirements) -> bool {
        for (key, a) in self.0.iter() {
            if let Some(b) = other.get(key) {
                if !pair_compatible(a, b) {
                    return false;
                }
            }
        }
        true
    }
}

/// Pairwise compatibility between two requirements on the same key: is there
/// at least one value both would admit?
fn pair_compatible(a: &Requirement, b: &Requirement) -> bool {
    use Operator::*;
    match (a.operator, b.operator) {
        (DoesNotExist, DoesNotExist) => true,
        (DoesNotExist, _) | (_, DoesNotExist) => false,
        (Exists, Exists) => true,
        (Exists, _) | (_, Exists) => true,
        (In, In) => a.values.iter().any(|v| b.values.contains(v)),
        (In, NotIn) => a.values.iter().any(|v| !b.values.contains(v)),
        (NotIn, In) => b.values.iter().any(|v| !a.values.contains(v)),
        (NotIn, NotIn) => true,
        (Gt, Lt) => match (bound(&a.values), bound(&b.values)) {
            (Some(g), Some(l)) => g + 1 < l,
            _ => false,
        },
        (Lt, Gt) => pair_compatible(b, a),
        (Gt, Gt) | (Lt, Lt) => true,
        (Gt, In) => match bound(&a.values) {
            Some(g) => b.values.iter().any(|v| parse(v).map(|n| n > g).unwrap_or(false)),
            None => false,
        },
        (In, Gt) => pair_compatible(b, a),
        (Lt, In) => match bound(&a.values) {
            Some(l) => b.values.iter().any(|v| parse(v).map(|n| n < l).unwrap_or(false)),
            None => false,
        },
        (In, Lt) => pair_compatible(b, a),
        (Gt, NotIn) | (NotIn, Gt) | (Lt, NotIn) | (NotIn, Lt) => true,
    }
}
