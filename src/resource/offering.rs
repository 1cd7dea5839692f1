//! Offering — a priced, zoned, purchase-option-specific way to buy a given
//! InstanceType, plus the price-overlay grammar and offering-set queries.

use serde::{Deserialize, Serialize};

use super::requirements::{Operator, Requirement, Requirements};
use crate::error::{Error, Result};

pub const CAPACITY_TYPE_KEY: &str = "karpenter.sh/capacity-type";
pub const ZONE_KEY: &str = "topology.kubernetes.io/zone";

/// Purchase option, ordered from highest to lowest selection priority:
/// reserved capacity is used first (it's already paid for), then spot
/// (cheapest on-demand alternative), then on-demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CapacityType {
    Reserved,
    Spot,
    OnDemand,
}

impl CapacityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapacityType::Reserved => "reserved",
            CapacityType::Spot => "spot",
            CapacityType::OnDemand => "on-demand",
        }
    }

    /// Priority order for `WorstLaunchPrice`: reserved, then spot, then
    /// on-demand.
    pub fn priority_order() -> [CapacityType; 3] {
        [CapacityType::Reserved, CapacityType::Spot, CapacityType::OnDemand]
    }
}

/// A single purchasable unit of an InstanceType: a zone, a capacity type, a
/// price, and (for reserved offerings) remaining reservation capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offering {
    pub requirements: Requirements,
    pub price: f64,
    pub available: bool,
    /// Only set for reserved offerings; decremented on each consumption and
    /// flips `available` to false at zero.
    pub reservation_capacity: Option<i64>,
}

impl Offering {
    pub fn new(zone: impl Into<String>, capacity_type: CapacityType, price: f64) -> Self {
        let mut requirements = Requirements::new();
        requirements.insert(Requirement::new(ZONE_KEY, Operator::In, vec![zone.into()]));
        requirements.insert(Requirement::new(
            CAPACITY_TYPE_KEY,
            Operator::In,
            vec![capacity_type.as_str().to_string()],
        ));
        Self {
            requirements,
            price,
            available: true,
            reservation_capacity: None,
        }
    }

    pub fn reserved(zone: impl Into<String>, price: f64, reservation_id: impl Into<String>, capacity: i64) -> Self {
        let mut offering = Self::new(zone, CapacityType::Reserved, price);
        offering
            .requirements
            .insert(Requirement::new("reservation-id", Operator::In, vec![reservation_id.into()]));
        offering.reservation_capacity = Some(capacity);
        offering
    }

    pub fn capacity_type(&self) -> Option<CapacityType> {
        let value = self.requirements.get(CAPACITY_TYPE_KEY)?.values.first()?;
        match value.as_str() {
            "reserved" => Some(CapacityType::Reserved),
            "spot" => Some(CapacityType::Spot),
            "on-demand" => Some(CapacityType::OnDemand),
            _ => None,
        }
    }

    pub fn compatible(&self, requirements: &Requirements) -> bool {
        requirements.compatible(&self.requirements)
    }

    /// Consume one unit of a reserved offering's capacity; flips `available`
    /// to false once capacity is exhausted.
    pub fn consume_reservation(&mut self) {
        if let Some(remaining) = self.reservation_capacity.as_mut() {
            *remaining -= 1;
            if *remaining <= 0 {
                self.available = false;
            }
        }
    }
}

/// A queryable collection of offerings for a single InstanceType.
#[derive(Debug, Clone, Default)]
pub struct Offerings(pub Vec<Offering>);

impl Offerings {
    pub fn new(offerings: Vec<Offering>) -> Self {
        Self(offerings)
    }

    pub fn available(&self) -> Offerings {
        Offerings(self.0.iter().filter(|o| o.available).cloned().collect())
    }

    pub fn compatible(&self, requirements: &Requirements) -> Offerings {
        Offerings(self.0.iter().filter(|o| o.compatible(requirements)).cloned().collect())
    }

    pub fn has_compatible(&self, requirements: &Requirements) -> bool {
        self.0.iter().any(|o| o.compatible(requirements))
    }

    pub fn cheapest(&self) -> Option<&Offering> {
        self.0.iter().min_by(|a, b| a.price.total_cmp(&b.price))
    }

    pub fn most_expensive(&self) -> Option<&Offering> {
        self.0.iter().max_by(|a, b| a.price.total_cmp(&b.price))
    }

    /// For the highest-priority capacity class (reserved, then spot, then
    /// on-demand) that has a compatible offering, the most expensive
    /// compatible price for that class. `+infinity` if nothing matches.
    pub fn worst_launch_price(&self, requirements: &Requirements) -> f64 {
        let compatible = self.available().compatible(requirements);
        for capacity_type in CapacityType::priority_order() {
            let class: Vec<&Offering> = compatible
                .0
                .iter()
                .filter(|o| o.capacity_type() == Some(capacity_type))
                .collect();
            if let Some(worst) = class.iter().max_by(|a, b| a.price.total_cmp(&b.price)) {
                return worst.price;
            }
        }
        f64::INFINITY
    }

    /// Minimum price among offerings that are both available and compatible
    /// with `requirements`; `+infinity` when none qualify.
    pub fn min_compatible_available_price(&self, requirements: &Requirements) -> f64 {
        self.available()
            .compatible(requirements)
            .cheapest()
            .map(|o| o.price)
            .unwrap_or(f64::INFINITY)
    }
}

/// Apply a price overlay string to a base price. Grammar:
/// - `"<number>"` (no sign) — absolute replacement
/// - `"+N"` / `"-N"` — additive
/// - `"+N%"` / `"-N%"` — multiplicative, factor `(1 +/- N/100)`
///
/// The result is clamped at zero. An empty `change` string is a no-op.
pub fn adjusted_price(base: f64, change: &str) -> Result<f64> {
    if change.is_empty() {
        return Ok(base.max(0.0));
    }

    let (sign, rest): (Option<bool>, &str) = if let Some(rest) = change.strip_prefix('+') {
        (Some(true), rest)
    } else if let Some(rest) = change.strip_prefix('-') {
        (Some(false), rest)
    } else {
        (None, change)
    };

    let result = if let Some(numeric) = rest.strip_suffix('%') {
        let pct: f64 = numeric
            .parse()
            .map_err(|_| Error::PriceOverlayParse(format!("invalid percentage in {change:?}")))?;
        let factor = match sign {
            Some(true) => 1.0 + pct / 100.0,
            Some(false) => 1.0 - pct / 100.0,
            None => {
                return Err(Error::PriceOverlayParse(format!(
                    "percentage overlay {change:?} must carry a sign"
                )))
            }
        };
        base * factor
    } else {
        let magnitude: f64 = rest
            .parse()
            .map_err(|_| Error::PriceOverlayParse(format!("invalid number in {change:?}")))?;
        match sign {
            Some(true) => base + magnitude,
            Some(false) => base - magnitude,
            None => magnitude,
        }
    };

    Ok(result.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_overlay_table() {
        assert_eq!(adjusted_price(10.0, "-10%").unwrap(), 9.0);
        assert_eq!(adjusted_price(10.0, "+100%").unwrap(), 20.0);
        assert_eq!(adjusted_price(10.0, "-200%").unwrap(), 0.0);
        assert_eq!(adjusted_price(82781.0, "80.0").unwrap(), 80.0);
        assert!((adjusted_price(0.001, "+100").unwrap() - 100.001).abs() < 1e-9);
    }

    #[test]
    fn price_overlay_never_negative() {
        assert_eq!(adjusted_price(5.0, "-100").unwrap(), 0.0);
    }

    #[test]
    fn empty_overlay_is_noop() {
        assert_eq!(adjusted_price(42.0, "").unwrap(), 42.0);
    }

    #[test]
    fn worst_launch_price_prefers_reserved_then_spot_then_on_demand() {
        let offerings = Offerings::new(vec![
            Offering::new("us-east-1a", CapacityType::OnDemand, 1.0),
            Offering::new("us-east-1a", CapacityType::Spot, 0.4),
            Offering::reserved("us-east-1a", 0.2, "res-1", 5),
        ]);
        let req = Requirements::new();
        assert_eq!(offerings.worst_launch_price(&req), 0.2);
    }

    #[test]
    fn worst_launch_price_infinite_when_nothing_compatible() {
        let offerings = Offerings::new(vec![Offering::new("us-east-1a", CapacityType::OnDemand, 1.0)]);
        let mut req = Requirements::new();
        req.insert(Requirement::new(ZONE_KEY, Operator::In, vec!["us-west-2a".into()]));
        assert_eq!(offerings.worst_launch_price(&req), f64::INFINITY);
    }

    #[test]
    fn reserved_offering_becomes_unavailable_at_zero_capacity() {
        let mut offering = Offering::reserved("us-east-1a", 0.2, "res-1", 1);
        assert!(offering.available);
        offering.consume_reservation();
        assert!(!offering.available);
    }
}
