//! Resource-offer model and resource arithmetic (spec.md §4.3 "Resource
//! arithmetic").
//!
//! Grounded on the teacher's typed-resource-bundle style (no direct analogue
//! in Qovery, which targets managed cloud resources rather than raw offers;
//! the "group by (role, name), consume with interval splitting" algorithm
//! below is the Mesos-style bin-packing spec.md §4.3 spells out literally,
//! expressed with the teacher's validate-before-mutate discipline).

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub role: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(role: impl Into<String>, name: impl Into<String>) -> Self {
        ResourceKey {
            role: role.into(),
            name: name.into(),
        }
    }
}

/// Inclusive `[begin, end]` port/resource range.
pub type Range = (u64, u64);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResourceValue {
    Scalar(f64),
    Ranges(Vec<Range>),
    Set(BTreeSet<String>),
}

impl ResourceValue {
    pub fn total_scalar(&self) -> f64 {
        match self {
            ResourceValue::Scalar(v) => *v,
            ResourceValue::Ranges(ranges) => ranges.iter().map(|(b, e)| (e - b + 1) as f64).sum(),
            ResourceValue::Set(s) => s.len() as f64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: String,
    pub host: String,
    pub resources: Vec<(ResourceKey, ResourceValue)>,
    /// Agent attributes (rack, zone, custom labels...) used by placement
    /// constraints (§4.3). `"hostname"` is implicitly `self.host` and need
    /// not be duplicated here.
    pub attributes: BTreeMap<String, String>,
}

impl Offer {
    pub fn new(id: impl Into<String>, host: impl Into<String>, resources: Vec<(ResourceKey, ResourceValue)>) -> Self {
        Offer {
            id: id.into(),
            host: host.into(),
            resources,
            attributes: BTreeMap::new(),
        }
    }

    /// Value of a constraint `field` for this offer: `"hostname"` resolves
    /// to the offer's host, anything else looks up `attributes`.
    pub fn field_value(&self, field: &str) -> Option<&str> {
        if field == "hostname" {
            Some(self.host.as_str())
        } else {
            self.attributes.get(field).map(|s| s.as_str())
        }
    }

    pub fn get(&self, key: &ResourceKey) -> Option<&ResourceValue> {
        self.resources.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Consumes `used` from `self`, returning the residual offer. Unknown
    /// resource *kinds* mixed for the same key (e.g. trying to subtract a
    /// `Ranges` from a `Scalar`) are consumed entirely, conservatively, per
    /// spec.md §4.3 "Unknown resource types are consumed entirely".
    pub fn consume(&self, used: &[(ResourceKey, ResourceValue)]) -> Offer {
        let mut resources = self.resources.clone();
        for (used_key, used_value) in used {
            if let Some(pos) = resources.iter().position(|(k, _)| k == used_key) {
                let (_, base_value) = &resources[pos];
                match consume_value(base_value, used_value) {
                    Some(residual) => resources[pos].1 = residual,
                    None => {
                        resources.remove(pos);
                    }
                }
            }
        }
        Offer {
            id: self.id.clone(),
            host: self.host.clone(),
            resources,
            attributes: self.attributes.clone(),
        }
    }
}

/// Consumes `used` from `base`. Returns `None` when the resource is fully
/// consumed (for SCALAR: remaining <= 0; for RANGES/SET: empty residual).
fn consume_value(base: &ResourceValue, used: &ResourceValue) -> Option<ResourceValue> {
    match (base, used) {
        (ResourceValue::Scalar(b), ResourceValue::Scalar(u)) => {
            let remaining = b - u;
            if remaining <= 0.0 {
                None
            } else {
                Some(ResourceValue::Scalar(remaining))
            }
        }
        (ResourceValue::Ranges(base_ranges), ResourceValue::Ranges(used_ranges)) => {
            let mut surviving = base_ranges.clone();
            for used_range in used_ranges {
                surviving = surviving.into_iter().flat_map(|r| subtract_range(r, *used_range)).collect();
            }
            if surviving.is_empty() {
                None
            } else {
                Some(ResourceValue::Ranges(surviving))
            }
        }
        (ResourceValue::Set(base_set), ResourceValue::Set(used_set)) => {
            let residual: BTreeSet<String> = base_set.difference(used_set).cloned().collect();
            if residual.is_empty() {
                None
            } else {
                Some(ResourceValue::Set(residual))
            }
        }
        // Mismatched/unknown resource kind for this key: consumed entirely (conservative).
        _ => None,
    }
}

/// Splits `base` by removing the overlap with `used`, producing at most two
/// surviving sub-ranges: `[base.0, used.0-1]` and `[used.1+1, base.1]`, only
/// when those intervals are non-empty (spec.md §4.3).
fn subtract_range(base: Range, used: Range) -> Vec<Range> {
    let (base_begin, base_end) = base;
    let (used_begin, used_end) = used;
    if used_end < base_begin || used_begin > base_end {
        return vec![base];
    }
    let mut out = Vec::new();
    if used_begin > base_begin {
        out.push((base_begin, used_begin - 1));
    }
    if used_end < base_end {
        out.push((used_end + 1, base_end));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpus(v: f64) -> (ResourceKey, ResourceValue) {
        (ResourceKey::new("*", "cpus"), ResourceValue::Scalar(v))
    }

    fn ports(ranges: Vec<Range>) -> (ResourceKey, ResourceValue) {
        (ResourceKey::new("*", "ports"), ResourceValue::Ranges(ranges))
    }

    #[test]
    fn test_scalar_consumption_reduces_remaining() {
        let offer = Offer::new("o1", "h1", vec![cpus(4.0)]);
        let residual = offer.consume(&[cpus(1.5)]);
        assert_eq!(residual.get(&ResourceKey::new("*", "cpus")), Some(&ResourceValue::Scalar(2.5)));
    }

    #[test]
    fn test_scalar_fully_consumed_is_dropped() {
        let offer = Offer::new("o1", "h1", vec![cpus(2.0)]);
        let residual = offer.consume(&[cpus(2.0)]);
        assert!(residual.get(&ResourceKey::new("*", "cpus")).is_none());
    }

    #[test]
    fn test_range_split_produces_two_surviving_subranges() {
        let offer = Offer::new("o1", "h1", vec![ports(vec![(31000, 32000)])]);
        let residual = offer.consume(&[ports(vec![(31500, 31500)])]);
        let ResourceValue::Ranges(r) = residual.get(&ResourceKey::new("*", "ports")).unwrap() else {
            panic!("expected ranges")
        };
        assert_eq!(r, &vec![(31000, 31499), (31501, 32000)]);
    }

    #[test]
    fn test_range_consume_at_edge_produces_one_subrange() {
        let offer = Offer::new("o1", "h1", vec![ports(vec![(100, 110)])]);
        let residual = offer.consume(&[ports(vec![(100, 100)])]);
        let ResourceValue::Ranges(r) = residual.get(&ResourceKey::new("*", "ports")).unwrap() else {
            panic!("expected ranges")
        };
        assert_eq!(r, &vec![(101, 110)]);
    }

    #[test]
    fn test_set_difference() {
        let base: BTreeSet<String> = ["ssd", "gpu"].iter().map(|s| s.to_string()).collect();
        let used: BTreeSet<String> = ["gpu"].iter().map(|s| s.to_string()).collect();
        let offer = Offer::new("o1", "h1", vec![(ResourceKey::new("*", "tags"), ResourceValue::Set(base))]);
        let residual = offer.consume(&[(ResourceKey::new("*", "tags"), ResourceValue::Set(used))]);
        let ResourceValue::Set(r) = residual.get(&ResourceKey::new("*", "tags")).unwrap() else {
            panic!("expected set")
        };
        assert_eq!(r.len(), 1);
        assert!(r.contains("ssd"));
    }

    /// Testable property (spec.md §8): consume is idempotent w.r.t. an
    /// already-empty residual, and preserves total quantity.
    #[test]
    fn test_consume_preserves_total_quantity_for_scalar_and_ranges() {
        let offer = Offer::new("o1", "h1", vec![cpus(4.0), ports(vec![(100, 110)])]);
        let used = vec![cpus(1.0), ports(vec![(105, 105)])];
        let residual = offer.consume(&used);

        let used_cpus = 1.0;
        let residual_cpus = residual
            .get(&ResourceKey::new("*", "cpus"))
            .map(ResourceValue::total_scalar)
            .unwrap_or(0.0);
        assert_eq!(used_cpus + residual_cpus, 4.0);

        let used_ports = 1.0;
        let residual_ports = residual.get(&ResourceKey::new("*", "ports")).map(ResourceValue::total_scalar).unwrap_or(0.0);
        assert_eq!(used_ports + residual_ports, 11.0);
    }

    #[test]
    fn test_consume_on_already_empty_residual_is_idempotent() {
        let offer = Offer::new("o1", "h1", vec![cpus(1.0)]);
        let residual = offer.consume(&[cpus(1.0)]);
        let residual_again = residual.consume(&[cpus(0.5)]);
        assert_eq!(residual, residual_again);
    }

    #[test]
    fn test_unknown_mismatched_kind_consumed_entirely() {
        let offer = Offer::new("o1", "h1", vec![cpus(4.0)]);
        let residual = offer.consume(&[(ResourceKey::new("*", "cpus"), ResourceValue::Ranges(vec![(1, 2)]))]);
        assert!(residual.get(&ResourceKey::new("*", "cpus")).is_none());
    }
}
