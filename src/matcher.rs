//! Matches a single resource offer against queued launches (spec.md §4.3
//! "Placement constraints" and "Resource arithmetic").
//!
//! Grounded on the teacher's `deployment_action` dispatch style (a pure
//! function taking declared state plus observed state and producing a
//! concrete action list) for "no network I/O, no locks, all decisions made
//! from already-fetched snapshots" — the matcher only ever sees a `&Offer`
//! and already-placed `&[Task]`, never the tracker or the driver directly.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use once_cell::sync::Lazy;

use crate::config::CoreConfig;
use crate::id::PathId;
use crate::model::app::{AppDefinition, ConstraintOp};
use crate::offer::{Offer, ResourceKey, ResourceValue, Range};
use crate::task::Task;

/// `LIKE`/`UNLIKE` constraints re-evaluate the same pattern on every offer;
/// compiling it once per cluster instead of per offer keeps a busy offer
/// stream from burning CPU on regex compilation.
static REGEX_CACHE: Lazy<Mutex<HashMap<String, regex::Regex>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// A concrete launch derived from matching one offer against one app's
/// pending demand: the host ports assigned from the offer's port ranges and
/// the resources to deduct.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchPlan {
    pub app_id: PathId,
    pub host: String,
    pub host_ports: Vec<u16>,
    pub consumed: Vec<(ResourceKey, ResourceValue)>,
}

/// Why an offer could not satisfy an app's launch (diagnostic only, not
/// exhaustive — mirrors the Mesos "declined" reasons, not its wire format).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclineReason {
    InsufficientCpus,
    InsufficientMem,
    InsufficientDisk,
    NoMatchingRole,
    RequiredPortUnavailable(i32),
    NotEnoughDynamicPorts,
    ConstraintViolated(usize),
}

/// Tries to satisfy `app`'s launch against `offer`, given the tasks of `app`
/// already placed on other hosts (for `UNIQUE`/`CLUSTER`/`GROUP_BY`/`LIKE`/
/// `UNLIKE`, spec.md §4.3). Returns the first feasible plan; callers decide
/// how many times to call this per offer (one task at a time, spec.md §4.3
/// "one task per offer per scheduler pass" unless the caller chooses
/// otherwise).
pub fn try_match(app: &AppDefinition, offer: &Offer, placed: &[Task], config: &CoreConfig) -> Result<LaunchPlan, DeclineReason> {
    let roles = accepted_roles(app, config);
    check_role(&roles, offer)?;
    check_constraints(app, offer, placed)?;
    check_scalar(&roles, offer, "cpus", app.cpus, DeclineReason::InsufficientCpus)?;
    check_scalar(&roles, offer, "mem", app.mem, DeclineReason::InsufficientMem)?;
    check_scalar(&roles, offer, "disk", app.disk, DeclineReason::InsufficientDisk)?;

    let host_ports = allocate_ports_from_offer(app, offer, &roles)?;

    let mut consumed = vec![
        (ResourceKey::new("*", "cpus"), ResourceValue::Scalar(app.cpus)),
        (ResourceKey::new("*", "mem"), ResourceValue::Scalar(app.mem)),
    ];
    if app.disk > 0.0 {
        consumed.push((ResourceKey::new("*", "disk"), ResourceValue::Scalar(app.disk)));
    }
    if !host_ports.is_empty() {
        let ranges: Vec<Range> = host_ports.iter().map(|p| (*p as u64, *p as u64)).collect();
        consumed.push((ResourceKey::new("*", "ports"), ResourceValue::Ranges(ranges)));
    }

    Ok(LaunchPlan {
        app_id: app.id.clone(),
        host: offer.host.clone(),
        host_ports,
        consumed,
    })
}

/// Resolves the set of offer resource roles `app` may draw from (spec.md
/// §4.3 "acceptedResourceRoles"). `None` means "any role" — no filtering.
/// An explicit `app.accepted_resource_roles` always wins; otherwise unset
/// falls back to `{"*"}` only when `config.default_accepted_roles_is_star_only`,
/// matching Marathon's default of never silently consuming reserved roles.
fn accepted_roles(app: &AppDefinition, config: &CoreConfig) -> Option<BTreeSet<String>> {
    if let Some(roles) = &app.accepted_resource_roles {
        return Some(roles.clone());
    }
    if config.default_accepted_roles_is_star_only {
        Some(["*".to_string()].into_iter().collect())
    } else {
        None
    }
}

fn resource_role_allowed(roles: &Option<BTreeSet<String>>, role: &str) -> bool {
    roles.as_ref().map(|r| r.contains(role)).unwrap_or(true)
}

fn check_role(roles: &Option<BTreeSet<String>>, offer: &Offer) -> Result<(), DeclineReason> {
    let Some(roles) = roles else {
        return Ok(());
    };
    if offer.resources.iter().any(|(k, _)| roles.contains(&k.role)) {
        Ok(())
    } else {
        Err(DeclineReason::NoMatchingRole)
    }
}

fn check_scalar(roles: &Option<BTreeSet<String>>, offer: &Offer, name: &str, required: f64, reason: DeclineReason) -> Result<(), DeclineReason> {
    if required <= 0.0 {
        return Ok(());
    }
    let available = offer
        .resources
        .iter()
        .filter(|(k, _)| k.name == name && resource_role_allowed(roles, &k.role))
        .map(|(_, v)| v.total_scalar())
        .sum::<f64>();
    if available >= required {
        Ok(())
    } else {
        Err(reason)
    }
}

/// Evaluates every declared constraint against `offer`'s attributes and the
/// already-placed tasks of the same app, in declaration order (spec.md §9
/// Open Question: ties resolved by declaration order).
fn check_constraints(app: &AppDefinition, offer: &Offer, placed: &[Task]) -> Result<(), DeclineReason> {
    for (idx, constraint) in app.constraints.iter().enumerate() {
        let satisfied = match constraint.op {
            ConstraintOp::Unique => {
                let candidate = offer.field_value(&constraint.field);
                !placed.iter().any(|t| t.host_attributes.get(&constraint.field).map(|s| s.as_str()) == candidate && candidate.is_some())
                    && !(constraint.field == "hostname" && placed.iter().any(|t| t.host == offer.host))
            }
            ConstraintOp::Cluster => match (&constraint.value, offer.field_value(&constraint.field)) {
                (Some(wanted), Some(actual)) => wanted == actual,
                (None, Some(_)) => true,
                _ => false,
            },
            ConstraintOp::GroupBy => group_by_satisfied(constraint, offer, placed),
            ConstraintOp::Like => match (&constraint.value, offer.field_value(&constraint.field)) {
                (Some(pattern), Some(actual)) => regex_matches(pattern, actual),
                _ => false,
            },
            ConstraintOp::Unlike => match (&constraint.value, offer.field_value(&constraint.field)) {
                (Some(pattern), Some(actual)) => !regex_matches(pattern, actual),
                _ => true,
            },
        };
        if !satisfied {
            return Err(DeclineReason::ConstraintViolated(idx));
        }
    }
    Ok(())
}

fn regex_matches(pattern: &str, value: &str) -> bool {
    let mut cache = REGEX_CACHE.lock().unwrap();
    if !cache.contains_key(pattern) {
        match regex::Regex::new(pattern) {
            Ok(re) => {
                cache.insert(pattern.to_string(), re);
            }
            Err(_) => return false,
        }
    }
    cache.get(pattern).map(|re| re.is_match(value)).unwrap_or(false)
}

/// `GROUP_BY(field, n)`: spreads instances evenly across the distinct values
/// of `field` seen so far. `n` (parsed from `constraint.value`, default 1
/// group meaning "no grouping") bounds how many groups Marathon assumes
/// exist; an offer is accepted when its group is among those with the
/// current minimum instance count.
fn group_by_satisfied(constraint: &crate::model::app::Constraint, offer: &Offer, placed: &[Task]) -> bool {
    let Some(candidate) = offer.field_value(&constraint.field) else {
        return false;
    };
    let mut counts: std::collections::BTreeMap<&str, usize> = std::collections::BTreeMap::new();
    for task in placed {
        if let Some(v) = task.host_attributes.get(&constraint.field) {
            *counts.entry(v.as_str()).or_insert(0) += 1;
        }
    }
    let min_count = counts.values().copied().min().unwrap_or(0);
    counts.get(candidate).copied().unwrap_or(0) <= min_count
}

/// Assigns host ports for `app` out of `offer`'s `ports` ranges: literal
/// required ports must be present verbatim, dynamic slots take any unused
/// port from the offer's ranges, in order.
fn allocate_ports_from_offer(app: &AppDefinition, offer: &Offer, roles: &Option<BTreeSet<String>>) -> Result<Vec<u16>, DeclineReason> {
    let declared = app.all_declared_host_ports();
    if declared.is_empty() {
        return Ok(Vec::new());
    }

    let mut available: Vec<Range> = offer
        .resources
        .iter()
        .filter(|(k, _)| k.name == "ports" && resource_role_allowed(roles, &k.role))
        .filter_map(|(_, v)| match v {
            ResourceValue::Ranges(r) => Some(r.clone()),
            _ => None,
        })
        .flatten()
        .collect();

    let mut assigned = Vec::with_capacity(declared.len());
    for port in declared {
        if port != 0 {
            if app.require_ports {
                if !take_exact(&mut available, port as u64) {
                    return Err(DeclineReason::RequiredPortUnavailable(port));
                }
            }
            assigned.push(port as u16);
        } else {
            match take_any(&mut available) {
                Some(p) => assigned.push(p as u16),
                None => return Err(DeclineReason::NotEnoughDynamicPorts),
            }
        }
    }
    Ok(assigned)
}

fn take_exact(ranges: &mut Vec<Range>, port: u64) -> bool {
    for (idx, (begin, end)) in ranges.clone().iter().enumerate() {
        if *begin <= port && port <= *end {
            ranges.remove(idx);
            if *begin < port {
                ranges.push((*begin, port - 1));
            }
            if port < *end {
                ranges.push((port + 1, *end));
            }
            return true;
        }
    }
    false
}

fn take_any(ranges: &mut Vec<Range>) -> Option<u64> {
    let (begin, end) = ranges.first().copied()?;
    ranges.remove(0);
    if begin < end {
        ranges.insert(0, (begin + 1, end));
    }
    Some(begin)
}
