//! Tree-diff deployment planner (spec.md §4.5).
//!
//! Grounded on the teacher's `deployment_task/environment_task.rs` (a task
//! that diffs a desired environment against its last-applied state and
//! emits a typed action list) for the "diff two declared trees, classify
//! each difference, order the result by dependency" shape. The teacher has
//! no multi-generation dependency ordering; that part follows the
//! Kahn's-algorithm-by-longest-path idiom from `environment/action/mod.rs`'s
//! topologically-sorted `EnvironmentStep` list.

use std::collections::{BTreeMap, HashMap};

use itertools::Itertools;

use crate::errors::CoreError;
use crate::id::PathId;
use crate::model::app::AppDefinition;
use crate::model::group::Group;

#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    ResolveArtifacts(AppDefinition, Vec<String>),
    Start(AppDefinition),
    Scale(AppDefinition),
    Restart(AppDefinition),
    Stop(PathId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentStep {
    pub actions: Vec<StepAction>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentPlan {
    pub steps: Vec<DeploymentStep>,
}

impl DeploymentPlan {
    pub fn is_noop(&self) -> bool {
        self.steps.iter().all(|s| s.actions.is_empty())
    }

    pub fn total_actions(&self) -> usize {
        self.steps.iter().map(|s| s.actions.len()).sum()
    }
}

enum Classification {
    Start(AppDefinition),
    Scale(AppDefinition),
    Restart(AppDefinition),
    Stop,
}

/// Diffs `current` against `target`, classifying every app that differs,
/// then orders the result into dependency-respecting generations.
pub fn plan_deployment(current: &Group, target: &Group) -> Result<DeploymentPlan, CoreError> {
    let current_apps: BTreeMap<PathId, &AppDefinition> = current.transitive_apps().into_iter().map(|a| (a.id.clone(), a)).collect();
    let target_apps: BTreeMap<PathId, &AppDefinition> = target.transitive_apps().into_iter().map(|a| (a.id.clone(), a)).collect();

    let mut classifications: BTreeMap<PathId, Classification> = BTreeMap::new();

    for (id, target_app) in &target_apps {
        match current_apps.get(id) {
            None => {
                classifications.insert(id.clone(), Classification::Start((*target_app).clone()));
            }
            Some(current_app) => {
                if current_app.canonically_equal(target_app) {
                    continue;
                }
                if same_ignoring_instances(current_app, target_app) {
                    classifications.insert(id.clone(), Classification::Scale((*target_app).clone()));
                } else {
                    classifications.insert(id.clone(), Classification::Restart((*target_app).clone()));
                }
            }
        }
    }
    for id in current_apps.keys() {
        if !target_apps.contains_key(id) {
            classifications.insert(id.clone(), Classification::Stop);
        }
    }

    let effective_deps: HashMap<PathId, Vec<PathId>> = classifications
        .keys()
        .map(|id| {
            let app = target_apps.get(id).or_else(|| current_apps.get(id)).expect("classified app must exist in one tree");
            let deps = app.resolved_dependencies().unwrap_or_default().into_iter().filter(|d| classifications.contains_key(d)).collect();
            (id.clone(), deps)
        })
        .collect();

    let generations = topological_generations(&effective_deps)?;

    let mut steps = Vec::with_capacity(generations.len());
    for generation in generations {
        let mut artifacts = Vec::new();
        let mut starts = Vec::new();
        let mut scales = Vec::new();
        let mut restarts = Vec::new();
        let mut stops = Vec::new();
        for id in generation {
            match classifications.remove(&id).expect("generation member must be classified") {
                Classification::Start(app) => {
                    if !app.artifact_urls.is_empty() {
                        artifacts.push(StepAction::ResolveArtifacts(app.clone(), app.artifact_urls.clone()));
                    }
                    starts.push(StepAction::Start(app));
                }
                Classification::Scale(app) => scales.push(StepAction::Scale(app)),
                Classification::Restart(app) => {
                    if !app.artifact_urls.is_empty() {
                        artifacts.push(StepAction::ResolveArtifacts(app.clone(), app.artifact_urls.clone()));
                    }
                    restarts.push(StepAction::Restart(app));
                }
                Classification::Stop => stops.push(StepAction::Stop(id)),
            }
        }
        let mut actions = Vec::new();
        actions.extend(artifacts);
        actions.extend(starts);
        actions.extend(scales);
        actions.extend(restarts);
        actions.extend(stops);
        steps.push(DeploymentStep { actions });
    }

    Ok(DeploymentPlan { steps })
}

fn same_ignoring_instances(a: &AppDefinition, b: &AppDefinition) -> bool {
    let mut a_clone = a.clone();
    a_clone.instances = b.instances;
    a_clone.canonically_equal(b)
}

/// Longest-path-from-roots layering: an app with no declared (in-scope)
/// dependencies is generation 0; otherwise `1 + max(generation(dep))`.
/// Errors on a dependency cycle.
fn topological_generations(deps: &HashMap<PathId, Vec<PathId>>) -> Result<Vec<Vec<PathId>>, CoreError> {
    let mut generation: HashMap<PathId, usize> = HashMap::new();
    let mut visiting: std::collections::HashSet<PathId> = std::collections::HashSet::new();

    fn visit(
        id: &PathId,
        deps: &HashMap<PathId, Vec<PathId>>,
        generation: &mut HashMap<PathId, usize>,
        visiting: &mut std::collections::HashSet<PathId>,
    ) -> Result<usize, CoreError> {
        if let Some(g) = generation.get(id) {
            return Ok(*g);
        }
        if !visiting.insert(id.clone()) {
            return Err(CoreError::ConflictingChange(format!("dependency cycle involving {id}")));
        }
        let mut max_dep_gen: Option<usize> = None;
        for dep in deps.get(id).into_iter().flatten() {
            let dep_gen = visit(dep, deps, generation, visiting)?;
            max_dep_gen = Some(max_dep_gen.map_or(dep_gen, |m| m.max(dep_gen)));
        }
        visiting.remove(id);
        let g = max_dep_gen.map_or(0, |m| m + 1);
        generation.insert(id.clone(), g);
        Ok(g)
    }

    for id in deps.keys() {
        visit(id, deps, &mut generation, &mut visiting)?;
    }

    let max_gen = generation.values().copied().max().unwrap_or(0);
    let mut buckets: Vec<Vec<PathId>> = vec![Vec::new(); max_gen + 1];
    for (id, g) in generation {
        buckets[g].push(id);
    }
    for bucket in buckets.iter_mut() {
        *bucket = std::mem::take(bucket).into_iter().sorted().collect();
    }
    Ok(buckets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::app::{Executable, UpgradeStrategy};
    use chrono::{TimeZone, Utc};

    fn ts(secs: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn app(id: &str, instances: u32, deps: Vec<&str>) -> AppDefinition {
        AppDefinition {
            id: PathId::parse_absolute(id).unwrap(),
            executable: Executable::Cmd("run".to_string()),
            instances,
            cpus: 0.1,
            mem: 32.0,
            disk: 0.0,
            ports: vec![],
            require_ports: false,
            accepted_resource_roles: None,
            constraints: Vec::new(),
            health_checks: Vec::new(),
            backoff_seconds: 1,
            backoff_factor: 1.15,
            max_launch_delay_seconds: 3600,
            upgrade_strategy: UpgradeStrategy::default(),
            dependencies: deps.into_iter().map(|d| d.to_string()).collect(),
            artifact_urls: Vec::new(),
            version: ts(0),
        }
    }

    fn group_of(apps: Vec<AppDefinition>) -> Group {
        let mut g = Group::new(PathId::root(), ts(0));
        for app in apps {
            g.insert_app(app).unwrap();
        }
        g
    }

    #[test]
    fn test_new_app_classified_as_start() {
        let current = group_of(vec![]);
        let target = group_of(vec![app("/app1", 1, vec![])]);
        let plan = plan_deployment(&current, &target).unwrap();
        assert_eq!(plan.total_actions(), 1);
        assert!(matches!(plan.steps[0].actions[0], StepAction::Start(_)));
    }

    #[test]
    fn test_removed_app_classified_as_stop() {
        let current = group_of(vec![app("/app1", 1, vec![])]);
        let target = group_of(vec![]);
        let plan = plan_deployment(&current, &target).unwrap();
        assert_eq!(plan.total_actions(), 1);
        assert!(matches!(plan.steps[0].actions[0], StepAction::Stop(_)));
    }

    #[test]
    fn test_instance_only_change_is_scale_not_restart() {
        let current = group_of(vec![app("/app1", 1, vec![])]);
        let target = group_of(vec![app("/app1", 5, vec![])]);
        let plan = plan_deployment(&current, &target).unwrap();
        assert_eq!(plan.total_actions(), 1);
        assert!(matches!(plan.steps[0].actions[0], StepAction::Scale(_)));
    }

    #[test]
    fn test_executable_change_is_restart() {
        let current = group_of(vec![app("/app1", 1, vec![])]);
        let mut changed = app("/app1", 1, vec![]);
        changed.executable = Executable::Cmd("different".to_string());
        let target = group_of(vec![changed]);
        let plan = plan_deployment(&current, &target).unwrap();
        assert!(matches!(plan.steps[0].actions[0], StepAction::Restart(_)));
    }

    #[test]
    fn test_unchanged_app_produces_noop() {
        let a = app("/app1", 1, vec![]);
        let current = group_of(vec![a.clone()]);
        let target = group_of(vec![a]);
        let plan = plan_deployment(&current, &target).unwrap();
        assert!(plan.is_noop());
    }

    #[test]
    fn test_dependency_ordering_starts_dependency_before_dependent() {
        // setup: /web depends on /db, both new.
        let current = group_of(vec![]);
        let target = group_of(vec![app("/db", 1, vec![]), app("/web", 1, vec!["/db"])]);

        // execute:
        let plan = plan_deployment(&current, &target).unwrap();

        // verify: /db's Start step comes before /web's.
        let db_step = plan
            .steps
            .iter()
            .position(|s| s.actions.iter().any(|a| matches!(a, StepAction::Start(app) if app.id.as_str() == "/db")))
            .unwrap();
        let web_step = plan
            .steps
            .iter()
            .position(|s| s.actions.iter().any(|a| matches!(a, StepAction::Start(app) if app.id.as_str() == "/web")))
            .unwrap();
        assert!(db_step < web_step);
    }

    #[test]
    fn test_new_app_with_artifacts_resolves_before_starting() {
        // setup:
        let current = group_of(vec![]);
        let mut target_app = app("/app1", 1, vec![]);
        target_app.artifact_urls = vec!["http://example/a.tgz".to_string()];
        let target = group_of(vec![target_app]);

        // execute:
        let plan = plan_deployment(&current, &target).unwrap();

        // verify: ResolveArtifacts precedes Start within the step.
        let actions = &plan.steps[0].actions;
        assert!(matches!(actions[0], StepAction::ResolveArtifacts(_, _)));
        assert!(matches!(actions[1], StepAction::Start(_)));
    }

    #[test]
    fn test_scaled_app_with_artifacts_does_not_resolve_again() {
        // setup: instance-only change is a Scale, not a Restart, and
        // shouldn't re-fetch artifacts that are already resident.
        let mut current_app = app("/app1", 1, vec![]);
        current_app.artifact_urls = vec!["http://example/a.tgz".to_string()];
        let current = group_of(vec![current_app.clone()]);
        let mut target_app = current_app;
        target_app.instances = 5;
        let target = group_of(vec![target_app]);

        // execute:
        let plan = plan_deployment(&current, &target).unwrap();

        // verify:
        assert_eq!(plan.total_actions(), 1);
        assert!(matches!(plan.steps[0].actions[0], StepAction::Scale(_)));
    }

    #[test]
    fn test_dependency_cycle_is_rejected() {
        let current = group_of(vec![]);
        let target = group_of(vec![app("/a", 1, vec!["/b"]), app("/b", 1, vec!["/a"])]);
        assert!(plan_deployment(&current, &target).is_err());
    }
}
