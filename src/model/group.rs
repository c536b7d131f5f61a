//! Recursive group tree (spec.md §3 "Group").
//!
//! Grounded on the teacher's `environment/models/mod.rs` collection-of-
//! services pattern, generalized to a recursive tree since the teacher has
//! no nested-group concept (its "environment" is a flat bag of services).

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::errors::CoreError;
use crate::id::PathId;
use crate::model::app::AppDefinition;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: PathId,
    pub version: Timestamp,
    pub apps: BTreeMap<PathId, AppDefinition>,
    pub groups: BTreeMap<PathId, Group>,
    pub dependencies: Vec<String>,
}

impl Group {
    pub fn new(id: PathId, version: Timestamp) -> Self {
        Group {
            id,
            version,
            apps: BTreeMap::new(),
            groups: BTreeMap::new(),
            dependencies: Vec::new(),
        }
    }

    /// Validates the tree recursively: every app/group id is a direct child
    /// of its enclosing group's path, and no app id collides with a group id
    /// (spec.md §3 Group invariant).
    pub fn validate(&self) -> Result<(), CoreError> {
        let mut seen: HashSet<&PathId> = HashSet::new();
        for app_id in self.apps.keys() {
            if !app_id.is_direct_child_of(&self.id) {
                return Err(CoreError::ValidationFailed(format!(
                    "app {app_id} is not a direct child of group {}",
                    self.id
                )));
            }
            if !seen.insert(app_id) {
                return Err(CoreError::ValidationFailed(format!("duplicate id {app_id} in group {}", self.id)));
            }
        }
        for (group_id, child) in &self.groups {
            if !group_id.is_direct_child_of(&self.id) {
                return Err(CoreError::ValidationFailed(format!(
                    "group {group_id} is not a direct child of group {}",
                    self.id
                )));
            }
            if !seen.insert(group_id) {
                return Err(CoreError::ValidationFailed(format!("duplicate id {group_id} in group {}", self.id)));
            }
            child.validate()?;
        }
        for app in self.apps.values() {
            app.validate()?;
        }
        Ok(())
    }

    pub fn insert_app(&mut self, app: AppDefinition) -> Result<(), CoreError> {
        if !app.id.is_direct_child_of(&self.id) {
            return Err(CoreError::ValidationFailed(format!(
                "app {} is not a direct child of group {}",
                app.id, self.id
            )));
        }
        if self.groups.contains_key(&app.id) {
            return Err(CoreError::ValidationFailed(format!("id collision with sub-group {}", app.id)));
        }
        self.apps.insert(app.id.clone(), app);
        Ok(())
    }

    pub fn insert_group(&mut self, group: Group) -> Result<(), CoreError> {
        if !group.id.is_direct_child_of(&self.id) {
            return Err(CoreError::ValidationFailed(format!(
                "group {} is not a direct child of group {}",
                group.id, self.id
            )));
        }
        if self.apps.contains_key(&group.id) {
            return Err(CoreError::ValidationFailed(format!("id collision with app {}", group.id)));
        }
        self.groups.insert(group.id.clone(), group);
        Ok(())
    }

    /// All apps in this group and every descendant group.
    pub fn transitive_apps(&self) -> Vec<&AppDefinition> {
        let mut out: Vec<&AppDefinition> = self.apps.values().collect();
        for child in self.groups.values() {
            out.extend(child.transitive_apps());
        }
        out
    }

    pub fn transitive_apps_mut(&mut self) -> Vec<&mut AppDefinition> {
        let mut out: Vec<&mut AppDefinition> = self.apps.values_mut().collect();
        for child in self.groups.values_mut() {
            out.extend(child.transitive_apps_mut());
        }
        out
    }

    pub fn find_app(&self, id: &PathId) -> Option<&AppDefinition> {
        if let Some(app) = self.apps.get(id) {
            return Some(app);
        }
        self.groups.values().find_map(|g| g.find_app(id))
    }

    pub fn find_group(&self, id: &PathId) -> Option<&Group> {
        if &self.id == id {
            return Some(self);
        }
        self.groups.values().find_map(|g| g.find_group(id))
    }

    /// Removes an app from wherever in the tree it lives (spec.md §4.7
    /// "Stop: ...then remove the app from the repository").
    pub fn remove_app(&mut self, id: &PathId) -> Option<AppDefinition> {
        if let Some(app) = self.apps.remove(id) {
            return Some(app);
        }
        self.groups.values_mut().find_map(|g| g.remove_app(id))
    }

    /// Serializes the tree for persistence via `KvStore` (spec.md §6).
    pub fn to_json(&self) -> Result<String, CoreError> {
        serde_json::to_string(self).map_err(|e| CoreError::ValidationFailed(format!("group serialization failed: {e}")))
    }

    pub fn from_json(payload: &str) -> Result<Group, CoreError> {
        serde_json::from_str(payload).map_err(|e| CoreError::ValidationFailed(format!("group deserialization failed: {e}")))
    }
}
