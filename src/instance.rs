//! Todo instances and the per-branch instance store.
//!
//! Each branch owns an ordered list of [`TodoInstance`]s. Identity is derived
//! purely from the template id and the scope:
//!
//! - file-scoped: `{template_id}:{relative_path}`
//! - branch-level: `branch:{template_id}`
//!
//! so re-evaluating the same file/template pair never creates a duplicate.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::template::{Priority, Template, TemplateSet};

/// Prefix of branch-level instance ids.
pub const BRANCH_ID_PREFIX: &str = "branch";

/// Id of the instance raised by `template_id` for one file.
pub fn file_instance_id(template_id: &str, relative_path: &str) -> String {
    format!("{template_id}:{relative_path}")
}

/// Id of the single branch-level instance raised by `template_id`.
pub fn branch_instance_id(template_id: &str) -> String {
    format!("{BRANCH_ID_PREFIX}:{template_id}")
}

/// Status of a todo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TodoStatus {
    #[default]
    Pending,
    Completed,
    Ignored,
}

impl fmt::Display for TodoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TodoStatus::Pending => "pending",
            TodoStatus::Completed => "completed",
            TodoStatus::Ignored => "ignored",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for TodoStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(TodoStatus::Pending),
            "completed" | "done" => Ok(TodoStatus::Completed),
            "ignored" => Ok(TodoStatus::Ignored),
            _ => Err(Error::InvalidArgument(format!(
                "invalid status '{}': must be pending, completed, or ignored",
                s
            ))),
        }
    }
}

/// What a todo is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum InstanceScope {
    File {
        file_path: PathBuf,
        relative_path: String,
    },
    Branch {
        #[serde(skip_serializing_if = "Option::is_none")]
        triggering_files: Option<BTreeSet<String>>,
    },
}

/// A materialized, stateful todo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TodoInstance {
    pub id: String,
    pub template_id: String,
    pub name: String,
    pub description: String,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_instruction: Option<String>,
    #[serde(flatten)]
    pub scope: InstanceScope,
    pub status: TodoStatus,
    pub branch: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignored_at: Option<DateTime<Utc>>,
}

impl TodoInstance {
    /// A pending instance snapshotting the template's display fields.
    pub fn from_template(
        template: &Template,
        branch: &str,
        id: String,
        scope: InstanceScope,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            template_id: template.id.clone(),
            name: template.name.clone(),
            description: template.description.clone(),
            priority: template.priority,
            ai_instruction: template.ai_instruction.clone(),
            scope,
            status: TodoStatus::Pending,
            branch: branch.to_string(),
            created_at: now,
            completed_at: None,
            ignored_at: None,
        }
    }

    pub fn is_branch_level(&self) -> bool {
        matches!(self.scope, InstanceScope::Branch { .. })
    }

    pub fn relative_path(&self) -> Option<&str> {
        match &self.scope {
            InstanceScope::File { relative_path, .. } => Some(relative_path),
            InstanceScope::Branch { .. } => None,
        }
    }

    pub fn triggering_files(&self) -> Option<&BTreeSet<String>> {
        match &self.scope {
            InstanceScope::Branch { triggering_files } => triggering_files.as_ref(),
            InstanceScope::File { .. } => None,
        }
    }

    /// Overwrite display fields from `template`; true if anything changed.
    pub fn refresh_display(&mut self, template: &Template) -> bool {
        let changed = self.name != template.name
            || self.description != template.description
            || self.priority != template.priority
            || self.ai_instruction != template.ai_instruction;
        if changed {
            self.name = template.name.clone();
            self.description = template.description.clone();
            self.priority = template.priority;
            self.ai_instruction = template.ai_instruction.clone();
        }
        changed
    }

    /// Move to `status`, maintaining the transition timestamps.
    ///
    /// Entering completed/ignored stamps the matching timestamp (kept if the
    /// status is unchanged) and clears the other; pending clears both.
    pub fn transition(&mut self, status: TodoStatus, now: DateTime<Utc>) {
        match status {
            TodoStatus::Pending => {
                self.completed_at = None;
                self.ignored_at = None;
            }
            TodoStatus::Completed => {
                if self.status != TodoStatus::Completed || self.completed_at.is_none() {
                    self.completed_at = Some(now);
                }
                self.ignored_at = None;
            }
            TodoStatus::Ignored => {
                if self.status != TodoStatus::Ignored || self.ignored_at.is_none() {
                    self.ignored_at = Some(now);
                }
                self.completed_at = None;
            }
        }
        self.status = status;
    }
}

/// Per-branch collections of todo instances.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceStore {
    branches: BTreeMap<String, Vec<TodoInstance>>,
}

impl InstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure the file-scoped instance of `template` for `relative_path` exists.
    ///
    /// Returns true when the store changed.
    pub fn upsert_file_instance(
        &mut self,
        branch: &str,
        template: &Template,
        relative_path: &str,
        file_path: PathBuf,
        now: DateTime<Utc>,
    ) -> bool {
        let id = file_instance_id(&template.id, relative_path);
        let todos = self.branches.entry(branch.to_string()).or_default();

        if let Some(existing) = todos.iter_mut().find(|todo| todo.id == id) {
            if existing.template_id != template.id || existing.is_branch_level() {
                warn!(id = %id, template = %template.id, "todo id already taken by another template");
                return false;
            }
            return existing.refresh_display(template);
        }

        let scope = InstanceScope::File {
            file_path,
            relative_path: relative_path.to_string(),
        };
        todos.push(TodoInstance::from_template(template, branch, id, scope, now));
        true
    }

    /// Ensure the branch-level instance of `template` exists, adding any
    /// `triggering` paths to its aggregate.
    ///
    /// Returns true when the store changed (created, grown, or refreshed).
    pub fn upsert_branch_instance(
        &mut self,
        branch: &str,
        template: &Template,
        triggering: &[String],
        now: DateTime<Utc>,
    ) -> bool {
        let id = branch_instance_id(&template.id);
        let todos = self.branches.entry(branch.to_string()).or_default();

        if let Some(existing) = todos.iter_mut().find(|todo| todo.id == id) {
            if existing.template_id != template.id || !existing.is_branch_level() {
                warn!(id = %id, template = %template.id, "todo id already taken by another template");
                return false;
            }
            let mut changed = existing.refresh_display(template);
            if let InstanceScope::Branch { triggering_files } = &mut existing.scope {
                if !triggering.is_empty() {
                    let files = triggering_files.get_or_insert_with(BTreeSet::new);
                    for path in triggering {
                        changed |= files.insert(path.clone());
                    }
                }
            }
            return changed;
        }

        let triggering_files = if template.trigger().is_some() {
            Some(triggering.iter().cloned().collect())
        } else {
            None
        };
        let scope = InstanceScope::Branch { triggering_files };
        todos.push(TodoInstance::from_template(template, branch, id, scope, now));
        true
    }

    /// Set the status of an existing instance.
    pub fn set_status(
        &mut self,
        branch: &str,
        id: &str,
        status: TodoStatus,
        now: DateTime<Utc>,
    ) -> Result<&TodoInstance> {
        let todo = self.get_mut(branch, id)?;
        todo.transition(status, now);
        Ok(&*todo)
    }

    /// Look up an instance for mutation, distinguishing unknown branches.
    pub fn get_mut(&mut self, branch: &str, id: &str) -> Result<&mut TodoInstance> {
        let todos = self
            .branches
            .get_mut(branch)
            .ok_or_else(|| Error::BranchNotFound(branch.to_string()))?;
        todos
            .iter_mut()
            .find(|todo| todo.id == id)
            .ok_or_else(|| Error::TodoNotFound {
                branch: branch.to_string(),
                id: id.to_string(),
            })
    }

    pub fn get(&self, branch: &str, id: &str) -> Option<&TodoInstance> {
        self.branches
            .get(branch)
            .and_then(|todos| todos.iter().find(|todo| todo.id == id))
    }

    /// Instances of `branch` in insertion order (empty for unknown branches).
    pub fn list(&self, branch: &str) -> &[TodoInstance] {
        self.branches
            .get(branch)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every branch with its instances.
    pub fn list_all(&self) -> &BTreeMap<String, Vec<TodoInstance>> {
        &self.branches
    }

    pub fn branches(&self) -> impl Iterator<Item = &str> {
        self.branches.keys().map(String::as_str)
    }

    pub fn has_branch(&self, branch: &str) -> bool {
        self.branches.contains_key(branch)
    }

    /// Remove a branch and all of its instances.
    pub fn clear_branch(&mut self, branch: &str) -> bool {
        self.branches.remove(branch).is_some()
    }

    /// Drop instances whose template id is not in `valid_template_ids`.
    ///
    /// Returns how many instances were removed.
    pub fn prune_orphans(&mut self, valid_template_ids: &HashSet<&str>) -> usize {
        let mut removed = 0;
        for todos in self.branches.values_mut() {
            let before = todos.len();
            todos.retain(|todo| valid_template_ids.contains(todo.template_id.as_str()));
            removed += before - todos.len();
        }
        removed
    }

    /// Reconcile existing instances with a reloaded template set.
    ///
    /// Instances whose template is missing or changed kind (file vs
    /// branch-level) are removed; the rest get their display fields
    /// re-derived. Returns the number removed and whether anything was
    /// refreshed.
    pub fn sync_templates(&mut self, templates: &TemplateSet) -> (usize, bool) {
        let mut removed = 0;
        let mut refreshed = false;
        for todos in self.branches.values_mut() {
            let before = todos.len();
            todos.retain_mut(|todo| match templates.get(&todo.template_id) {
                Some(template) if template.is_branch_level() == todo.is_branch_level() => {
                    refreshed |= todo.refresh_display(template);
                    true
                }
                _ => false,
            });
            removed += before - todos.len();
        }
        (removed, refreshed)
    }

    /// Insert a restored instance, replacing one with the same id.
    pub fn insert(&mut self, todo: TodoInstance) {
        let todos = self.branches.entry(todo.branch.clone()).or_default();
        match todos.iter_mut().find(|existing| existing.id == todo.id) {
            Some(existing) => *existing = todo,
            None => todos.push(todo),
        }
    }

    /// Total number of instances across branches.
    pub fn len(&self) -> usize {
        self.branches.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
