//! Persisted todo state.
//!
//! The snapshot mirrors the instance store as
//! `branch -> instance id -> entry`. Only identity and status are stored;
//! display fields (name, description, priority, ai instruction) are
//! re-derived from the current templates when the snapshot is restored, so
//! editing a template is reflected in restored todos.
//!
//! Every entry field except `template_id` is optional on read so older and
//! newer state files both load.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::instance::{InstanceScope, InstanceStore, TodoInstance, TodoStatus};
use crate::lock::{self, lock_path_for, FileLock, DEFAULT_LOCK_TIMEOUT_MS};
use crate::template::TemplateSet;

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Serialized form of the whole instance store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub branches: BTreeMap<String, BTreeMap<String, SnapshotEntry>>,
}

fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            branches: BTreeMap::new(),
        }
    }
}

/// One persisted todo
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub template_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_path: Option<String>,
    #[serde(default)]
    pub branch_level: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggering_files: Option<BTreeSet<String>>,
    #[serde(default)]
    pub status: TodoStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignored_at: Option<DateTime<Utc>>,
}

/// Outcome of restoring a snapshot against the current templates
#[derive(Debug, Clone, Default)]
pub struct Restored {
    pub store: InstanceStore,
    /// Entries dropped because their template is gone or changed kind
    pub pruned: usize,
}

impl Snapshot {
    /// Capture the persistable part of `store`
    pub fn capture(store: &InstanceStore) -> Self {
        let branches = store
            .list_all()
            .iter()
            .map(|(branch, todos)| {
                let entries = todos
                    .iter()
                    .map(|todo| (todo.id.clone(), SnapshotEntry::from_instance(todo)))
                    .collect();
                (branch.clone(), entries)
            })
            .collect();

        Self {
            version: SNAPSHOT_VERSION,
            branches,
        }
    }

    /// Rebuild an instance store, re-deriving display fields from `templates`
    ///
    /// `now` stands in for a missing `created_at`.
    pub fn restore(&self, templates: &TemplateSet, now: DateTime<Utc>) -> Restored {
        let mut store = InstanceStore::new();
        let mut pruned = 0;

        for (branch, entries) in &self.branches {
            let mut todos: Vec<TodoInstance> = Vec::with_capacity(entries.len());
            for (id, entry) in entries {
                match entry.to_instance(branch, id, templates, now) {
                    Some(todo) => todos.push(todo),
                    None => {
                        tracing::debug!(branch = %branch, id = %id, "dropping orphaned todo");
                        pruned += 1;
                    }
                }
            }
            todos.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
            for todo in todos {
                store.insert(todo);
            }
        }

        Restored { store, pruned }
    }

    /// Three-way merge of `self` onto `theirs`, relative to `base`
    ///
    /// Per branch and id, an entry `self` left as it was in `base` takes the
    /// value from `theirs`; anything `self` changed, added or removed wins.
    /// Branches with no entries left are dropped.
    pub fn merge(&self, base: &Snapshot, theirs: &Snapshot) -> Snapshot {
        let branch_names: BTreeSet<&String> = self
            .branches
            .keys()
            .chain(base.branches.keys())
            .chain(theirs.branches.keys())
            .collect();

        let mut branches = BTreeMap::new();
        for branch in branch_names {
            let ours_entries = self.branches.get(branch);
            let base_entries = base.branches.get(branch);
            let their_entries = theirs.branches.get(branch);

            let ids: BTreeSet<&String> = [ours_entries, base_entries, their_entries]
                .into_iter()
                .flatten()
                .flat_map(BTreeMap::keys)
                .collect();

            let mut entries = BTreeMap::new();
            for id in ids {
                let ours = ours_entries.and_then(|e| e.get(id));
                let pick = if ours == base_entries.and_then(|e| e.get(id)) {
                    their_entries.and_then(|e| e.get(id))
                } else {
                    ours
                };
                if let Some(entry) = pick {
                    entries.insert(id.clone(), entry.clone());
                }
            }
            if !entries.is_empty() {
                branches.insert(branch.clone(), entries);
            }
        }

        Snapshot {
            version: SNAPSHOT_VERSION,
            branches,
        }
    }
}

impl SnapshotEntry {
    fn from_instance(todo: &TodoInstance) -> Self {
        let (file_path, relative_path, triggering_files) = match &todo.scope {
            InstanceScope::File {
                file_path,
                relative_path,
            } => (Some(file_path.clone()), Some(relative_path.clone()), None),
            InstanceScope::Branch { triggering_files } => (None, None, triggering_files.clone()),
        };

        Self {
            template_id: todo.template_id.clone(),
            file_path,
            relative_path,
            branch_level: todo.is_branch_level(),
            triggering_files,
            status: todo.status,
            created_at: Some(todo.created_at),
            completed_at: todo.completed_at,
            ignored_at: todo.ignored_at,
        }
    }

    fn to_instance(
        &self,
        branch: &str,
        id: &str,
        templates: &TemplateSet,
        now: DateTime<Utc>,
    ) -> Option<TodoInstance> {
        let template = templates.get(&self.template_id)?;
        if template.is_branch_level() != self.branch_level {
            return None;
        }

        let scope = if self.branch_level {
            let triggering_files = if template.is_aggregating() {
                Some(self.triggering_files.clone().unwrap_or_default())
            } else {
                None
            };
            InstanceScope::Branch { triggering_files }
        } else {
            let relative_path = match &self.relative_path {
                Some(path) => path.clone(),
                None => id
                    .strip_prefix(&format!("{}:", self.template_id))?
                    .to_string(),
            };
            let file_path = self
                .file_path
                .clone()
                .unwrap_or_else(|| PathBuf::from(&relative_path));
            InstanceScope::File {
                file_path,
                relative_path,
            }
        };

        let mut todo = TodoInstance::from_template(
            template,
            branch,
            id.to_string(),
            scope,
            self.created_at.unwrap_or(now),
        );
        todo.status = self.status;
        todo.completed_at = self.completed_at;
        todo.ignored_at = self.ignored_at;
        Some(todo)
    }
}

/// Durable slot holding one snapshot
pub trait SnapshotStore {
    /// Read the last saved snapshot; `Ok(None)` if nothing was saved yet
    fn load(&mut self) -> Result<Option<Snapshot>>;

    /// Persist `snapshot` as this store's view of the state
    fn save(&mut self, snapshot: &Snapshot) -> Result<()>;
}

/// Snapshot kept in a JSON file shared between processes
///
/// `save` holds `<path>.lock` across read, merge and write. Changes made on
/// disk by another process since this store's last load or save survive
/// unless this process changed the same todo.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
    /// What this store last loaded or wrote
    base: Option<Snapshot>,
}

impl FileSnapshotStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path, base: None }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn parse(content: &str) -> Result<Option<Snapshot>> {
        if content.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(content)?))
    }

    /// Current file contents; caller holds the lock
    fn read_on_disk(&self) -> Result<Snapshot> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Snapshot::default()),
            Err(err) => return Err(err.into()),
        };
        match Self::parse(&content) {
            Ok(snapshot) => Ok(snapshot.unwrap_or_default()),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "overwriting unreadable state file");
                Ok(Snapshot::default())
            }
        }
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&mut self) -> Result<Option<Snapshot>> {
        let loaded = match lock::read_locked(&self.path, DEFAULT_LOCK_TIMEOUT_MS)? {
            Some(content) => Self::parse(&content)?,
            None => None,
        };
        self.base = loaded.clone();
        Ok(loaded)
    }

    fn save(&mut self, snapshot: &Snapshot) -> Result<()> {
        let _lock = FileLock::acquire(lock_path_for(&self.path), DEFAULT_LOCK_TIMEOUT_MS)?;
        let on_disk = self.read_on_disk()?;
        let base = self.base.clone().unwrap_or_default();
        let merged = snapshot.merge(&base, &on_disk);

        let json = serde_json::to_string_pretty(&merged)?;
        lock::write_atomic(&self.path, json.as_bytes())?;
        self.base = Some(snapshot.clone());
        Ok(())
    }
}

/// In-process snapshot slot, for hosts that do not persist and for tests
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshotStore {
    saved: Option<Snapshot>,
    saves: usize,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved(&self) -> Option<&Snapshot> {
        self.saved.as_ref()
    }

    /// Number of `save` calls so far
    pub fn save_count(&self) -> usize {
        self.saves
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&mut self) -> Result<Option<Snapshot>> {
        Ok(self.saved.clone())
    }

    fn save(&mut self, snapshot: &Snapshot) -> Result<()> {
        self.saved = Some(snapshot.clone());
        self.saves += 1;
        Ok(())
    }
}
