//! The todo engine.
//!
//! [`Engine`] owns the current [`TemplateSet`], the per-branch
//! [`InstanceStore`] and a [`SnapshotStore`]. Every public operation runs to
//! completion on the caller's thread; hosts deliver file and branch changes
//! one at a time.
//!
//! After any mutation the engine writes a fresh snapshot and then calls every
//! subscribed listener. A failed write is logged and kept for the host
//! ([`Engine::take_persist_error`]); the in-memory state stays authoritative.

use std::fs;
use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::git::SourceControl;
use crate::instance::{InstanceStore, TodoInstance, TodoStatus};
use crate::matcher;
use crate::snapshot::{Snapshot, SnapshotStore};
use crate::template::{TemplateScope, TemplateSet};

/// Supplies file text on demand.
pub trait ContentSource {
    /// Read the whole file as UTF-8 text.
    fn read(&self, path: &Path) -> Result<String>;
}

/// Reads straight from the file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsContent;

impl ContentSource for FsContent {
    fn read(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).map_err(|source| Error::UnreadableFile {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Change listener; called with no payload after each mutation.
pub type Listener = Box<dyn FnMut() + Send>;

/// Summary of one [`Engine::refresh`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub branch: String,
    /// Changed files reported by source control
    pub files_checked: usize,
    /// Files whose evaluation created or grew a todo
    pub files_mutated: usize,
    /// Whether an unconditional branch-level todo was created or refreshed
    pub branch_level_changed: bool,
    /// Todos on the branch after the pass
    pub todo_count: usize,
}

impl RefreshReport {
    pub fn changed(&self) -> bool {
        self.files_mutated > 0 || self.branch_level_changed
    }
}

pub struct Engine<S: SnapshotStore> {
    root: PathBuf,
    templates: TemplateSet,
    instances: InstanceStore,
    store: S,
    listeners: Vec<Listener>,
    persist_error: Option<Error>,
    /// Stored state not restored yet; see [`Engine::pending`]
    restore_pending: bool,
}

impl<S: SnapshotStore> Engine<S> {
    /// An engine with no restored state.
    pub fn new(root: PathBuf, templates: TemplateSet, store: S) -> Self {
        Self {
            root,
            templates,
            instances: InstanceStore::new(),
            store,
            listeners: Vec::new(),
            persist_error: None,
            restore_pending: false,
        }
    }

    /// An engine restored from the store's last snapshot.
    ///
    /// Orphaned entries are dropped. A snapshot that cannot be read leaves
    /// the engine empty and is reported through
    /// [`take_persist_error`](Self::take_persist_error); the stored file is
    /// not touched until the next mutation.
    pub fn open(root: PathBuf, templates: TemplateSet, store: S) -> Self {
        let mut engine = Self::new(root, templates, store);
        let pruned = engine.restore_from_store();
        if pruned > 0 {
            info!(pruned, "dropped todos for removed templates");
        }
        engine
    }

    /// An engine with no templates, for a host whose config is broken.
    ///
    /// The stored state is restored by the first successful
    /// [`reload_templates`](Self::reload_templates). Nothing is pruned
    /// before that, and saves in the meantime merge onto the stored state.
    pub fn pending(root: PathBuf, store: S) -> Self {
        let mut engine = Self::new(root, TemplateSet::empty(), store);
        engine.restore_pending = true;
        engine
    }

    /// Replace the in-memory todos with the stored snapshot. Returns the
    /// number of entries dropped for unknown templates.
    fn restore_from_store(&mut self) -> usize {
        match self.store.load() {
            Ok(Some(snapshot)) => {
                let restored = snapshot.restore(&self.templates, Utc::now());
                self.instances = restored.store;
                restored.pruned
            }
            Ok(None) => 0,
            Err(err) => {
                warn!(error = %err, "failed to load todo state; starting empty");
                self.persist_error = Some(err);
                0
            }
        }
    }

    /// Register a listener for state changes.
    pub fn subscribe(&mut self, listener: impl FnMut() + Send + 'static) {
        self.listeners.push(Box::new(listener));
    }

    // =========================================================================
    // Evaluation
    // =========================================================================

    /// Evaluate one file for `branch`. Returns true if any todo was created,
    /// grown, or refreshed.
    ///
    /// Content is only read when some template's path pattern matches.
    pub fn evaluate_file(&mut self, branch: &str, path: &Path, content: &dyn ContentSource) -> bool {
        let mutated = self.apply_file(branch, path, content);
        if mutated {
            self.commit();
        }
        mutated
    }

    /// Ensure branch-level todos for `branch`.
    ///
    /// Unconditional templates always get their todo. Aggregating templates
    /// get one only when at least one of `candidates` matches.
    pub fn evaluate_branch(
        &mut self,
        branch: &str,
        candidates: &[PathBuf],
        content: &dyn ContentSource,
    ) -> bool {
        let mutated = self.apply_branch(branch, candidates, content);
        if mutated {
            self.commit();
        }
        mutated
    }

    /// Re-run branch-level evaluation and evaluate every changed file.
    pub fn refresh(
        &mut self,
        branch: &str,
        scm: &dyn SourceControl,
        content: &dyn ContentSource,
    ) -> Result<RefreshReport> {
        let changed = scm.changed_files()?;

        let branch_level_changed = self.apply_branch(branch, &[], content);
        let mut files_mutated = 0;
        for path in &changed {
            if self.apply_file(branch, path, content) {
                files_mutated += 1;
            }
        }

        let report = RefreshReport {
            branch: branch.to_string(),
            files_checked: changed.len(),
            files_mutated,
            branch_level_changed,
            todo_count: self.instances.list(branch).len(),
        };
        if report.changed() {
            self.commit();
        }
        debug!(?report, "refresh finished");
        Ok(report)
    }

    fn apply_file(&mut self, branch: &str, path: &Path, content: &dyn ContentSource) -> bool {
        let Some(relative) = relative_path(&self.root, path) else {
            debug!(path = %path.display(), "outside workspace root, skipping");
            return false;
        };
        if !matcher::path_might_match(&self.templates, &relative) {
            return false;
        }

        let absolute = self.root.join(&relative);
        let matched = matcher::matching_templates(&self.templates, &relative, || {
            read_content(content, &absolute)
        });

        let now = Utc::now();
        let mut mutated = false;
        for template in matched {
            debug!(template = %template.id, path = %relative, "template matched");
            mutated |= match &template.scope {
                TemplateScope::File(_) => self.instances.upsert_file_instance(
                    branch,
                    template,
                    &relative,
                    absolute.clone(),
                    now,
                ),
                TemplateScope::Branch(Some(_)) => self.instances.upsert_branch_instance(
                    branch,
                    template,
                    std::slice::from_ref(&relative),
                    now,
                ),
                TemplateScope::Branch(None) => false,
            };
        }
        mutated
    }

    fn apply_branch(&mut self, branch: &str, candidates: &[PathBuf], content: &dyn ContentSource) -> bool {
        let relatives: Vec<String> = candidates
            .iter()
            .filter_map(|path| relative_path(&self.root, path))
            .collect();

        let now = Utc::now();
        let mut mutated = false;
        for template in &self.templates {
            match &template.scope {
                TemplateScope::File(_) => {}
                TemplateScope::Branch(None) => {
                    mutated |= self.instances.upsert_branch_instance(branch, template, &[], now);
                }
                TemplateScope::Branch(Some(_)) => {
                    let matching: Vec<String> = relatives
                        .iter()
                        .filter(|relative| {
                            matcher::matches(template, relative, || {
                                read_content(content, &self.root.join(relative.as_str()))
                            })
                        })
                        .cloned()
                        .collect();
                    if !matching.is_empty() {
                        mutated |= self
                            .instances
                            .upsert_branch_instance(branch, template, &matching, now);
                    }
                }
            }
        }
        mutated
    }

    // =========================================================================
    // Status verbs
    // =========================================================================

    /// Mark a todo completed.
    pub fn complete(&mut self, branch: &str, id: &str) -> Result<TodoInstance> {
        self.set_status(branch, id, |_| Some(TodoStatus::Completed))
    }

    /// Move a completed todo back to pending.
    pub fn reopen(&mut self, branch: &str, id: &str) -> Result<TodoInstance> {
        self.set_status(branch, id, |current| {
            (current == TodoStatus::Completed).then_some(TodoStatus::Pending)
        })
    }

    /// Mark a todo ignored.
    pub fn ignore(&mut self, branch: &str, id: &str) -> Result<TodoInstance> {
        self.set_status(branch, id, |_| Some(TodoStatus::Ignored))
    }

    /// Move an ignored todo back to pending.
    pub fn unignore(&mut self, branch: &str, id: &str) -> Result<TodoInstance> {
        self.set_status(branch, id, |current| {
            (current == TodoStatus::Ignored).then_some(TodoStatus::Pending)
        })
    }

    /// Unknown ids leave state untouched. Otherwise the state is persisted
    /// and listeners are notified even if the status did not change.
    fn set_status<F>(&mut self, branch: &str, id: &str, next: F) -> Result<TodoInstance>
    where
        F: FnOnce(TodoStatus) -> Option<TodoStatus>,
    {
        let todo = self.instances.get_mut(branch, id)?;
        if let Some(status) = next(todo.status) {
            todo.transition(status, Utc::now());
        }
        let todo = todo.clone();
        self.commit();
        Ok(todo)
    }

    /// Drop every todo of `branch`. Returns whether the branch had any.
    pub fn clear_branch(&mut self, branch: &str) -> bool {
        let removed = self.instances.clear_branch(branch);
        self.commit();
        removed
    }

    // =========================================================================
    // Templates
    // =========================================================================

    /// Swap in a reloaded template set.
    ///
    /// An `Err` keeps the current set and is returned as is. On success,
    /// todos of removed templates are pruned (the count is returned) and
    /// display fields of the rest are re-derived.
    pub fn reload_templates(&mut self, templates: Result<TemplateSet>) -> Result<usize> {
        let templates = match templates {
            Ok(templates) => templates,
            Err(err) => {
                warn!(error = %err, "template reload failed; keeping previous templates");
                return Err(err);
            }
        };

        self.templates = templates;
        let mut pruned = 0;
        if self.restore_pending {
            self.restore_pending = false;
            pruned += self.restore_from_store();
        }
        pruned += self.instances.prune_orphans(&self.templates.ids());
        let (mismatched, refreshed) = self.instances.sync_templates(&self.templates);
        pruned += mismatched;

        info!(templates = self.templates.len(), pruned, "templates reloaded");
        if pruned > 0 || refreshed {
            self.commit();
        }
        Ok(pruned)
    }

    pub fn templates(&self) -> &TemplateSet {
        &self.templates
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Todos of `branch` in creation order.
    pub fn list(&self, branch: &str) -> &[TodoInstance] {
        self.instances.list(branch)
    }

    pub fn list_all(&self) -> &std::collections::BTreeMap<String, Vec<TodoInstance>> {
        self.instances.list_all()
    }

    pub fn get(&self, branch: &str, id: &str) -> Option<&TodoInstance> {
        self.instances.get(branch, id)
    }

    pub fn instances(&self) -> &InstanceStore {
        &self.instances
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Last persistence failure, if any, clearing it.
    pub fn take_persist_error(&mut self) -> Option<Error> {
        self.persist_error.take()
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    fn commit(&mut self) {
        let snapshot = Snapshot::capture(&self.instances);
        if let Err(err) = self.store.save(&snapshot) {
            warn!(error = %err, "failed to persist todo state");
            self.persist_error = Some(err);
        }
        for listener in &mut self.listeners {
            listener();
        }
    }
}

fn read_content(source: &dyn ContentSource, path: &Path) -> Option<String> {
    match source.read(path) {
        Ok(text) => Some(text),
        Err(err) => {
            debug!(path = %path.display(), error = %err, "content unavailable, treating as no match");
            None
        }
    }
}

/// Workspace-relative, `/`-separated form of `path`.
///
/// Relative inputs are taken as relative to `root`. Returns `None` for paths
/// outside the root, the root itself, and paths that climb with `..`.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let stripped = if path.is_absolute() {
        match path.strip_prefix(root) {
            Ok(rest) => rest.to_path_buf(),
            Err(_) => {
                let root = root.canonicalize().ok()?;
                let path = path.canonicalize().ok()?;
                path.strip_prefix(&root).ok()?.to_path_buf()
            }
        }
    } else {
        path.to_path_buf()
    };

    let mut parts = Vec::new();
    for component in stripped.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?.to_string()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TemplateEntry;
    use crate::snapshot::MemorySnapshotStore;
    use std::collections::HashMap;

    struct MapContent(HashMap<PathBuf, String>);

    impl ContentSource for MapContent {
        fn read(&self, path: &Path) -> Result<String> {
            self.0.get(path).cloned().ok_or_else(|| Error::UnreadableFile {
                path: path.to_path_buf(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
        }
    }

    fn engine(entries: Vec<TemplateEntry>) -> Engine<MemorySnapshotStore> {
        let templates = TemplateSet::from_entries(&entries).expect("templates");
        Engine::new(PathBuf::from("/w"), templates, MemorySnapshotStore::new())
    }

    fn entry(id: &str, pattern: Option<&str>) -> TemplateEntry {
        TemplateEntry {
            id: Some(id.to_string()),
            name: Some(id.to_string()),
            description: Some(format!("{id} description")),
            path_pattern: pattern.map(str::to_string),
            ..TemplateEntry::default()
        }
    }

    #[test]
    fn relative_path_normalizes() {
        let root = Path::new("/w");
        assert_eq!(relative_path(root, Path::new("/w/src/a.rs")).as_deref(), Some("src/a.rs"));
        assert_eq!(relative_path(root, Path::new("./src/a.rs")).as_deref(), Some("src/a.rs"));
        assert_eq!(relative_path(root, Path::new("../x")), None);
        assert_eq!(relative_path(root, Path::new("/w")), None);
    }

    #[test]
    fn commit_saves_and_notifies_once_per_mutation() {
        let mut engine = engine(vec![entry("t1", Some("**/*.rs"))]);
        let (tx, rx) = std::sync::mpsc::channel();
        engine.subscribe(move || {
            let _ = tx.send(());
        });

        let content = MapContent(HashMap::new());
        assert!(engine.evaluate_file("main", Path::new("/w/src/a.rs"), &content));
        assert!(!engine.evaluate_file("main", Path::new("/w/src/a.rs"), &content));

        assert_eq!(rx.try_iter().count(), 1);
        assert_eq!(engine.store().save_count(), 1);
    }

    #[test]
    fn outside_root_is_ignored() {
        let mut engine = engine(vec![entry("t1", Some("**"))]);
        let content = MapContent(HashMap::new());
        assert!(!engine.evaluate_file("main", Path::new("/elsewhere/a.rs"), &content));
        assert!(engine.list("main").is_empty());
    }

    #[test]
    fn reload_error_keeps_previous_templates() {
        let mut engine = engine(vec![entry("t1", Some("**"))]);
        let err = engine
            .reload_templates(Err(Error::InvalidConfig("broken".to_string())))
            .expect_err("reload error");
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert!(engine.templates().contains("t1"));
    }

    #[test]
    fn reopen_only_moves_completed_todos() {
        let mut entry = entry("notes", None);
        entry.branch_level = Some(true);
        let mut engine = engine(vec![entry]);
        engine.evaluate_branch("main", &[], &FsContent);

        let todo = engine.ignore("main", "branch:notes").expect("ignore");
        assert_eq!(todo.status, TodoStatus::Ignored);
        let todo = engine.reopen("main", "branch:notes").expect("reopen");
        assert_eq!(todo.status, TodoStatus::Ignored);
        let todo = engine.unignore("main", "branch:notes").expect("unignore");
        assert_eq!(todo.status, TodoStatus::Pending);
        assert!(todo.ignored_at.is_none());
    }

    #[test]
    fn unknown_id_changes_nothing() {
        let mut engine = engine(vec![entry("t1", Some("**"))]);
        assert!(engine.complete("main", "t1:nope").is_err());
        assert_eq!(engine.store().save_count(), 0);
    }
}
