//! Long-running watch host.
//!
//! File-system events are collected per path by a [`Debouncer`]; once a
//! path has been quiet for the debounce window it is classified and
//! dispatched to the engine, one at a time, on the watching thread:
//!
//! - the config file: reload templates (a bad config keeps the old set)
//! - `HEAD` in the git dir: re-resolve the branch and refresh
//! - anything else outside `.git/` and the local state dir: evaluate the file

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use crate::config::{CONFIG_FILE, CONFIG_FILE_JSON};
use crate::engine::{Engine, FsContent, RefreshReport};
use crate::error::{Error, Result};
use crate::snapshot::SnapshotStore;
use crate::storage::LOCAL_DIR;
use crate::workspace::Workspace;

const IDLE_TIMEOUT: Duration = Duration::from_secs(3600);

/// Collapses bursts of events per path; the latest event wins.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    pending: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    /// Record an event for `path`, pushing its deadline out.
    pub fn push(&mut self, path: PathBuf, now: Instant) {
        self.pending.insert(path, now + self.window);
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().min().copied()
    }

    /// Remove and return every path whose deadline has passed, sorted.
    pub fn drain_ready(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut ready: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &ready {
            self.pending.remove(path);
        }
        ready.sort();
        ready
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// What a settled path means for the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchAction {
    Evaluate(PathBuf),
    ReloadConfig,
    BranchChanged,
}

/// Classify a settled path; `None` means it is not of interest.
pub fn classify(root: &Path, git_dir: Option<&Path>, path: &Path) -> Option<WatchAction> {
    if let Some(git_dir) = git_dir {
        if path.starts_with(git_dir) {
            return (path == git_dir.join("HEAD")).then_some(WatchAction::BranchChanged);
        }
    }

    let relative = path.strip_prefix(root).ok()?;
    let mut components = relative.components();
    let first = components.next()?.as_os_str();
    if first == ".git" || first == LOCAL_DIR {
        return None;
    }
    if components.next().is_none() && (first == CONFIG_FILE || first == CONFIG_FILE_JSON) {
        return Some(WatchAction::ReloadConfig);
    }
    Some(WatchAction::Evaluate(path.to_path_buf()))
}

/// Reported to the host after each dispatched action.
#[derive(Debug)]
pub enum WatchOutcome {
    Evaluated { branch: String, path: PathBuf },
    Refreshed(RefreshReport),
    TemplatesReloaded { templates: usize, pruned: usize },
    ReloadFailed(Error),
}

/// Watch the workspace until the watcher's channel closes.
///
/// Starts with a refresh of the current branch. Failures while handling a
/// single event are logged and the loop keeps going.
pub fn run<S, F>(
    workspace: &mut Workspace,
    engine: &mut Engine<S>,
    debounce: Duration,
    mut on_outcome: F,
) -> Result<()>
where
    S: SnapshotStore,
    F: FnMut(WatchOutcome),
{
    let (event_tx, event_rx) = mpsc::channel();
    let mut watcher: RecommendedWatcher = notify::recommended_watcher(move |res| {
        let _ = event_tx.send(res);
    })?;

    let root = canonical(workspace.root());
    watcher.watch(&root, RecursiveMode::Recursive)?;
    let git_dir = workspace.git_dir().map(canonical);
    if let Some(git_dir) = &git_dir {
        if !git_dir.starts_with(&root) {
            watcher.watch(git_dir, RecursiveMode::NonRecursive)?;
        }
    }

    let mut branch = workspace.resolve_branch(None)?;
    let report = engine.refresh(&branch, workspace.scm(), &FsContent)?;
    on_outcome(WatchOutcome::Refreshed(report));

    let mut debouncer = Debouncer::new(debounce);
    loop {
        let timeout = debouncer
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or(IDLE_TIMEOUT);

        match event_rx.recv_timeout(timeout) {
            Ok(Ok(event)) if matches!(event.kind, EventKind::Access(_)) => {}
            Ok(Ok(event)) => {
                let now = Instant::now();
                for path in event.paths {
                    debouncer.push(path, now);
                }
            }
            Ok(Err(err)) => warn!(error = %err, "watch error"),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }

        // A steady stream of events must not starve paths that have settled.
        for path in debouncer.drain_ready(Instant::now()) {
            let Some(action) = classify(&root, git_dir.as_deref(), &path) else {
                continue;
            };
            debug!(?action, "dispatching");
            if let Err(err) = dispatch(workspace, engine, &mut branch, action, &mut on_outcome) {
                warn!(error = %err, "watch action failed");
            }
        }
    }

    Ok(())
}

/// Notify reports canonical paths on some platforms (e.g. `/private/var`).
fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn dispatch<S, F>(
    workspace: &mut Workspace,
    engine: &mut Engine<S>,
    branch: &mut String,
    action: WatchAction,
    on_outcome: &mut F,
) -> Result<()>
where
    S: SnapshotStore,
    F: FnMut(WatchOutcome),
{
    match action {
        WatchAction::Evaluate(path) => {
            if !path.is_file() {
                return Ok(());
            }
            if engine.evaluate_file(branch, &path, &FsContent) {
                on_outcome(WatchOutcome::Evaluated {
                    branch: branch.clone(),
                    path,
                });
            }
        }
        WatchAction::BranchChanged => {
            *branch = workspace.resolve_branch(None)?;
            let report = engine.refresh(branch, workspace.scm(), &FsContent)?;
            on_outcome(WatchOutcome::Refreshed(report));
        }
        WatchAction::ReloadConfig => match engine.reload_templates(workspace.reload_templates()) {
            Ok(pruned) => {
                on_outcome(WatchOutcome::TemplatesReloaded {
                    templates: engine.templates().len(),
                    pruned,
                });
                let report = engine.refresh(branch, workspace.scm(), &FsContent)?;
                on_outcome(WatchOutcome::Refreshed(report));
            }
            Err(err) => on_outcome(WatchOutcome::ReloadFailed(err)),
        },
    }
    Ok(())
}
