//! Storage layer for branchtodo
//!
//! Persistent state lives in one of two places:
//! - `.git/branchtodo/` when the workspace is a git checkout (the common git
//!   dir, so linked worktrees share todo state for shared branches)
//! - `.branchtodo/` at the workspace root otherwise
//!
//! # Directory Structure
//!
//! ```text
//! .git/branchtodo/              # or .branchtodo/ without git
//!   state.json                  # Snapshot of every branch's todos
//!   state.json.lock             # Advisory lock guarding state.json
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::snapshot::FileSnapshotStore;

/// Workspace-local state directory (no git)
pub const LOCAL_DIR: &str = ".branchtodo";

/// State directory name inside the git dir
pub const SHARED_DIR: &str = "branchtodo";

/// Snapshot file name
pub const STATE_FILE: &str = "state.json";

/// Storage manager for branchtodo state
#[derive(Debug, Clone)]
pub struct Storage {
    /// Workspace root (where the config file lives)
    root: PathBuf,
    /// Common git directory, when inside a repository
    git_dir: Option<PathBuf>,
}

impl Storage {
    /// Create a storage manager
    ///
    /// # Arguments
    /// * `root` - Workspace root directory
    /// * `git_dir` - Common `.git` directory, or `None` outside git
    pub fn new(root: PathBuf, git_dir: Option<PathBuf>) -> Self {
        Self { root, git_dir }
    }

    /// Storage for a directory that is not under version control
    pub fn standalone(root: PathBuf) -> Self {
        Self::new(root, None)
    }

    // =========================================================================
    // Path accessors
    // =========================================================================

    /// Directory holding the state file
    pub fn state_dir(&self) -> PathBuf {
        match &self.git_dir {
            Some(git_dir) => git_dir.join(SHARED_DIR),
            None => self.root.join(LOCAL_DIR),
        }
    }

    /// Path to the snapshot file
    pub fn state_file(&self) -> PathBuf {
        self.state_dir().join(STATE_FILE)
    }

    /// Whether the state directory lives inside `.git`
    pub fn is_shared(&self) -> bool {
        self.git_dir.is_some()
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Create the state directory; returns true if it was created
    pub fn init(&self) -> Result<bool> {
        let dir = self.state_dir();
        if dir.is_dir() {
            return Ok(false);
        }
        fs::create_dir_all(&dir)?;
        Ok(true)
    }

    /// Snapshot store backed by this storage's state file
    pub fn snapshot_store(&self) -> FileSnapshotStore {
        FileSnapshotStore::new(self.state_file())
    }
}

/// Ensure `.branchtodo/` is in .gitignore if not already present
///
/// Returns true if the file was updated.
pub fn ensure_gitignore(root: &Path) -> Result<bool> {
    let gitignore_path = root.join(".gitignore");
    let pattern = format!("/{}/", LOCAL_DIR);

    let existing = if gitignore_path.exists() {
        fs::read_to_string(&gitignore_path)?
    } else {
        String::new()
    };

    let already_ignored = existing.lines().any(|line| {
        let trimmed = line.trim().trim_start_matches('/').trim_end_matches('/');
        trimmed == LOCAL_DIR
    });
    if already_ignored {
        return Ok(false);
    }

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&gitignore_path)?;

    if !existing.is_empty() && !existing.ends_with('\n') {
        writeln!(file)?;
    }
    writeln!(file, "# branchtodo local state")?;
    writeln!(file, "{}", pattern)?;
    Ok(true)
}
