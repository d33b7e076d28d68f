//! Workspace context shared by CLI commands and the watch host.
//!
//! A workspace is either the working tree of a git repository or, outside
//! git, the nearest ancestor directory holding a config file (falling back
//! to the starting directory itself).

use std::path::{Path, PathBuf};

use crate::config::{Config, CONFIG_FILE};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::git::{self, GitSourceControl, NoSourceControl, SourceControl};
use crate::snapshot::FileSnapshotStore;
use crate::storage::Storage;
use crate::template::TemplateSet;

pub struct Workspace {
    root: PathBuf,
    config_path: Option<PathBuf>,
    config: Config,
    storage: Storage,
    scm: Box<dyn SourceControl>,
    git_dir: Option<PathBuf>,
}

impl Workspace {
    /// Discover the workspace containing `start` (or the current directory).
    ///
    /// A configuration that fails to parse or validate is an error here;
    /// a missing configuration yields an empty template set.
    pub fn discover(start: Option<&Path>) -> Result<Self> {
        Self::locate(start, false).map(|(workspace, _)| workspace)
    }

    /// Like [`discover`](Self::discover), but a broken configuration is
    /// returned beside a workspace that has no templates.
    pub fn discover_tolerant(start: Option<&Path>) -> Result<(Self, Option<Error>)> {
        Self::locate(start, true)
    }

    fn locate(start: Option<&Path>, tolerant: bool) -> Result<(Self, Option<Error>)> {
        let start = match start {
            Some(path) => path.to_path_buf(),
            None => std::env::current_dir()?,
        };
        if !start.is_dir() {
            return Err(Error::InvalidArgument(format!(
                "not a directory: {}",
                start.display()
            )));
        }

        match git::open_repo(Some(&start)) {
            Ok(repo) => {
                let root = git::workdir(&repo)?;
                let storage = Storage::new(root.clone(), Some(git::common_dir(&repo)));
                let git_dir = repo.path().to_path_buf();
                let (config_path, config, config_error) = load_config_for(&root, tolerant)?;
                let scm = GitSourceControl::new(repo, config.default_branch.clone());
                let workspace = Self {
                    root,
                    config_path,
                    config,
                    storage,
                    scm: Box::new(scm),
                    git_dir: Some(git_dir),
                };
                Ok((workspace, config_error))
            }
            Err(Error::RepoNotFound(_)) => {
                let root = start
                    .ancestors()
                    .find(|dir| Config::find(dir).is_some())
                    .unwrap_or(start.as_path())
                    .to_path_buf();
                let storage = Storage::standalone(root.clone());
                let (config_path, config, config_error) = load_config_for(&root, tolerant)?;
                let scm = NoSourceControl::new(config.default_branch.clone());
                let workspace = Self {
                    root,
                    config_path,
                    config,
                    storage,
                    scm: Box::new(scm),
                    git_dir: None,
                };
                Ok((workspace, config_error))
            }
            Err(err) => Err(err),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Path of the loaded config file, if one exists.
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Where `init` writes a new configuration.
    pub fn default_config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn scm(&self) -> &dyn SourceControl {
        self.scm.as_ref()
    }

    pub fn in_git(&self) -> bool {
        self.git_dir.is_some()
    }

    /// Per-worktree git dir (where `HEAD` lives), when inside git.
    pub fn git_dir(&self) -> Option<&Path> {
        self.git_dir.as_deref()
    }

    /// Templates from the loaded config; empty without a config file.
    pub fn templates(&self) -> Result<TemplateSet> {
        if self.config_path.is_none() {
            return Ok(TemplateSet::empty());
        }
        self.config.template_set()
    }

    /// Re-read the config file from disk.
    pub fn reload_templates(&mut self) -> Result<TemplateSet> {
        let (config_path, config) = load_config(&self.root)?;
        let templates = match &config_path {
            Some(_) => config.template_set()?,
            None => TemplateSet::empty(),
        };
        self.config_path = config_path;
        self.config = config;
        Ok(templates)
    }

    /// `explicit`, or the checked-out branch.
    pub fn resolve_branch(&self, explicit: Option<&str>) -> Result<String> {
        match explicit {
            Some(branch) if !branch.trim().is_empty() => Ok(branch.trim().to_string()),
            Some(_) => Err(Error::InvalidArgument("branch cannot be empty".to_string())),
            None => self.scm.current_branch(),
        }
    }

    /// Engine restored from this workspace's state file.
    pub fn open_engine(&self) -> Result<Engine<FileSnapshotStore>> {
        let templates = self.templates()?;
        Ok(Engine::open(
            self.root.clone(),
            templates,
            self.storage.snapshot_store(),
        ))
    }

    /// Engine that restores this workspace's state on its first successful
    /// template reload.
    pub fn pending_engine(&self) -> Engine<FileSnapshotStore> {
        Engine::pending(self.root.clone(), self.storage.snapshot_store())
    }

    /// Resolve a user-supplied path against the workspace root.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        match std::env::current_dir() {
            Ok(cwd) if cwd.starts_with(&self.root) => cwd.join(path),
            _ => self.root.join(path),
        }
    }
}

fn load_config(root: &Path) -> Result<(Option<PathBuf>, Config)> {
    match Config::discover(root)? {
        Some((path, config)) => Ok((Some(path), config)),
        None => Ok((None, Config::default())),
    }
}

/// With `tolerant`, an invalid config (unparsable or with bad templates)
/// becomes the default config plus the error.
fn load_config_for(root: &Path, tolerant: bool) -> Result<(Option<PathBuf>, Config, Option<Error>)> {
    if !tolerant {
        let (path, config) = load_config(root)?;
        return Ok((path, config, None));
    }
    let checked = load_config(root).and_then(|(path, config)| {
        if path.is_some() {
            config.template_set()?;
        }
        Ok((path, config))
    });
    match checked {
        Ok((path, config)) => Ok((path, config, None)),
        Err(err @ Error::InvalidConfig(_)) => Ok((Config::find(root), Config::default(), Some(err))),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn standalone_directory_uses_local_state() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::discover(Some(dir.path())).unwrap();

        assert!(!ws.in_git());
        assert!(ws.config_path().is_none());
        assert!(ws.templates().unwrap().is_empty());
        assert_eq!(ws.resolve_branch(None).unwrap(), "default");
        assert_eq!(
            ws.storage().state_file(),
            dir.path().join(".branchtodo/state.json")
        );
    }

    #[test]
    fn nested_start_finds_config_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            "default_branch = \"trunk\"\ntemplates = []\n",
        )
        .unwrap();
        let nested = dir.path().join("a/b");
        fs::create_dir_all(&nested).unwrap();

        let ws = Workspace::discover(Some(&nested)).unwrap();
        assert_eq!(ws.root(), dir.path());
        assert_eq!(ws.resolve_branch(None).unwrap(), "trunk");
        assert_eq!(ws.resolve_branch(Some(" feature/x ")).unwrap(), "feature/x");
        assert!(ws.resolve_branch(Some("  ")).is_err());
    }

    #[test]
    fn invalid_config_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "[[templates]]\nid = \"x\"\n").unwrap();
        match Workspace::discover(Some(dir.path())) {
            Err(Error::InvalidConfig(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("expected config error"),
        }
    }

    #[test]
    fn tolerant_discovery_keeps_going_without_templates() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "[[templates]]\nid = \"x\"\n").unwrap();

        let (ws, config_error) = Workspace::discover_tolerant(Some(dir.path())).unwrap();
        assert!(matches!(config_error, Some(Error::InvalidConfig(_))));
        assert_eq!(ws.root(), dir.path());
        assert_eq!(ws.config_path(), Some(dir.path().join(CONFIG_FILE).as_path()));
        assert!(ws.templates().unwrap().is_empty());

        let missing = dir.path().join("missing");
        assert!(matches!(
            Workspace::discover_tolerant(Some(&missing)),
            Err(Error::InvalidArgument(_))
        ));
    }
}
