#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use git2::{IndexAddOption, Oid, Repository, Signature};
use tempfile::TempDir;

pub struct TestRepo {
    dir: TempDir,
    repo: Repository,
}

impl TestRepo {
    pub fn init() -> Result<Self, git2::Error> {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let repo = Repository::init(dir.path())?;
        set_identity(&repo)?;
        Ok(Self { dir, repo })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write_file(&self, rel_path: &str, contents: &str) -> std::io::Result<PathBuf> {
        let path = self.dir.path().join(rel_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents)?;
        Ok(path)
    }

    pub fn write_config(&self, contents: &str) -> std::io::Result<PathBuf> {
        self.write_file(".branchtodo.toml", contents)
    }

    pub fn state_file(&self) -> PathBuf {
        self.dir.path().join(".git").join("branchtodo").join("state.json")
    }

    pub fn read_state(&self) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(self.state_file())?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn commit_all(&self, message: &str) -> Result<Oid, git2::Error> {
        let mut index = self.repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;
        let sig = Signature::now("branchtodo-test", "branchtodo-test@example.com")?;

        let parent = self
            .repo
            .head()
            .ok()
            .and_then(|head| head.target())
            .and_then(|oid| self.repo.find_commit(oid).ok());

        let oid = match parent {
            Some(parent) => self
                .repo
                .commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])?,
            None => self
                .repo
                .commit(Some("HEAD"), &sig, &sig, message, &tree, &[])?,
        };

        Ok(oid)
    }

    pub fn stage_path(&self, rel_path: &str) -> Result<(), git2::Error> {
        let mut index = self.repo.index()?;
        index.add_path(Path::new(rel_path))?;
        index.write()?;
        Ok(())
    }

    pub fn commit_file(
        &self,
        rel_path: &str,
        contents: &str,
        message: &str,
    ) -> Result<Oid, Box<dyn std::error::Error>> {
        self.write_file(rel_path, contents)?;
        Ok(self.commit_all(message)?)
    }

    pub fn create_branch(&self, name: &str) -> Result<(), git2::Error> {
        let commit = self.repo.head()?.peel_to_commit()?;
        self.repo.branch(name, &commit, false)?;
        Ok(())
    }

    pub fn checkout_branch(&self, name: &str) -> Result<(), git2::Error> {
        let refname = format!("refs/heads/{name}");
        self.repo.set_head(&refname)?;
        self.repo.checkout_head(None)?;
        Ok(())
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    /// `branchtodo` command rooted at this repository.
    pub fn cmd(&self) -> Command {
        let mut cmd = branchtodo_cmd();
        cmd.current_dir(self.path());
        cmd
    }
}

pub fn branchtodo_cmd() -> Command {
    let mut cmd = Command::cargo_bin("branchtodo").expect("binary");
    cmd.env_remove("RUST_LOG")
        .env_remove("BRANCHTODO_REPO")
        .env_remove("BRANCHTODO_EVENTS");
    cmd
}

fn set_identity(repo: &Repository) -> Result<(), git2::Error> {
    let mut cfg = repo.config()?;
    cfg.set_str("user.name", "branchtodo-test")?;
    cfg.set_str("user.email", "branchtodo-test@example.com")?;
    Ok(())
}

/// Config with a file rule, an unconditional branch rule, and an aggregating
/// branch rule.
pub const SAMPLE_CONFIG: &str = r#"
[[templates]]
id = "t1"
name = "Expose Aura method"
description = "Update the LWC wrapper"
path_pattern = "**/*.cls"
content_must_include = "@AuraEnabled"
priority = "high"

[[templates]]
id = "changelog"
name = "Update the changelog"
description = "Describe the change"
branch_level = true

[[templates]]
id = "go"
name = "Review Go changes"
description = "Summarize the Go changes"
path_pattern = "src/**/*.go"
branch_level = true
"#;
