//! branchtodo init command implementation
//!
//! Writes a starter `.branchtodo.toml` and creates the state directory.

use std::path::PathBuf;

use crate::config::Config;
use crate::error::Result;
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::storage::ensure_gitignore;
use crate::workspace::Workspace;

pub struct InitOptions {
    pub repo: Option<PathBuf>,
    pub json: bool,
    pub quiet: bool,
}

#[derive(serde::Serialize)]
struct InitReport {
    root: PathBuf,
    config: PathBuf,
    state_file: PathBuf,
    created: InitCreated,
    updated: InitUpdated,
}

#[derive(serde::Serialize)]
struct InitCreated {
    config: bool,
    state_dir: bool,
}

#[derive(serde::Serialize)]
struct InitUpdated {
    gitignore: bool,
}

pub fn run(options: InitOptions) -> Result<()> {
    let workspace = Workspace::discover(options.repo.as_deref())?;
    let root = workspace.root().to_path_buf();

    let (config_path, created_config) = match workspace.config_path() {
        Some(path) => (path.to_path_buf(), false),
        None => {
            let path = workspace.default_config_path();
            Config::starter().save(&path)?;
            (path, true)
        }
    };

    let storage = workspace.storage();
    let created_state_dir = storage.init()?;
    let updated_gitignore = if storage.is_shared() {
        false
    } else {
        ensure_gitignore(&root)?
    };

    let report = InitReport {
        root: root.clone(),
        config: config_path.clone(),
        state_file: storage.state_file(),
        created: InitCreated {
            config: created_config,
            state_dir: created_state_dir,
        },
        updated: InitUpdated {
            gitignore: updated_gitignore,
        },
    };

    let mut created_items = Vec::new();
    if created_config {
        created_items.push(config_path.display().to_string());
    }
    if created_state_dir {
        created_items.push(storage.state_dir().display().to_string());
    }

    let header = if created_items.is_empty() && !updated_gitignore {
        "branchtodo init: nothing to do".to_string()
    } else {
        "branchtodo init: initialized workspace".to_string()
    };

    let mut human = HumanOutput::new(header);
    human.push_summary("root", root.display().to_string());
    human.push_summary(
        "created",
        if created_items.is_empty() {
            "none".to_string()
        } else {
            created_items.join(", ")
        },
    );
    if updated_gitignore {
        human.push_summary("updated", ".gitignore");
    }
    if !workspace.in_git() {
        human.push_warning("not a git repository; todos are kept under the default branch");
    }
    human.push_next_step("edit .branchtodo.toml to describe your rules");
    human.push_next_step("branchtodo refresh");

    emit_success(
        OutputOptions {
            json: options.json,
            quiet: options.quiet,
        },
        "init",
        &report,
        Some(&human),
    )
}
