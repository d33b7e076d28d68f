//! Evaluation commands: check, refresh

use std::path::PathBuf;

use serde::Serialize;

use crate::engine::{relative_path, FsContent, RefreshReport};
use crate::error::Result;
use crate::events::EventKind;
use crate::output::{emit_success, todo_line, HumanOutput};
use crate::workspace::Workspace;

pub struct CheckOptions {
    pub paths: Vec<PathBuf>,
    pub branch: Option<String>,
    pub repo: Option<PathBuf>,
    pub json: bool,
    pub quiet: bool,
    pub events: Option<String>,
}

pub struct RefreshOptions {
    pub branch: Option<String>,
    pub repo: Option<PathBuf>,
    pub json: bool,
    pub quiet: bool,
    pub events: Option<String>,
}

#[derive(Serialize)]
struct CheckReport {
    branch: String,
    files: Vec<CheckedFile>,
}

#[derive(Serialize)]
struct CheckedFile {
    path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    relative_path: Option<String>,
    /// Todos on the branch that reference this file
    todos: Vec<String>,
}

pub fn run_check(options: CheckOptions) -> Result<()> {
    let workspace = Workspace::discover(options.repo.as_deref())?;
    let (mut event_sink, events_to_stdout) = super::open_event_sink(options.events.as_deref())?;
    let mut engine = workspace.open_engine()?;
    let changes = super::track_changes(&mut engine);
    let branch = workspace.resolve_branch(options.branch.as_deref())?;

    let mut warnings = Vec::new();
    let mut files = Vec::new();
    for path in &options.paths {
        let resolved = workspace.resolve_path(path);
        if !resolved.is_file() {
            warnings.push(format!("not a file, skipped: {}", path.display()));
            continue;
        }
        files.push(resolved);
    }

    engine.evaluate_branch(&branch, &files, &FsContent);
    for path in &files {
        engine.evaluate_file(&branch, path, &FsContent);
    }

    let checked: Vec<CheckedFile> = files
        .iter()
        .map(|path| {
            let relative = relative_path(engine.root(), path);
            let todos = match &relative {
                Some(relative) => engine
                    .list(&branch)
                    .iter()
                    .filter(|todo| {
                        todo.relative_path() == Some(relative.as_str())
                            || todo
                                .triggering_files()
                                .is_some_and(|files| files.contains(relative))
                    })
                    .map(|todo| todo.id.clone())
                    .collect(),
                None => Vec::new(),
            };
            CheckedFile {
                path: path.clone(),
                relative_path: relative,
                todos,
            }
        })
        .collect();

    let matched = checked.iter().filter(|file| !file.todos.is_empty()).count();
    let mut human = HumanOutput::new(format!(
        "branchtodo check: {matched} of {} file(s) raised todos on {branch}",
        checked.len()
    ));
    for file in &checked {
        let label = file
            .relative_path
            .clone()
            .unwrap_or_else(|| file.path.display().to_string());
        if file.todos.is_empty() {
            human.push_detail(format!("{label}: no todos"));
        } else {
            human.push_detail(format!("{label}: {}", file.todos.join(", ")));
        }
    }
    for todo in engine.list(&branch).iter().filter(|todo| todo.is_branch_level()) {
        human.push_detail(todo_line(todo));
    }
    warnings.extend(super::persist_warning(&mut engine));
    warnings.extend(super::emit_state_changed(&mut event_sink, &changes, Some(&branch)));
    for warning in warnings {
        human.push_warning(warning);
    }

    emit_success(
        super::output_options(options.json, options.quiet, events_to_stdout),
        "check",
        &CheckReport {
            branch,
            files: checked,
        },
        Some(&human),
    )
}

pub fn run_refresh(options: RefreshOptions) -> Result<()> {
    let workspace = Workspace::discover(options.repo.as_deref())?;
    let (mut event_sink, events_to_stdout) = super::open_event_sink(options.events.as_deref())?;
    let mut engine = workspace.open_engine()?;
    let changes = super::track_changes(&mut engine);
    let branch = workspace.resolve_branch(options.branch.as_deref())?;

    let report: RefreshReport = engine.refresh(&branch, workspace.scm(), &FsContent)?;

    let header = if report.changed() {
        format!("branchtodo refresh: todos updated on {branch}")
    } else {
        format!("branchtodo refresh: no changes on {branch}")
    };
    let mut human = HumanOutput::new(header);
    human.push_summary("changed files", report.files_checked.to_string());
    human.push_summary("files raising todos", report.files_mutated.to_string());
    human.push_summary("todos", report.todo_count.to_string());
    for todo in engine.list(&branch) {
        human.push_detail(todo_line(todo));
    }

    if let Some(warning) = super::persist_warning(&mut engine) {
        human.push_warning(warning);
    }
    if let Some(warning) =
        super::emit_event(&mut event_sink, EventKind::TodosRefreshed, Some(&branch), &report)
    {
        human.push_warning(warning);
    }
    if let Some(warning) = super::emit_state_changed(&mut event_sink, &changes, Some(&branch)) {
        human.push_warning(warning);
    }
    if report.todo_count > 0 {
        human.push_next_step("branchtodo list");
    }

    emit_success(
        super::output_options(options.json, options.quiet, events_to_stdout),
        "refresh",
        &report,
        Some(&human),
    )
}
