//! Status commands: complete, reopen, ignore, unignore, clear

use std::path::PathBuf;

use serde::Serialize;

use crate::error::Result;
use crate::events::EventKind;
use crate::output::{emit_success, todo_line, HumanOutput};
use crate::workspace::Workspace;

pub struct TodoOptions {
    pub id: String,
    pub branch: Option<String>,
    pub repo: Option<PathBuf>,
    pub json: bool,
    pub quiet: bool,
    pub events: Option<String>,
}

pub struct ClearOptions {
    pub branch: Option<String>,
    pub repo: Option<PathBuf>,
    pub json: bool,
    pub quiet: bool,
    pub events: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Complete,
    Reopen,
    Ignore,
    Unignore,
}

impl Verb {
    fn command(self) -> &'static str {
        match self {
            Verb::Complete => "complete",
            Verb::Reopen => "reopen",
            Verb::Ignore => "ignore",
            Verb::Unignore => "unignore",
        }
    }

    fn event(self) -> EventKind {
        match self {
            Verb::Complete => EventKind::TodoCompleted,
            Verb::Reopen => EventKind::TodoReopened,
            Verb::Ignore => EventKind::TodoIgnored,
            Verb::Unignore => EventKind::TodoUnignored,
        }
    }
}

pub fn run_status(verb: Verb, options: TodoOptions) -> Result<()> {
    let workspace = Workspace::discover(options.repo.as_deref())?;
    let (mut event_sink, events_to_stdout) = super::open_event_sink(options.events.as_deref())?;
    let mut engine = workspace.open_engine()?;
    let changes = super::track_changes(&mut engine);
    let branch = workspace.resolve_branch(options.branch.as_deref())?;

    let before = engine.get(&branch, &options.id).map(|todo| todo.status);
    let todo = match verb {
        Verb::Complete => engine.complete(&branch, &options.id)?,
        Verb::Reopen => engine.reopen(&branch, &options.id)?,
        Verb::Ignore => engine.ignore(&branch, &options.id)?,
        Verb::Unignore => engine.unignore(&branch, &options.id)?,
    };

    let mut human = HumanOutput::new(format!("branchtodo {}: {}", verb.command(), todo_line(&todo)));
    human.push_summary("branch", branch.clone());
    human.push_summary("status", todo.status.to_string());
    if before == Some(todo.status) {
        human.push_warning(format!("status unchanged ({})", todo.status));
    }

    if let Some(warning) = super::persist_warning(&mut engine) {
        human.push_warning(warning);
    }
    if let Some(warning) = super::emit_event(&mut event_sink, verb.event(), Some(&branch), &todo) {
        human.push_warning(warning);
    }
    if let Some(warning) = super::emit_state_changed(&mut event_sink, &changes, Some(&branch)) {
        human.push_warning(warning);
    }

    emit_success(
        super::output_options(options.json, options.quiet, events_to_stdout),
        verb.command(),
        &todo,
        Some(&human),
    )
}

#[derive(Serialize)]
struct ClearReport {
    branch: String,
    removed: usize,
}

pub fn run_clear(options: ClearOptions) -> Result<()> {
    let workspace = Workspace::discover(options.repo.as_deref())?;
    let (mut event_sink, events_to_stdout) = super::open_event_sink(options.events.as_deref())?;
    let mut engine = workspace.open_engine()?;
    let changes = super::track_changes(&mut engine);
    let branch = workspace.resolve_branch(options.branch.as_deref())?;

    let removed = engine.list(&branch).len();
    engine.clear_branch(&branch);
    let report = ClearReport {
        branch: branch.clone(),
        removed,
    };

    let mut human = HumanOutput::new(format!(
        "branchtodo clear: removed {removed} todo(s) from {branch}"
    ));
    if let Some(warning) = super::persist_warning(&mut engine) {
        human.push_warning(warning);
    }
    if let Some(warning) =
        super::emit_event(&mut event_sink, EventKind::BranchCleared, Some(&branch), &report)
    {
        human.push_warning(warning);
    }
    if let Some(warning) = super::emit_state_changed(&mut event_sink, &changes, Some(&branch)) {
        human.push_warning(warning);
    }

    emit_success(
        super::output_options(options.json, options.quiet, events_to_stdout),
        "clear",
        &report,
        Some(&human),
    )
}
