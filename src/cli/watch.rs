//! branchtodo watch command implementation
//!
//! Runs the watch host in the foreground. Each outcome is printed as a line
//! (or as a JSONL event with `--json`/`--events`).

use std::path::PathBuf;
use std::time::Duration;

use crate::engine::relative_path;
use crate::error::Result;
use crate::events::{EventKind, EventSink};
use crate::watch::{self, WatchOutcome};
use crate::workspace::Workspace;

pub struct WatchOptions {
    pub debounce_ms: Option<u64>,
    pub repo: Option<PathBuf>,
    pub json: bool,
    pub quiet: bool,
    pub events: Option<String>,
}

pub fn run(options: WatchOptions) -> Result<()> {
    let (mut workspace, config_error) = Workspace::discover_tolerant(options.repo.as_deref())?;
    let (event_sink, events_to_stdout) = super::open_event_sink(options.events.as_deref())?;
    let mut sink = match event_sink {
        Some(sink) => Some(sink),
        None if options.json => Some(EventSink::stdout()),
        None => None,
    };
    let print_lines = !options.quiet && !options.json && !events_to_stdout;

    let debounce = Duration::from_millis(
        options
            .debounce_ms
            .unwrap_or(workspace.config().watch.debounce_ms),
    );
    let mut engine = match config_error {
        Some(_) => workspace.pending_engine(),
        None => workspace.open_engine()?,
    };
    let root = workspace.root().to_path_buf();
    if let Some(warning) = super::persist_warning(&mut engine) {
        eprintln!("warning: {warning}");
    }

    if print_lines {
        println!(
            "branchtodo watch: {} (debounce {}ms)",
            root.display(),
            debounce.as_millis()
        );
    }

    let mut report = |outcome: WatchOutcome| {
        let (kind, branch, data, line) = describe(&root, &outcome);
        if let Some(warning) = super::emit_event(&mut sink, kind, branch.as_deref(), data) {
            eprintln!("warning: {warning}");
        }
        if print_lines {
            println!("{line}");
        }
    };
    // Todos on disk stay untouched until the config is fixed.
    if let Some(err) = config_error {
        report(WatchOutcome::ReloadFailed(err));
    }

    watch::run(&mut workspace, &mut engine, debounce, report)
}

fn describe(
    root: &std::path::Path,
    outcome: &WatchOutcome,
) -> (EventKind, Option<String>, serde_json::Value, String) {
    match outcome {
        WatchOutcome::Evaluated { branch, path } => {
            let shown = relative_path(root, path).unwrap_or_else(|| path.display().to_string());
            (
                EventKind::StateChanged,
                Some(branch.clone()),
                serde_json::json!({ "path": shown }),
                format!("{branch}: todos updated for {shown}"),
            )
        }
        WatchOutcome::Refreshed(report) => (
            EventKind::TodosRefreshed,
            Some(report.branch.clone()),
            serde_json::to_value(report).unwrap_or(serde_json::Value::Null),
            format!(
                "{}: refreshed, {} todo(s), {} changed file(s)",
                report.branch, report.todo_count, report.files_checked
            ),
        ),
        WatchOutcome::TemplatesReloaded { templates, pruned } => (
            EventKind::TemplatesReloaded,
            None,
            serde_json::json!({ "templates": templates, "pruned": pruned }),
            format!("templates reloaded: {templates} template(s), {pruned} todo(s) pruned"),
        ),
        WatchOutcome::ReloadFailed(err) => (
            EventKind::TemplatesReloaded,
            None,
            serde_json::json!({ "error": err.to_string(), "kept_previous": true }),
            format!("config error, keeping previous templates: {err}"),
        ),
    }
}
