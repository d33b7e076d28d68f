//! Command-line interface for branchtodo
//!
//! This module defines the CLI structure using clap derive macros.
//! Each command family is implemented in its own submodule.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::engine::Engine;
use crate::error::Result;
use crate::events::{Event, EventDestination, EventKind, EventSink};
use crate::output::OutputOptions;
use crate::snapshot::SnapshotStore;

mod init;
mod list;
mod refresh;
mod todo;
mod watch;

/// branchtodo - branch-scoped todos raised by file rules
///
/// Evaluates changed files against the templates in `.branchtodo.toml` and
/// keeps the resulting todos per git branch.
#[derive(Parser, Debug)]
#[command(name = "branchtodo")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the workspace (defaults to current directory)
    #[arg(long, global = true, env = "BRANCHTODO_REPO")]
    pub repo: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable debug logging for branchtodo
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Append JSONL events to a file ("-" for stdout)
    #[arg(long, global = true, env = "BRANCHTODO_EVENTS")]
    pub events: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a starter config and create the state directory
    Init,

    /// Print the branch todos are scoped to
    Branch,

    /// List configured templates
    Templates,

    /// List todos
    List {
        /// Branch to list (defaults to the current branch)
        #[arg(short, long)]
        branch: Option<String>,

        /// List todos of every branch
        #[arg(long, conflicts_with = "branch")]
        all: bool,

        /// Only todos with this status: pending, completed, ignored
        #[arg(long)]
        status: Option<String>,
    },

    /// Show one todo
    Show {
        /// Todo id (e.g. "t1:src/lib.rs" or "branch:changelog")
        id: String,

        #[arg(short, long)]
        branch: Option<String>,
    },

    /// Evaluate specific files against the templates
    Check {
        /// Files to evaluate
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        #[arg(short, long)]
        branch: Option<String>,
    },

    /// Re-evaluate branch-level templates and every changed file
    Refresh {
        #[arg(short, long)]
        branch: Option<String>,
    },

    /// Mark a todo completed
    Complete {
        id: String,

        #[arg(short, long)]
        branch: Option<String>,
    },

    /// Move a completed todo back to pending
    Reopen {
        id: String,

        #[arg(short, long)]
        branch: Option<String>,
    },

    /// Mark a todo ignored
    Ignore {
        id: String,

        #[arg(short, long)]
        branch: Option<String>,
    },

    /// Move an ignored todo back to pending
    Unignore {
        id: String,

        #[arg(short, long)]
        branch: Option<String>,
    },

    /// Drop every todo of a branch
    Clear {
        #[arg(short, long)]
        branch: Option<String>,
    },

    /// Watch the workspace and evaluate files as they change
    Watch {
        /// Quiet period before a changed file is evaluated
        #[arg(long)]
        debounce_ms: Option<u64>,
    },
}

impl Cli {
    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Init => init::run(init::InitOptions {
                repo: self.repo,
                json: self.json,
                quiet: self.quiet,
            }),
            Commands::Branch => list::run_branch(list::BranchOptions {
                repo: self.repo,
                json: self.json,
                quiet: self.quiet,
            }),
            Commands::Templates => list::run_templates(list::TemplatesOptions {
                repo: self.repo,
                json: self.json,
                quiet: self.quiet,
            }),
            Commands::List { branch, all, status } => list::run_list(list::ListOptions {
                branch,
                all,
                status,
                repo: self.repo,
                json: self.json,
                quiet: self.quiet,
            }),
            Commands::Show { id, branch } => list::run_show(list::ShowOptions {
                id,
                branch,
                repo: self.repo,
                json: self.json,
                quiet: self.quiet,
            }),
            Commands::Check { paths, branch } => refresh::run_check(refresh::CheckOptions {
                paths,
                branch,
                repo: self.repo,
                json: self.json,
                quiet: self.quiet,
                events: self.events,
            }),
            Commands::Refresh { branch } => refresh::run_refresh(refresh::RefreshOptions {
                branch,
                repo: self.repo,
                json: self.json,
                quiet: self.quiet,
                events: self.events,
            }),
            Commands::Complete { id, branch } => todo::run_status(
                todo::Verb::Complete,
                todo::TodoOptions {
                    id,
                    branch,
                    repo: self.repo,
                    json: self.json,
                    quiet: self.quiet,
                    events: self.events,
                },
            ),
            Commands::Reopen { id, branch } => todo::run_status(
                todo::Verb::Reopen,
                todo::TodoOptions {
                    id,
                    branch,
                    repo: self.repo,
                    json: self.json,
                    quiet: self.quiet,
                    events: self.events,
                },
            ),
            Commands::Ignore { id, branch } => todo::run_status(
                todo::Verb::Ignore,
                todo::TodoOptions {
                    id,
                    branch,
                    repo: self.repo,
                    json: self.json,
                    quiet: self.quiet,
                    events: self.events,
                },
            ),
            Commands::Unignore { id, branch } => todo::run_status(
                todo::Verb::Unignore,
                todo::TodoOptions {
                    id,
                    branch,
                    repo: self.repo,
                    json: self.json,
                    quiet: self.quiet,
                    events: self.events,
                },
            ),
            Commands::Clear { branch } => todo::run_clear(todo::ClearOptions {
                branch,
                repo: self.repo,
                json: self.json,
                quiet: self.quiet,
                events: self.events,
            }),
            Commands::Watch { debounce_ms } => watch::run(watch::WatchOptions {
                debounce_ms,
                repo: self.repo,
                json: self.json,
                quiet: self.quiet,
                events: self.events,
            }),
        }
    }
}

// =============================================================================
// Shared helpers
// =============================================================================

fn open_event_sink(events: Option<&str>) -> Result<(Option<EventSink>, bool)> {
    let destination = EventDestination::parse(events);
    let sink = destination.as_ref().map(|dest| dest.open()).transpose()?;
    let events_to_stdout = matches!(destination, Some(EventDestination::Stdout));
    Ok((sink, events_to_stdout))
}

/// Emit one event; returns a warning message on failure.
fn emit_event<T: Serialize>(
    sink: &mut Option<EventSink>,
    kind: EventKind,
    branch: Option<&str>,
    data: T,
) -> Option<String> {
    let sink = sink.as_mut()?;

    let event = match Event::new(kind, branch.map(str::to_string)).with_data(data) {
        Ok(event) => event,
        Err(err) => return Some(format!("event output failed: {err}")),
    };

    if let Err(err) = sink.emit(&event) {
        return Some(format!("event output failed: {err}"));
    }

    None
}

/// Output options that keep stdout clean for JSONL events.
fn output_options(json: bool, quiet: bool, events_to_stdout: bool) -> OutputOptions {
    OutputOptions {
        json: json && !events_to_stdout,
        quiet: quiet || events_to_stdout,
    }
}

/// Count engine change notifications.
fn track_changes<S: SnapshotStore>(engine: &mut Engine<S>) -> Arc<AtomicUsize> {
    let counter = Arc::new(AtomicUsize::new(0));
    let observer = Arc::clone(&counter);
    engine.subscribe(move || {
        observer.fetch_add(1, Ordering::SeqCst);
    });
    counter
}

/// Emit `state_changed` if the engine reported any change.
fn emit_state_changed(
    sink: &mut Option<EventSink>,
    changes: &AtomicUsize,
    branch: Option<&str>,
) -> Option<String> {
    let count = changes.load(Ordering::SeqCst);
    if count == 0 {
        return None;
    }
    emit_event(
        sink,
        EventKind::StateChanged,
        branch,
        serde_json::json!({ "notifications": count }),
    )
}

/// Warning text for a persistence failure recorded by the engine.
fn persist_warning<S: SnapshotStore>(engine: &mut Engine<S>) -> Option<String> {
    engine
        .take_persist_error()
        .map(|err| format!("todo state not saved: {err}"))
}
