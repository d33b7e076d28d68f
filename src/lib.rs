//! branchtodo - Branch-scoped Todo Library
//!
//! This library provides the rule-matching and todo lifecycle engine behind
//! the branchtodo CLI.
//!
//! # Core Concepts
//!
//! - **Templates**: declarative rules (path glob plus optional literal content
//!   filters) loaded from `.branchtodo.toml`
//! - **Todo instances**: stateful obligations raised per file or per branch,
//!   with ids derived from the template and scope
//! - **Branches**: every todo belongs to exactly one branch's collection
//! - **Snapshots**: persisted status of every branch's todos
//!
//! # Module Organization
//!
//! - `template`: Template types and validation
//! - `matcher`: Path and content predicates
//! - `instance`: Todo instances and the per-branch store
//! - `snapshot`: Persisted state and snapshot stores
//! - `engine`: Orchestration, change listeners, persistence on mutation
//! - `git`: Source-control collaborator using libgit2
//! - `workspace`: Workspace discovery and wiring
//! - `config`: Configuration loading from `.branchtodo.toml`
//! - `storage`: State directory layout and JSON I/O
//! - `lock`: File locking and atomic writes
//! - `events`: JSONL events for integrations
//! - `watch`: Debounced file-system watch host
//! - `output`: Human and JSON command output
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface using clap

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod git;
pub mod instance;
pub mod lock;
pub mod matcher;
pub mod output;
pub mod snapshot;
pub mod storage;
pub mod template;
pub mod watch;
pub mod workspace;

pub use engine::{ContentSource, Engine, FsContent, RefreshReport};
pub use error::{Error, Result};
pub use instance::{InstanceStore, TodoInstance, TodoStatus};
pub use template::{Priority, Template, TemplateSet};
