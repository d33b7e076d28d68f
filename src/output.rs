//! Shared output formatting for branchtodo CLI commands.

use std::fmt;

use serde::Serialize;

use crate::error::{exit_codes, Error, Result};
use crate::instance::{TodoInstance, TodoStatus};

pub const SCHEMA_VERSION: &str = "branchtodo.v1";

#[derive(Debug, Clone, Copy)]
pub struct OutputOptions {
    pub json: bool,
    pub quiet: bool,
}

/// Human-readable command result.
///
/// Rendered as the header, then aligned `key: value` fields, free-form
/// lines, and finally `warning:` and `hint:` lines.
#[derive(Debug, Clone)]
pub struct HumanOutput {
    header: String,
    fields: Vec<(String, String)>,
    lines: Vec<String>,
    warnings: Vec<String>,
    next_steps: Vec<String>,
}

impl HumanOutput {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            fields: Vec::new(),
            lines: Vec::new(),
            warnings: Vec::new(),
            next_steps: Vec::new(),
        }
    }

    pub fn push_summary(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.push((key.into(), value.into()));
    }

    pub fn push_detail(&mut self, value: impl Into<String>) {
        self.lines.push(value.into());
    }

    pub fn push_warning(&mut self, value: impl Into<String>) {
        self.warnings.push(value.into());
    }

    pub fn push_next_step(&mut self, value: impl Into<String>) {
        self.next_steps.push(value.into());
    }
}

impl fmt::Display for HumanOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.header)?;

        let width = self.fields.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
        for (key, value) in &self.fields {
            if value.is_empty() {
                write!(f, "\n  {key}")?;
            } else {
                write!(f, "\n  {:<width$}  {value}", format!("{key}:"), width = width + 1)?;
            }
        }
        for line in &self.lines {
            write!(f, "\n  {line}")?;
        }
        for warning in &self.warnings {
            write!(f, "\nwarning: {warning}")?;
        }
        for step in &self.next_steps {
            write!(f, "\nhint: {step}")?;
        }
        Ok(())
    }
}

/// `branchtodo.v1` envelope around a success or error body.
#[derive(Serialize)]
struct Envelope<'a, B: Serialize> {
    schema_version: &'static str,
    command: &'a str,
    status: &'static str,
    #[serde(flatten)]
    body: B,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    next_steps: &'a [String],
}

#[derive(Serialize)]
struct SuccessBody<'a, T: Serialize> {
    data: &'a T,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    warnings: &'a [String],
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    message: &'a str,
    code: i32,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

fn print_envelope<B: Serialize>(
    command: &str,
    status: &'static str,
    body: B,
    next_steps: &[String],
) -> Result<()> {
    let envelope = Envelope {
        schema_version: SCHEMA_VERSION,
        command,
        status,
        body,
        next_steps,
    };
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(())
}

pub fn emit_success<T: Serialize>(
    options: OutputOptions,
    command: &str,
    data: &T,
    human: Option<&HumanOutput>,
) -> Result<()> {
    if options.json {
        let (warnings, next_steps) = match human {
            Some(human) => (human.warnings.as_slice(), human.next_steps.as_slice()),
            None => (&[][..], &[][..]),
        };
        return print_envelope(command, "success", SuccessBody { data, warnings }, next_steps);
    }

    match human {
        Some(human) if !options.quiet => println!("{human}"),
        _ => {}
    }
    Ok(())
}

pub fn emit_error(command: &str, err: &Error, json: bool) -> Result<()> {
    let next_steps = error_next_steps(err);
    if json {
        let message = err.to_string();
        let body = ErrorBody {
            error: ErrorDetail {
                message: &message,
                code: err.exit_code(),
                kind: error_kind(err),
                details: err.details(),
            },
        };
        return print_envelope(command, "error", body, &next_steps);
    }

    eprintln!("error: {err}");
    if let Some(hint) = next_steps.first() {
        eprintln!("hint: {hint}");
    }
    Ok(())
}

/// One-line rendering of a todo for human output.
pub fn todo_line(todo: &TodoInstance) -> String {
    let marker = match todo.status {
        TodoStatus::Pending => "[ ]",
        TodoStatus::Completed => "[x]",
        TodoStatus::Ignored => "[-]",
    };
    let mut line = format!("{marker} {} ({}) {}", todo.id, todo.priority, todo.name);
    if let Some(files) = todo.triggering_files() {
        if !files.is_empty() {
            let files: Vec<&str> = files.iter().map(String::as_str).collect();
            line.push_str(&format!(" <- {}", files.join(", ")));
        }
    }
    line
}

pub fn infer_command_name_from_args() -> String {
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        if arg.starts_with('-') {
            if matches!(arg.as_str(), "--repo" | "--events") {
                args.next();
            }
            continue;
        }
        return arg;
    }

    "branchtodo".to_string()
}

fn error_kind(err: &Error) -> &'static str {
    match err.exit_code() {
        exit_codes::USER_ERROR => "user_error",
        exit_codes::NOT_FOUND => "not_found",
        _ => "operation_failed",
    }
}

fn error_next_steps(err: &Error) -> Vec<String> {
    match err {
        Error::TodoNotFound { branch, .. } => {
            vec![format!("branchtodo list --branch {branch}")]
        }
        Error::BranchNotFound(_) => vec!["branchtodo list --all".to_string()],
        Error::InvalidConfig(_) => vec!["fix .branchtodo.toml then retry".to_string()],
        Error::LockFailed(_) => vec!["retry; another branchtodo process holds the state lock".to_string()],
        _ => Vec::new(),
    }
}
