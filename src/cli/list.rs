//! Read-only commands: branch, templates, list, show

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::instance::{TodoInstance, TodoStatus};
use crate::output::{emit_success, todo_line, HumanOutput, OutputOptions};
use crate::template::{Template, TemplateScope};
use crate::workspace::Workspace;

pub struct BranchOptions {
    pub repo: Option<PathBuf>,
    pub json: bool,
    pub quiet: bool,
}

pub struct TemplatesOptions {
    pub repo: Option<PathBuf>,
    pub json: bool,
    pub quiet: bool,
}

pub struct ListOptions {
    pub branch: Option<String>,
    pub all: bool,
    pub status: Option<String>,
    pub repo: Option<PathBuf>,
    pub json: bool,
    pub quiet: bool,
}

pub struct ShowOptions {
    pub id: String,
    pub branch: Option<String>,
    pub repo: Option<PathBuf>,
    pub json: bool,
    pub quiet: bool,
}

#[derive(Serialize)]
struct BranchReport {
    branch: String,
    in_git: bool,
    root: PathBuf,
}

pub fn run_branch(options: BranchOptions) -> Result<()> {
    let workspace = Workspace::discover(options.repo.as_deref())?;
    let branch = workspace.resolve_branch(None)?;

    let report = BranchReport {
        branch: branch.clone(),
        in_git: workspace.in_git(),
        root: workspace.root().to_path_buf(),
    };

    let human = HumanOutput::new(branch);
    emit_success(
        OutputOptions {
            json: options.json,
            quiet: options.quiet,
        },
        "branch",
        &report,
        Some(&human),
    )
}

#[derive(Serialize)]
struct TemplateView<'a> {
    id: &'a str,
    name: &'a str,
    description: &'a str,
    priority: String,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    path_pattern: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_must_include: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_must_exclude: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ai_instruction: Option<&'a str>,
}

impl<'a> From<&'a Template> for TemplateView<'a> {
    fn from(template: &'a Template) -> Self {
        let kind = match &template.scope {
            TemplateScope::File(_) => "file",
            TemplateScope::Branch(None) => "branch",
            TemplateScope::Branch(Some(_)) => "branch_aggregate",
        };
        let trigger = template.trigger();
        Self {
            id: &template.id,
            name: &template.name,
            description: &template.description,
            priority: template.priority.to_string(),
            kind,
            path_pattern: trigger.map(|t| t.path.as_str()),
            content_must_include: trigger.and_then(|t| t.must_include.as_deref()),
            content_must_exclude: trigger.and_then(|t| t.must_exclude.as_deref()),
            ai_instruction: template.ai_instruction.as_deref(),
        }
    }
}

#[derive(Serialize)]
struct TemplatesReport<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<PathBuf>,
    templates: Vec<TemplateView<'a>>,
}

pub fn run_templates(options: TemplatesOptions) -> Result<()> {
    let workspace = Workspace::discover(options.repo.as_deref())?;
    let templates = workspace.templates()?;

    let report = TemplatesReport {
        config: workspace.config_path().map(|path| path.to_path_buf()),
        templates: templates.iter().map(TemplateView::from).collect(),
    };

    let mut human = HumanOutput::new(format!("branchtodo templates: {}", templates.len()));
    for view in &report.templates {
        let pattern = view.path_pattern.unwrap_or("-");
        human.push_detail(format!(
            "{} [{}] ({}) {} :: {}",
            view.id, view.kind, view.priority, pattern, view.name
        ));
    }
    if workspace.config_path().is_none() {
        human.push_warning("no .branchtodo.toml found");
        human.push_next_step("branchtodo init");
    }

    emit_success(
        OutputOptions {
            json: options.json,
            quiet: options.quiet,
        },
        "templates",
        &report,
        Some(&human),
    )
}

#[derive(Serialize)]
struct BranchTodos<'a> {
    branch: &'a str,
    todos: Vec<&'a TodoInstance>,
}

#[derive(Serialize)]
struct AllTodos<'a> {
    branches: BTreeMap<&'a str, Vec<&'a TodoInstance>>,
}

pub fn run_list(options: ListOptions) -> Result<()> {
    let workspace = Workspace::discover(options.repo.as_deref())?;
    let mut engine = workspace.open_engine()?;
    let warning = super::persist_warning(&mut engine);

    let status = options
        .status
        .as_deref()
        .map(str::parse::<TodoStatus>)
        .transpose()?;
    let keep = |todo: &&TodoInstance| status.map_or(true, |status| todo.status == status);
    let output = OutputOptions {
        json: options.json,
        quiet: options.quiet,
    };

    if options.all {
        let branches: BTreeMap<&str, Vec<&TodoInstance>> = engine
            .list_all()
            .iter()
            .map(|(branch, todos)| (branch.as_str(), todos.iter().filter(keep).collect()))
            .collect();
        let total: usize = branches.values().map(Vec::len).sum();

        let mut human = HumanOutput::new(format!(
            "branchtodo list: {total} todo(s) across {} branch(es)",
            branches.len()
        ));
        for (branch, todos) in &branches {
            for todo in todos {
                human.push_detail(format!("{branch}: {}", todo_line(todo)));
            }
        }
        if let Some(warning) = warning {
            human.push_warning(warning);
        }

        return emit_success(output, "list", &AllTodos { branches }, Some(&human));
    }

    let branch = workspace.resolve_branch(options.branch.as_deref())?;
    let todos: Vec<&TodoInstance> = engine.list(&branch).iter().filter(keep).collect();

    let mut human = HumanOutput::new(format!(
        "branchtodo list: {} todo(s) on {branch}",
        todos.len()
    ));
    for todo in &todos {
        human.push_detail(todo_line(todo));
    }
    if let Some(warning) = warning {
        human.push_warning(warning);
    }
    if todos.is_empty() && status.is_none() {
        human.push_next_step("branchtodo refresh");
    }

    emit_success(
        output,
        "list",
        &BranchTodos {
            branch: &branch,
            todos,
        },
        Some(&human),
    )
}

pub fn run_show(options: ShowOptions) -> Result<()> {
    let workspace = Workspace::discover(options.repo.as_deref())?;
    let engine = workspace.open_engine()?;
    let branch = workspace.resolve_branch(options.branch.as_deref())?;

    if !engine.instances().has_branch(&branch) {
        return Err(Error::BranchNotFound(branch));
    }
    let todo = engine
        .get(&branch, &options.id)
        .ok_or_else(|| Error::TodoNotFound {
            branch: branch.clone(),
            id: options.id.clone(),
        })?;

    let mut human = HumanOutput::new(todo_line(todo));
    human.push_summary("branch", todo.branch.clone());
    human.push_summary("template", todo.template_id.clone());
    human.push_summary("status", todo.status.to_string());
    human.push_summary("priority", todo.priority.to_string());
    if let Some(path) = todo.relative_path() {
        human.push_summary("file", path);
    }
    if let Some(files) = todo.triggering_files() {
        let files: Vec<&str> = files.iter().map(String::as_str).collect();
        human.push_summary("triggered by", files.join(", "));
    }
    human.push_summary("created", todo.created_at.to_rfc3339());
    if let Some(at) = todo.completed_at {
        human.push_summary("completed", at.to_rfc3339());
    }
    if let Some(at) = todo.ignored_at {
        human.push_summary("ignored", at.to_rfc3339());
    }
    human.push_detail(todo.description.clone());
    if let Some(instruction) = &todo.ai_instruction {
        human.push_detail(format!("ai: {instruction}"));
    }

    emit_success(
        OutputOptions {
            json: options.json,
            quiet: options.quiet,
        },
        "show",
        todo,
        Some(&human),
    )
}
