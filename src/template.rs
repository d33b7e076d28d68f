//! Rule templates.
//!
//! Templates are loaded from the workspace configuration and validated as a
//! whole: a load either yields the complete, ordered set or an
//! [`Error::InvalidConfig`], never a partial set.
//!
//! # Kinds
//!
//! - File-scoped: one todo per matching file. Always carries a [`Trigger`].
//! - Branch-level without trigger: one todo per branch, unconditionally.
//! - Branch-level with trigger: one todo per branch, created on the first
//!   matching file and aggregating every file that matched since.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::TemplateEntry;
use crate::error::{Error, Result};
use crate::instance::BRANCH_ID_PREFIX;
use crate::matcher::PathPattern;

/// Display priority of a todo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            _ => Err(Error::InvalidConfig(format!(
                "invalid priority '{}': must be high, medium, or low",
                s
            ))),
        }
    }
}

/// Path and content predicates of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub path: PathPattern,
    pub must_include: Option<String>,
    pub must_exclude: Option<String>,
}

/// What a template yields todos for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateScope {
    /// One todo per matching file.
    File(Trigger),
    /// At most one todo per branch.
    Branch(Option<Trigger>),
}

/// A validated rule template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub description: String,
    pub priority: Priority,
    pub ai_instruction: Option<String>,
    pub scope: TemplateScope,
}

impl Template {
    /// Trigger evaluated against files, if any.
    pub fn trigger(&self) -> Option<&Trigger> {
        match &self.scope {
            TemplateScope::File(trigger) => Some(trigger),
            TemplateScope::Branch(trigger) => trigger.as_ref(),
        }
    }

    pub fn is_branch_level(&self) -> bool {
        matches!(self.scope, TemplateScope::Branch(_))
    }

    /// Branch-level with no trigger: exists on every branch.
    pub fn is_unconditional(&self) -> bool {
        matches!(self.scope, TemplateScope::Branch(None))
    }

    /// Branch-level with a trigger: aggregates matching files.
    pub fn is_aggregating(&self) -> bool {
        matches!(self.scope, TemplateScope::Branch(Some(_)))
    }

    /// Validate and convert a raw configuration entry.
    pub fn from_entry(entry: &TemplateEntry, index: usize) -> Result<Self> {
        let field = |name: &str| format!("templates[{index}].{name}");

        let id = required(entry.id.as_deref(), &field("id"))?;
        if id.contains(':') {
            return Err(Error::InvalidConfig(format!(
                "{}: '{id}' cannot contain ':'",
                field("id")
            )));
        }
        if id == BRANCH_ID_PREFIX {
            return Err(Error::InvalidConfig(format!(
                "{}: '{id}' is reserved for branch-level todo ids",
                field("id")
            )));
        }
        let name = required(entry.name.as_deref(), &field("name"))?;
        let description = required(entry.description.as_deref(), &field("description"))?;

        let priority = match entry.priority.as_deref() {
            Some(raw) => raw
                .parse::<Priority>()
                .map_err(|_| Error::InvalidConfig(format!("{}: invalid value '{raw}'", field("priority"))))?,
            None => Priority::default(),
        };

        let must_include = content_filter(entry.content_must_include.as_deref(), &field("content_must_include"))?;
        let must_exclude = content_filter(entry.content_must_exclude.as_deref(), &field("content_must_exclude"))?;

        let trigger = match entry.path_pattern.as_deref() {
            Some(raw) => {
                let path = PathPattern::new(raw).map_err(|err| match err {
                    Error::InvalidConfig(msg) => {
                        Error::InvalidConfig(format!("{}: {msg}", field("path_pattern")))
                    }
                    other => other,
                })?;
                Some(Trigger {
                    path,
                    must_include,
                    must_exclude,
                })
            }
            None => {
                if must_include.is_some() || must_exclude.is_some() {
                    return Err(Error::InvalidConfig(format!(
                        "templates[{index}] ('{id}'): content filters require path_pattern"
                    )));
                }
                None
            }
        };

        let scope = match (entry.branch_level.unwrap_or(false), trigger) {
            (true, trigger) => TemplateScope::Branch(trigger),
            (false, Some(trigger)) => TemplateScope::File(trigger),
            (false, None) => {
                return Err(Error::InvalidConfig(format!(
                    "templates[{index}] ('{id}'): path_pattern is required unless branch_level = true"
                )))
            }
        };

        Ok(Template {
            id,
            name,
            description,
            priority,
            ai_instruction: entry
                .ai_instruction
                .clone()
                .filter(|value| !value.trim().is_empty()),
            scope,
        })
    }
}

fn required(value: Option<&str>, field: &str) -> Result<String> {
    match value.map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(Error::InvalidConfig(format!("{field} is required"))),
    }
}

fn content_filter(value: Option<&str>, field: &str) -> Result<Option<String>> {
    match value {
        Some("") => Err(Error::InvalidConfig(format!("{field} cannot be empty"))),
        Some(value) => Ok(Some(value.to_string())),
        None => Ok(None),
    }
}

/// The ordered, id-unique set of templates currently in force.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateSet {
    templates: Vec<Template>,
}

impl TemplateSet {
    /// An empty set (no rules).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from already-validated templates, rejecting duplicate ids.
    pub fn new(templates: Vec<Template>) -> Result<Self> {
        let mut seen = HashSet::new();
        for template in &templates {
            if !seen.insert(template.id.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate template id '{}'",
                    template.id
                )));
            }
        }
        Ok(Self { templates })
    }

    /// Validate raw configuration entries; all-or-nothing.
    pub fn from_entries(entries: &[TemplateEntry]) -> Result<Self> {
        let templates = entries
            .iter()
            .enumerate()
            .map(|(index, entry)| Template::from_entry(entry, index))
            .collect::<Result<Vec<_>>>()?;
        Self::new(templates)
    }

    pub fn get(&self, id: &str) -> Option<&Template> {
        self.templates.iter().find(|t| t.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Templates in definition order.
    pub fn iter(&self) -> std::slice::Iter<'_, Template> {
        self.templates.iter()
    }

    /// Every template id in the set.
    pub fn ids(&self) -> HashSet<&str> {
        self.templates.iter().map(|t| t.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl<'a> IntoIterator for &'a TemplateSet {
    type Item = &'a Template;
    type IntoIter = std::slice::Iter<'a, Template>;

    fn into_iter(self) -> Self::IntoIter {
        self.templates.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, pattern: Option<&str>) -> TemplateEntry {
        TemplateEntry {
            id: Some(id.to_string()),
            name: Some(format!("{id} name")),
            description: Some(format!("{id} description")),
            path_pattern: pattern.map(str::to_string),
            ..TemplateEntry::default()
        }
    }

    fn expect_config_error(result: Result<TemplateSet>) -> String {
        match result {
            Err(Error::InvalidConfig(msg)) => msg,
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn file_template_defaults_to_medium_priority() {
        let set = TemplateSet::from_entries(&[entry("t1", Some("**/*.cls"))]).expect("set");
        let template = set.get("t1").expect("template");
        assert_eq!(template.priority, Priority::Medium);
        assert!(!template.is_branch_level());
        assert_eq!(template.trigger().map(|t| t.path.as_str()), Some("**/*.cls"));
    }

    #[test]
    fn branch_level_without_pattern_is_unconditional() {
        let mut raw = entry("b", None);
        raw.branch_level = Some(true);
        let set = TemplateSet::from_entries(&[raw]).expect("set");
        assert!(set.get("b").expect("template").is_unconditional());
    }

    #[test]
    fn branch_level_with_pattern_aggregates() {
        let mut raw = entry("agg", Some("src/**/*.go"));
        raw.branch_level = Some(true);
        let set = TemplateSet::from_entries(&[raw]).expect("set");
        assert!(set.get("agg").expect("template").is_aggregating());
    }

    #[test]
    fn missing_pattern_without_branch_level_is_rejected() {
        let msg = expect_config_error(TemplateSet::from_entries(&[entry("t", None)]));
        assert!(msg.contains("path_pattern is required"));
    }

    #[test]
    fn duplicate_ids_are_fatal() {
        let msg = expect_config_error(TemplateSet::from_entries(&[
            entry("dup", Some("a/**")),
            entry("dup", Some("b/**")),
        ]));
        assert!(msg.contains("duplicate template id 'dup'"));
    }

    #[test]
    fn blank_required_fields_are_rejected() {
        let mut raw = entry("t", Some("**"));
        raw.name = Some("   ".to_string());
        let msg = expect_config_error(TemplateSet::from_entries(&[raw]));
        assert!(msg.contains("templates[0].name"));

        let mut raw = entry("t", Some("**"));
        raw.description = None;
        expect_config_error(TemplateSet::from_entries(&[raw]));
    }

    #[test]
    fn content_filter_without_pattern_is_rejected() {
        let mut raw = entry("b", None);
        raw.branch_level = Some(true);
        raw.content_must_include = Some("TODO".to_string());
        expect_config_error(TemplateSet::from_entries(&[raw]));
    }

    #[test]
    fn colon_in_id_is_rejected() {
        expect_config_error(TemplateSet::from_entries(&[entry("a:b", Some("**"))]));
    }

    #[test]
    fn reserved_branch_id_is_rejected() {
        let msg = expect_config_error(TemplateSet::from_entries(&[entry("branch", Some("*"))]));
        assert!(msg.contains("reserved"));
        TemplateSet::from_entries(&[entry("branches", Some("*"))]).expect("similar id is fine");
    }

    #[test]
    fn one_bad_entry_rejects_the_whole_set() {
        let result = TemplateSet::from_entries(&[
            entry("good", Some("**/*.rs")),
            entry("bad", Some("src/**.rs")),
        ]);
        expect_config_error(result);
    }

    #[test]
    fn priority_parses_case_insensitively() {
        assert_eq!("HIGH".parse::<Priority>().expect("priority"), Priority::High);
        assert!("urgent".parse::<Priority>().is_err());
    }
}
