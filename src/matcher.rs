//! Rule predicate evaluation.
//!
//! A template applies to a file when, in order:
//! 1. it has a trigger (purely branch-level templates never match a file),
//! 2. the relative path glob-matches the trigger pattern,
//! 3. the content contains `must_include` (literal substring), if set,
//! 4. the content does not contain `must_exclude` (literal substring), if set.
//!
//! Evaluation short-circuits on the first failing step, and content is only
//! requested from the caller once the path predicate has passed.

use std::fmt;

use glob::{MatchOptions, Pattern};

use crate::error::{Error, Result};
use crate::template::{Template, Trigger};

/// Case-sensitive, separators matched literally, dotfiles included.
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// A compiled glob over workspace-relative paths.
#[derive(Clone)]
pub struct PathPattern {
    raw: String,
    compiled: Pattern,
}

impl PathPattern {
    /// Compile a glob pattern.
    pub fn new(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "path pattern cannot be empty".to_string(),
            ));
        }
        let compiled = Pattern::new(raw).map_err(|err| {
            Error::InvalidConfig(format!("invalid glob pattern '{raw}': {err}"))
        })?;
        Ok(Self {
            raw: raw.to_string(),
            compiled,
        })
    }

    /// Original pattern text.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Test a normalized (forward-slash, no leading `./`) relative path.
    pub fn matches(&self, relative_path: &str) -> bool {
        self.compiled.matches_with(relative_path, MATCH_OPTIONS)
    }
}

impl fmt::Debug for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PathPattern").field(&self.raw).finish()
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl PartialEq for PathPattern {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for PathPattern {}

impl Trigger {
    /// Path predicate only.
    pub fn path_matches(&self, relative_path: &str) -> bool {
        self.path.matches(relative_path)
    }

    /// Content predicates only.
    pub fn content_matches(&self, content: &str) -> bool {
        if let Some(needle) = &self.must_include {
            if !content.contains(needle.as_str()) {
                return false;
            }
        }
        if let Some(needle) = &self.must_exclude {
            if content.contains(needle.as_str()) {
                return false;
            }
        }
        true
    }

    /// Whether any content predicate is configured.
    pub fn needs_content(&self) -> bool {
        self.must_include.is_some() || self.must_exclude.is_some()
    }
}

/// Decide whether `template` applies to a file.
///
/// `content` is invoked at most once, and only after the path predicate has
/// passed and the trigger actually filters on content. A `None` from the
/// loader means the content is unavailable, which counts as no match.
pub fn matches<F>(template: &Template, relative_path: &str, content: F) -> bool
where
    F: FnOnce() -> Option<String>,
{
    let Some(trigger) = template.trigger() else {
        return false;
    };
    if !trigger.path_matches(relative_path) {
        return false;
    }
    if !trigger.needs_content() {
        return true;
    }
    match content() {
        Some(text) => trigger.content_matches(&text),
        None => false,
    }
}

/// Every template in `templates` that applies to the file, in input order.
///
/// The content loader runs at most once across all templates.
pub fn matching_templates<'a, I, F>(templates: I, relative_path: &str, content: F) -> Vec<&'a Template>
where
    I: IntoIterator<Item = &'a Template>,
    F: FnOnce() -> Option<String>,
{
    let mut loader = Some(content);
    let mut cached: Option<Option<String>> = None;
    let mut out = Vec::new();

    for template in templates {
        let Some(trigger) = template.trigger() else {
            continue;
        };
        if !trigger.path_matches(relative_path) {
            continue;
        }
        if trigger.needs_content() {
            let text = cached
                .get_or_insert_with(|| loader.take().and_then(|load| load()))
                .as_deref();
            match text {
                Some(text) if trigger.content_matches(text) => {}
                _ => continue,
            }
        }
        out.push(template);
    }

    out
}

/// Cheap pre-check: could any template apply to this path, ignoring content?
///
/// Considers per-file templates and branch-level templates carrying a trigger.
pub fn path_might_match<'a, I>(templates: I, relative_path: &str) -> bool
where
    I: IntoIterator<Item = &'a Template>,
{
    templates
        .into_iter()
        .filter_map(Template::trigger)
        .any(|trigger| trigger.path_matches(relative_path))
}
