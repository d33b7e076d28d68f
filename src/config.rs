//! Configuration loading and management
//!
//! Handles parsing of `.branchtodo.toml` (or `.branchtodo.json`) files.
//! Template entries are kept raw here and validated by
//! [`TemplateSet::from_entries`](crate::template::TemplateSet::from_entries).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::template::TemplateSet;

/// Preferred configuration file name.
pub const CONFIG_FILE: &str = ".branchtodo.toml";

/// JSON alternative, used when the TOML file is absent.
pub const CONFIG_FILE_JSON: &str = ".branchtodo.json";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Branch name used when there is no VCS or HEAD is detached
    #[serde(default = "default_branch", alias = "defaultBranch")]
    pub default_branch: String,

    /// Watch configuration
    #[serde(default)]
    pub watch: WatchConfig,

    /// Rule templates (required, may be empty)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub templates: Option<Vec<TemplateEntry>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_branch: default_branch(),
            watch: WatchConfig::default(),
            templates: Some(Vec::new()),
        }
    }
}

fn default_branch() -> String {
    "default".to_string()
}

/// Watch-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Quiet period before a changed file is evaluated
    #[serde(default = "default_debounce_ms", alias = "debounceMs")]
    pub debounce_ms: u64,
}

fn default_debounce_ms() -> u64 {
    300
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

/// A template as written in the configuration document.
///
/// Every field is optional at this layer so that validation can report which
/// entry is wrong instead of failing inside the deserializer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "pathPattern")]
    pub path_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "contentMustInclude")]
    pub content_must_include: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "contentMustExclude")]
    pub content_must_exclude: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "branchLevel")]
    pub branch_level: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "aiInstruction")]
    pub ai_instruction: Option<String>,
}

impl Config {
    /// Load configuration from a `.toml` or `.json` file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = if is_json(path) {
            serde_json::from_str(&content)
                .map_err(|err| Error::InvalidConfig(format!("{}: {err}", path.display())))?
        } else {
            toml::from_str(&content)
                .map_err(|err| Error::InvalidConfig(format!("{}: {err}", path.display())))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Locate and load the workspace configuration, if one exists
    pub fn discover(root: &Path) -> Result<Option<(PathBuf, Self)>> {
        match Self::find(root) {
            Some(path) => {
                let config = Self::load(&path)?;
                Ok(Some((path, config)))
            }
            None => Ok(None),
        }
    }

    /// Path of the configuration file in `root`, preferring TOML
    pub fn find(root: &Path) -> Option<PathBuf> {
        [CONFIG_FILE, CONFIG_FILE_JSON]
            .iter()
            .map(|name| root.join(name))
            .find(|path| path.is_file())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = if is_json(path) {
            serde_json::to_string_pretty(self)?
        } else {
            toml::to_string_pretty(self)?
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validated template set described by this configuration
    pub fn template_set(&self) -> Result<TemplateSet> {
        match &self.templates {
            Some(entries) => TemplateSet::from_entries(entries),
            None => Err(Error::InvalidConfig(
                "templates: missing array (use `templates = []` for none)".to_string(),
            )),
        }
    }

    /// Configuration written by `branchtodo init`
    pub fn starter() -> Self {
        Self {
            templates: Some(vec![
                TemplateEntry {
                    id: Some("changelog".to_string()),
                    name: Some("Update the changelog".to_string()),
                    description: Some(
                        "Every branch should describe its user-visible change in CHANGELOG.md"
                            .to_string(),
                    ),
                    priority: Some("medium".to_string()),
                    branch_level: Some(true),
                    ..TemplateEntry::default()
                },
                TemplateEntry {
                    id: Some("unsafe-review".to_string()),
                    name: Some("Review unsafe block".to_string()),
                    description: Some(
                        "Document the safety invariant for new unsafe code".to_string(),
                    ),
                    path_pattern: Some("**/*.rs".to_string()),
                    content_must_include: Some("unsafe {".to_string()),
                    content_must_exclude: Some("// SAFETY:".to_string()),
                    priority: Some("high".to_string()),
                    ..TemplateEntry::default()
                },
            ]),
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if self.default_branch.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "default_branch cannot be empty".to_string(),
            ));
        }
        if self.watch.debounce_ms > 60_000 {
            return Err(Error::InvalidConfig(
                "watch.debounce_ms must be <= 60000".to_string(),
            ));
        }
        self.template_set()?;
        Ok(())
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::Priority;
    use std::fs;

    #[test]
    fn defaults_are_expected() {
        let cfg = Config::default();
        assert_eq!(cfg.default_branch, "default");
        assert_eq!(cfg.watch.debounce_ms, 300);
        assert!(cfg.template_set().expect("templates").is_empty());
    }

    #[test]
    fn load_parses_toml_templates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        let content = r#"
default_branch = "trunk"

[watch]
debounce_ms = 50

[[templates]]
id = "t1"
name = "Aura"
description = "Check the wrapper"
path_pattern = "**/*.cls"
content_must_include = "@AuraEnabled"
priority = "high"
future_key = "ignored"

[[templates]]
id = "release-notes"
name = "Release notes"
description = "Write release notes"
branch_level = true
"#;
        fs::write(&path, content.trim()).expect("write config");

        let cfg = Config::load(&path).expect("load config");
        assert_eq!(cfg.default_branch, "trunk");
        assert_eq!(cfg.watch.debounce_ms, 50);
        let set = cfg.template_set().expect("templates");
        assert_eq!(set.len(), 2);
        assert_eq!(set.get("t1").expect("t1").priority, Priority::High);
        assert!(set.get("release-notes").expect("notes").is_unconditional());
    }

    #[test]
    fn load_parses_camel_case_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE_JSON);
        let content = r#"{
  "templates": [
    {
      "id": "go",
      "name": "Go review",
      "description": "Review go changes",
      "pathPattern": "src/**/*.go",
      "branchLevel": true,
      "aiInstruction": "Summarize the Go changes"
    }
  ]
}"#;
        fs::write(&path, content).expect("write config");

        let cfg = Config::load(&path).expect("load config");
        let set = cfg.template_set().expect("templates");
        let template = set.get("go").expect("go");
        assert!(template.is_aggregating());
        assert_eq!(
            template.ai_instruction.as_deref(),
            Some("Summarize the Go changes")
        );
    }

    #[test]
    fn missing_templates_array_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "default_branch = \"main\"").expect("write config");

        match Config::load(&path).expect_err("invalid config") {
            Error::InvalidConfig(msg) => assert!(msg.contains("templates")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn malformed_toml_is_config_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "[[templates]\nid = ").expect("write config");

        match Config::load(&path).expect_err("invalid config") {
            Error::InvalidConfig(_) => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn find_prefers_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(Config::find(dir.path()).is_none());

        fs::write(dir.path().join(CONFIG_FILE_JSON), "{\"templates\": []}").expect("json");
        assert_eq!(
            Config::find(dir.path()),
            Some(dir.path().join(CONFIG_FILE_JSON))
        );

        fs::write(dir.path().join(CONFIG_FILE), "templates = []").expect("toml");
        assert_eq!(Config::find(dir.path()), Some(dir.path().join(CONFIG_FILE)));
    }

    #[test]
    fn starter_round_trips_through_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        Config::starter().save(&path).expect("save config");

        let loaded = Config::load(&path).expect("load config");
        let set = loaded.template_set().expect("templates");
        assert!(set.contains("changelog"));
        assert!(set.contains("unsafe-review"));
    }
}
