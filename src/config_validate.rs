//! Config validation
//!
//! Checks an engine config file before it is used. Issues carry the same
//! E/W codes and severities as rule validation, plus the config key they
//! point at.

use crate::config::{EngineConfig, CONFIG_VERSION};
use crate::source::{SourceRegistry, DERIVED_PREFIX};
use crate::validate::Severity;
use serde::Serialize;
use std::path::Path;

/// One problem in a config file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigIssue {
    pub severity: Severity,
    pub code: &'static str,
    /// Config key the issue points at; empty for whole-file problems
    pub key: String,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mark = match self.severity {
            Severity::Error => "✗",
            Severity::Warning => "⚠",
        };
        if self.key.is_empty() {
            write!(f, "{} [{}] {}", mark, self.code, self.message)
        } else {
            write!(f, "{} [{}] {}: {}", mark, self.code, self.key, self.message)
        }
    }
}

/// Issues found in one config file, and the parsed config when it loaded
#[derive(Debug, Default, Serialize)]
pub struct ConfigValidationResult {
    pub file: String,
    pub issues: Vec<ConfigIssue>,
    #[serde(skip)]
    pub config: Option<EngineConfig>,
}

impl ConfigValidationResult {
    fn push(&mut self, severity: Severity, code: &'static str, key: &str, message: String) {
        self.issues.push(ConfigIssue {
            severity,
            code,
            key: key.to_string(),
            message,
        });
    }

    fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    pub fn error_count(&self) -> usize {
        self.count(Severity::Error)
    }

    pub fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.issues.iter().any(|i| i.code == code)
    }

    /// Human-readable summary
    pub fn to_report(&self) -> String {
        if self.issues.is_empty() {
            return format!("✓ {}: configuration is valid", self.file);
        }
        let mut out: Vec<String> = self.issues.iter().map(ToString::to_string).collect();
        out.push(String::new());
        out.push(if self.has_errors() {
            format!(
                "✗ {}: {} error(s), {} warning(s)",
                self.file,
                self.error_count(),
                self.warning_count()
            )
        } else {
            format!("✓ {}: {} warning(s)", self.file, self.warning_count())
        });
        out.join("\n")
    }
}

/// Validate an engine config file
///
/// Errors: E001 missing file, E002 unreadable, E003 invalid YAML,
/// E004 unsupported version, E005 allowlist names an unknown source.
/// Warnings: W001 no allowed targets, W002 alias outside allowed targets,
/// W003 zero history window, W004 empty keyword list.
pub fn validate_config(path: &Path) -> ConfigValidationResult {
    let mut result = ConfigValidationResult {
        file: path.display().to_string(),
        ..Default::default()
    };

    if !path.exists() {
        result.push(Severity::Error, "E001", "", "file does not exist".into());
        return result;
    }
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            result.push(Severity::Error, "E002", "", format!("cannot read file: {}", e));
            return result;
        }
    };
    match EngineConfig::from_yaml(&content) {
        Ok(config) => {
            check_config(&config, &mut result);
            result.config = Some(config);
        }
        Err(e) => result.push(Severity::Error, "E003", "", format!("invalid YAML: {}", e)),
    }
    result
}

fn check_config(config: &EngineConfig, result: &mut ConfigValidationResult) {
    if config.version != CONFIG_VERSION {
        result.push(
            Severity::Error,
            "E004",
            "version",
            format!(
                "unsupported version {} (expected {})",
                config.version, CONFIG_VERSION
            ),
        );
    }

    let registry = SourceRegistry::with_defaults();
    for (module, ids) in &config.allowlists {
        for id in ids {
            if !registry.contains(id) && !id.starts_with(DERIVED_PREFIX) {
                result.push(
                    Severity::Error,
                    "E005",
                    &format!("allowlists.{}", module),
                    format!("unknown source '{}'", id),
                );
            }
        }
    }

    if config.allowed_targets.is_empty() {
        result.push(
            Severity::Warning,
            "W001",
            "allowed_targets",
            "empty; every progressive write will be blocked".into(),
        );
    }

    for (alias, path) in config.aliases() {
        if !config.allowed_targets.contains(&path) {
            result.push(
                Severity::Warning,
                "W002",
                &format!("target_aliases.{}", alias),
                format!("points at {}, which is not in allowed_targets", path),
            );
        }
    }

    if config.history_window == 0 {
        result.push(
            Severity::Warning,
            "W003",
            "history_window",
            "0 means history conditions never match".into(),
        );
    }

    for (id, terms) in &config.lists {
        if terms.is_empty() {
            result.push(
                Severity::Warning,
                "W004",
                &format!("lists.{}", id),
                "list is empty".into(),
            );
        }
    }
}
