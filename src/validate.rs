//! Rule validation - structural errors and suspicious patterns
//!
//! Validation walks the whole rule set and collects every issue instead of
//! stopping at the first one.
//!
//! Errors (structural):
//! - E001 missing id
//! - E002 missing `when`
//! - E003 unknown or missing reason type
//! - E004 malformed reason node (e.g. `terms` is not a list)
//! - E005 non-numeric priority
//! - E006 duplicate rule id
//! - E007 invalid regex pattern or flag
//! - E008 write without `path` or `targetId`
//! - E009 malformed dot-path in `targets`, `effects` or `write.path`
//!
//! Warnings (heuristic):
//! - W001 effect or write path not declared in `targets`
//! - W002 empty effects object
//! - W003 word mode with a multi-word term
//! - W004 `min` greater than `window`
//! - W005 no effects and no write
//! - W006 zero-length window
//! - W007 empty term or phrase
//! - W008 `allTerms` with no terms
//! - W009 `not` without a child

use crate::effects::is_well_formed_path;
use crate::reasons::{build_regex, MatchMode};
use crate::rule::{ReasonNode, ReasonSpec, RuleSpec, REASON_TYPES};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Severity level for validation issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A validation issue found in a rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub severity: Severity,
    pub code: String,
    pub rule_id: String,
    /// Location inside the rule, e.g. `when.children[1].terms`
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn error(code: &str, rule_id: &str, path: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            code: code.to_string(),
            rule_id: rule_id.to_string(),
            path: path.to_string(),
            message: message.into(),
        }
    }

    pub fn warning(code: &str, rule_id: &str, path: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            code: code.to_string(),
            rule_id: rule_id.to_string(),
            path: path.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mark = match self.severity {
            Severity::Error => "✗",
            Severity::Warning => "⚠",
        };
        let rule = if self.rule_id.is_empty() {
            "<no id>"
        } else {
            &self.rule_id
        };
        write!(
            f,
            "{} [{}] {} at {}: {}",
            mark, self.code, rule, self.path, self.message
        )
    }
}

/// Issues for one rule
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RuleValidation {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl RuleValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn push(&mut self, issue: ValidationIssue) {
        match issue.severity {
            Severity::Error => self.errors.push(issue),
            Severity::Warning => self.warnings.push(issue),
        }
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.errors
            .iter()
            .chain(self.warnings.iter())
            .any(|i| i.code == code)
    }
}

/// Issues for a whole rule set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SetValidation {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    /// Issues grouped by rule id (`#<index>` for rules without an id)
    pub by_rule: BTreeMap<String, RuleValidation>,
}

impl SetValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.errors
            .iter()
            .chain(self.warnings.iter())
            .any(|i| i.code == code)
    }

    /// Human-readable summary
    pub fn to_report(&self, name: &str) -> String {
        if self.errors.is_empty() && self.warnings.is_empty() {
            return format!("✓ {}: valid (no issues found)", name);
        }
        let mut out = if self.is_valid() {
            format!("✓ {}: {} warning(s)\n", name, self.warning_count())
        } else {
            format!(
                "✗ {}: {} error(s), {} warning(s)\n",
                name,
                self.error_count(),
                self.warning_count()
            )
        };
        for issue in self.errors.iter().chain(self.warnings.iter()) {
            out.push_str(&format!("\n{}", issue));
        }
        out
    }
}

fn is_multi_word(term: &str) -> bool {
    term.split_whitespace().count() > 1
}

struct Walker<'a> {
    rule_id: &'a str,
    result: RuleValidation,
}

impl Walker<'_> {
    fn error(&mut self, code: &str, path: &str, message: impl Into<String>) {
        self.result
            .push(ValidationIssue::error(code, self.rule_id, path, message));
    }

    fn warning(&mut self, code: &str, path: &str, message: impl Into<String>) {
        self.result
            .push(ValidationIssue::warning(code, self.rule_id, path, message));
    }

    fn check_terms(&mut self, path: &str, terms: &[String], mode: MatchMode) {
        for (i, term) in terms.iter().enumerate() {
            let term_path = format!("{}.terms[{}]", path, i);
            if term.trim().is_empty() {
                self.warning("W007", &term_path, "empty term never matches");
            } else if mode == MatchMode::Word && is_multi_word(term) {
                self.warning(
                    "W003",
                    &term_path,
                    format!("'{}' has several words but mode is 'word'", term),
                );
            }
        }
    }

    fn walk(&mut self, spec: &ReasonSpec, path: &str) {
        let node = match spec {
            ReasonSpec::Node(node) => node,
            ReasonSpec::Invalid(raw) => {
                self.invalid(raw, path);
                return;
            }
        };

        match node {
            ReasonNode::TermHit { term, mode, .. } => {
                if term.trim().is_empty() {
                    self.warning("W007", &format!("{}.term", path), "empty term never matches");
                } else if *mode == MatchMode::Word && is_multi_word(term) {
                    self.warning(
                        "W003",
                        &format!("{}.term", path),
                        format!("'{}' has several words but mode is 'word'", term),
                    );
                }
            }
            ReasonNode::AnyTerms { terms, mode, .. } => self.check_terms(path, terms, *mode),
            ReasonNode::AllTerms { terms, mode, .. } => {
                if terms.is_empty() {
                    self.warning("W008", &format!("{}.terms", path), "allTerms with no terms never passes");
                }
                self.check_terms(path, terms, *mode);
            }
            ReasonNode::PhraseHit { phrase, .. } => {
                if phrase.is_empty() {
                    self.warning("W007", &format!("{}.phrase", path), "empty phrase never matches");
                }
            }
            ReasonNode::RegexHit { pattern, flags, .. } => {
                if let Err(e) = build_regex(pattern, flags) {
                    self.error("E007", &format!("{}.pattern", path), e);
                }
            }
            ReasonNode::CountInWindow {
                terms,
                window,
                min,
                mode,
                ..
            } => {
                if *window == 0 {
                    self.warning("W006", &format!("{}.window", path), "window of 0 never counts anything");
                } else if min > window {
                    self.warning(
                        "W004",
                        &format!("{}.min", path),
                        format!("min {} exceeds window {}; never satisfiable", min, window),
                    );
                }
                self.check_terms(path, terms, *mode);
            }
            ReasonNode::NumberCompare { .. } => {}
            ReasonNode::And { children } | ReasonNode::Or { children } => {
                for (i, child) in children.iter().enumerate() {
                    self.walk(child, &format!("{}.children[{}]", path, i));
                }
            }
            ReasonNode::Not { child } => match child {
                Some(child) => self.walk(child, &format!("{}.child", path)),
                None => self.warning("W009", path, "not without a child always passes"),
            },
        }
    }

    fn invalid(&mut self, raw: &Value, path: &str) {
        let type_name = match raw.get("type") {
            Some(Value::String(t)) => t.as_str(),
            Some(other) => {
                self.error("E003", &format!("{}.type", path), format!("type must be a string, got {}", other));
                return;
            }
            None => {
                self.error("E003", path, "condition has no type");
                return;
            }
        };
        if !REASON_TYPES.contains(&type_name) {
            self.error("E003", &format!("{}.type", path), format!("unknown reason type: {}", type_name));
            return;
        }

        let mut found = false;
        for (field, expected) in required_fields(type_name) {
            let field_path = format!("{}.{}", path, field);
            let detail = match (raw.get(*field), *expected) {
                (None, _) => Some(format!("{} requires '{}'", type_name, field)),
                (Some(Value::Array(items)), "list") if items.iter().all(Value::is_string) => None,
                (Some(_), "list") => Some(format!("'{}' must be an array of strings", field)),
                (Some(Value::String(_)), "string") => None,
                (Some(_), "string") => Some(format!("'{}' must be a string", field)),
                (Some(Value::Number(_)), "number") => None,
                (Some(_), "number") => Some(format!("'{}' must be a number", field)),
                _ => None,
            };
            if let Some(detail) = detail {
                self.error("E004", &field_path, detail);
                found = true;
            }
        }
        if !found {
            self.error("E004", path, format!("malformed {} condition", type_name));
        }
    }
}

fn required_fields(type_name: &str) -> &'static [(&'static str, &'static str)] {
    match type_name {
        "termHit" => &[("source", "string"), ("term", "string")],
        "anyTerms" | "allTerms" => &[("source", "string"), ("terms", "list")],
        "phraseHit" => &[("source", "string"), ("phrase", "string")],
        "regexHit" => &[("source", "string"), ("pattern", "string")],
        "countInWindow" => &[("source", "string"), ("terms", "list")],
        "numberCompare" => &[("source", "string"), ("value", "number")],
        _ => &[],
    }
}

/// Validate a single rule
pub fn validate_rule(spec: &RuleSpec) -> RuleValidation {
    let mut walker = Walker {
        rule_id: &spec.id,
        result: RuleValidation::default(),
    };

    if spec.id.trim().is_empty() {
        walker.error("E001", "id", "rule id is required");
    }
    if !spec.priority.is_valid() {
        walker.error("E005", "priority", "priority must be a number");
    }
    match &spec.when {
        Some(when) => walker.walk(when, "when"),
        None => walker.error("E002", "when", "rule has no condition"),
    }

    for (i, target) in spec.targets.iter().enumerate() {
        if !is_well_formed_path(target) {
            walker.error("E009", &format!("targets[{}]", i), format!("malformed target path {:?}", target));
        }
    }

    if let Some(effects) = &spec.effects {
        if effects.is_empty() {
            walker.warning("W002", "effects", "effects object is empty");
        }
        for key in effects.keys() {
            if !is_well_formed_path(key) {
                walker.error("E009", &format!("effects.{}", key), format!("malformed effect path {:?}", key));
            } else if !spec.targets.contains(key) {
                walker.warning(
                    "W001",
                    &format!("effects.{}", key),
                    format!("'{}' is not declared in targets", key),
                );
            }
        }
    }

    if let Some(write) = &spec.write {
        match (&write.path, &write.target_id) {
            (None, None) => walker.error("E008", "write", "write needs a path or targetId"),
            (Some(path), _) if !is_well_formed_path(path) => {
                walker.error("E009", "write.path", format!("malformed write path {:?}", path))
            }
            (Some(path), _) if !spec.targets.contains(path) => walker.warning(
                "W001",
                "write.path",
                format!("'{}' is not declared in targets", path),
            ),
            _ => {}
        }
    }

    if spec.effects.is_none() && spec.write.is_none() {
        walker.warning("W005", "", "rule has no effects or write; firing changes nothing");
    }

    walker.result
}

/// Validate a rule set, including cross-rule checks
pub fn validate_rules(specs: &[RuleSpec]) -> SetValidation {
    let mut out = SetValidation::default();
    let mut first_seen: HashMap<&str, usize> = HashMap::new();

    for (index, spec) in specs.iter().enumerate() {
        let mut result = validate_rule(spec);

        if !spec.id.trim().is_empty() {
            if let Some(first) = first_seen.get(spec.id.as_str()) {
                result.push(ValidationIssue::error(
                    "E006",
                    &spec.id,
                    "id",
                    format!("duplicate rule id (first defined at index {})", first),
                ));
            } else {
                first_seen.insert(&spec.id, index);
            }
        }

        out.errors.extend(result.errors.iter().cloned());
        out.warnings.extend(result.warnings.iter().cloned());

        let key = if spec.id.trim().is_empty() {
            format!("#{}", index)
        } else {
            spec.id.clone()
        };
        let entry = out.by_rule.entry(key).or_default();
        entry.errors.extend(result.errors);
        entry.warnings.extend(result.warnings);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{RuleSet, WriteSpec};

    fn parse(json: &str) -> Vec<RuleSpec> {
        RuleSet::from_json(json).unwrap().rules
    }

    #[test]
    fn test_clean_rule() {
        let rule = RuleSpec::new(
            "r",
            ReasonSpec::term_hit("lastUser.norm", "cake", MatchMode::Word),
        )
        .with_effect("inject.pre", "x");
        let result = validate_rule(&rule);
        assert!(result.is_valid());
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    }

    #[test]
    fn test_collects_all_errors() {
        let rules = parse(
            r#"[{"priority": "high", "when": {"type": "and", "children": [
                {"type": "vibe"},
                {"type": "anyTerms", "source": "s", "terms": "cake"},
                {"type": "regexHit", "source": "s", "pattern": "("}
            ]}}]"#,
        );
        let result = validate_rule(&rules[0]);
        let codes: Vec<_> = result.errors.iter().map(|i| i.code.as_str()).collect();
        assert_eq!(codes, vec!["E001", "E005", "E003", "E004", "E007"]);
        assert_eq!(result.errors[3].path, "when.children[1].terms");
    }

    #[test]
    fn test_warnings() {
        let rule = RuleSpec::new(
            "r",
            ReasonSpec::and(vec![
                ReasonSpec::any_terms("s", &["ice cream"], MatchMode::Word),
                ReasonSpec::count_in_window("h", &["cake"], 2, 3),
            ]),
        )
        .with_effect("inject.pre", "x")
        .with_write(WriteSpec::to_path(
            "character.scenario",
            Default::default(),
            "y",
        ));
        let mut rule = rule;
        rule.targets.clear();
        let result = validate_rule(&rule);
        assert!(result.is_valid());
        for code in ["W001", "W003", "W004"] {
            assert!(result.has_code(code), "missing {}", code);
        }
    }

    #[test]
    fn test_no_impact_and_empty_effects() {
        let bare = RuleSpec::new("a", ReasonSpec::or(vec![]));
        assert!(validate_rule(&bare).has_code("W005"));

        let mut empty = RuleSpec::new("b", ReasonSpec::or(vec![]));
        empty.effects = Some(Default::default());
        let result = validate_rule(&empty);
        assert!(result.has_code("W002"));
        assert!(!result.has_code("W005"));
    }

    #[test]
    fn test_duplicate_ids() {
        let rules = vec![
            RuleSpec::new("same", ReasonSpec::or(vec![])).with_effect("a", "x"),
            RuleSpec::new("other", ReasonSpec::or(vec![])).with_effect("a", "x"),
            RuleSpec::new("same", ReasonSpec::or(vec![])).with_effect("a", "x"),
        ];
        let result = validate_rules(&rules);
        assert!(!result.is_valid());
        assert_eq!(result.error_count(), 1);
        assert!(result.by_rule["same"].has_code("E006"));
        assert!(result.by_rule["other"].is_valid());
    }

    #[test]
    fn test_missing_when_and_write_target() {
        let rules = parse(r#"[{"id": "r", "write": {"op": "set", "value": "x"}}]"#);
        let result = validate_rules(&rules);
        assert!(result.has_code("E002"));
        assert!(result.has_code("E008"));
        assert!(result.to_report("rules.json").contains("2 error(s)"));
    }

    #[test]
    fn test_malformed_paths() {
        let rules = parse(
            r#"[{"id": "r", "targets": ["inject..pre", ""],
                 "when": {"type": "and", "children": []},
                 "effects": {"inject..pre": "x", "": "y"},
                 "write": {"path": "character.", "value": "z"}}]"#,
        );
        let result = validate_rule(&rules[0]);
        let paths: Vec<_> = result
            .errors
            .iter()
            .filter(|i| i.code == "E009")
            .map(|i| i.path.as_str())
            .collect();
        assert_eq!(
            paths,
            vec!["targets[0]", "targets[1]", "effects.", "effects.inject..pre", "write.path"]
        );
    }
}
