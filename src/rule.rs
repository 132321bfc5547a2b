//! Rule types - the persisted authoring format
//!
//! A `RuleSpec` pairs a condition tree (`when`) with what happens when it
//! fires: an effects map of text fragments, and optionally a single
//! explicit `write` patch.
//!
//! ## Example
//!
//! ```yaml
//! rules:
//!   - id: cake_combo
//!     label: "Cake combo"
//!     moduleId: food
//!     priority: 10
//!     targets: [inject.pre]
//!     when:
//!       type: allTerms
//!       source: lastUser.norm
//!       terms: [strawberry, cake]
//!       mode: word
//!     effects:
//!       inject.pre: combo
//! ```
//!
//! Loading is lenient: a condition node that does not parse is
//! kept as raw JSON (`ReasonSpec::Invalid`) so the validator can report it
//! and the compiler can turn it into an always-failing `error` reason.

use crate::context::WriteOp;
use crate::error::{Error, Result};
use crate::reasons::{CompareOp, MatchMode};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Module id used when a rule does not name one
pub const DEFAULT_MODULE: &str = "core";

/// Reason types understood by the compiler
pub const REASON_TYPES: &[&str] = &[
    "termHit",
    "anyTerms",
    "allTerms",
    "phraseHit",
    "regexHit",
    "countInWindow",
    "numberCompare",
    "and",
    "or",
    "not",
];

fn default_module() -> String {
    DEFAULT_MODULE.to_string()
}

fn default_window() -> usize {
    10
}

fn default_min() -> usize {
    1
}

/// A single rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RuleSpec {
    /// Unique, stable identifier
    #[serde(default)]
    pub id: String,

    /// Human-readable label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Authoring module; selects the source allowlist
    #[serde(default = "default_module")]
    pub module_id: String,

    /// Higher runs first
    #[serde(default)]
    pub priority: Priority,

    /// Declared output dot-paths (used for conflict detection)
    #[serde(default)]
    pub targets: Vec<String>,

    /// Condition tree
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<ReasonSpec>,

    /// Text fragments keyed by output dot-path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effects: Option<BTreeMap<String, EffectValue>>,

    /// Explicit patch applied after the effects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write: Option<WriteSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl RuleSpec {
    pub fn new(id: impl Into<String>, when: ReasonSpec) -> Self {
        Self {
            id: id.into(),
            label: None,
            module_id: default_module(),
            priority: Priority::default(),
            targets: Vec::new(),
            when: Some(when),
            effects: None,
            write: None,
            description: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_module(mut self, module_id: impl Into<String>) -> Self {
        self.module_id = module_id.into();
        self
    }

    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = Priority::Number(priority);
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.targets.push(target.into());
        self
    }

    /// Add an effect and declare its path as a target
    pub fn with_effect(mut self, path: impl Into<String>, value: impl Into<EffectValue>) -> Self {
        let path = path.into();
        if !self.targets.contains(&path) {
            self.targets.push(path.clone());
        }
        self.effects
            .get_or_insert_with(BTreeMap::new)
            .insert(path, value.into());
        self
    }

    pub fn with_write(mut self, write: WriteSpec) -> Self {
        self.write = Some(write);
        self
    }

    /// Label, falling back to the id
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }
}

/// Rule priority; non-numeric input is preserved for the validator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Priority {
    Number(f64),
    Malformed(Value),
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Number(0.0)
    }
}

impl Priority {
    /// Numeric value; malformed priorities sort as 0
    pub fn value(&self) -> f64 {
        match self {
            Priority::Number(n) => *n,
            Priority::Malformed(_) => 0.0,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Priority::Number(n) if n.is_finite())
    }
}

/// Condition tree node as authored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ReasonSpec {
    Node(ReasonNode),
    /// Anything that is not a well-formed node, kept verbatim
    Invalid(Value),
}

/// Well-formed condition nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ReasonNode {
    TermHit {
        source: String,
        term: String,
        #[serde(default)]
        mode: MatchMode,
    },
    AnyTerms {
        source: String,
        terms: Vec<String>,
        #[serde(default)]
        mode: MatchMode,
    },
    AllTerms {
        source: String,
        terms: Vec<String>,
        #[serde(default)]
        mode: MatchMode,
    },
    PhraseHit {
        source: String,
        phrase: String,
    },
    RegexHit {
        source: String,
        pattern: String,
        #[serde(default)]
        flags: String,
    },
    CountInWindow {
        source: String,
        terms: Vec<String>,
        #[serde(default = "default_window")]
        window: usize,
        #[serde(default = "default_min")]
        min: usize,
        #[serde(default)]
        mode: MatchMode,
    },
    NumberCompare {
        source: String,
        #[serde(default)]
        op: CompareOp,
        value: f64,
    },
    And {
        #[serde(default)]
        children: Vec<ReasonSpec>,
    },
    Or {
        #[serde(default)]
        children: Vec<ReasonSpec>,
    },
    Not {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        child: Option<Box<ReasonSpec>>,
    },
}

fn owned(terms: &[&str]) -> Vec<String> {
    terms.iter().map(|t| t.to_string()).collect()
}

impl ReasonSpec {
    pub fn term_hit(source: &str, term: &str, mode: MatchMode) -> Self {
        ReasonSpec::Node(ReasonNode::TermHit {
            source: source.into(),
            term: term.into(),
            mode,
        })
    }

    pub fn any_terms(source: &str, terms: &[&str], mode: MatchMode) -> Self {
        ReasonSpec::Node(ReasonNode::AnyTerms {
            source: source.into(),
            terms: owned(terms),
            mode,
        })
    }

    pub fn all_terms(source: &str, terms: &[&str], mode: MatchMode) -> Self {
        ReasonSpec::Node(ReasonNode::AllTerms {
            source: source.into(),
            terms: owned(terms),
            mode,
        })
    }

    pub fn phrase_hit(source: &str, phrase: &str) -> Self {
        ReasonSpec::Node(ReasonNode::PhraseHit {
            source: source.into(),
            phrase: phrase.into(),
        })
    }

    pub fn regex_hit(source: &str, pattern: &str, flags: &str) -> Self {
        ReasonSpec::Node(ReasonNode::RegexHit {
            source: source.into(),
            pattern: pattern.into(),
            flags: flags.into(),
        })
    }

    pub fn count_in_window(source: &str, terms: &[&str], window: usize, min: usize) -> Self {
        ReasonSpec::Node(ReasonNode::CountInWindow {
            source: source.into(),
            terms: owned(terms),
            window,
            min,
            mode: MatchMode::default(),
        })
    }

    pub fn number_compare(source: &str, op: CompareOp, value: f64) -> Self {
        ReasonSpec::Node(ReasonNode::NumberCompare {
            source: source.into(),
            op,
            value,
        })
    }

    pub fn and(children: Vec<ReasonSpec>) -> Self {
        ReasonSpec::Node(ReasonNode::And { children })
    }

    pub fn or(children: Vec<ReasonSpec>) -> Self {
        ReasonSpec::Node(ReasonNode::Or { children })
    }

    pub fn not(child: Option<ReasonSpec>) -> Self {
        ReasonSpec::Node(ReasonNode::Not {
            child: child.map(Box::new),
        })
    }

    /// The `type` tag, as authored
    pub fn type_name(&self) -> Option<&str> {
        match self {
            ReasonSpec::Node(node) => Some(node.type_name()),
            ReasonSpec::Invalid(raw) => raw.get("type").and_then(Value::as_str),
        }
    }
}

impl ReasonNode {
    pub fn type_name(&self) -> &'static str {
        match self {
            ReasonNode::TermHit { .. } => "termHit",
            ReasonNode::AnyTerms { .. } => "anyTerms",
            ReasonNode::AllTerms { .. } => "allTerms",
            ReasonNode::PhraseHit { .. } => "phraseHit",
            ReasonNode::RegexHit { .. } => "regexHit",
            ReasonNode::CountInWindow { .. } => "countInWindow",
            ReasonNode::NumberCompare { .. } => "numberCompare",
            ReasonNode::And { .. } => "and",
            ReasonNode::Or { .. } => "or",
            ReasonNode::Not { .. } => "not",
        }
    }
}

/// One fragment or a list of fragments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum EffectValue {
    One(String),
    Many(Vec<String>),
}

impl EffectValue {
    pub fn values(&self) -> Vec<String> {
        match self {
            EffectValue::One(s) => vec![s.clone()],
            EffectValue::Many(v) => v.clone(),
        }
    }
}

impl From<&str> for EffectValue {
    fn from(s: &str) -> Self {
        EffectValue::One(s.to_string())
    }
}

impl From<String> for EffectValue {
    fn from(s: String) -> Self {
        EffectValue::One(s)
    }
}

impl From<Vec<String>> for EffectValue {
    fn from(v: Vec<String>) -> Self {
        EffectValue::Many(v)
    }
}

/// Explicit single-patch write
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WriteSpec {
    /// Destination dot-path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Named write target, resolved through the configured aliases
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,

    #[serde(default)]
    pub op: WriteOp,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Alternative spelling of `value`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl WriteSpec {
    pub fn to_path(path: impl Into<String>, op: WriteOp, value: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            op,
            value: Some(value.into()),
            ..Default::default()
        }
    }

    /// Text to write (`value` wins over `text`)
    pub fn content(&self) -> &str {
        self.value
            .as_deref()
            .or(self.text.as_deref())
            .unwrap_or_default()
    }
}

/// An ordered collection of rules
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[schemars(title = "Rule set", description = "Keyword-injection rules")]
pub struct RuleSet {
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

/// Accepted on-disk shapes: a bare list or `{ rules: [...] }`
#[derive(Deserialize)]
#[serde(untagged)]
enum RuleSetFile {
    List(Vec<RuleSpec>),
    Wrapped(RuleSet),
}

impl From<RuleSetFile> for RuleSet {
    fn from(file: RuleSetFile) -> Self {
        match file {
            RuleSetFile::List(rules) => RuleSet { rules },
            RuleSetFile::Wrapped(set) => set,
        }
    }
}

impl RuleSet {
    pub fn new(rules: Vec<RuleSpec>) -> Self {
        Self { rules }
    }

    /// Parse rules from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_norway::from_str::<RuleSetFile>(yaml)
            .map(Into::into)
            .map_err(|e| Error::RuleParse(e.to_string()))
    }

    /// Serialize rules to YAML string
    pub fn to_yaml(&self) -> Result<String> {
        serde_norway::to_string(self).map_err(|e| Error::RuleParse(e.to_string()))
    }

    /// Parse rules from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str::<RuleSetFile>(json)
            .map(Into::into)
            .map_err(|e| Error::RuleParse(e.to_string()))
    }

    /// Serialize rules to JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::RuleParse(e.to_string()))
    }

    /// Parse by file extension (`.json`, otherwise YAML)
    pub fn from_path_str(path: &str, content: &str) -> Result<Self> {
        if path.ends_with(".json") {
            Self::from_json(content)
        } else {
            Self::from_yaml(content)
        }
    }

    /// Get a rule by ID
    pub fn get_rule(&self, id: &str) -> Option<&RuleSpec> {
        self.rules.iter().find(|r| r.id == id)
    }

    /// Compute hash of the rule set for change detection
    pub fn hash(&self) -> String {
        use sha2::{Digest, Sha256};
        let content = self.to_json().unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        format!("sha256:{}", hex::encode(&hasher.finalize()[..8]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
rules:
  - id: cake_combo
    priority: 10
    targets: [inject.pre]
    when:
      type: allTerms
      source: lastUser.norm
      terms: [strawberry, cake]
      mode: word
    effects:
      inject.pre: combo
"#;
        let set = RuleSet::from_yaml(yaml).unwrap();
        let rule = set.get_rule("cake_combo").unwrap();
        assert_eq!(rule.module_id, DEFAULT_MODULE);
        assert_eq!(rule.priority, Priority::Number(10.0));
        assert_eq!(
            rule.when,
            Some(ReasonSpec::all_terms(
                "lastUser.norm",
                &["strawberry", "cake"],
                MatchMode::Word
            ))
        );
        let effects = rule.effects.as_ref().unwrap();
        assert_eq!(effects["inject.pre"].values(), vec!["combo".to_string()]);
    }

    #[test]
    fn test_bare_list_json() {
        let json = r#"[{"id": "a", "when": {"type": "termHit", "source": "lastUser.norm", "term": "x"}}]"#;
        let set = RuleSet::from_json(json).unwrap();
        assert_eq!(set.rules.len(), 1);
        assert_eq!(set.rules[0].when.as_ref().unwrap().type_name(), Some("termHit"));
    }

    #[test]
    fn test_unknown_type_kept_as_invalid() {
        let json = r#"{"rules": [{"id": "a", "when": {"type": "vibeCheck", "level": 3}}]}"#;
        let set = RuleSet::from_json(json).unwrap();
        match set.rules[0].when.as_ref().unwrap() {
            ReasonSpec::Invalid(raw) => assert_eq!(raw["level"], 3),
            other => panic!("expected invalid node, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_terms_kept_as_invalid() {
        let json = r#"[{"id": "a", "when": {"type": "anyTerms", "source": "s", "terms": "cake"}}]"#;
        let set = RuleSet::from_json(json).unwrap();
        let when = set.rules[0].when.as_ref().unwrap();
        assert!(matches!(when, ReasonSpec::Invalid(_)));
        assert_eq!(when.type_name(), Some("anyTerms"));
    }

    #[test]
    fn test_nested_invalid_child_keeps_parent() {
        let json = r#"[{"id": "a", "when": {"type": "and", "children": [{"type": "nope"}]}}]"#;
        let set = RuleSet::from_json(json).unwrap();
        match set.rules[0].when.as_ref().unwrap() {
            ReasonSpec::Node(ReasonNode::And { children }) => {
                assert!(matches!(children[0], ReasonSpec::Invalid(_)))
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_priority_preserved() {
        let json = r#"[{"id": "a", "priority": "high", "when": {"type": "or"}}]"#;
        let set = RuleSet::from_json(json).unwrap();
        assert!(!set.rules[0].priority.is_valid());
        assert_eq!(set.rules[0].priority.value(), 0.0);
    }

    #[test]
    fn test_json_round_trip_and_hash() {
        let rule = RuleSpec::new(
            "r1",
            ReasonSpec::and(vec![
                ReasonSpec::term_hit("lastUser.norm", "cake", MatchMode::Word),
                ReasonSpec::not(None),
            ]),
        )
        .with_effect("inject.pre", "combo")
        .with_write(WriteSpec::to_path("character.scenario", WriteOp::Set, "x"));
        let set = RuleSet::new(vec![rule]);
        let back = RuleSet::from_json(&set.to_json().unwrap()).unwrap();
        assert_eq!(back, set);
        assert_eq!(back.hash(), set.hash());
        assert!(set.hash().starts_with("sha256:"));
    }
}
