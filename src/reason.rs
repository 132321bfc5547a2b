//! Reasons - boolean results that explain themselves
//!
//! Every condition evaluates to a `Reason`: an `ok` flag, the kind of
//! evaluator that produced it, and a `meta` object with the details
//! (matched terms, counts, regex matches). Composite reasons keep their
//! inputs in `children` (AND/OR) or `child` (NOT), so a whole decision can
//! be printed as a tree.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Evaluator that produced a reason
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ReasonKind {
    TermHit,
    AnyTerms,
    AllTerms,
    PhraseHit,
    RegexHit,
    CountInWindow,
    NumberCompare,
    And,
    Or,
    Not,
    Error,
}

impl ReasonKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonKind::TermHit => "termHit",
            ReasonKind::AnyTerms => "anyTerms",
            ReasonKind::AllTerms => "allTerms",
            ReasonKind::PhraseHit => "phraseHit",
            ReasonKind::RegexHit => "regexHit",
            ReasonKind::CountInWindow => "countInWindow",
            ReasonKind::NumberCompare => "numberCompare",
            ReasonKind::And => "and",
            ReasonKind::Or => "or",
            ReasonKind::Not => "not",
            ReasonKind::Error => "error",
        }
    }
}

impl std::fmt::Display for ReasonKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An evaluation result with its explanation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Reason {
    pub kind: ReasonKind,
    pub ok: bool,

    #[serde(default)]
    pub meta: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Reason>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child: Option<Box<Reason>>,
}

impl Reason {
    pub fn new(kind: ReasonKind, ok: bool) -> Self {
        Self {
            kind,
            ok,
            meta: Map::new(),
            children: Vec::new(),
            child: None,
        }
    }

    /// A failed `error` reason carrying a message
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ReasonKind::Error, false).with_meta("error", message.into())
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.meta.insert(key.to_string(), value.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.kind == ReasonKind::Error
    }

    /// Error message of an `error` reason
    pub fn error_message(&self) -> Option<&str> {
        self.meta.get("error").and_then(Value::as_str)
    }

    /// Render as an indented tree, one reason per line
    pub fn render(&self) -> String {
        let mut lines = Vec::new();
        self.render_into(0, &mut lines);
        lines.join("\n")
    }

    fn render_into(&self, depth: usize, lines: &mut Vec<String>) {
        let mark = if self.ok { "✓" } else { "✗" };
        let meta = if self.meta.is_empty() {
            String::new()
        } else {
            format!(" {}", Value::Object(self.meta.clone()))
        };
        lines.push(format!("{}{} {}{}", "  ".repeat(depth), mark, self.kind, meta));
        for child in &self.children {
            child.render_into(depth + 1, lines);
        }
        if let Some(child) = &self.child {
            child.render_into(depth + 1, lines);
        }
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_tree() {
        let mut and = Reason::new(ReasonKind::And, false);
        and.children.push(Reason::new(ReasonKind::TermHit, true).with_meta("term", "cake"));
        and.children.push(Reason::error("bad regex"));
        let rendered = and.render();
        let lines: Vec<_> = rendered.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "✗ and");
        assert_eq!(lines[1], "  ✓ termHit {\"term\":\"cake\"}");
        assert!(lines[2].starts_with("  ✗ error"));
    }

    #[test]
    fn test_kind_serializes_camel_case() {
        let json = serde_json::to_string(&ReasonKind::CountInWindow).unwrap();
        assert_eq!(json, "\"countInWindow\"");
    }
}
