//! Reason library - the condition vocabulary
//!
//! Each builder reads its source(s) through a [`SourceReader`] and returns
//! a [`Reason`] recording what matched. Builders never panic on bad input:
//! an invalid regex becomes an `error` reason. The only `Err` they return
//! is a strict-mode source failure, which the evaluator turns into an
//! error reason for the rule.
//!
//! Matching is case-insensitive. In `contains` mode a term matches any
//! substring; in `word` mode it must equal a whole token of the text.

use crate::error::Result;
use crate::reason::{Reason, ReasonKind};
use crate::source::SourceValue;
use regex::RegexBuilder;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Anything that can resolve a source id for the current module
pub trait SourceReader {
    fn read_source(&mut self, source_id: &str) -> Result<Option<SourceValue>>;
}

/// Term matching mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    #[default]
    Contains,
    Word,
}

impl std::fmt::Display for MatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchMode::Contains => write!(f, "contains"),
            MatchMode::Word => write!(f, "word"),
        }
    }
}

/// Numeric comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum CompareOp {
    #[serde(rename = "<", alias = "lt")]
    Lt,
    #[serde(rename = "<=", alias = "lte", alias = "le")]
    Le,
    #[serde(rename = ">", alias = "gt")]
    Gt,
    #[default]
    #[serde(rename = ">=", alias = "gte", alias = "ge")]
    Ge,
    #[serde(rename = "==", alias = "eq")]
    Eq,
    #[serde(rename = "!=", alias = "neq", alias = "ne")]
    Ne,
}

impl CompareOp {
    pub fn apply(&self, left: f64, right: f64) -> bool {
        match self {
            CompareOp::Lt => left < right,
            CompareOp::Le => left <= right,
            CompareOp::Gt => left > right,
            CompareOp::Ge => left >= right,
            CompareOp::Eq => left == right,
            CompareOp::Ne => left != right,
        }
    }
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompareOp::Lt => write!(f, "<"),
            CompareOp::Le => write!(f, "<="),
            CompareOp::Gt => write!(f, ">"),
            CompareOp::Ge => write!(f, ">="),
            CompareOp::Eq => write!(f, "=="),
            CompareOp::Ne => write!(f, "!="),
        }
    }
}

/// Split text into lowercase word tokens
pub fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '_'))
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Locate `term` in `text`. Returns the byte index for `contains` mode and
/// the token index for `word` mode. An empty term never matches.
pub fn find_term(text: &str, term: &str, mode: MatchMode) -> Option<usize> {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
        return None;
    }
    match mode {
        MatchMode::Contains => text.to_lowercase().find(&term),
        MatchMode::Word => tokens(text).iter().position(|t| *t == term),
    }
}

fn read_text(reader: &mut impl SourceReader, source: &str) -> Result<Option<String>> {
    Ok(reader.read_source(source)?.map(|v| v.as_text()))
}

fn mark_missing(reason: Reason, missing: bool) -> Reason {
    if missing {
        reason.with_meta("missing", true)
    } else {
        reason
    }
}

fn terms_value(terms: &[String]) -> Value {
    Value::from(terms.to_vec())
}

/// Single term against a text source
pub fn term_hit(
    reader: &mut impl SourceReader,
    source: &str,
    term: &str,
    mode: MatchMode,
) -> Result<Reason> {
    let text = read_text(reader, source)?;
    let missing = text.is_none();
    let index = find_term(text.as_deref().unwrap_or_default(), term, mode);
    let reason = Reason::new(ReasonKind::TermHit, index.is_some())
        .with_meta("source", source)
        .with_meta("term", term)
        .with_meta("mode", mode.to_string())
        .with_meta("index", index.map(|i| i as i64).unwrap_or(-1));
    Ok(mark_missing(reason, missing))
}

/// At least one of the terms
pub fn any_terms(
    reader: &mut impl SourceReader,
    source: &str,
    terms: &[String],
    mode: MatchMode,
) -> Result<Reason> {
    let text = read_text(reader, source)?;
    let missing = text.is_none();
    let text = text.unwrap_or_default();
    let matched: Vec<String> = terms
        .iter()
        .filter(|t| find_term(&text, t, mode).is_some())
        .cloned()
        .collect();
    let reason = Reason::new(ReasonKind::AnyTerms, !matched.is_empty())
        .with_meta("source", source)
        .with_meta("mode", mode.to_string())
        .with_meta("terms", terms_value(terms))
        .with_meta("matched", matched);
    Ok(mark_missing(reason, missing))
}

/// Every term; an empty term list never passes
pub fn all_terms(
    reader: &mut impl SourceReader,
    source: &str,
    terms: &[String],
    mode: MatchMode,
) -> Result<Reason> {
    let text = read_text(reader, source)?;
    let missing = text.is_none();
    let text = text.unwrap_or_default();
    let (matched, unmatched): (Vec<String>, Vec<String>) = terms
        .iter()
        .cloned()
        .partition(|t| find_term(&text, t, mode).is_some());
    let ok = !terms.is_empty() && unmatched.is_empty();
    let reason = Reason::new(ReasonKind::AllTerms, ok)
        .with_meta("source", source)
        .with_meta("mode", mode.to_string())
        .with_meta("matched", matched)
        .with_meta("unmatched", unmatched);
    Ok(mark_missing(reason, missing))
}

/// Exact, case-sensitive substring; an empty phrase never passes.
///
/// Read a normalized source (`*.norm`) to match regardless of case.
pub fn phrase_hit(reader: &mut impl SourceReader, source: &str, phrase: &str) -> Result<Reason> {
    let text = read_text(reader, source)?;
    let missing = text.is_none();
    let index = if phrase.is_empty() {
        None
    } else {
        text.as_deref().unwrap_or_default().find(phrase)
    };
    let reason = Reason::new(ReasonKind::PhraseHit, index.is_some())
        .with_meta("source", source)
        .with_meta("phrase", phrase)
        .with_meta("index", index.map(|i| i as i64).unwrap_or(-1));
    Ok(mark_missing(reason, missing))
}

/// Build a regex from a pattern and JS-style flags
pub fn build_regex(pattern: &str, flags: &str) -> std::result::Result<regex::Regex, String> {
    let mut builder = RegexBuilder::new(pattern);
    for flag in flags.chars() {
        match flag {
            'i' => {
                builder.case_insensitive(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'x' => {
                builder.ignore_whitespace(true);
            }
            'g' | 'u' | 'y' => {}
            other => return Err(format!("unsupported regex flag: {}", other)),
        }
    }
    builder.build().map_err(|e| e.to_string())
}

/// Regex search; a bad pattern or flag yields an `error` reason
pub fn regex_hit(
    reader: &mut impl SourceReader,
    source: &str,
    pattern: &str,
    flags: &str,
) -> Result<Reason> {
    let re = match build_regex(pattern, flags) {
        Ok(re) => re,
        Err(e) => {
            return Ok(Reason::error(e)
                .with_meta("source", source)
                .with_meta("pattern", pattern)
                .with_meta("flags", flags))
        }
    };
    let text = read_text(reader, source)?;
    let missing = text.is_none();
    let text = text.unwrap_or_default();
    let found = re.find(&text);
    let mut reason = Reason::new(ReasonKind::RegexHit, found.is_some())
        .with_meta("source", source)
        .with_meta("pattern", pattern)
        .with_meta("flags", flags);
    if let Some(m) = found {
        reason = reason
            .with_meta("match", m.as_str())
            .with_meta("index", m.start() as i64);
    }
    Ok(mark_missing(reason, missing))
}

/// Count messages among the last `window` list entries that hit any term.
/// A message counts once no matter how many terms it contains.
pub fn count_in_window(
    reader: &mut impl SourceReader,
    source: &str,
    terms: &[String],
    window: usize,
    min: usize,
    mode: MatchMode,
) -> Result<Reason> {
    let value = reader.read_source(source)?;
    let missing = value.is_none();
    let items = value.map(|v| v.as_list()).unwrap_or_default();
    let start = items.len().saturating_sub(window);

    let mut hits = Vec::new();
    for (index, item) in items.iter().enumerate().skip(start) {
        if terms.iter().any(|t| find_term(item, t, mode).is_some()) {
            hits.push(index as u64);
        }
    }
    let count = hits.len();
    let reason = Reason::new(ReasonKind::CountInWindow, count >= min)
        .with_meta("source", source)
        .with_meta("mode", mode.to_string())
        .with_meta("window", window as u64)
        .with_meta("min", min as u64)
        .with_meta("considered", (items.len() - start) as u64)
        .with_meta("count", count as u64)
        .with_meta("hits", hits);
    Ok(mark_missing(reason, missing))
}

/// Compare a numeric source against a constant
pub fn number_compare(
    reader: &mut impl SourceReader,
    source: &str,
    op: CompareOp,
    value: f64,
) -> Result<Reason> {
    let actual = reader.read_source(source)?.and_then(|v| v.as_number());
    let ok = actual.map(|a| op.apply(a, value)).unwrap_or(false);
    let reason = Reason::new(ReasonKind::NumberCompare, ok)
        .with_meta("source", source)
        .with_meta("op", op.to_string())
        .with_meta("value", value)
        .with_meta("actual", actual.map(Value::from).unwrap_or(Value::Null));
    Ok(reason)
}

/// All children pass; vacuously true when empty
pub fn and(children: Vec<Reason>) -> Reason {
    let ok = children.iter().all(|c| c.ok);
    let mut reason = Reason::new(ReasonKind::And, ok).with_meta("count", children.len() as u64);
    reason.children = children;
    reason
}

/// Any child passes; false when empty
pub fn or(children: Vec<Reason>) -> Reason {
    let ok = children.iter().any(|c| c.ok);
    let mut reason = Reason::new(ReasonKind::Or, ok).with_meta("count", children.len() as u64);
    reason.children = children;
    reason
}

/// Negation; a missing child counts as a failed input
pub fn not(child: Option<Reason>) -> Reason {
    let ok = !child.as_ref().map(|c| c.ok).unwrap_or(false);
    let mut reason = Reason::new(ReasonKind::Not, ok);
    if child.is_none() {
        reason = reason.with_meta("missingChild", true);
    }
    reason.child = child.map(Box::new);
    reason
}
