//! Source registry - named accessors into the evaluation context
//!
//! Every condition reads its input through a source id such as
//! `lastUser.norm` or `history.norm`. The registry maps ids to getters,
//! applies named normalizers to the result, and enforces per-module
//! allowlists.
//!
//! The registry is an explicit value: build one at session start and pass
//! it by reference to the compiler, evaluator and runtime.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::trace::TraceEvent;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

/// Precomputed numeric aggregates exposed to conditions by key
pub type Derived = BTreeMap<String, f64>;

/// Prefix under which derived values are readable as sources
pub const DERIVED_PREFIX: &str = "derived.";

/// Everything a getter may look at
#[derive(Debug, Clone, Copy)]
pub struct ReadEnv<'a> {
    pub ctx: &'a Context,
    pub state: &'a Value,
    pub derived: &'a Derived,
}

/// Value produced by a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceValue {
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl SourceValue {
    /// Flatten to text; list items are joined by newlines
    pub fn as_text(&self) -> String {
        match self {
            SourceValue::Text(s) => s.clone(),
            SourceValue::List(items) => items.join("\n"),
            SourceValue::Number(n) => n.to_string(),
        }
    }

    /// View as a list; text becomes a single item
    pub fn as_list(&self) -> Vec<String> {
        match self {
            SourceValue::Text(s) => vec![s.clone()],
            SourceValue::List(items) => items.clone(),
            SourceValue::Number(n) => vec![n.to_string()],
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            SourceValue::Number(n) => Some(*n),
            SourceValue::Text(s) => s.trim().parse().ok(),
            SourceValue::List(_) => None,
        }
    }
}

/// Declared shape of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Text,
    List,
    Number,
}

pub type Getter = Arc<dyn Fn(&ReadEnv<'_>) -> std::result::Result<SourceValue, String> + Send + Sync>;
pub type Normalizer = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// A registered source
#[derive(Clone)]
pub struct SourceSpec {
    pub id: String,
    pub kind: SourceKind,
    pub label: Option<String>,
    /// Name of a registered normalizer applied after the getter
    pub normalizer: Option<String>,
    getter: Getter,
}

impl SourceSpec {
    pub fn new<F>(id: impl Into<String>, kind: SourceKind, getter: F) -> Self
    where
        F: Fn(&ReadEnv<'_>) -> std::result::Result<SourceValue, String> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            kind,
            label: None,
            normalizer: None,
            getter: Arc::new(getter),
        }
    }

    pub fn with_normalizer(mut self, name: impl Into<String>) -> Self {
        self.normalizer = Some(name.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

impl std::fmt::Debug for SourceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceSpec")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("label", &self.label)
            .field("normalizer", &self.normalizer)
            .finish_non_exhaustive()
    }
}

/// Why a read produced no value
enum ReadFailure {
    Missing,
    NotAllowed,
    Failed(String),
}

/// Registry of sources, normalizers and module allowlists
#[derive(Default, Clone)]
pub struct SourceRegistry {
    sources: BTreeMap<String, SourceSpec>,
    normalizers: HashMap<String, Normalizer>,
    allowlists: HashMap<String, HashSet<String>>,
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut normalizers: Vec<_> = self.normalizers.keys().collect();
        normalizers.sort();
        f.debug_struct("SourceRegistry")
            .field("sources", &self.sources.keys().collect::<Vec<_>>())
            .field("normalizers", &normalizers)
            .field("allowlists", &self.allowlists)
            .finish()
    }
}

impl SourceRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in chat sources and normalizers
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_normalizer("lower", |s| s.to_lowercase());
        registry.register_normalizer("trim", |s| s.trim().to_string());
        registry.register_normalizer("collapse", collapse_whitespace);
        registry.register_normalizer("norm", normalize_text);

        let builtins = [
            SourceSpec::new("lastUser.raw", SourceKind::Text, |env| {
                Ok(SourceValue::Text(
                    env.ctx.last_message().unwrap_or_default().to_string(),
                ))
            })
            .with_label("Last message"),
            SourceSpec::new("lastUser.norm", SourceKind::Text, |env| {
                Ok(SourceValue::Text(
                    env.ctx.last_message().unwrap_or_default().to_string(),
                ))
            })
            .with_normalizer("norm")
            .with_label("Last message (normalized)"),
            SourceSpec::new("history.raw", SourceKind::List, |env| {
                Ok(SourceValue::List(
                    env.ctx.history().into_iter().map(String::from).collect(),
                ))
            })
            .with_label("Message history"),
            SourceSpec::new("history.norm", SourceKind::List, |env| {
                Ok(SourceValue::List(
                    env.ctx.history().into_iter().map(String::from).collect(),
                ))
            })
            .with_normalizer("norm")
            .with_label("Message history (normalized)"),
            SourceSpec::new("character.personality", SourceKind::Text, |env| {
                Ok(SourceValue::Text(env.ctx.character.personality.clone()))
            }),
            SourceSpec::new("character.scenario", SourceKind::Text, |env| {
                Ok(SourceValue::Text(env.ctx.character.scenario.clone()))
            }),
            SourceSpec::new("character.example_dialogs", SourceKind::Text, |env| {
                Ok(SourceValue::Text(env.ctx.character.example_dialogs.clone()))
            }),
            SourceSpec::new("chat.messageCount", SourceKind::Number, |env| {
                Ok(SourceValue::Number(env.ctx.message_count() as f64))
            })
            .with_label("Public message count"),
        ];
        for spec in builtins {
            // Built-in ids are distinct, so registration cannot collide.
            let _ = registry.register(spec);
        }
        registry
    }

    /// Register a source; duplicate or empty ids are rejected
    pub fn register(&mut self, spec: SourceSpec) -> Result<()> {
        if spec.id.trim().is_empty() {
            return Err(Error::Registry("source id is required".into()));
        }
        if self.sources.contains_key(&spec.id) {
            return Err(Error::Registry(format!(
                "source already registered: {}",
                spec.id
            )));
        }
        debug!(source = %spec.id, "registered source");
        self.sources.insert(spec.id.clone(), spec);
        Ok(())
    }

    pub fn unregister(&mut self, id: &str) -> Option<SourceSpec> {
        self.sources.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&SourceSpec> {
        self.sources.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sources.contains_key(id)
    }

    /// Registered source ids, sorted
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    /// Register (or replace) a named normalizer
    pub fn register_normalizer<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.normalizers.insert(name.into(), Arc::new(f));
    }

    pub fn normalize(&self, name: &str, input: &str) -> Option<String> {
        self.normalizers.get(name).map(|f| f(input))
    }

    /// Restrict a module to the given source ids
    pub fn set_allowlist<I, S>(&mut self, module_id: impl Into<String>, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowlists
            .insert(module_id.into(), ids.into_iter().map(Into::into).collect());
    }

    /// Lift a module's restriction
    pub fn clear_allowlist(&mut self, module_id: &str) {
        self.allowlists.remove(module_id);
    }

    /// Whether `module_id` may read `source_id` (no allowlist = unrestricted)
    pub fn is_allowed(&self, module_id: &str, source_id: &str) -> bool {
        self.allowlists
            .get(module_id)
            .map(|set| set.contains(source_id))
            .unwrap_or(true)
    }

    /// Read a source on behalf of a module.
    ///
    /// Failures append one trace event. In strict mode they also become an
    /// `Error::Source`; otherwise the read yields `Ok(None)`.
    pub fn read(
        &self,
        module_id: &str,
        source_id: &str,
        env: &ReadEnv<'_>,
        strict: bool,
        trace: Option<&mut Vec<TraceEvent>>,
    ) -> Result<Option<SourceValue>> {
        let failure = match self.resolve(module_id, source_id, env) {
            Ok(value) => {
                trace!(module = module_id, source = source_id, "source read");
                return Ok(Some(value));
            }
            Err(failure) => failure,
        };

        let (event, message) = match failure {
            ReadFailure::Missing => (
                TraceEvent::SourceMissing {
                    module_id: module_id.to_string(),
                    source_id: source_id.to_string(),
                },
                format!("unknown source: {}", source_id),
            ),
            ReadFailure::NotAllowed => (
                TraceEvent::SourceNotAllowed {
                    module_id: module_id.to_string(),
                    source_id: source_id.to_string(),
                },
                format!("module {} may not read {}", module_id, source_id),
            ),
            ReadFailure::Failed(msg) => (
                TraceEvent::SourceError {
                    module_id: module_id.to_string(),
                    source_id: source_id.to_string(),
                    message: msg.clone(),
                },
                format!("{} failed: {}", source_id, msg),
            ),
        };
        debug!(module = module_id, source = source_id, "{}", message);
        if let Some(trace) = trace {
            trace.push(event);
        }
        if strict {
            Err(Error::Source(message))
        } else {
            Ok(None)
        }
    }

    fn resolve(
        &self,
        module_id: &str,
        source_id: &str,
        env: &ReadEnv<'_>,
    ) -> std::result::Result<SourceValue, ReadFailure> {
        let spec = match self.sources.get(source_id) {
            Some(spec) => spec,
            None => {
                let key = source_id
                    .strip_prefix(DERIVED_PREFIX)
                    .ok_or(ReadFailure::Missing)?;
                let value = env.derived.get(key).ok_or(ReadFailure::Missing)?;
                if !self.is_allowed(module_id, source_id) {
                    return Err(ReadFailure::NotAllowed);
                }
                return Ok(SourceValue::Number(*value));
            }
        };
        if !self.is_allowed(module_id, source_id) {
            return Err(ReadFailure::NotAllowed);
        }

        let value = (spec.getter)(env).map_err(ReadFailure::Failed)?;
        match &spec.normalizer {
            None => Ok(value),
            Some(name) => {
                let normalizer = self
                    .normalizers
                    .get(name)
                    .ok_or_else(|| ReadFailure::Failed(format!("unknown normalizer: {}", name)))?;
                Ok(match value {
                    SourceValue::Text(s) => SourceValue::Text(normalizer(&s)),
                    SourceValue::List(items) => {
                        SourceValue::List(items.iter().map(|s| normalizer(s)).collect())
                    }
                    number => number,
                })
            }
        }
    }
}

/// Collapse runs of whitespace into single spaces and trim
pub fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercase, turn punctuation (except apostrophes) into spaces, collapse
pub fn normalize_text(input: &str) -> String {
    let mapped: String = input
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '\'' {
                c
            } else {
                ' '
            }
        })
        .collect::<String>()
        .to_lowercase();
    collapse_whitespace(&mapped)
}
