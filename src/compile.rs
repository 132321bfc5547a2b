//! Rule compiler - `RuleSpec` to executable `CompiledRule`
//!
//! Compilation is total: it never fails. A condition node that could not
//! be parsed, or a rule without `when`, compiles to an evaluator that
//! yields an `error` reason, so the problem surfaces at evaluation time
//! alongside every other rule's result.

use crate::effects::EffectTree;
use crate::error::EvalError;
use crate::eval::RuleApi;
use crate::reason::Reason;
use crate::reasons;
use crate::rule::{ReasonNode, ReasonSpec, RuleSpec, WriteSpec, REASON_TYPES};
use std::sync::Arc;
use tracing::debug;

pub type WhenFn = Arc<dyn Fn(&mut RuleApi<'_>) -> Result<Reason, EvalError> + Send + Sync>;
pub type CommitFn = Arc<dyn Fn(&mut RuleApi<'_>) -> Result<(), EvalError> + Send + Sync>;
pub type EffectsFn = Arc<dyn Fn(&mut RuleApi<'_>) -> Result<EffectTree, EvalError> + Send + Sync>;

/// An executable rule
#[derive(Clone)]
pub struct CompiledRule {
    pub id: String,
    pub label: String,
    pub module_id: String,
    pub priority: f64,
    pub targets: Vec<String>,
    pub when: WhenFn,
    pub effects: Option<EffectsFn>,
    pub commit: Option<CommitFn>,
    /// Explicit patch applied by the progressive runtime
    pub write: Option<WriteSpec>,
}

impl std::fmt::Debug for CompiledRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledRule")
            .field("id", &self.id)
            .field("module_id", &self.module_id)
            .field("priority", &self.priority)
            .field("targets", &self.targets)
            .field("effects", &self.effects.is_some())
            .field("commit", &self.commit.is_some())
            .field("write", &self.write)
            .finish()
    }
}

impl CompiledRule {
    /// A programmatic rule with a hand-written condition
    pub fn new<F>(id: impl Into<String>, when: F) -> Self
    where
        F: Fn(&mut RuleApi<'_>) -> Result<Reason, EvalError> + Send + Sync + 'static,
    {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            module_id: crate::rule::DEFAULT_MODULE.to_string(),
            priority: 0.0,
            targets: Vec::new(),
            when: Arc::new(when),
            effects: None,
            commit: None,
            write: None,
        }
    }

    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_module(mut self, module_id: impl Into<String>) -> Self {
        self.module_id = module_id.into();
        self
    }

    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.targets = targets.into_iter().map(Into::into).collect();
        self
    }

    /// Attach a commit hook, run when the rule fires
    pub fn with_commit<F>(mut self, commit: F) -> Self
    where
        F: Fn(&mut RuleApi<'_>) -> Result<(), EvalError> + Send + Sync + 'static,
    {
        self.commit = Some(Arc::new(commit));
        self
    }

    pub fn with_write(mut self, write: WriteSpec) -> Self {
        self.write = Some(write);
        self
    }

    /// Replace the effects producer
    pub fn with_effects<F>(mut self, effects: F) -> Self
    where
        F: Fn(&mut RuleApi<'_>) -> Result<EffectTree, EvalError> + Send + Sync + 'static,
    {
        self.effects = Some(Arc::new(effects));
        self
    }
}

/// Box a condition evaluator
pub fn when_fn<F>(f: F) -> WhenFn
where
    F: Fn(&mut RuleApi<'_>) -> Result<Reason, EvalError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Build the effect tree declared by a rule
pub fn effect_tree(spec: &RuleSpec) -> Option<crate::error::Result<EffectTree>> {
    spec.effects.as_ref().map(|effects| {
        EffectTree::from_paths(effects.iter().map(|(path, value)| (path, value.values())))
    })
}

/// Compile one rule
pub fn compile_rule(spec: &RuleSpec) -> CompiledRule {
    let when = match &spec.when {
        Some(when) => compile_reason(when),
        None => error_reason("rule has no condition".to_string(), None),
    };

    let mut rule = CompiledRule {
        id: spec.id.clone(),
        label: spec.display_label().to_string(),
        module_id: spec.module_id.clone(),
        priority: spec.priority.value(),
        targets: spec.targets.clone(),
        when,
        effects: None,
        commit: None,
        write: spec.write.clone(),
    };
    match effect_tree(spec) {
        Some(Ok(tree)) => rule = rule.with_effects(move |_api| Ok(tree.clone())),
        Some(Err(e)) => {
            let message = e.to_string();
            rule = rule.with_effects(move |_api| Err(EvalError::new(message.clone())));
        }
        None => {}
    }

    debug!(rule = %spec.id, "compiled rule");
    rule
}

/// Compile a list of rules, preserving order
pub fn compile_rules(specs: &[RuleSpec]) -> Vec<CompiledRule> {
    specs.iter().map(compile_rule).collect()
}

fn error_reason(message: String, type_name: Option<String>) -> WhenFn {
    when_fn(move |_api| {
        let mut reason = Reason::error(message.clone());
        if let Some(t) = &type_name {
            reason = reason.with_meta("type", t.clone());
        }
        Ok(reason)
    })
}

fn evaluate_all(children: &[WhenFn], api: &mut RuleApi<'_>) -> Result<Vec<Reason>, EvalError> {
    children.iter().map(|child| child(api)).collect()
}

/// Compile a condition tree into a single evaluator
pub fn compile_reason(spec: &ReasonSpec) -> WhenFn {
    let node = match spec {
        ReasonSpec::Node(node) => node.clone(),
        ReasonSpec::Invalid(raw) => {
            let type_name = spec.type_name().map(str::to_string);
            let message = match &type_name {
                Some(t) if REASON_TYPES.contains(&t.as_str()) => {
                    format!("malformed {} condition", t)
                }
                Some(t) => format!("unknown reason type: {}", t),
                None if raw.is_object() => "condition has no type".to_string(),
                None => format!("condition is not an object: {}", raw),
            };
            return error_reason(message, type_name);
        }
    };

    match node {
        ReasonNode::TermHit { source, term, mode } => when_fn(move |api| {
            reasons::term_hit(api, &source, &term, mode).map_err(EvalError::from)
        }),
        ReasonNode::AnyTerms {
            source,
            terms,
            mode,
        } => when_fn(move |api| {
            reasons::any_terms(api, &source, &terms, mode).map_err(EvalError::from)
        }),
        ReasonNode::AllTerms {
            source,
            terms,
            mode,
        } => when_fn(move |api| {
            reasons::all_terms(api, &source, &terms, mode).map_err(EvalError::from)
        }),
        ReasonNode::PhraseHit { source, phrase } => when_fn(move |api| {
            reasons::phrase_hit(api, &source, &phrase).map_err(EvalError::from)
        }),
        ReasonNode::RegexHit {
            source,
            pattern,
            flags,
        } => when_fn(move |api| {
            reasons::regex_hit(api, &source, &pattern, &flags).map_err(EvalError::from)
        }),
        ReasonNode::CountInWindow {
            source,
            terms,
            window,
            min,
            mode,
        } => when_fn(move |api| {
            reasons::count_in_window(api, &source, &terms, window, min, mode)
                .map_err(EvalError::from)
        }),
        ReasonNode::NumberCompare { source, op, value } => when_fn(move |api| {
            reasons::number_compare(api, &source, op, value).map_err(EvalError::from)
        }),
        ReasonNode::And { children } => {
            let compiled: Vec<WhenFn> = children.iter().map(compile_reason).collect();
            when_fn(move |api| Ok(reasons::and(evaluate_all(&compiled, api)?)))
        }
        ReasonNode::Or { children } => {
            let compiled: Vec<WhenFn> = children.iter().map(compile_reason).collect();
            when_fn(move |api| Ok(reasons::or(evaluate_all(&compiled, api)?)))
        }
        ReasonNode::Not { child } => {
            let compiled = child.as_deref().map(compile_reason);
            when_fn(move |api| {
                let inner = match &compiled {
                    Some(f) => Some(f(api)?),
                    None => None,
                };
                Ok(reasons::not(inner))
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::eval::EvalInput;
    use crate::reason::ReasonKind;
    use crate::reasons::MatchMode;
    use crate::source::SourceRegistry;

    fn evaluate(spec: &ReasonSpec, ctx: &Context) -> Reason {
        let registry = SourceRegistry::with_defaults();
        let input = EvalInput::new(ctx);
        let mut trace = Vec::new();
        let mut api = RuleApi::new(&registry, &input, "core", &mut trace);
        (compile_reason(spec))(&mut api).unwrap()
    }

    #[test]
    fn test_compile_nested_tree() {
        let ctx = Context::with_messages(["I want strawberry cake"]);
        let spec = ReasonSpec::and(vec![
            ReasonSpec::term_hit("lastUser.norm", "cake", MatchMode::Word),
            ReasonSpec::not(Some(ReasonSpec::phrase_hit("lastUser.norm", "no cake"))),
        ]);
        let reason = evaluate(&spec, &ctx);
        assert_eq!(reason.kind, ReasonKind::And);
        assert!(reason.ok);
        assert_eq!(reason.children.len(), 2);
        assert_eq!(reason.children[1].kind, ReasonKind::Not);
    }

    #[test]
    fn test_unknown_type_compiles_to_error() {
        let spec = ReasonSpec::Invalid(serde_json::json!({"type": "vibeCheck"}));
        let reason = evaluate(&spec, &Context::default());
        assert!(reason.is_error());
        assert!(!reason.ok);
        assert_eq!(reason.error_message(), Some("unknown reason type: vibeCheck"));
    }

    #[test]
    fn test_missing_when_compiles_to_error() {
        let mut spec = RuleSpec::new("r", ReasonSpec::or(vec![]));
        spec.when = None;
        let rule = compile_rule(&spec);
        let ctx = Context::default();
        let registry = SourceRegistry::with_defaults();
        let input = EvalInput::new(&ctx);
        let mut trace = Vec::new();
        let mut api = RuleApi::new(&registry, &input, "core", &mut trace);
        let reason = (rule.when)(&mut api).unwrap();
        assert!(reason.is_error());
    }

    #[test]
    fn test_effects_precomputed() {
        let spec = RuleSpec::new("r", ReasonSpec::and(vec![]))
            .with_effect("inject.pre", "a")
            .with_effect("inject.post", vec!["b".to_string(), "c".to_string()]);
        let rule = compile_rule(&spec);
        assert_eq!(rule.targets, vec!["inject.pre", "inject.post"]);
        let ctx = Context::default();
        let registry = SourceRegistry::with_defaults();
        let input = EvalInput::new(&ctx);
        let mut trace = Vec::new();
        let mut api = RuleApi::new(&registry, &input, "core", &mut trace);
        let tree = (rule.effects.as_ref().unwrap())(&mut api).unwrap();
        assert_eq!(tree.get("inject.post").unwrap().len(), 2);
    }

    #[test]
    fn test_write_bound_to_its_own_rule() {
        let specs = vec![
            RuleSpec::new("x", ReasonSpec::and(vec![])).with_write(WriteSpec::to_path(
                "character.scenario",
                crate::context::WriteOp::Append,
                "A",
            )),
            RuleSpec::new("x", ReasonSpec::and(vec![])).with_effect("character.personality", "p"),
        ];
        let rules = compile_rules(&specs);
        assert_eq!(rules[0].write.as_ref().map(WriteSpec::content), Some("A"));
        assert!(rules[1].write.is_none());
    }
}
