//! Evaluation core - run compiled rules against one context snapshot
//!
//! Rules run in `(priority desc, original index asc)` order. Each rule's
//! condition is evaluated in isolation: a failing rule becomes an `error`
//! reason and the batch continues. Effects from fired rules are merged
//! only after every rule has decided, so no rule can observe another's
//! output within a batch (see `runtime` for the progressive variant).
//!
//! Conflicts are computed from the targets each rule *declares*, not from
//! the paths its effects actually write. The validator warns when the two
//! disagree; the evaluator does not reconcile them.

use crate::compile::CompiledRule;
use crate::context::Context;
use crate::effects::EffectTree;
use crate::error::Result;
use crate::reason::Reason;
use crate::reasons::SourceReader;
use crate::source::{Derived, ReadEnv, SourceRegistry, SourceValue};
use crate::trace::{RuleStage, TraceEvent};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

static NULL_STATE: Value = Value::Null;
static NO_DERIVED: Derived = Derived::new();

/// Inputs shared by every rule in one evaluation call
#[derive(Debug, Clone, Copy)]
pub struct EvalInput<'a> {
    pub ctx: &'a Context,
    pub state: &'a Value,
    pub derived: &'a Derived,
    /// Source failures raise instead of reading as missing
    pub strict: bool,
    /// Fixed clock; `None` uses the system time
    pub now: Option<DateTime<Utc>>,
}

impl<'a> EvalInput<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self {
            ctx,
            state: &NULL_STATE,
            derived: &NO_DERIVED,
            strict: false,
            now: None,
        }
    }

    pub fn with_state(mut self, state: &'a Value) -> Self {
        self.state = state;
        self
    }

    pub fn with_derived(mut self, derived: &'a Derived) -> Self {
        self.derived = derived;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    fn read_env(&self) -> ReadEnv<'a> {
        ReadEnv {
            ctx: self.ctx,
            state: self.state,
            derived: self.derived,
        }
    }
}

/// Per-rule view handed to conditions, commits and effect producers
pub struct RuleApi<'a> {
    registry: &'a SourceRegistry,
    input: &'a EvalInput<'a>,
    module_id: &'a str,
    trace: &'a mut Vec<TraceEvent>,
}

impl<'a> RuleApi<'a> {
    pub fn new(
        registry: &'a SourceRegistry,
        input: &'a EvalInput<'a>,
        module_id: &'a str,
        trace: &'a mut Vec<TraceEvent>,
    ) -> Self {
        Self {
            registry,
            input,
            module_id,
            trace,
        }
    }

    pub fn module_id(&self) -> &str {
        self.module_id
    }

    pub fn ctx(&self) -> &Context {
        self.input.ctx
    }

    pub fn state(&self) -> &Value {
        self.input.state
    }

    pub fn derived(&self) -> &Derived {
        self.input.derived
    }

    /// Current time (fixed when the input pins a clock)
    pub fn now(&self) -> DateTime<Utc> {
        self.input.now.unwrap_or_else(Utc::now)
    }

    /// Read a source for this rule's module
    pub fn read(&mut self, source_id: &str) -> Result<Option<SourceValue>> {
        self.registry.read(
            self.module_id,
            source_id,
            &self.input.read_env(),
            self.input.strict,
            Some(&mut *self.trace),
        )
    }

    pub fn read_text(&mut self, source_id: &str) -> Result<Option<String>> {
        Ok(self.read(source_id)?.map(|v| v.as_text()))
    }

    pub fn read_list(&mut self, source_id: &str) -> Result<Option<Vec<String>>> {
        Ok(self.read(source_id)?.map(|v| v.as_list()))
    }

    pub fn read_number(&mut self, source_id: &str) -> Result<Option<f64>> {
        Ok(self.read(source_id)?.and_then(|v| v.as_number()))
    }

    /// Append a custom trace event
    pub fn trace(&mut self, event: TraceEvent) {
        self.trace.push(event);
    }
}

impl SourceReader for RuleApi<'_> {
    fn read_source(&mut self, source_id: &str) -> Result<Option<SourceValue>> {
        self.read(source_id)
    }
}

/// Outcome of one rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RuleResult {
    pub id: String,
    pub label: String,
    pub module_id: String,
    pub priority: f64,
    pub targets: Vec<String>,
    pub ok: bool,
    pub reason: Reason,
}

/// Kind of conflict between fired rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ConflictKind {
    SharedTarget,
}

/// Fired rules that declare the same output target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConflictGroup {
    pub kind: ConflictKind,
    pub key: String,
    pub rules: Vec<RuleResult>,
}

/// A rule stage failure that was isolated from the batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RuleDiagnostic {
    pub rule_id: String,
    pub stage: RuleStage,
    pub message: String,
}

/// Result of one `run_rules` call
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvaluationReport {
    /// Every rule, in evaluation order
    pub results: Vec<RuleResult>,
    /// Rules whose condition passed, in evaluation order
    pub fired: Vec<RuleResult>,
    pub conflicts: Vec<ConflictGroup>,
    /// Merged effects of all fired rules
    pub effects: EffectTree,
    pub trace: Vec<TraceEvent>,
    pub diagnostics: Vec<RuleDiagnostic>,
}

impl EvaluationReport {
    /// Rule ids in the order they were evaluated
    pub fn order(&self) -> Vec<&str> {
        self.results.iter().map(|r| r.id.as_str()).collect()
    }

    pub fn fired_ids(&self) -> Vec<&str> {
        self.fired.iter().map(|r| r.id.as_str()).collect()
    }

    pub fn is_fired(&self, id: &str) -> bool {
        self.fired.iter().any(|r| r.id == id)
    }

    pub fn result(&self, id: &str) -> Option<&RuleResult> {
        self.results.iter().find(|r| r.id == id)
    }

    /// Human-readable report; `show_all` includes rules that did not fire
    pub fn to_report(&self, show_all: bool) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "{} rule(s) evaluated, {} fired\n",
            self.results.len(),
            self.fired.len()
        ));
        for result in &self.results {
            if !result.ok && !show_all {
                continue;
            }
            let mark = if result.ok { "✓" } else { "✗" };
            out.push_str(&format!(
                "\n{} {} [{}] priority {}\n",
                mark, result.label, result.module_id, result.priority
            ));
            for line in result.reason.render().lines() {
                out.push_str(&format!("    {}\n", line));
            }
        }
        if !self.conflicts.is_empty() {
            out.push_str("\nConflicts:\n");
            for group in &self.conflicts {
                let ids: Vec<_> = group.rules.iter().map(|r| r.id.as_str()).collect();
                out.push_str(&format!("  ⚠ {}: {}\n", group.key, ids.join(", ")));
            }
        }
        if !self.effects.is_empty() {
            out.push_str("\nEffects:\n");
            for (path, values) in self.effects.leaves() {
                for value in values {
                    out.push_str(&format!("  {} += {:?}\n", path, value));
                }
            }
        }
        if !self.diagnostics.is_empty() {
            out.push_str("\nDiagnostics:\n");
            for d in &self.diagnostics {
                out.push_str(&format!("  {} {}: {}\n", d.rule_id, d.stage, d.message));
            }
        }
        out
    }
}

/// Indices of `rules` in evaluation order: priority descending, ties in
/// original order
pub fn evaluation_order(rules: &[CompiledRule]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..rules.len()).collect();
    // `sort_by` is stable, so equal priorities keep their relative order.
    order.sort_by(|&a, &b| sort_key(rules[b].priority).total_cmp(&sort_key(rules[a].priority)));
    order
}

/// `-0.0` and `0.0` are the same priority
fn sort_key(priority: f64) -> f64 {
    if priority == 0.0 {
        0.0
    } else {
        priority
    }
}

/// Stable priority-descending sort of a rule list
pub fn stable_sort_by_priority_desc(rules: &[CompiledRule]) -> Vec<CompiledRule> {
    evaluation_order(rules)
        .into_iter()
        .map(|i| rules[i].clone())
        .collect()
}

fn result_for(rule: &CompiledRule, reason: Reason) -> RuleResult {
    RuleResult {
        id: rule.id.clone(),
        label: rule.label.clone(),
        module_id: rule.module_id.clone(),
        priority: rule.priority,
        targets: rule.targets.clone(),
        ok: reason.ok,
        reason,
    }
}

/// Group fired results by declared target; keep groups with 2+ rules
pub fn group_conflicts(fired: &[RuleResult]) -> Vec<ConflictGroup> {
    let mut keys: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<RuleResult>> = HashMap::new();
    for result in fired {
        let mut seen = Vec::new();
        for target in &result.targets {
            if seen.contains(&target) {
                continue;
            }
            seen.push(target);
            let entry = groups.entry(target.clone()).or_insert_with(|| {
                keys.push(target.clone());
                Vec::new()
            });
            entry.push(result.clone());
        }
    }
    keys.into_iter()
        .filter_map(|key| {
            let rules = groups.remove(&key)?;
            (rules.len() > 1).then(|| ConflictGroup {
                kind: ConflictKind::SharedTarget,
                key,
                rules,
            })
        })
        .collect()
}

/// Evaluate `rules` against one snapshot and merge the fired effects
pub fn run_rules(
    rules: &[CompiledRule],
    input: &EvalInput<'_>,
    registry: &SourceRegistry,
) -> EvaluationReport {
    let mut report = EvaluationReport::default();
    let mut trace = Vec::new();

    for index in evaluation_order(rules) {
        let rule = &rules[index];
        let mut api = RuleApi::new(registry, input, &rule.module_id, &mut trace);

        let reason = match (rule.when)(&mut api) {
            Ok(reason) => reason,
            Err(e) => {
                warn!(rule = %rule.id, error = %e, "condition failed");
                report.diagnostics.push(RuleDiagnostic {
                    rule_id: rule.id.clone(),
                    stage: RuleStage::When,
                    message: e.message.clone(),
                });
                api.trace(TraceEvent::RuleError {
                    rule_id: rule.id.clone(),
                    stage: RuleStage::When,
                    message: e.message.clone(),
                });
                Reason::error(e.message).with_meta("stage", "when")
            }
        };
        debug!(rule = %rule.id, ok = reason.ok, "rule evaluated");
        api.trace(TraceEvent::RuleEvaluated {
            rule_id: rule.id.clone(),
            ok: reason.ok,
        });

        let result = result_for(rule, reason);
        if result.ok {
            if let Some(commit) = &rule.commit {
                if let Err(e) = commit(&mut api) {
                    record_stage_error(&mut report, &mut api, rule, RuleStage::Commit, e.message);
                }
            }
            if let Some(effects) = &rule.effects {
                match effects(&mut api) {
                    Ok(tree) => report.effects = report.effects.merge(&tree),
                    Err(e) => {
                        record_stage_error(&mut report, &mut api, rule, RuleStage::Effects, e.message)
                    }
                }
            }
            report.fired.push(result.clone());
        }
        report.results.push(result);
    }

    report.conflicts = group_conflicts(&report.fired);
    report.trace = trace;
    report
}

fn record_stage_error(
    report: &mut EvaluationReport,
    api: &mut RuleApi<'_>,
    rule: &CompiledRule,
    stage: RuleStage,
    message: String,
) {
    warn!(rule = %rule.id, %stage, error = %message, "rule stage failed");
    api.trace(TraceEvent::RuleError {
        rule_id: rule.id.clone(),
        stage,
        message: message.clone(),
    });
    report.diagnostics.push(RuleDiagnostic {
        rule_id: rule.id.clone(),
        stage,
        message,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EvalError;
    use crate::reason::ReasonKind;

    fn constant(id: &str, priority: f64, ok: bool) -> CompiledRule {
        CompiledRule::new(id, move |_api| Ok(Reason::new(ReasonKind::And, ok)))
            .with_priority(priority)
    }

    #[test]
    fn test_order_is_stable() {
        let rules = vec![
            constant("a", 1.0, true),
            constant("b", 5.0, true),
            constant("c", 1.0, true),
            constant("d", 5.0, true),
        ];
        let ctx = Context::default();
        let report = run_rules(&rules, &EvalInput::new(&ctx), &SourceRegistry::new());
        assert_eq!(report.order(), vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn test_signed_zero_priorities_tie() {
        let rules = vec![
            constant("neg", -0.0, true),
            constant("pos", 0.0, true),
            constant("low", -1.0, true),
        ];
        let ctx = Context::default();
        let report = run_rules(&rules, &EvalInput::new(&ctx), &SourceRegistry::new());
        assert_eq!(report.order(), vec!["neg", "pos", "low"]);
        assert_eq!(evaluation_order(&rules), vec![0, 1, 2]);
    }

    #[test]
    fn test_when_error_is_isolated() {
        let rules = vec![
            CompiledRule::new("boom", |_api| Err(EvalError::new("bad"))),
            constant("fine", 0.0, true),
        ];
        let ctx = Context::default();
        let report = run_rules(&rules, &EvalInput::new(&ctx), &SourceRegistry::new());
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.fired_ids(), vec!["fine"]);
        let boom = report.result("boom").unwrap();
        assert!(boom.reason.is_error());
        assert_eq!(report.diagnostics[0].stage, RuleStage::When);
    }

    #[test]
    fn test_commit_and_effects_errors_recorded() {
        let rules = vec![constant("r", 0.0, true)
            .with_commit(|_api| Err(EvalError::new("commit failed")))
            .with_effects(|_api| Err(EvalError::new("effects failed")))];
        let ctx = Context::default();
        let report = run_rules(&rules, &EvalInput::new(&ctx), &SourceRegistry::new());
        assert!(report.is_fired("r"));
        let stages: Vec<_> = report.diagnostics.iter().map(|d| d.stage).collect();
        assert_eq!(stages, vec![RuleStage::Commit, RuleStage::Effects]);
    }

    #[test]
    fn test_strict_read_becomes_error_reason() {
        let rules = vec![CompiledRule::new("r", |api| {
            api.read("missing.source")?;
            Ok(Reason::new(ReasonKind::And, true))
        })];
        let ctx = Context::default();
        let input = EvalInput::new(&ctx).strict(true);
        let report = run_rules(&rules, &input, &SourceRegistry::with_defaults());
        assert!(report.fired.is_empty());
        assert!(report
            .trace
            .iter()
            .any(|e| matches!(e, TraceEvent::SourceMissing { .. })));
    }

    #[test]
    fn test_conflicts_from_declared_targets() {
        let rules = vec![
            constant("a", 0.0, true).with_targets(["inject.pre", "inject.pre"]),
            constant("b", 0.0, true).with_targets(["inject.pre"]),
            constant("c", 0.0, false).with_targets(["inject.pre"]),
            constant("d", 0.0, true).with_targets(["inject.post"]),
        ];
        let ctx = Context::default();
        let report = run_rules(&rules, &EvalInput::new(&ctx), &SourceRegistry::new());
        assert_eq!(report.conflicts.len(), 1);
        let ids: Vec<_> = report.conflicts[0].rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_fixed_clock() {
        let when = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let rules = vec![CompiledRule::new("r", move |api| {
            Ok(Reason::new(ReasonKind::And, api.now() == when))
        })];
        let ctx = Context::default();
        let report = run_rules(&rules, &EvalInput::new(&ctx).at(when), &SourceRegistry::new());
        assert!(report.is_fired("r"));
    }
}
