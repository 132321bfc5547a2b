//! Progressive runtime - apply each firing rule's writes immediately
//!
//! Unlike [`run_rules`], which merges effects only after the whole batch
//! has decided, the progressive runtime evaluates one rule at a time and
//! writes its patches into the context before moving on. Later rules
//! therefore observe earlier rules' writes.
//!
//! Rules run in the order given. Callers that want priority order sort
//! first with [`stable_sort_by_priority_desc`](crate::eval::stable_sort_by_priority_desc).
//!
//! Every patch is checked against `allowed_targets`. A patch outside the
//! set is a hard error: the run stops immediately and the report carries
//! the offending path in `hard_error`.

use crate::compile::CompiledRule;
use crate::context::{Context, WriteOp};
use crate::effects::EffectTree;
use crate::eval::{group_conflicts, run_rules, ConflictGroup, EvalInput, RuleDiagnostic, RuleResult};
use crate::rule::WriteSpec;
use crate::source::{Derived, SourceRegistry};
use crate::trace::{RuleStage, TraceEvent};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, warn};

/// Character fields rules may write to unless configured otherwise
pub const DEFAULT_ALLOWED_TARGETS: &[&str] = &[
    "character.personality",
    "character.scenario",
    "character.example_dialogs",
];

/// Built-in `targetId` aliases
pub fn default_target_aliases() -> BTreeMap<String, String> {
    [
        ("personality", "character.personality"),
        ("scenario", "character.scenario"),
        ("example_dialogs", "character.example_dialogs"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// One text write against the context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Patch {
    pub rule_id: String,
    pub path: String,
    pub op: WriteOp,
    pub value: String,
}

/// Settings for a progressive run
#[derive(Debug, Clone)]
pub struct ProgressiveOptions {
    pub allowed_targets: BTreeSet<String>,
    pub target_aliases: BTreeMap<String, String>,
    pub state: Value,
    pub derived: Derived,
    pub strict: bool,
    pub now: Option<DateTime<Utc>>,
}

impl Default for ProgressiveOptions {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_TARGETS.iter().copied())
    }
}

impl ProgressiveOptions {
    pub fn new<I, S>(allowed_targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_targets: allowed_targets.into_iter().map(Into::into).collect(),
            target_aliases: default_target_aliases(),
            state: Value::Null,
            derived: Derived::new(),
            strict: false,
            now: None,
        }
    }

    pub fn allow(mut self, path: impl Into<String>) -> Self {
        self.allowed_targets.insert(path.into());
        self
    }

    pub fn with_alias(mut self, target_id: impl Into<String>, path: impl Into<String>) -> Self {
        self.target_aliases.insert(target_id.into(), path.into());
        self
    }

    pub fn with_state(mut self, state: Value) -> Self {
        self.state = state;
        self
    }

    pub fn with_derived(mut self, derived: Derived) -> Self {
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

    pub fn is_allowed(&self, path: &str) -> bool {
        self.allowed_targets.contains(path)
    }

    /// Resolve a write's destination: `path` wins, then the `targetId` alias
    pub fn resolve_target(&self, write: &WriteSpec) -> Option<String> {
        if let Some(path) = &write.path {
            return Some(path.clone());
        }
        let target_id = write.target_id.as_deref()?;
        self.target_aliases.get(target_id).cloned()
    }
}

/// Result of a progressive run
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressiveReport {
    pub ok: bool,
    pub fired: Vec<RuleResult>,
    pub conflicts: Vec<ConflictGroup>,
    pub effects: EffectTree,
    /// Patches written to the context, in application order
    pub applied: Vec<Patch>,
    pub trace: Vec<TraceEvent>,
    pub diagnostics: Vec<RuleDiagnostic>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hard_error: Option<String>,
}

impl ProgressiveReport {
    pub fn fired_ids(&self) -> Vec<&str> {
        self.fired.iter().map(|r| r.id.as_str()).collect()
    }

    pub fn to_report(&self) -> String {
        let mut out = String::new();
        match &self.hard_error {
            Some(e) => out.push_str(&format!("✗ stopped: {}\n", e)),
            None => out.push_str(&format!("✓ {} rule(s) fired\n", self.fired.len())),
        }
        for patch in &self.applied {
            out.push_str(&format!(
                "  {} {} {} {:?}\n",
                patch.rule_id, patch.op, patch.path, patch.value
            ));
        }
        for d in &self.diagnostics {
            out.push_str(&format!("  ⚠ {} {}: {}\n", d.rule_id, d.stage, d.message));
        }
        out
    }
}

/// Flatten an effect tree into append patches
pub fn patches_for(rule_id: &str, effects: &EffectTree) -> Vec<Patch> {
    effects
        .leaves()
        .into_iter()
        .flat_map(|(path, values)| {
            values.into_iter().map(move |value| Patch {
                rule_id: rule_id.to_string(),
                path: path.clone(),
                op: WriteOp::Append,
                value,
            })
        })
        .collect()
}

/// Evaluate rules one at a time, writing each fired rule's patches into `ctx`
pub fn run_rules_progressive(
    rules: &[CompiledRule],
    ctx: &mut Context,
    options: &ProgressiveOptions,
    registry: &SourceRegistry,
) -> ProgressiveReport {
    let mut report = ProgressiveReport {
        ok: true,
        ..Default::default()
    };

    for rule in rules {
        let batch = {
            let mut input = EvalInput::new(ctx)
                .with_state(&options.state)
                .with_derived(&options.derived)
                .strict(options.strict);
            input.now = options.now;
            run_rules(std::slice::from_ref(rule), &input, registry)
        };
        report.trace.extend(batch.trace);
        report.diagnostics.extend(batch.diagnostics);

        if batch.fired.is_empty() {
            continue;
        }
        report.fired.extend(batch.fired);
        report.effects = report.effects.merge(&batch.effects);

        let mut patches = patches_for(&rule.id, &batch.effects);
        if let Some(write) = &rule.write {
            match options.resolve_target(write) {
                Some(path) => patches.push(Patch {
                    rule_id: rule.id.clone(),
                    path,
                    op: write.op,
                    value: write.content().to_string(),
                }),
                None => {
                    let message = format!(
                        "unknown write target {:?}",
                        write.target_id.as_deref().unwrap_or_default()
                    );
                    warn!(rule = %rule.id, %message, "write skipped");
                    record_write_error(&mut report, &rule.id, message);
                }
            }
        }

        for patch in patches {
            if !options.is_allowed(&patch.path) {
                error!(rule = %rule.id, path = %patch.path, "write outside allowed targets");
                report.trace.push(TraceEvent::WriteBlocked {
                    rule_id: rule.id.clone(),
                    path: patch.path.clone(),
                });
                report.hard_error = Some(format!(
                    "rule '{}' may not write to {}",
                    rule.id, patch.path
                ));
                report.ok = false;
                report.conflicts = group_conflicts(&report.fired);
                return report;
            }

            match ctx.write_path(&patch.path, patch.op, &patch.value) {
                Ok(()) => {
                    debug!(rule = %rule.id, path = %patch.path, op = %patch.op, "patch applied");
                    report.trace.push(TraceEvent::PatchApplied {
                        rule_id: rule.id.clone(),
                        path: patch.path.clone(),
                        op: patch.op,
                    });
                    report.applied.push(patch);
                }
                Err(e) => {
                    warn!(rule = %rule.id, path = %patch.path, error = %e, "patch failed");
                    record_write_error(&mut report, &rule.id, e.to_string());
                }
            }
        }
    }

    report.conflicts = group_conflicts(&report.fired);
    report
}

fn record_write_error(report: &mut ProgressiveReport, rule_id: &str, message: String) {
    report.trace.push(TraceEvent::RuleError {
        rule_id: rule_id.to_string(),
        stage: RuleStage::Write,
        message: message.clone(),
    });
    report.diagnostics.push(RuleDiagnostic {
        rule_id: rule_id.to_string(),
        stage: RuleStage::Write,
        message,
    });
}
