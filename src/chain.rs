//! Block-chain runner - IF/ELSEIF/ELSE execution with a textual trace
//!
//! Blocks are walked top to bottom. An `if` block opens a new chain; the
//! following `elseif`/`else` blocks belong to it until the next `if`.
//! Within a chain at most one block executes:
//!
//! - `elseif` is eligible only while no earlier block of the chain ran
//! - `else` additionally needs to be the first `else` of the chain
//! - `elseif`/`else` with no open chain are never eligible
//!
//! Every leaf condition that gets evaluated is numbered `Gate N:` with a
//! counter that runs across the whole chain run, not per block. Empty
//! groups pass regardless of their join.

use crate::block::{
    Action, Block, BlockType, CondGroup, CondLeaf, Condition, ConditionNode, Join, NumericMode,
    StringMode,
};
use crate::context::{append_text, value_text, Context, WriteOp};
use crate::source::{normalize_text, Derived};
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// History window used when a condition does not set one
pub const DEFAULT_WINDOW: usize = 10;

/// Prefix of the derived keys filled by [`derive_list_counts`]
pub const COUNT_PREFIX: &str = "count.";

/// Values the chain reads besides the context
#[derive(Debug, Clone)]
pub struct ChainInput {
    pub derived: Derived,
    pub lists: BTreeMap<String, Vec<String>>,
    pub window: usize,
}

impl Default for ChainInput {
    fn default() -> Self {
        Self {
            derived: Derived::new(),
            lists: BTreeMap::new(),
            window: DEFAULT_WINDOW,
        }
    }
}

impl ChainInput {
    pub fn new(lists: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            lists,
            ..Default::default()
        }
    }

    pub fn with_derived(mut self, derived: Derived) -> Self {
        self.derived = derived;
        self
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }
}

/// What happened to one block
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockOutcome {
    pub block_id: String,
    pub kind: BlockType,
    pub eligible: bool,
    /// `None` when the condition was not evaluated
    pub condition: Option<bool>,
    pub executed: bool,
}

/// Result of a chain run
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChainRun {
    pub outcomes: Vec<BlockOutcome>,
    pub log: Vec<String>,
}

impl ChainRun {
    pub fn trace_text(&self) -> String {
        self.log.join("\n")
    }

    pub fn executed_ids(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.executed)
            .map(|o| o.block_id.as_str())
            .collect()
    }

    pub fn outcome(&self, block_id: &str) -> Option<&BlockOutcome> {
        self.outcomes.iter().find(|o| o.block_id == block_id)
    }
}

/// Last `window` messages, normalized, oldest first
fn recent_history(ctx: &Context, window: usize) -> Vec<String> {
    let history = ctx.history();
    let start = history.len().saturating_sub(window);
    history[start..].iter().map(|m| normalize_text(m)).collect()
}

/// Whole-word (or whole-phrase) match on normalized text
fn mentions(text: &str, term: &str) -> bool {
    let term = normalize_text(term);
    if term.is_empty() {
        return false;
    }
    format!(" {} ", text).contains(&format!(" {} ", term))
}

fn mentions_any(text: &str, terms: &[String]) -> bool {
    terms.iter().any(|t| mentions(text, t))
}

/// Count, per list, how many recent messages mention any of its terms.
///
/// Keys are `count.<listId>`.
pub fn derive_list_counts(
    ctx: &Context,
    lists: &BTreeMap<String, Vec<String>>,
    window: usize,
) -> Derived {
    let history = recent_history(ctx, window);
    lists
        .iter()
        .map(|(id, terms)| {
            let count = history.iter().filter(|m| mentions_any(m, terms)).count();
            (format!("{}{}", COUNT_PREFIX, id), count as f64)
        })
        .collect()
}

fn memory_number(ctx: &Context, key: &str) -> f64 {
    match ctx.character.memory.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn pass(ok: bool) -> &'static str {
    if ok {
        "PASS"
    } else {
        "FAIL"
    }
}

struct Runner<'a, R: Rng> {
    ctx: &'a mut Context,
    input: &'a ChainInput,
    derived: Derived,
    rng: &'a mut R,
    gate: usize,
    log: Vec<String>,
}

impl<R: Rng> Runner<'_, R> {
    fn line(&mut self, depth: usize, text: impl AsRef<str>) {
        self.log
            .push(format!("{}{}", "  ".repeat(depth), text.as_ref()));
    }

    fn list(&self, id: &str) -> Option<&Vec<String>> {
        self.input.lists.get(id)
    }

    fn eval_nodes(&mut self, join: Join, nodes: &[ConditionNode], depth: usize) -> bool {
        let results: Vec<bool> = nodes.iter().map(|n| self.eval_node(n, depth)).collect();
        join.combine(&results)
    }

    fn eval_node(&mut self, node: &ConditionNode, depth: usize) -> bool {
        match node {
            ConditionNode::Cond(leaf) => self.eval_leaf(leaf, depth),
            ConditionNode::Group(group) => self.eval_group(group, depth),
        }
    }

    fn eval_group(&mut self, group: &CondGroup, depth: usize) -> bool {
        let join = Join::from(group.join);
        self.line(
            depth,
            format!(
                "Group {}{} ({} item(s))",
                join,
                if group.not { " NOT" } else { "" },
                group.items.len()
            ),
        );
        let combined = self.eval_nodes(join, &group.items, depth + 1);
        let ok = combined != group.not;
        self.line(depth, format!("Group {} -> {}", join, pass(ok)));
        ok
    }

    fn eval_leaf(&mut self, leaf: &CondLeaf, depth: usize) -> bool {
        self.gate += 1;
        let (raw, detail) = self.check(&leaf.condition);
        let ok = raw != leaf.not;
        let negated = if leaf.not { "NOT " } else { "" };
        self.line(
            depth,
            format!(
                "Gate {}: {}{} ({}) -> {}",
                self.gate,
                negated,
                leaf.condition.type_name(),
                detail,
                pass(ok)
            ),
        );
        ok
    }

    fn check(&mut self, condition: &Condition) -> (bool, String) {
        match condition {
            Condition::RandomChance { percent } => {
                let roll: f64 = self.rng.gen_range(0.0..100.0);
                (roll < *percent, format!("roll {:.2} < {}", roll, percent))
            }
            Condition::MessageCountComparison { op, value } => {
                let count = self.ctx.message_count() as f64;
                (op.apply(count, *value), format!("count {} {} {}", count, op, value))
            }
            Condition::AnyInList { list_id } | Condition::NoneInList { list_id } => {
                let last = normalize_text(self.ctx.last_message().unwrap_or_default());
                let hit = match self.list(list_id) {
                    Some(terms) => mentions_any(&last, terms),
                    None => {
                        return (false, format!("unknown list '{}'", list_id));
                    }
                };
                let ok = match condition {
                    Condition::NoneInList { .. } => !hit,
                    _ => hit,
                };
                (ok, format!("list '{}' in last message: {}", list_id, hit))
            }
            Condition::CountInHistory {
                list_id,
                window,
                op,
                value,
            } => {
                let window = window.unwrap_or(self.input.window);
                let terms = match self.list(list_id) {
                    Some(terms) => terms.clone(),
                    None => return (false, format!("unknown list '{}'", list_id)),
                };
                let count = recent_history(self.ctx, window)
                    .iter()
                    .filter(|m| mentions_any(m, &terms))
                    .count() as f64;
                (
                    op.apply(count, *value),
                    format!("'{}' in last {}: {} {} {}", list_id, window, count, op, value),
                )
            }
            Condition::HistoryContainsList { list_id, window } => {
                let window = window.unwrap_or(self.input.window);
                let terms = match self.list(list_id) {
                    Some(terms) => terms.clone(),
                    None => return (false, format!("unknown list '{}'", list_id)),
                };
                let hit = recent_history(self.ctx, window)
                    .iter()
                    .any(|m| mentions_any(m, &terms));
                (hit, format!("'{}' in last {}: {}", list_id, window, hit))
            }
            Condition::DerivedNumberComparison { key, op, value } => match self.derived.get(key) {
                Some(n) => (op.apply(*n, *value), format!("{} = {} {} {}", key, n, op, value)),
                None => (false, format!("{} missing", key)),
            },
            Condition::MemoryNumberComparison { mem_key, op, value } => {
                let n = memory_number(self.ctx, mem_key);
                (
                    op.apply(n, *value),
                    format!("memory.{} = {} {} {}", mem_key, n, op, value),
                )
            }
            Condition::MemoryStringContains { mem_key, text } => {
                let current = self
                    .ctx
                    .character
                    .memory
                    .get(mem_key)
                    .map(value_text)
                    .unwrap_or_default();
                let ok = current.to_lowercase().contains(&text.to_lowercase());
                (ok, format!("memory.{} contains {:?}", mem_key, text))
            }
            Condition::PersonalityContains { text } => {
                let ok = self
                    .ctx
                    .character
                    .personality
                    .to_lowercase()
                    .contains(&text.to_lowercase());
                (ok, format!("personality contains {:?}", text))
            }
            Condition::ScenarioContains { text } => {
                let ok = self
                    .ctx
                    .character
                    .scenario
                    .to_lowercase()
                    .contains(&text.to_lowercase());
                (ok, format!("scenario contains {:?}", text))
            }
        }
    }

    fn write(&mut self, path: &str, text: &str) -> String {
        match self.ctx.write_path(path, WriteOp::Append, text) {
            Ok(()) => format!("{} += {:?}", path, text),
            Err(e) => format!("{} failed: {}", path, e),
        }
    }

    fn apply(&mut self, action: &Action) -> String {
        match action {
            Action::AppendPersonality { text } => self.write("character.personality", text),
            Action::AppendScenario { text } => self.write("character.scenario", text),
            Action::AppendExampleDialogs { text } => self.write("character.example_dialogs", text),
            Action::AppendRandomFromList { list_id, target } => {
                let items = match self.list(list_id) {
                    Some(items) if !items.is_empty() => items.clone(),
                    Some(_) => return format!("list '{}' is empty; skipped", list_id),
                    None => return format!("unknown list '{}'; skipped", list_id),
                };
                let pick = &items[self.rng.gen_range(0..items.len())];
                self.write(target.path(), pick)
            }
            Action::MemoryNumeric {
                mem_key,
                mode,
                value,
                text,
            } => {
                let amount = match value.or_else(|| text.as_deref().and_then(|t| t.trim().parse().ok())) {
                    Some(n) => n,
                    None => return format!("memory.{}: no numeric value; skipped", mem_key),
                };
                let current = memory_number(self.ctx, mem_key);
                let next = match mode {
                    NumericMode::Set => amount,
                    NumericMode::Inc => current + amount,
                    NumericMode::Dec => current - amount,
                };
                self.ctx
                    .character
                    .memory
                    .insert(mem_key.clone(), number_value(next));
                format!("memory.{} = {}", mem_key, next)
            }
            Action::MemoryString {
                mem_key,
                mode,
                text,
            } => {
                let next = match mode {
                    StringMode::Set => text.clone(),
                    StringMode::Append => {
                        let current = self
                            .ctx
                            .character
                            .memory
                            .get(mem_key)
                            .map(value_text)
                            .unwrap_or_default();
                        append_text(&current, text)
                    }
                };
                self.ctx
                    .character
                    .memory
                    .insert(mem_key.clone(), Value::String(next.clone()));
                format!("memory.{} = {:?}", mem_key, next)
            }
        }
    }

    fn dump_state(&mut self) {
        self.line(0, "Final state:");
        let personality = self.ctx.character.personality.clone();
        let scenario = self.ctx.character.scenario.clone();
        let example_dialogs = self.ctx.character.example_dialogs.clone();
        let memory = serde_json::to_string(&self.ctx.character.memory).unwrap_or_default();
        self.line(1, format!("personality: {:?}", personality));
        self.line(1, format!("scenario: {:?}", scenario));
        self.line(1, format!("example_dialogs: {:?}", example_dialogs));
        self.line(1, format!("memory: {}", memory));
    }
}

/// Run blocks against `ctx`, mutating it through executed actions
pub fn run_chain<R: Rng>(
    blocks: &[Block],
    ctx: &mut Context,
    input: &ChainInput,
    rng: &mut R,
) -> ChainRun {
    let mut derived = derive_list_counts(ctx, &input.lists, input.window);
    derived.extend(input.derived.iter().map(|(k, v)| (k.clone(), *v)));

    let mut runner = Runner {
        ctx,
        input,
        derived,
        rng,
        gate: 0,
        log: Vec::new(),
    };
    let mut outcomes = Vec::with_capacity(blocks.len());

    let mut in_chain = false;
    let mut chain_taken = false;
    let mut chain_has_else = false;

    for (index, block) in blocks.iter().enumerate() {
        let (eligible, why) = match block.kind {
            BlockType::If => {
                in_chain = true;
                chain_taken = false;
                chain_has_else = false;
                (true, "")
            }
            BlockType::Elseif if !in_chain => (false, " (no open chain)"),
            BlockType::Elseif if chain_taken => (false, " (chain already taken)"),
            BlockType::Elseif => (true, ""),
            BlockType::Else if !in_chain => (false, " (no open chain)"),
            BlockType::Else => {
                let seen_else = chain_has_else;
                chain_has_else = true;
                if seen_else {
                    (false, " (chain already has an else)")
                } else if chain_taken {
                    (false, " (chain already taken)")
                } else {
                    (true, "")
                }
            }
        };

        runner.line(
            0,
            format!(
                "Block {} [{}] {:?}: eligible={}{}",
                index + 1,
                block.kind,
                block.display_label(),
                eligible,
                why
            ),
        );

        let condition = if eligible && block.kind != BlockType::Else {
            let ok = runner.eval_nodes(block.join, &block.conditions, 1);
            runner.line(1, format!("condition {} -> {}", block.join, pass(ok)));
            Some(ok)
        } else {
            None
        };

        let executed = eligible && condition.unwrap_or(true);
        runner.line(1, format!("exec={}", executed));
        if executed {
            chain_taken = true;
            for action in &block.actions {
                let summary = runner.apply(action);
                runner.line(2, format!("{}: {}", action.type_name(), summary));
            }
        }
        debug!(block = %block.id, eligible, executed, "block evaluated");

        outcomes.push(BlockOutcome {
            block_id: block.id.clone(),
            kind: block.kind,
            eligible,
            condition,
            executed,
        });
    }

    runner.dump_state();
    ChainRun {
        outcomes,
        log: runner.log,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{GroupJoin, TextTarget};
    use pretty_assertions::assert_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn count_is(value: f64) -> ConditionNode {
        ConditionNode::cond(Condition::MessageCountComparison {
            op: crate::reasons::CompareOp::Eq,
            value,
        })
    }

    fn lists() -> BTreeMap<String, Vec<String>> {
        BTreeMap::from([(
            "sweets".to_string(),
            vec!["cake".to_string(), "ice cream".to_string()],
        )])
    }

    fn run(blocks: &[Block], ctx: &mut Context) -> ChainRun {
        let mut rng = StdRng::seed_from_u64(7);
        run_chain(blocks, ctx, &ChainInput::new(lists()), &mut rng)
    }

    #[test]
    fn test_gate_numbering_is_global() {
        let blocks = vec![
            Block::new("a", BlockType::If)
                .with_condition(count_is(0.0))
                .with_condition(count_is(1.0)),
            Block::new("b", BlockType::If).with_condition(count_is(0.0)),
        ];
        let run = run(&blocks, &mut Context::default());
        let gates: Vec<_> = run
            .log
            .iter()
            .filter_map(|l| l.trim_start().strip_prefix("Gate "))
            .map(|l| l.split(':').next().unwrap().to_string())
            .collect();
        assert_eq!(gates, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_group_id_does_not_split_chains() {
        let mut first = Block::new("a", BlockType::If).with_condition(count_is(0.0));
        first.group_id = Some("weather".into());
        let mut second = Block::new("b", BlockType::Else)
            .with_action(Action::AppendScenario { text: "else ran".into() });
        second.group_id = Some("food".into());
        let mut ctx = Context::default();
        let run = run(&[first, second], &mut ctx);
        assert_eq!(run.executed_ids(), vec!["a"]);
        assert_eq!(ctx.character.scenario, "");
    }

    #[test]
    fn test_empty_groups_pass() {
        let blocks = vec![Block::new("a", BlockType::If)
            .with_condition(ConditionNode::group(GroupJoin::Or, false, vec![]))
            .with_action(Action::AppendScenario { text: "ran".into() })];
        let mut ctx = Context::default();
        run(&blocks, &mut ctx);
        assert_eq!(ctx.character.scenario, "ran");
    }

    #[test]
    fn test_group_not_applies_after_join() {
        let blocks = vec![Block::new("a", BlockType::If).with_condition(ConditionNode::group(
            GroupJoin::Or,
            true,
            vec![count_is(0.0), count_is(5.0)],
        ))];
        let run = run(&blocks, &mut Context::default());
        assert_eq!(run.outcomes[0].condition, Some(false));
    }

    #[test]
    fn test_list_conditions_match_whole_words() {
        let mut ctx = Context::with_messages(["cupcake", "I love ICE CREAM!"]);
        let blocks = vec![
            Block::new("a", BlockType::If).with_condition(ConditionNode::cond(Condition::AnyInList {
                list_id: "sweets".into(),
            })),
            Block::new("b", BlockType::If).with_condition(ConditionNode::cond(
                Condition::CountInHistory {
                    list_id: "sweets".into(),
                    window: Some(2),
                    op: crate::reasons::CompareOp::Eq,
                    value: 1.0,
                },
            )),
            Block::new("c", BlockType::If).with_condition(ConditionNode::cond(
                Condition::DerivedNumberComparison {
                    key: "count.sweets".into(),
                    op: crate::reasons::CompareOp::Eq,
                    value: 1.0,
                },
            )),
        ];
        let run = run(&blocks, &mut ctx);
        assert_eq!(run.executed_ids(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_memory_actions() {
        let blocks = vec![Block::new("a", BlockType::If)
            .with_action(Action::MemoryNumeric {
                mem_key: "mood".into(),
                mode: NumericMode::Inc,
                value: None,
                text: Some("2".into()),
            })
            .with_action(Action::MemoryNumeric {
                mem_key: "mood".into(),
                mode: NumericMode::Dec,
                value: Some(0.5),
                text: None,
            })
            .with_action(Action::MemoryString {
                mem_key: "note".into(),
                mode: StringMode::Append,
                text: "met".into(),
            })];
        let mut ctx = Context::default();
        ctx.character
            .memory
            .insert("note".into(), Value::String("hello".into()));
        run(&blocks, &mut ctx);
        assert_eq!(ctx.character.memory["mood"], serde_json::json!(1.5));
        assert_eq!(ctx.character.memory["note"], serde_json::json!("hello\n\nmet"));
    }

    #[test]
    fn test_random_list_pick_is_seeded() {
        let blocks = vec![Block::new("a", BlockType::If).with_action(Action::AppendRandomFromList {
            list_id: "sweets".into(),
            target: TextTarget::ExampleDialogs,
        })];
        let mut first = Context::default();
        let mut second = Context::default();
        run(&blocks, &mut first);
        run(&blocks, &mut second);
        assert!(!first.character.example_dialogs.is_empty());
        assert_eq!(first.character.example_dialogs, second.character.example_dialogs);
    }

    #[test]
    fn test_final_state_dump() {
        let blocks = vec![Block::new("a", BlockType::If)
            .with_action(Action::AppendPersonality { text: "Kind.".into() })];
        let run = run(&blocks, &mut Context::default());
        let text = run.trace_text();
        assert!(text.contains("Final state:"));
        assert!(text.contains("personality: \"Kind.\""));
        assert!(text.ends_with("memory: {}"));
    }
}
