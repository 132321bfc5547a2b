//! Block-chain runner: IF/ELSEIF/ELSE eligibility and trace structure

use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::SeedableRng;
use ruleforge::*;
use rstest::rstest;

/// A condition that is true exactly when the chat has `n` messages
fn messages_eq(n: f64) -> ConditionNode {
    ConditionNode::cond(Condition::MessageCountComparison {
        op: CompareOp::Eq,
        value: n,
    })
}

fn block(id: &str, kind: BlockType, condition: Option<bool>) -> Block {
    let mut b = Block::new(id, kind).with_action(Action::AppendScenario {
        text: format!("{} ran", id),
    });
    if let Some(pass) = condition {
        b = b.with_condition(messages_eq(if pass { 0.0 } else { 99.0 }));
    }
    b
}

fn run(blocks: &[Block], ctx: &mut Context) -> ChainRun {
    let mut rng = StdRng::seed_from_u64(1);
    run_chain(blocks, ctx, &ChainInput::default(), &mut rng)
}

#[test]
fn test_if_false_elseif_true_else() {
    let blocks = vec![
        block("a", BlockType::If, Some(false)),
        block("b", BlockType::Elseif, Some(true)),
        block("c", BlockType::Else, None),
    ];
    let mut ctx = Context::default();
    let run = run(&blocks, &mut ctx);

    assert_eq!(run.executed_ids(), vec!["b"]);
    let c = run.outcome("c").unwrap();
    assert!(!c.eligible);
    assert!(!c.executed);
    assert_eq!(ctx.character.scenario, "b ran");
}

#[test]
fn test_if_true_else() {
    let blocks = vec![
        block("a", BlockType::If, Some(true)),
        block("b", BlockType::Else, None),
    ];
    let mut ctx = Context::default();
    let run = run(&blocks, &mut ctx);

    assert_eq!(run.executed_ids(), vec!["a"]);
    assert!(!run.outcome("b").unwrap().eligible);
    assert_eq!(ctx.character.scenario, "a ran");
}

#[rstest]
#[case::else_runs_when_nothing_taken(vec![(BlockType::If, Some(false)), (BlockType::Else, None)], vec!["b1"])]
#[case::new_if_resets_chain(vec![(BlockType::If, Some(true)), (BlockType::If, Some(true)), (BlockType::Else, None)], vec!["b0", "b1"])]
#[case::orphan_elseif_ineligible(vec![(BlockType::Elseif, Some(true)), (BlockType::Else, None)], vec![])]
#[case::second_else_ineligible(vec![(BlockType::If, Some(false)), (BlockType::Else, None), (BlockType::Else, None)], vec!["b1"])]
#[case::first_true_elseif_wins(vec![(BlockType::If, Some(false)), (BlockType::Elseif, Some(true)), (BlockType::Elseif, Some(true))], vec!["b1"])]
fn test_chain_eligibility(
    #[case] shape: Vec<(BlockType, Option<bool>)>,
    #[case] expected: Vec<&str>,
) {
    let blocks: Vec<Block> = shape
        .into_iter()
        .enumerate()
        .map(|(i, (kind, cond))| block(&format!("b{}", i), kind, cond))
        .collect();
    let mut ctx = Context::default();
    let run = run(&blocks, &mut ctx);
    assert_eq!(run.executed_ids(), expected);
}

#[test]
fn test_trace_structure() {
    let blocks = vec![
        block("a", BlockType::If, Some(false)).with_label("Greeting"),
        block("b", BlockType::Elseif, Some(true)),
        block("c", BlockType::Else, None),
    ];
    let mut ctx = Context::default();
    let run = run(&blocks, &mut ctx);

    let block_lines: Vec<&String> = run.log.iter().filter(|l| l.starts_with("Block ")).collect();
    assert_eq!(block_lines.len(), 3);
    assert!(block_lines[0].starts_with("Block 1 [if] \"Greeting\": eligible=true"));
    assert!(block_lines[1].starts_with("Block 2 [elseif] \"b\": eligible=true"));
    assert!(block_lines[2].contains("eligible=false"));
    assert!(block_lines[2].contains("chain already taken"));

    let text = run.trace_text();
    let gate1 = text.find("Gate 1:").unwrap();
    let gate2 = text.find("Gate 2:").unwrap();
    assert!(gate1 < gate2);
    assert!(!text.contains("Gate 3:"));
    assert_eq!(text.matches("exec=true").count(), 1);

    let final_state = run.log.iter().position(|l| l == "Final state:").unwrap();
    assert_eq!(run.log.len() - final_state, 5);
    assert_eq!(run.log[final_state + 2], "  scenario: \"b ran\"");
}

#[test]
fn test_blocks_from_yaml_with_lists() {
    let set = BlockSet::from_yaml(
        r#"
lists:
  sweets: [cake, "ice cream"]
blocks:
  - id: sweet
    type: if
    join: OR
    conditions:
      - nodeType: cond
        type: anyInList
        listId: sweets
      - nodeType: cond
        type: memoryStringContains
        memKey: likes
        text: sugar
    actions:
      - type: appendPersonality
        text: Has a sweet tooth.
      - type: memoryNumeric
        memKey: sweet_count
        mode: inc
        value: 1
  - id: savory
    type: else
    actions:
      - type: memoryString
        memKey: likes
        mode: set
        text: salt
"#,
    )
    .unwrap();

    let mut ctx = Context::with_messages(["Any ice cream left?"]);
    let mut rng = StdRng::seed_from_u64(5);
    let run = run_chain(&set.blocks, &mut ctx, &ChainInput::new(set.lists.clone()), &mut rng);

    assert_eq!(run.executed_ids(), vec!["sweet"]);
    assert_eq!(ctx.character.personality, "Has a sweet tooth.");
    assert_eq!(ctx.character.memory["sweet_count"], serde_json::json!(1));
    assert!(!ctx.character.memory.contains_key("likes"));
}

#[test]
fn test_random_chance_bounds() {
    let blocks = vec![
        Block::new("never", BlockType::If)
            .with_condition(ConditionNode::cond(Condition::RandomChance { percent: 0.0 })),
        Block::new("always", BlockType::If)
            .with_condition(ConditionNode::cond(Condition::RandomChance { percent: 100.0 })),
    ];
    for seed in 0..20 {
        let mut rng = StdRng::seed_from_u64(seed);
        let run = run_chain(&blocks, &mut Context::default(), &ChainInput::default(), &mut rng);
        assert_eq!(run.executed_ids(), vec!["always"]);
    }
}

#[test]
fn test_negated_leaf_and_derived_override() {
    let blocks = vec![Block::new("calm", BlockType::If)
        .with_condition(ConditionNode::not_cond(Condition::DerivedNumberComparison {
            key: "anger".into(),
            op: CompareOp::Gt,
            value: 5.0,
        }))];
    let input = ChainInput::default().with_derived(Derived::from([("anger".to_string(), 2.0)]));
    let mut rng = StdRng::seed_from_u64(0);
    let run = run_chain(&blocks, &mut Context::default(), &input, &mut rng);
    assert_eq!(run.executed_ids(), vec!["calm"]);
    assert!(run.trace_text().contains("Gate 1: NOT derivedNumberComparison"));
}
