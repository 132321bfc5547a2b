//! Tests for rule validation - structural errors and suspicious patterns

use ruleforge::*;
use rstest::rstest;

fn validate_json(json: &str) -> SetValidation {
    let set = RuleSet::from_json(json).unwrap();
    validate_rules(&set.rules)
}

#[test]
fn test_validate_clean_set() {
    let report = validate_json(
        r#"[{
            "id": "cake",
            "targets": ["inject.pre"],
            "when": {"type": "termHit", "source": "lastUser.norm", "term": "cake", "mode": "word"},
            "effects": {"inject.pre": "Loves cake."}
        }]"#,
    );
    assert!(report.is_valid());
    assert_eq!(report.error_count(), 0);
    assert_eq!(report.warning_count(), 0);
    assert!(report.to_report("rules.json").contains("valid"));
}

#[rstest]
#[case::missing_id(r#"{"when": {"type": "and"}, "effects": {"a": "x"}, "targets": ["a"]}"#, "E001", "id")]
#[case::missing_when(r#"{"id": "r", "effects": {"a": "x"}, "targets": ["a"]}"#, "E002", "when")]
#[case::unknown_type(r#"{"id": "r", "when": {"type": "vibes"}}"#, "E003", "when.type")]
#[case::untyped_node(r#"{"id": "r", "when": {"source": "x"}}"#, "E003", "when")]
#[case::terms_not_array(r#"{"id": "r", "when": {"type": "anyTerms", "source": "s", "terms": "cake"}}"#, "E004", "when.terms")]
#[case::missing_source(r#"{"id": "r", "when": {"type": "termHit", "term": "cake"}}"#, "E004", "when.source")]
#[case::text_priority(r#"{"id": "r", "priority": "high", "when": {"type": "and"}}"#, "E005", "priority")]
#[case::bad_regex(r#"{"id": "r", "when": {"type": "regexHit", "source": "s", "pattern": "[a-"}}"#, "E007", "when.pattern")]
#[case::bad_regex_flag(r#"{"id": "r", "when": {"type": "regexHit", "source": "s", "pattern": "a", "flags": "q"}}"#, "E007", "when.pattern")]
#[case::write_without_target(r#"{"id": "r", "when": {"type": "and"}, "write": {"value": "x"}}"#, "E008", "write")]
fn test_error_codes(#[case] rule: &str, #[case] code: &str, #[case] path: &str) {
    let report = validate_json(&format!("[{}]", rule));
    assert!(!report.is_valid(), "expected {} for {}", code, rule);
    let issue = report
        .errors
        .iter()
        .find(|i| i.code == code)
        .unwrap_or_else(|| panic!("missing {} in {:?}", code, report.errors));
    assert_eq!(issue.path, path);
}

#[rstest]
#[case::effect_not_declared(r#"{"id": "r", "when": {"type": "and"}, "effects": {"inject.pre": "x"}}"#, "W001")]
#[case::empty_effects(r#"{"id": "r", "when": {"type": "and"}, "effects": {}}"#, "W002")]
#[case::multi_word_in_word_mode(r#"{"id": "r", "when": {"type": "termHit", "source": "s", "term": "ice cream", "mode": "word"}}"#, "W003")]
#[case::min_over_window(r#"{"id": "r", "when": {"type": "countInWindow", "source": "s", "terms": ["a"], "window": 2, "min": 3}}"#, "W004")]
#[case::no_impact(r#"{"id": "r", "when": {"type": "and"}}"#, "W005")]
#[case::zero_window(r#"{"id": "r", "when": {"type": "countInWindow", "source": "s", "terms": ["a"], "window": 0}}"#, "W006")]
#[case::empty_phrase(r#"{"id": "r", "when": {"type": "phraseHit", "source": "s", "phrase": ""}}"#, "W007")]
#[case::all_terms_empty(r#"{"id": "r", "when": {"type": "allTerms", "source": "s", "terms": []}}"#, "W008")]
#[case::not_without_child(r#"{"id": "r", "when": {"type": "not"}}"#, "W009")]
fn test_warning_codes(#[case] rule: &str, #[case] code: &str) {
    let report = validate_json(&format!("[{}]", rule));
    assert!(report.is_valid(), "warnings must not invalidate: {:?}", report.errors);
    assert!(
        report.warnings.iter().any(|i| i.code == code),
        "missing {} in {:?}",
        code,
        report.warnings
    );
}

#[test]
fn test_collects_every_issue_across_rules() {
    let report = validate_json(
        r#"[
            {"id": "dup", "when": {"type": "or", "children": [
                {"type": "nope"},
                {"type": "and", "children": [{"type": "allTerms", "source": "s", "terms": 5}]}
            ]}, "effects": {"a": "x"}, "targets": ["a"]},
            {"id": "dup", "priority": [], "effects": {"a": "x"}, "targets": ["a"]}
        ]"#,
    );
    let codes: Vec<&str> = report.errors.iter().map(|i| i.code.as_str()).collect();
    assert_eq!(codes, vec!["E003", "E004", "E005", "E002", "E006"]);
    assert_eq!(report.errors[1].path, "when.children[1].children[0].terms");
    assert_eq!(report.by_rule.len(), 1);
    assert_eq!(report.by_rule["dup"].errors.len(), 5);
}

#[test]
fn test_rules_without_ids_are_keyed_by_index() {
    let report = validate_json(r#"[{"when": {"type": "and"}}, {"when": {"type": "and"}}]"#);
    assert!(report.by_rule.contains_key("#0"));
    assert!(report.by_rule.contains_key("#1"));
    assert!(!report.has_code("E006"));
}

#[test]
fn test_issues_serialize_for_tooling() {
    let report = validate_json(r#"[{"id": "r"}]"#);
    let json = serde_json::to_value(&report).unwrap();
    let issue = &json["errors"][0];
    assert_eq!(issue["severity"], "error");
    assert_eq!(issue["code"], "E002");
    assert_eq!(issue["ruleId"], "r");
    assert!(json["byRule"]["r"].is_object());
}
