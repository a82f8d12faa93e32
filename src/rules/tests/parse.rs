use super::rule_row;
use crate::rules::*;
use crate::types::{ItemStatus, TagId};
use serde_json::json;

#[test]
fn test_grouped_shape_parses() {
    let row = rule_row(
        Some(json!({
            "groups": [
                {
                    "conditions": [
                        {"type": "PROGRESS", "operator": "gte", "value": 1.0},
                        {"type": "SEEDS", "operator": "gt", "value": 5}
                    ],
                    "logicOperator": "and"
                },
                {
                    "conditions": [{"type": "RATIO", "operator": "gt", "value": 2.0}],
                    "logicOperator": "or"
                }
            ],
            "logicOperator": "or"
        })),
        None,
        json!({"type": "stop_seeding"}),
    );

    let rule = Rule::from_row(&row);
    assert_eq!(rule.groups.len(), 2);
    assert_eq!(rule.group_op, LogicOp::Or);
    assert_eq!(rule.groups[0].op, LogicOp::And);
    assert_eq!(rule.groups[0].conditions.len(), 2);
    assert_eq!(rule.groups[1].op, LogicOp::Or);
    assert!(!rule.matches_all);
    assert_eq!(rule.action, Some(Action::StopSeeding));
}

#[test]
fn test_legacy_flat_shape_becomes_single_group() {
    let row = rule_row(
        Some(json!({
            "conditions": [{"type": "AGE", "operator": "gt", "value": 72}],
            "logicOperator": "or"
        })),
        None,
        json!({"type": "delete"}),
    );

    let rule = Rule::from_row(&row);
    assert_eq!(rule.groups.len(), 1);
    // The migrated group keeps the flat operator; the rule level is `and`
    assert_eq!(rule.groups[0].op, LogicOp::Or);
    assert_eq!(rule.group_op, LogicOp::And);
    assert!(!rule.matches_all);
}

#[test]
fn test_legacy_flat_with_zero_conditions_matches_all() {
    let row = rule_row(
        Some(json!({"conditions": [], "logicOperator": "and"})),
        None,
        json!({"type": "delete"}),
    );

    let rule = Rule::from_row(&row);
    assert!(rule.matches_all);
    assert!(rule.groups.is_empty());
}

#[test]
fn test_bare_array_is_legacy_flat() {
    let row = rule_row(
        Some(json!([{"type": "SEEDS", "operator": "eq", "value": 0}])),
        None,
        json!({"type": "delete"}),
    );

    let rule = Rule::from_row(&row);
    assert_eq!(rule.groups.len(), 1);
    assert_eq!(rule.groups[0].conditions.len(), 1);
}

#[test]
fn test_grouped_shape_with_no_groups_matches_none() {
    let row = rule_row(
        Some(json!({"groups": [], "logicOperator": "and"})),
        None,
        json!({"type": "delete"}),
    );

    let rule = Rule::from_row(&row);
    assert!(rule.groups.is_empty());
    assert!(!rule.matches_all);
}

#[test]
fn test_missing_conditions_column() {
    let row = rule_row(None, None, json!({"type": "delete"}));
    let rule = Rule::from_row(&row);
    assert!(rule.groups.is_empty());
    assert!(!rule.matches_all);
}

#[test]
fn test_unknown_type_and_missing_operator_degrade_to_invalid() {
    let row = rule_row(
        Some(json!({
            "conditions": [
                {"type": "WOMBAT", "operator": "gt", "value": 1},
                {"type": "SEEDS", "value": 1},
                {"type": "SEEDS", "operator": "between", "value": 1},
                {"type": "SEEDS", "operator": "gt", "value": "not-a-number"}
            ],
            "logicOperator": "and"
        })),
        None,
        json!({"type": "delete"}),
    );

    let rule = Rule::from_row(&row);
    let conditions = &rule.groups[0].conditions;
    assert_eq!(conditions.len(), 4);
    assert!(conditions
        .iter()
        .all(|c| matches!(c, Condition::Invalid { .. })));
}

#[test]
fn test_numeric_value_accepts_numeric_string() {
    let row = rule_row(
        Some(json!({
            "conditions": [{"type": "SEEDS", "operator": "gt", "value": "5"}],
            "logicOperator": "and"
        })),
        None,
        json!({"type": "delete"}),
    );

    let rule = Rule::from_row(&row);
    assert_eq!(
        rule.groups[0].conditions[0],
        Condition::Numeric {
            field: NumericField::Seeds,
            op: CompareOp::Gt,
            value: 5.0,
            hours: 1.0,
        }
    );
}

#[test]
fn test_avg_speed_carries_hours() {
    let row = rule_row(
        Some(json!({
            "conditions": [
                {"type": "AVG_DOWNLOAD_SPEED", "operator": "lt", "value": 0.5, "hours": 6}
            ],
            "logicOperator": "and"
        })),
        None,
        json!({"type": "delete"}),
    );

    let rule = Rule::from_row(&row);
    let condition = &rule.groups[0].conditions[0];
    assert_eq!(condition.speed_window_hours(), Some(6.0));
}

#[test]
fn test_status_condition_drops_unknown_labels() {
    let row = rule_row(
        Some(json!({
            "conditions": [
                {"type": "STATUS", "operator": "is_any_of", "value": ["seeding", "paused", "stalled"]}
            ],
            "logicOperator": "and"
        })),
        None,
        json!({"type": "delete"}),
    );

    let rule = Rule::from_row(&row);
    assert_eq!(
        rule.groups[0].conditions[0],
        Condition::Status {
            op: SetOp::AnyOf,
            statuses: vec![ItemStatus::Seeding, ItemStatus::Stalled],
        }
    );
}

#[test]
fn test_tags_condition_accepts_synonym_operators() {
    for (op_name, expected) in [
        ("has_any", SetOp::AnyOf),
        ("is_any_of", SetOp::AnyOf),
        ("has_all", SetOp::AllOf),
        ("is_all_of", SetOp::AllOf),
        ("has_none", SetOp::NoneOf),
        ("is_none_of", SetOp::NoneOf),
    ] {
        let row = rule_row(
            Some(json!({
                "conditions": [{"type": "TAGS", "operator": op_name, "value": [1, "2"]}],
                "logicOperator": "and"
            })),
            None,
            json!({"type": "delete"}),
        );
        let rule = Rule::from_row(&row);
        assert_eq!(
            rule.groups[0].conditions[0],
            Condition::Tags {
                op: expected,
                tags: vec![TagId(1), TagId(2)],
            },
            "operator {op_name}"
        );
    }
}

#[test]
fn test_bool_condition_shapes() {
    let cases = [
        (json!({"type": "PRIVATE", "operator": "is_true"}), true),
        (json!({"type": "PRIVATE", "operator": "is_false"}), false),
        (json!({"type": "PRIVATE", "operator": "eq", "value": "true"}), true),
        (json!({"type": "PRIVATE", "operator": "eq", "value": 0}), false),
        (json!({"type": "PRIVATE", "operator": "not_equals", "value": true}), false),
        (json!({"type": "PRIVATE", "value": 1}), true),
    ];

    for (raw, expect) in cases {
        let row = rule_row(
            Some(json!({"conditions": [raw.clone()], "logicOperator": "and"})),
            None,
            json!({"type": "delete"}),
        );
        let rule = Rule::from_row(&row);
        assert_eq!(
            rule.groups[0].conditions[0],
            Condition::Bool {
                field: BoolField::Private,
                expect,
            },
            "shape {raw}"
        );
    }
}

#[test]
fn test_bool_numeric_compare() {
    let row = rule_row(
        Some(json!({
            "conditions": [{"type": "IS_ACTIVE", "operator": "gt", "value": 0}],
            "logicOperator": "and"
        })),
        None,
        json!({"type": "delete"}),
    );

    let rule = Rule::from_row(&row);
    assert_eq!(
        rule.groups[0].conditions[0],
        Condition::BoolNumeric {
            field: BoolField::IsActive,
            op: CompareOp::Gt,
            value: 0.0,
        }
    );
}

#[test]
fn test_trigger_parse_and_floor() {
    let row = rule_row(
        None,
        Some(json!({"type": "interval", "value": 0.25})),
        json!({"type": "delete"}),
    );
    let rule = Rule::from_row(&row);
    assert_eq!(rule.trigger, Some(Trigger { interval_minutes: 1.0 }));

    let row = rule_row(
        None,
        Some(json!({"type": "interval", "value": 30})),
        json!({"type": "delete"}),
    );
    let rule = Rule::from_row(&row);
    assert_eq!(rule.trigger, Some(Trigger { interval_minutes: 30.0 }));

    // Unknown trigger types mean "evaluate every cycle"
    let row = rule_row(
        None,
        Some(json!({"type": "cron", "value": "* * * * *"})),
        json!({"type": "delete"}),
    );
    assert!(Rule::from_row(&row).trigger.is_none());
}

#[test]
fn test_action_parse_all_kinds() {
    let cases = [
        (json!({"type": "stop_seeding"}), Action::StopSeeding),
        (json!({"type": "delete"}), Action::Delete),
        (json!({"type": "archive"}), Action::Archive),
        (json!({"type": "force_start"}), Action::ForceStart),
        (
            json!({"type": "add_tag", "tagIds": [1, 2]}),
            Action::AddTag(vec![TagId(1), TagId(2)]),
        ),
        (
            json!({"type": "remove_tag", "tag_ids": [3]}),
            Action::RemoveTag(vec![TagId(3)]),
        ),
    ];

    for (raw, expected) in cases {
        let rule = Rule::from_row(&rule_row(None, None, raw.clone()));
        assert_eq!(rule.action, Some(expected), "action {raw}");
    }
}

#[test]
fn test_invalid_actions_become_none() {
    for raw in [
        json!({"type": "add_tag"}),
        json!({"type": "add_tag", "tagIds": []}),
        json!({"type": "explode"}),
        json!({"no_type": true}),
    ] {
        let rule = Rule::from_row(&rule_row(None, None, raw.clone()));
        assert_eq!(rule.action, None, "action {raw}");
    }
}
