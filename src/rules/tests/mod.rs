mod parse;

use crate::db::RuleRow;
use crate::types::RuleId;
use serde_json::Value;

/// Build a raw rule row the way the storage layer would return it
pub(crate) fn rule_row(
    conditions: Option<Value>,
    trigger: Option<Value>,
    action: Value,
) -> RuleRow {
    RuleRow {
        id: RuleId(1),
        name: "test rule".to_string(),
        enabled: 1,
        trigger_config: trigger.map(|v| v.to_string()),
        conditions: conditions.map(|v| v.to_string()),
        action_config: Some(action.to_string()),
        metadata: None,
        last_executed_at: None,
        last_evaluated_at: None,
        execution_count: 0,
        created_at: "2026-08-01T00:00:00.000Z".to_string(),
        updated_at: "2026-08-01T00:00:00.000Z".to_string(),
    }
}
