//! Automation rules: model, validation, and evaluation.
//!
//! Rules are stored as JSON columns on `automation_rules` and validated here
//! at load time into tagged condition variants, so the evaluation hot path
//! is a branch on the tag with no re-parsing. The stored JSON is never
//! rewritten; legacy payload shapes keep round-tripping untouched.
//!
//! Two condition payload shapes exist in the wild:
//!
//! - Grouped: `{"groups": [{"conditions": [...], "logicOperator": "and"},
//!   ...], "logicOperator": "or"}`
//! - Legacy flat: `{"conditions": [...], "logicOperator": "and"}` (or a bare
//!   array), migrated on load into a single group under an `and` rule
//!   operator.
//!
//! A malformed condition never fails the rule or the cycle: it degrades to a
//! never-matching condition and a once-per-shape warning.

mod evaluator;

pub use evaluator::{Evaluation, RuleEvaluator};

use crate::db::RuleRow;
use crate::types::{ItemStatus, RuleId, TagId, truthy_str};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};

/// Numeric comparison operators
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    /// Strictly greater
    Gt,
    /// Strictly less
    Lt,
    /// Greater or equal
    Gte,
    /// Less or equal
    Lte,
    /// Equal
    Eq,
}

impl CompareOp {
    fn parse(op: &str) -> Option<Self> {
        match op {
            "gt" => Some(CompareOp::Gt),
            "lt" => Some(CompareOp::Lt),
            "gte" => Some(CompareOp::Gte),
            "lte" => Some(CompareOp::Lte),
            "eq" | "equals" => Some(CompareOp::Eq),
            _ => None,
        }
    }

    /// Apply the comparison
    pub fn compare(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            CompareOp::Gt => lhs > rhs,
            CompareOp::Lt => lhs < rhs,
            CompareOp::Gte => lhs >= rhs,
            CompareOp::Lte => lhs <= rhs,
            CompareOp::Eq => lhs == rhs,
        }
    }

    /// Whether a missing "time since" source should match: only `gt`/`gte`
    /// treat null as infinitely large
    pub fn matches_infinity(&self) -> bool {
        matches!(self, CompareOp::Gt | CompareOp::Gte)
    }
}

/// String comparison operators (case-insensitive)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextOp {
    /// Substring present
    Contains,
    /// Substring absent
    NotContains,
    /// Exact match
    Equals,
    /// Exact mismatch
    NotEquals,
    /// Prefix match
    StartsWith,
    /// Suffix match
    EndsWith,
}

impl TextOp {
    fn parse(op: &str) -> Option<Self> {
        match op {
            "contains" => Some(TextOp::Contains),
            "not_contains" => Some(TextOp::NotContains),
            "equals" | "eq" => Some(TextOp::Equals),
            "not_equals" | "neq" => Some(TextOp::NotEquals),
            "starts_with" => Some(TextOp::StartsWith),
            "ends_with" => Some(TextOp::EndsWith),
            _ => None,
        }
    }

    /// Apply the comparison; both sides must already be lowercased
    pub fn compare(&self, haystack: &str, needle: &str) -> bool {
        match self {
            TextOp::Contains => haystack.contains(needle),
            TextOp::NotContains => !haystack.contains(needle),
            TextOp::Equals => haystack == needle,
            TextOp::NotEquals => haystack != needle,
            TextOp::StartsWith => haystack.starts_with(needle),
            TextOp::EndsWith => haystack.ends_with(needle),
        }
    }
}

/// Set membership operators for `STATUS` and `TAGS`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetOp {
    /// At least one listed value matches
    AnyOf,
    /// Every listed value matches
    AllOf,
    /// No listed value matches
    NoneOf,
}

impl SetOp {
    fn parse(op: &str) -> Option<Self> {
        match op {
            "is_any_of" | "has_any" => Some(SetOp::AnyOf),
            "is_all_of" | "has_all" => Some(SetOp::AllOf),
            "is_none_of" | "has_none" => Some(SetOp::NoneOf),
            _ => None,
        }
    }
}

/// Item fields compared numerically. Unit conversion happens in the
/// evaluator; the variants carry the semantic, not the unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum NumericField {
    SeedingTime,
    Age,
    LastDownloadActivity,
    LastUploadActivity,
    Progress,
    DownloadSpeed,
    UploadSpeed,
    AvgDownloadSpeed,
    AvgUploadSpeed,
    Eta,
    DownloadStalledTime,
    UploadStalledTime,
    Seeds,
    Peers,
    Ratio,
    TotalUploaded,
    TotalDownloaded,
    FileSize,
    FileCount,
    Availability,
    ExpiresAt,
}

/// Item fields compared as strings
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum TextField {
    Name,
    Tracker,
}

/// Item fields compared as booleans
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum BoolField {
    Private,
    Cached,
    AllowZip,
    IsActive,
    SeedingEnabled,
    LongTermSeeding,
}

/// One validated condition, tagged by payload shape
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    /// Numeric field against a scalar threshold
    Numeric {
        /// Which field
        field: NumericField,
        /// Comparison operator
        op: CompareOp,
        /// Threshold in the field's comparison unit
        value: f64,
        /// Trailing window in hours (average-speed fields only)
        hours: f64,
    },
    /// String field against a pattern
    Text {
        /// Which field
        field: TextField,
        /// String operator
        op: TextOp,
        /// Pattern, stored lowercased
        value: String,
    },
    /// Boolean field against an expected value
    Bool {
        /// Which field
        field: BoolField,
        /// Expected value
        expect: bool,
    },
    /// Boolean field compared numerically as 0/1
    BoolNumeric {
        /// Which field
        field: BoolField,
        /// Comparison operator
        op: CompareOp,
        /// Threshold
        value: f64,
    },
    /// Classified status against a list of labels
    Status {
        /// Set operator
        op: SetOp,
        /// Listed statuses
        statuses: Vec<ItemStatus>,
    },
    /// Assigned tags against a list of tag ids
    Tags {
        /// Set operator
        op: SetOp,
        /// Listed tag ids
        tags: Vec<TagId>,
    },
    /// Failed validation; never matches
    Invalid {
        /// What was wrong, for the once-per-shape warning
        reason: String,
    },
}

impl Condition {
    /// Whether this condition reads tag assignments
    pub fn needs_tags(&self) -> bool {
        matches!(self, Condition::Tags { .. })
    }

    /// The speed-history window this condition needs, in hours
    pub fn speed_window_hours(&self) -> Option<f64> {
        match self {
            Condition::Numeric {
                field: NumericField::AvgDownloadSpeed | NumericField::AvgUploadSpeed,
                hours,
                ..
            } => Some(*hours),
            _ => None,
        }
    }
}

/// Operator combining conditions within a group, or groups within a rule
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogicOp {
    /// All must match
    #[default]
    And,
    /// At least one must match
    Or,
}

impl LogicOp {
    fn parse(op: &str) -> Self {
        if op.eq_ignore_ascii_case("or") {
            LogicOp::Or
        } else {
            LogicOp::And
        }
    }
}

/// An ordered group of conditions combined with one operator
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConditionGroup {
    /// The group's conditions
    pub conditions: Vec<Condition>,
    /// How the conditions combine
    pub op: LogicOp,
}

/// Interval trigger: the rule may not be evaluated more often than this
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Trigger {
    /// Minimum minutes between evaluations (floored at 1)
    pub interval_minutes: f64,
}

/// Side effect applied to every matched item
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Stop seeding via the external API
    StopSeeding,
    /// Delete from the external service
    Delete,
    /// Record locally, then delete from the external service
    Archive,
    /// Force a start via the external API
    ForceStart,
    /// Assign tags locally
    AddTag(Vec<TagId>),
    /// Unassign tags locally
    RemoveTag(Vec<TagId>),
}

impl Action {
    /// Wire/storage name of the action type
    pub fn kind(&self) -> &'static str {
        match self {
            Action::StopSeeding => "stop_seeding",
            Action::Delete => "delete",
            Action::Archive => "archive",
            Action::ForceStart => "force_start",
            Action::AddTag(_) => "add_tag",
            Action::RemoveTag(_) => "remove_tag",
        }
    }
}

/// A validated automation rule, ready for evaluation
#[derive(Clone, Debug)]
pub struct Rule {
    /// Storage id
    pub id: RuleId,
    /// Human-readable name
    pub name: String,
    /// Whether the rule is evaluated at all
    pub enabled: bool,
    /// Optional interval trigger
    pub trigger: Option<Trigger>,
    /// Condition groups
    pub groups: Vec<ConditionGroup>,
    /// How the groups combine
    pub group_op: LogicOp,
    /// The rule's action; `None` when the stored action config is invalid
    pub action: Option<Action>,
    /// Legacy flat rule with zero conditions: matches every item
    pub matches_all: bool,
    /// When the rule was last evaluated
    pub last_evaluated_at: Option<DateTime<Utc>>,
}

impl Rule {
    /// Validate a stored row into an evaluable rule.
    ///
    /// Never fails: malformed pieces degrade (conditions to never-match,
    /// the action to `None`) with a once-per-shape warning.
    pub fn from_row(row: &RuleRow) -> Self {
        let trigger = row
            .trigger_config
            .as_deref()
            .and_then(|raw| parse_trigger(raw, row.id));

        let (groups, group_op, matches_all) = row
            .conditions
            .as_deref()
            .map(|raw| parse_conditions(raw, row.id))
            .unwrap_or((Vec::new(), LogicOp::And, false));

        let action = row
            .action_config
            .as_deref()
            .and_then(|raw| parse_action(raw, row.id));

        Self {
            id: row.id,
            name: row.name.clone(),
            enabled: row.enabled != 0,
            trigger,
            groups,
            group_op,
            action,
            matches_all,
            last_evaluated_at: row.last_evaluated_at(),
        }
    }

    /// All conditions across all groups
    pub fn conditions(&self) -> impl Iterator<Item = &Condition> {
        self.groups.iter().flat_map(|group| group.conditions.iter())
    }
}

fn parse_trigger(raw: &str, rule_id: RuleId) -> Option<Trigger> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            warn_once(
                &format!("trigger:{raw}"),
                &format!("rule {rule_id}: unparseable trigger config: {e}"),
            );
            return None;
        }
    };

    if value.get("type").and_then(Value::as_str) != Some("interval") {
        return None;
    }

    let minutes = number_from(value.get("value"))?;
    Some(Trigger {
        interval_minutes: minutes.max(1.0),
    })
}

/// Parse the conditions column into groups. Returns
/// `(groups, group_op, matches_all)`.
fn parse_conditions(raw: &str, rule_id: RuleId) -> (Vec<ConditionGroup>, LogicOp, bool) {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            warn_once(
                &format!("conditions:{raw}"),
                &format!("rule {rule_id}: unparseable conditions: {e}"),
            );
            return (Vec::new(), LogicOp::And, false);
        }
    };

    // Grouped shape
    if let Some(groups_raw) = value.get("groups").and_then(Value::as_array) {
        let group_op = value
            .get("logicOperator")
            .and_then(Value::as_str)
            .map(LogicOp::parse)
            .unwrap_or_default();

        let groups = groups_raw
            .iter()
            .map(|group| {
                let op = group
                    .get("logicOperator")
                    .and_then(Value::as_str)
                    .map(LogicOp::parse)
                    .unwrap_or_default();
                let conditions = group
                    .get("conditions")
                    .and_then(Value::as_array)
                    .map(|list| list.iter().map(parse_condition).collect())
                    .unwrap_or_default();
                ConditionGroup { conditions, op }
            })
            .collect();

        return (groups, group_op, false);
    }

    // Legacy flat shape: conditions + operator at the rule level, migrated
    // into a single group. Zero conditions in this shape means "match all".
    let flat = value
        .get("conditions")
        .and_then(Value::as_array)
        .or_else(|| value.as_array());

    if let Some(list) = flat {
        if list.is_empty() {
            return (Vec::new(), LogicOp::And, true);
        }
        let op = value
            .get("logicOperator")
            .and_then(Value::as_str)
            .map(LogicOp::parse)
            .unwrap_or_default();
        let group = ConditionGroup {
            conditions: list.iter().map(parse_condition).collect(),
            op,
        };
        return (vec![group], LogicOp::And, false);
    }

    (Vec::new(), LogicOp::And, false)
}

fn parse_condition(raw: &Value) -> Condition {
    let Some(kind) = raw.get("type").and_then(Value::as_str) else {
        return invalid(raw, "condition has no type");
    };
    let kind = kind.to_ascii_uppercase();
    let operator = raw.get("operator").and_then(Value::as_str);
    let value = raw.get("value");

    if let Some(field) = numeric_field(&kind) {
        let Some(op) = operator.and_then(CompareOp::parse) else {
            return invalid(raw, "missing or unknown numeric operator");
        };
        let Some(threshold) = number_from(value) else {
            return invalid(raw, "numeric condition needs a scalar value");
        };
        let hours = number_from(raw.get("hours")).unwrap_or(1.0);
        return Condition::Numeric {
            field,
            op,
            value: threshold,
            hours,
        };
    }

    if let Some(field) = text_field(&kind) {
        let Some(op) = operator.and_then(TextOp::parse) else {
            return invalid(raw, "missing or unknown string operator");
        };
        let Some(pattern) = value.and_then(Value::as_str) else {
            return invalid(raw, "string condition needs a string value");
        };
        return Condition::Text {
            field,
            op,
            value: pattern.to_lowercase(),
        };
    }

    if let Some(field) = bool_field(&kind) {
        return parse_bool_condition(raw, field, operator, value);
    }

    if kind == "STATUS" {
        let Some(op) = operator.and_then(SetOp::parse) else {
            return invalid(raw, "missing or unknown status operator");
        };
        let Some(list) = value.and_then(Value::as_array) else {
            return invalid(raw, "STATUS needs a list value");
        };
        let statuses: Vec<ItemStatus> = list
            .iter()
            .filter_map(|entry| {
                let label = entry.as_str()?;
                let status = ItemStatus::parse(label);
                if status.is_none() {
                    warn_once(
                        &format!("status-label:{label}"),
                        &format!("ignoring unknown status label '{label}' in rule condition"),
                    );
                }
                status
            })
            .collect();
        if statuses.is_empty() {
            return invalid(raw, "STATUS list has no known labels");
        }
        return Condition::Status { op, statuses };
    }

    if kind == "TAGS" {
        let Some(op) = operator.and_then(SetOp::parse) else {
            return invalid(raw, "missing or unknown tags operator");
        };
        let Some(list) = value.and_then(Value::as_array) else {
            return invalid(raw, "TAGS needs a list value");
        };
        let tags: Vec<TagId> = list
            .iter()
            .filter_map(|entry| {
                entry
                    .as_i64()
                    .or_else(|| entry.as_str().and_then(|s| s.parse().ok()))
                    .map(TagId)
            })
            .collect();
        if tags.is_empty() {
            return invalid(raw, "TAGS list has no usable ids");
        }
        return Condition::Tags { op, tags };
    }

    invalid(raw, &format!("unknown condition type '{kind}'"))
}

fn parse_bool_condition(
    raw: &Value,
    field: BoolField,
    operator: Option<&str>,
    value: Option<&Value>,
) -> Condition {
    match operator {
        Some("is_true") => Condition::Bool { field, expect: true },
        Some("is_false") => Condition::Bool {
            field,
            expect: false,
        },
        Some("eq") | Some("equals") | None => {
            // Direct equality against a truthy-normalized value; a missing
            // operator with a present value is treated the same way
            let Some(value) = value else {
                return invalid(raw, "boolean condition needs a value or is_true/is_false");
            };
            Condition::Bool {
                field,
                expect: bool_from(value),
            }
        }
        Some("not_equals") | Some("neq") => {
            let Some(value) = value else {
                return invalid(raw, "boolean condition needs a value");
            };
            Condition::Bool {
                field,
                expect: !bool_from(value),
            }
        }
        Some(op) => {
            // Remaining numeric operators compare the flag as 0/1
            let Some(op) = CompareOp::parse(op) else {
                return invalid(raw, "unknown boolean operator");
            };
            let Some(threshold) = number_from(value) else {
                return invalid(raw, "numeric boolean compare needs a scalar value");
            };
            Condition::BoolNumeric {
                field,
                op,
                value: threshold,
            }
        }
    }
}

fn parse_action(raw: &str, rule_id: RuleId) -> Option<Action> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            warn_once(
                &format!("action:{raw}"),
                &format!("rule {rule_id}: unparseable action config: {e}"),
            );
            return None;
        }
    };

    let kind = value.get("type").and_then(Value::as_str)?;
    let tag_ids = || -> Option<Vec<TagId>> {
        let list = value
            .get("tagIds")
            .or_else(|| value.get("tag_ids"))
            .and_then(Value::as_array)?;
        let tags: Vec<TagId> = list
            .iter()
            .filter_map(|entry| {
                entry
                    .as_i64()
                    .or_else(|| entry.as_str().and_then(|s| s.parse().ok()))
                    .map(TagId)
            })
            .collect();
        (!tags.is_empty()).then_some(tags)
    };

    let action = match kind {
        "stop_seeding" => Action::StopSeeding,
        "delete" => Action::Delete,
        "archive" => Action::Archive,
        "force_start" => Action::ForceStart,
        "add_tag" => Action::AddTag(tag_ids()?),
        "remove_tag" => Action::RemoveTag(tag_ids()?),
        other => {
            warn_once(
                &format!("action-type:{other}"),
                &format!("rule {rule_id}: unknown action type '{other}'"),
            );
            return None;
        }
    };

    Some(action)
}

fn numeric_field(kind: &str) -> Option<NumericField> {
    match kind {
        "SEEDING_TIME" => Some(NumericField::SeedingTime),
        "AGE" => Some(NumericField::Age),
        "LAST_DOWNLOAD_ACTIVITY_AT" => Some(NumericField::LastDownloadActivity),
        "LAST_UPLOAD_ACTIVITY_AT" => Some(NumericField::LastUploadActivity),
        "PROGRESS" => Some(NumericField::Progress),
        "DOWNLOAD_SPEED" => Some(NumericField::DownloadSpeed),
        "UPLOAD_SPEED" => Some(NumericField::UploadSpeed),
        "AVG_DOWNLOAD_SPEED" => Some(NumericField::AvgDownloadSpeed),
        "AVG_UPLOAD_SPEED" => Some(NumericField::AvgUploadSpeed),
        "ETA" => Some(NumericField::Eta),
        "DOWNLOAD_STALLED_TIME" => Some(NumericField::DownloadStalledTime),
        "UPLOAD_STALLED_TIME" => Some(NumericField::UploadStalledTime),
        "SEEDS" => Some(NumericField::Seeds),
        "PEERS" => Some(NumericField::Peers),
        "RATIO" => Some(NumericField::Ratio),
        "TOTAL_UPLOADED" => Some(NumericField::TotalUploaded),
        "TOTAL_DOWNLOADED" => Some(NumericField::TotalDownloaded),
        "FILE_SIZE" => Some(NumericField::FileSize),
        "FILE_COUNT" => Some(NumericField::FileCount),
        "AVAILABILITY" => Some(NumericField::Availability),
        "EXPIRES_AT" => Some(NumericField::ExpiresAt),
        _ => None,
    }
}

fn text_field(kind: &str) -> Option<TextField> {
    match kind {
        "NAME" => Some(TextField::Name),
        "TRACKER" => Some(TextField::Tracker),
        _ => None,
    }
}

fn bool_field(kind: &str) -> Option<BoolField> {
    match kind {
        "PRIVATE" => Some(BoolField::Private),
        "CACHED" => Some(BoolField::Cached),
        "ALLOW_ZIP" => Some(BoolField::AllowZip),
        "IS_ACTIVE" => Some(BoolField::IsActive),
        "SEEDING_ENABLED" => Some(BoolField::SeedingEnabled),
        "LONG_TERM_SEEDING" => Some(BoolField::LongTermSeeding),
        _ => None,
    }
}

/// Scalar from a JSON number or numeric string
fn number_from(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Truthiness of a JSON value in a rule payload
fn bool_from(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(text) => truthy_str(text),
        _ => false,
    }
}

fn invalid(raw: &Value, reason: &str) -> Condition {
    warn_once(&format!("condition:{raw}"), &format!("{reason}: {raw}"));
    Condition::Invalid {
        reason: reason.to_string(),
    }
}

/// Log a validation warning at most once per unique shape, so a bad stored
/// rule does not spam the log every cycle
fn warn_once(key: &str, message: &str) {
    static SEEN: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    let seen = SEEN.get_or_init(|| Mutex::new(HashSet::new()));
    let mut guard = match seen.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if guard.insert(key.to_string()) {
        tracing::warn!("{message}");
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
