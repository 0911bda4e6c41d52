//! Condition-node branch configuration.
//!
//! A condition node stores one [`ConditionGroup`] per branch, keyed by the
//! branch's position in its branch-name list (`"0"`, `"1"`, ...). The last
//! branch of a multi-branch condition is the `Else` branch and never carries
//! a group of its own.

use crate::runtime::RuntimeContext;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub type BranchConfig = BTreeMap<String, ConditionGroup>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionGroup {
    pub id: String,
    pub logical_operator: LogicalOperator,
    #[serde(default)]
    pub children: Vec<ConditionItem>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConditionItem {
    Rule(ConditionRule),
    Group(ConditionGroup),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionRule {
    pub id: String,
    /// Either a literal or a `{{variable}}` reference.
    pub left: String,
    pub operator: Operator,
    #[serde(default)]
    pub right: String,
    #[serde(default)]
    pub data_type: DataType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    Contains,
    NotContains,
    IsEmpty,
    IsNotEmpty,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    #[default]
    String,
    Number,
    Boolean,
}

// ---------------------------------------------------------------------------
// Key shifting
// ---------------------------------------------------------------------------

/// Re-key a branch configuration after a branch was inserted at `index`.
/// Groups at `index` and beyond move one slot to the right.
pub fn shift_for_insert(config: &BranchConfig, index: usize) -> BranchConfig {
    config
        .iter()
        .map(|(key, group)| match key.parse::<usize>() {
            Ok(k) if k >= index => ((k + 1).to_string(), group.clone()),
            _ => (key.clone(), group.clone()),
        })
        .collect()
}

/// Re-key a branch configuration after the branch at `index` was removed.
/// The removed branch's group is dropped; later groups move one slot left.
pub fn shift_for_remove(config: &BranchConfig, index: usize) -> BranchConfig {
    config
        .iter()
        .filter_map(|(key, group)| match key.parse::<usize>() {
            Ok(k) if k == index => None,
            Ok(k) if k > index => Some(((k - 1).to_string(), group.clone())),
            _ => Some((key.clone(), group.clone())),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

impl ConditionGroup {
    pub fn new(id: impl Into<String>, logical_operator: LogicalOperator) -> Self {
        Self {
            id: id.into(),
            logical_operator,
            children: Vec::new(),
        }
    }

    /// Evaluate against the current runtime variables.
    ///
    /// An empty `AND` group is true, an empty `OR` group is false.
    pub fn evaluate(&self, ctx: &RuntimeContext) -> bool {
        let mut results = self.children.iter().map(|child| match child {
            ConditionItem::Rule(rule) => rule.evaluate(ctx),
            ConditionItem::Group(group) => group.evaluate(ctx),
        });
        match self.logical_operator {
            LogicalOperator::And => results.all(|r| r),
            LogicalOperator::Or => results.any(|r| r),
        }
    }
}

impl ConditionRule {
    pub fn evaluate(&self, ctx: &RuntimeContext) -> bool {
        let left = resolve_operand(&self.left, self.data_type, ctx);
        let right = resolve_operand(&self.right, self.data_type, ctx);
        evaluate_operator(self.operator, &left, &right)
    }
}

/// Pick the branch a condition node takes: the first branch whose group
/// evaluates true, else the trailing `Else` branch.
///
/// Returns `None` for a single-branch condition whose group is false.
pub fn select_branch(
    config: &BranchConfig,
    branch_count: usize,
    ctx: &RuntimeContext,
) -> Option<usize> {
    if branch_count == 0 {
        return None;
    }
    let guarded = if branch_count > 1 {
        branch_count - 1
    } else {
        branch_count
    };
    for index in 0..guarded {
        if config
            .get(&index.to_string())
            .is_some_and(|group| group.evaluate(ctx))
        {
            return Some(index);
        }
    }
    (branch_count > 1).then(|| branch_count - 1)
}

/// Resolve a rule operand: `{{name}}` reads a variable (missing → null),
/// anything else is a literal typed by `data_type`.
fn resolve_operand(raw: &str, data_type: DataType, ctx: &RuntimeContext) -> Value {
    let trimmed = raw.trim();
    if let Some(name) = trimmed
        .strip_prefix("{{")
        .and_then(|rest| rest.strip_suffix("}}"))
    {
        return ctx.get_variable(name.trim()).cloned().unwrap_or(Value::Null);
    }
    match data_type {
        DataType::String => Value::String(raw.to_string()),
        DataType::Number => trimmed
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(raw.to_string())),
        DataType::Boolean => match trimmed {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(raw.to_string()),
        },
    }
}

fn evaluate_operator(op: Operator, left: &Value, right: &Value) -> bool {
    match op {
        Operator::Equals => values_equal(left, right),
        Operator::NotEquals => !values_equal(left, right),
        Operator::GreaterThan => compare_numbers(left, right, |l, r| l > r),
        Operator::LessThan => compare_numbers(left, right, |l, r| l < r),
        Operator::GreaterThanOrEqual => compare_numbers(left, right, |l, r| l >= r),
        Operator::LessThanOrEqual => compare_numbers(left, right, |l, r| l <= r),
        Operator::Contains => string_contains(left, right),
        Operator::NotContains => !string_contains(left, right),
        Operator::IsEmpty => is_empty(left),
        Operator::IsNotEmpty => !is_empty(left),
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Equality with light coercion: numbers compare numerically (also when one
/// side is a numeric string), bools match `"true"`/`"false"`.
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::String(l), Value::String(r)) => l == r,
        (Value::Bool(l), Value::Bool(r)) => l == r,
        (Value::Number(_), Value::Number(_))
        | (Value::Number(_), Value::String(_))
        | (Value::String(_), Value::Number(_)) => {
            match (value_as_f64(left), value_as_f64(right)) {
                (Some(l), Some(r)) => (l - r).abs() < f64::EPSILON,
                _ => false,
            }
        }
        (Value::Bool(b), Value::String(s)) | (Value::String(s), Value::Bool(b)) => {
            s == if *b { "true" } else { "false" }
        }
        _ => left == right,
    }
}

fn compare_numbers(left: &Value, right: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (value_as_f64(left), value_as_f64(right)) {
        (Some(l), Some(r)) => cmp(l, r),
        _ => false,
    }
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn string_contains(haystack: &Value, needle: &Value) -> bool {
    let text = |v: &Value| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    text(haystack).contains(&text(needle))
}
