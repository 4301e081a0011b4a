//! Managed module fields and their comparison rules.
//!
//! The engine only tracks an allow-list of fields. Each field registers a
//! [`FieldRule`] that decides how values are normalised and compared, so a
//! new structured field only needs a `register` call.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Number, Value};

use modsync_core::types::FieldMap;

/// How a field's values are normalised and compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    /// Strict value equality.
    Scalar,
    /// Structural equality; object key order is irrelevant and numbers are
    /// compared by value (`1 == 1.0`).
    Deep,
    /// Collection of ids; order and duplicates are irrelevant.
    IdSet,
}

impl FieldRule {
    pub fn normalize(self, value: Value) -> Value {
        match self {
            FieldRule::IdSet => canonical_id_set(value),
            FieldRule::Scalar | FieldRule::Deep => value,
        }
    }

    pub fn equal(self, a: &Value, b: &Value) -> bool {
        match self {
            FieldRule::Scalar => a == b,
            FieldRule::Deep => deep_equal(a, b),
            FieldRule::IdSet => canonical_id_set(a.clone()) == canonical_id_set(b.clone()),
        }
    }
}

/// Table of managed fields and their rules.
#[derive(Debug, Clone, Default)]
pub struct FieldRegistry {
    rules: BTreeMap<String, FieldRule>,
}

impl FieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Editable fields common to every module type.
    pub fn standard() -> Self {
        Self::new()
            .register("name", FieldRule::Scalar)
            .register("displayName", FieldRule::Scalar)
            .register("description", FieldRule::Scalar)
            .register("appliesTo", FieldRule::Scalar)
            .register("group", FieldRule::Scalar)
            .register("technology", FieldRule::Scalar)
            .register("tags", FieldRule::Scalar)
            .register("collectInterval", FieldRule::Scalar)
            .register("accessGroupIds", FieldRule::IdSet)
            .register("autoDiscoveryConfig", FieldRule::Deep)
            .register("dataPoints", FieldRule::Deep)
    }

    pub fn register(mut self, field: impl Into<String>, rule: FieldRule) -> Self {
        self.rules.insert(field.into(), rule);
        self
    }

    pub fn rule(&self, field: &str) -> Option<FieldRule> {
        self.rules.get(field).copied()
    }

    pub fn is_managed(&self, field: &str) -> bool {
        self.rules.contains_key(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    /// Keep only managed fields of a full remote record, normalised.
    pub fn project(&self, record: &FieldMap) -> FieldMap {
        self.rules
            .iter()
            .filter_map(|(field, rule)| {
                record
                    .get(field)
                    .map(|value| (field.clone(), rule.normalize(value.clone())))
            })
            .collect()
    }

    /// Normalise a value for `field`; unmanaged fields pass through.
    pub fn normalize(&self, field: &str, value: Value) -> Value {
        match self.rule(field) {
            Some(rule) => rule.normalize(value),
            None => value,
        }
    }

    /// Compare two values of `field`. An absent value equals `null`.
    pub fn equal(&self, field: &str, a: Option<&Value>, b: Option<&Value>) -> bool {
        let rule = self.rule(field).unwrap_or(FieldRule::Scalar);
        rule.equal(a.unwrap_or(&Value::Null), b.unwrap_or(&Value::Null))
    }

    /// Managed fields whose `draft` value differs from `original`.
    pub fn dirty_fields(&self, original: &FieldMap, draft: &FieldMap) -> BTreeSet<String> {
        self.fields()
            .filter(|field| !self.equal(field, original.get(*field), draft.get(*field)))
            .map(str::to_owned)
            .collect()
    }

    /// Managed fields whose value changed between two snapshots, sorted.
    pub fn changed_fields(&self, before: &FieldMap, after: &FieldMap) -> Vec<String> {
        self.dirty_fields(before, after).into_iter().collect()
    }
}

fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            x == y || matches!((x.as_f64(), y.as_f64()), (Some(l), Some(r)) if l == r)
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| deep_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(key, l)| y.get(key).is_some_and(|r| deep_equal(l, r)))
        }
        _ => a == b,
    }
}

fn canonical_id_set(value: Value) -> Value {
    let Value::Array(mut items) = value else {
        return value;
    };
    items.sort_by(compare_ids);
    items.dedup();
    Value::Array(items)
}

// Numbers first (by value), then strings, then anything else by its JSON text.
fn compare_ids(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y),
        (Value::Number(_), _) => Ordering::Less,
        (_, Value::Number(_)) => Ordering::Greater,
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::String(_), _) => Ordering::Less,
        (_, Value::String(_)) => Ordering::Greater,
        _ => a.to_string().cmp(&b.to_string()),
    }
}

// Integers compare exactly; f64 only when either side is a float.
fn compare_numbers(x: &Number, y: &Number) -> Ordering {
    let exact = |n: &Number| {
        n.as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from))
    };
    match (exact(x), exact(y)) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => x
            .as_f64()
            .unwrap_or_default()
            .total_cmp(&y.as_f64().unwrap_or_default()),
    }
}
