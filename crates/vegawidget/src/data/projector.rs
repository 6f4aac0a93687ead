//! Payload projection
//!
//! Precedence, checked in order:
//! 1. string  → registered predicate of that name
//! 2. boolean → [`Predicate::AlwaysTrue`] / [`Predicate::AlwaysFalse`]
//! 3. object  → columnar table, transposed to rows
//! 4. array   → rows as given; `null` → no rows

use super::{Record, RowSet};
use crate::callbacks::{CallbackRegistry, PredicateFn};
use crate::errors::{BridgeError, Result};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Row predicate for remove terms
#[derive(Clone)]
pub enum Predicate {
    /// Matches every row
    AlwaysTrue,
    /// Matches no row
    AlwaysFalse,
    /// A registered predicate
    Named {
        /// Registry name
        name: String,
        /// The predicate itself
        predicate: PredicateFn,
    },
}

impl Predicate {
    /// Whether `record` matches
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::AlwaysTrue => true,
            Self::AlwaysFalse => false,
            Self::Named { predicate, .. } => predicate(record),
        }
    }
}

impl PartialEq for Predicate {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::AlwaysTrue, Self::AlwaysTrue) | (Self::AlwaysFalse, Self::AlwaysFalse) => true,
            (Self::Named { name: a, .. }, Self::Named { name: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlwaysTrue => f.write_str("AlwaysTrue"),
            Self::AlwaysFalse => f.write_str("AlwaysFalse"),
            Self::Named { name, .. } => f.debug_struct("Named").field("name", name).finish(),
        }
    }
}

/// Normalized insert or remove term
#[derive(Clone, Debug, PartialEq)]
pub enum UpdateTerm {
    /// Explicit rows
    Rows(RowSet),
    /// Rows selected by predicate
    Predicate(Predicate),
}

impl Default for UpdateTerm {
    fn default() -> Self {
        Self::Rows(Vec::new())
    }
}

impl UpdateTerm {
    /// Whether `record` is selected by this term
    pub fn selects(&self, record: &Record) -> bool {
        match self {
            Self::Rows(rows) => rows.contains(record),
            Self::Predicate(predicate) => predicate.matches(record),
        }
    }
}

/// Normalizes update payloads into [`UpdateTerm`]s
#[derive(Clone, Debug)]
pub struct DataProjector {
    callbacks: Arc<CallbackRegistry>,
}

impl DataProjector {
    /// Create a projector resolving predicate names against `callbacks`
    pub fn new(callbacks: Arc<CallbackRegistry>) -> Self {
        Self { callbacks }
    }

    /// Project one payload value
    pub fn project(&self, value: Value) -> Result<UpdateTerm> {
        match value {
            Value::String(name) => {
                let predicate = self.callbacks.predicate(&name)?;
                Ok(UpdateTerm::Predicate(Predicate::Named { name, predicate }))
            }
            Value::Bool(true) => Ok(UpdateTerm::Predicate(Predicate::AlwaysTrue)),
            Value::Bool(false) => Ok(UpdateTerm::Predicate(Predicate::AlwaysFalse)),
            Value::Object(columns) => columns_to_rows(columns).map(UpdateTerm::Rows),
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(index, item)| match item {
                    Value::Object(record) => Ok(record),
                    other => Err(BridgeError::malformed(format!(
                        "row {index} is not a record: {other}"
                    ))),
                })
                .collect::<Result<RowSet>>()
                .map(UpdateTerm::Rows),
            Value::Null => Ok(UpdateTerm::Rows(Vec::new())),
            Value::Number(n) => Err(BridgeError::malformed(format!(
                "cannot use number {n} as update data"
            ))),
        }
    }
}

/// Transpose a column-oriented table into rows.
///
/// Every column must be an array and all columns must be the same length.
pub fn columns_to_rows(columns: Map<String, Value>) -> Result<RowSet> {
    let mut length = None;
    let mut arrays = Vec::with_capacity(columns.len());

    for (name, column) in columns {
        let Value::Array(values) = column else {
            return Err(BridgeError::malformed("All fields must be arrays"));
        };
        match length {
            Some(expected) if expected != values.len() => {
                return Err(BridgeError::malformed(
                    "All fields must be arrays of the same length",
                ));
            }
            _ => length = Some(values.len()),
        }
        arrays.push((name, values.into_iter()));
    }

    let mut rows = Vec::with_capacity(length.unwrap_or(0));
    for _ in 0..length.unwrap_or(0) {
        let mut record = Record::new();
        for (name, values) in arrays.iter_mut() {
            if let Some(value) = values.next() {
                record.insert(name.clone(), value);
            }
        }
        rows.push(record);
    }
    Ok(rows)
}
