//! Changeset composition

use super::projector::{DataProjector, Predicate, UpdateTerm};
use super::RowSet;
use crate::errors::{BridgeError, Result};
use serde_json::Value;

/// An atomic insert + remove pair applied to one dataset
#[derive(Clone, Debug, PartialEq)]
pub struct Changeset {
    /// Rows to add
    pub insert: UpdateTerm,
    /// Rows to drop before inserting
    pub remove: UpdateTerm,
}

impl Changeset {
    /// Apply to `rows`: remove matching rows, then append inserted rows.
    pub fn apply(&self, rows: &mut RowSet) -> Result<()> {
        let UpdateTerm::Rows(inserted) = &self.insert else {
            return Err(BridgeError::malformed("insert term must be rows"));
        };
        rows.retain(|row| !self.remove.selects(row));
        rows.extend(inserted.iter().cloned());
        Ok(())
    }
}

/// Builds [`Changeset`]s
pub struct ChangesetBuilder;

impl ChangesetBuilder {
    /// Pair an insert term with a remove term; an omitted remove term
    /// removes every existing row.
    pub fn build(insert: UpdateTerm, remove: Option<UpdateTerm>) -> Changeset {
        Changeset {
            insert,
            remove: remove.unwrap_or(UpdateTerm::Predicate(Predicate::AlwaysTrue)),
        }
    }

    /// Project raw `data_insert` / `data_remove` payloads and build the
    /// changeset. The two payloads are projected independently.
    pub fn from_payload(
        projector: &DataProjector,
        insert: Value,
        remove: Option<Value>,
    ) -> Result<Changeset> {
        let insert = projector.project(insert)?;
        let remove = projector.project(resolve_remove(remove))?;
        Ok(Self::build(insert, Some(remove)))
    }
}

/// Resolve the remove payload default.
///
/// Absent, `null`, `0` and `""` mean "remove everything" (`true`); an explicit
/// `false` is kept and removes nothing.
pub fn resolve_remove(remove: Option<Value>) -> Value {
    match remove {
        None | Some(Value::Null) => Value::Bool(true),
        Some(Value::String(s)) if s.is_empty() => Value::Bool(true),
        Some(Value::Number(n)) if n.as_f64() == Some(0.0) => Value::Bool(true),
        Some(value) => value,
    }
}
