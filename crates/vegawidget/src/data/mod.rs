//! Dataset update terms
//!
//! Server payloads for incremental data updates arrive in several shapes.
//! [`DataProjector`] normalizes each shape into an [`UpdateTerm`] and
//! [`ChangesetBuilder`] pairs an insert term with a remove term.

pub mod changeset;
pub mod projector;

pub use changeset::{resolve_remove, Changeset, ChangesetBuilder};
pub use projector::{columns_to_rows, DataProjector, Predicate, UpdateTerm};

/// A single row: field name to value
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Row-oriented table
pub type RowSet = Vec<Record>;
