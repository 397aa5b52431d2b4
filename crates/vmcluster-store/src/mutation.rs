//! Post-commit descriptions of store writes.
//!
//! Every write the store commits is described as a [`Mutation`] and handed
//! to the registered [`MutationObserver`] after the write batch has been
//! applied. Observers cannot fail the write and are never asked to retry it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vmcluster_core::UserId;

use crate::schema::Table;

/// A single column value in a mutation or change event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnValue {
    /// SQL-style NULL.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Timestamp value.
    Time(DateTime<Utc>),
    /// Text value.
    Text(String),
}

impl ColumnValue {
    /// Return the text content, if this is a text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl From<&str> for ColumnValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ColumnValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for ColumnValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ColumnValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for ColumnValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<DateTime<Utc>> for ColumnValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Time(value)
    }
}

impl<T: Into<ColumnValue>> From<Option<T>> for ColumnValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// The right-hand side of an equality predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum PredicateValue {
    /// `column = value`
    One(ColumnValue),
    /// `column IN (values...)`
    Many(Vec<ColumnValue>),
}

/// A WHERE-clause condition of an update or delete.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Equality (or membership, for a list value).
    Eq {
        /// Constrained column.
        column: &'static str,
        /// Expected value(s).
        value: PredicateValue,
    },
    /// Inequality.
    NotEq {
        /// Constrained column.
        column: &'static str,
        /// Excluded value.
        value: ColumnValue,
    },
    /// Strictly greater than.
    Gt {
        /// Constrained column.
        column: &'static str,
        /// Lower bound.
        value: ColumnValue,
    },
    /// Strictly less than.
    Lt {
        /// Constrained column.
        column: &'static str,
        /// Upper bound.
        value: ColumnValue,
    },
    /// Pattern match.
    Like {
        /// Constrained column.
        column: &'static str,
        /// SQL-style pattern.
        pattern: String,
    },
}

impl Predicate {
    /// `column = value`
    pub fn eq(column: &'static str, value: impl Into<ColumnValue>) -> Self {
        Self::Eq {
            column,
            value: PredicateValue::One(value.into()),
        }
    }

    /// `column IN (values...)`
    pub fn eq_any<I, V>(column: &'static str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<ColumnValue>,
    {
        Self::Eq {
            column,
            value: PredicateValue::Many(values.into_iter().map(Into::into).collect()),
        }
    }

    /// `column != value`
    pub fn not_eq(column: &'static str, value: impl Into<ColumnValue>) -> Self {
        Self::NotEq {
            column,
            value: value.into(),
        }
    }

    /// The column this predicate constrains.
    #[must_use]
    pub const fn column(&self) -> &'static str {
        match self {
            Self::Eq { column, .. }
            | Self::NotEq { column, .. }
            | Self::Gt { column, .. }
            | Self::Lt { column, .. }
            | Self::Like { column, .. } => *column,
        }
    }
}

/// A committed insert of one or more rows.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertMutation {
    /// Target table.
    pub table: Table,
    /// Column names, in the order of each row's values.
    pub columns: Vec<&'static str>,
    /// Inserted rows.
    pub rows: Vec<Vec<ColumnValue>>,
}

impl InsertMutation {
    /// Describe an insert of `rows`. Returns `None` for an empty slice.
    #[must_use]
    pub fn from_rows<R: Row>(rows: &[R]) -> Option<Self> {
        let first = rows.first()?;
        let columns = first.columns().into_iter().map(|(name, _)| name).collect();
        let rows = rows
            .iter()
            .map(|row| row.columns().into_iter().map(|(_, value)| value).collect())
            .collect();
        Some(Self {
            table: R::TABLE,
            columns,
            rows,
        })
    }
}

/// A committed update.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateMutation {
    /// Target table.
    pub table: Table,
    /// The SET list.
    pub assignments: Vec<(&'static str, ColumnValue)>,
    /// The WHERE clause, as a conjunction.
    pub predicates: Vec<Predicate>,
}

/// A committed delete.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteMutation {
    /// Target table.
    pub table: Table,
    /// The WHERE clause, as a conjunction.
    pub predicates: Vec<Predicate>,
    /// Owner of each removed row, read before the rows were removed.
    ///
    /// Rows are gone by the time observers run, so an owner lookup after
    /// the fact would always miss. Empty for tables without an owner column.
    pub prior_owners: Vec<(String, UserId)>,
}

/// A committed write, described after the fact.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Rows were inserted.
    Insert(InsertMutation),
    /// Rows were updated.
    Update(UpdateMutation),
    /// Rows were deleted.
    Delete(DeleteMutation),
}

impl Mutation {
    /// The table the mutation touched.
    #[must_use]
    pub const fn table(&self) -> Table {
        match self {
            Self::Insert(insert) => insert.table,
            Self::Update(update) => update.table,
            Self::Delete(delete) => delete.table,
        }
    }
}

/// A record that can be described column by column.
pub trait Row {
    /// The table this record lives in.
    const TABLE: Table;

    /// Every column of the record with its current value.
    fn columns(&self) -> Vec<(&'static str, ColumnValue)>;
}

/// Receives a description of every committed write.
///
/// Implementations run on the writer's thread after the commit; they should
/// be quick and must not write back into the store.
pub trait MutationObserver: Send + Sync {
    /// Called once per committed mutation.
    fn on_commit(&self, mutation: &Mutation);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::column;

    #[test]
    fn predicate_column() {
        assert_eq!(
            Predicate::eq(column::CLUSTER_ID, "cl-1").column(),
            column::CLUSTER_ID
        );
        assert_eq!(
            Predicate::not_eq(column::STATUS, "active").column(),
            column::STATUS
        );
    }

    #[test]
    fn option_column_value() {
        assert_eq!(ColumnValue::from(None::<String>), ColumnValue::Null);
        assert_eq!(
            ColumnValue::from(Some("x")),
            ColumnValue::Text("x".to_string())
        );
    }
}
