//! SQL for every table, grouped by area and re-exported flat so handlers
//! call `queries::get_course_by_id(...)` regardless of which file holds it.

mod audit;
mod catalog;
mod commerce;
mod learning;
mod messaging;
mod reports;
mod users;

pub use audit::*;
pub use catalog::*;
pub use commerce::*;
pub use learning::*;
pub use messaging::*;
pub use reports::*;
pub use users::*;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, types::Value};

use crate::error::Result;

fn now() -> i64 {
    Utc::now().timestamp()
}

/// Builder for dynamic UPDATE statements with optional fields.
/// Combines multiple field updates into a single query for efficiency.
struct UpdateBuilder {
    table: &'static str,
    id: String,
    fields: Vec<(&'static str, Value)>,
    track_updated_at: bool,
    live_only: bool,
}

impl UpdateBuilder {
    fn new(table: &'static str, id: &str) -> Self {
        Self {
            table,
            id: id.to_string(),
            fields: Vec::new(),
            track_updated_at: false,
            live_only: false,
        }
    }

    fn with_updated_at(mut self) -> Self {
        self.track_updated_at = true;
        self
    }

    /// Skip soft-deleted rows (tables with a `deleted_at` column).
    fn live_only(mut self) -> Self {
        self.live_only = true;
        self
    }

    fn set(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.fields.push((column, value.into()));
        self
    }

    fn set_opt<V: Into<Value>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(column, v),
            None => self,
        }
    }

    /// Set a column to an explicit value (including NULL).
    /// Use this for Option<T> where Some(v) = set to v, None = set to NULL.
    fn set_nullable<V: Into<Value>>(mut self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.fields.push((column, v.into())),
            None => self.fields.push((column, Value::Null)),
        }
        self
    }

    fn into_sql(mut self) -> (String, Vec<Value>) {
        if self.track_updated_at {
            self.fields.push(("updated_at", now().into()));
        }
        let sets: Vec<String> = self
            .fields
            .iter()
            .map(|(col, _)| format!("{} = ?", col))
            .collect();
        let mut values: Vec<Value> = self.fields.into_iter().map(|(_, v)| v).collect();
        values.push(self.id.into());
        let live = if self.live_only {
            " AND deleted_at IS NULL"
        } else {
            ""
        };
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ?{}",
            self.table,
            sets.join(", "),
            live
        );
        (sql, values)
    }

    fn execute(self, conn: &Connection) -> Result<bool> {
        if self.fields.is_empty() {
            return Ok(false);
        }
        let (sql, values) = self.into_sql();
        let affected = conn.execute(&sql, rusqlite::params_from_iter(values))?;
        Ok(affected > 0)
    }

    /// Execute the update and return the updated entity using RETURNING clause.
    /// Returns None if no rows matched (entity not found or no fields to update).
    fn execute_returning<T: super::from_row::FromRow>(
        self,
        conn: &Connection,
        returning_cols: &str,
    ) -> Result<Option<T>> {
        if self.fields.is_empty() {
            return Ok(None);
        }
        let (sql, values) = self.into_sql();
        let sql = format!("{} RETURNING {}", sql, returning_cols);
        conn.query_row(&sql, rusqlite::params_from_iter(values), T::from_row)
            .optional()
            .map_err(Into::into)
    }
}

/// Dynamic WHERE clause whose parameters are reused for COUNT and SELECT.
#[derive(Default)]
struct Filter {
    clauses: Vec<&'static str>,
    params: Vec<Value>,
}

impl Filter {
    fn push(&mut self, clause: &'static str, value: impl Into<Value>) {
        self.clauses.push(clause);
        self.params.push(value.into());
    }

    fn push_opt<V: Into<Value>>(&mut self, clause: &'static str, value: Option<V>) {
        if let Some(v) = value {
            self.push(clause, v);
        }
    }

    /// A clause without parameters.
    fn raw(&mut self, clause: &'static str) {
        self.clauses.push(clause);
    }

    fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.clauses.join(" AND "))
        }
    }

    fn count(&self, conn: &Connection, from: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {} {}", from, self.where_sql());
        Ok(conn.query_row(
            &sql,
            rusqlite::params_from_iter(self.params.iter()),
            |row| row.get(0),
        )?)
    }

    fn select_page<T: super::from_row::FromRow>(
        &self,
        conn: &Connection,
        cols: &str,
        from: &str,
        order_by: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<T>> {
        let sql = format!(
            "SELECT {} FROM {} {} ORDER BY {} LIMIT ? OFFSET ?",
            cols,
            from,
            self.where_sql(),
            order_by
        );
        let mut values = self.params.clone();
        values.push(limit.into());
        values.push(offset.into());
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(values), T::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn paginate<T: super::from_row::FromRow>(
        &self,
        conn: &Connection,
        cols: &str,
        from: &str,
        order_by: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<T>, i64)> {
        let total = self.count(conn, from)?;
        let items = self.select_page(conn, cols, from, order_by, limit, offset)?;
        Ok((items, total))
    }
}
