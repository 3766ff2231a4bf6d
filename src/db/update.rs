//! Builder for parameterized `UPDATE` statements.
//!
//! Importers only write the columns whose statistics actually changed, so the
//! statement text depends on the staged changes of each track.

use rusqlite::types::Value;

use super::handle::SqlHandle;
use crate::error::Result;

/// Collects `SET` assignments and `WHERE` equalities with numbered placeholders.
#[derive(Debug, Clone)]
pub struct UpdateBuilder {
    table: &'static str,
    assignments: Vec<String>,
    conditions: Vec<String>,
    params: Vec<Value>,
}

impl UpdateBuilder {
    #[must_use]
    pub const fn new(table: &'static str) -> Self {
        Self {
            table,
            assignments: Vec::new(),
            conditions: Vec::new(),
            params: Vec::new(),
        }
    }

    /// Add `column = ?N`.
    pub fn set(&mut self, column: &str, value: impl Into<Value>) -> &mut Self {
        self.params.push(value.into());
        self.assignments
            .push(format!("{column} = ?{}", self.params.len()));
        self
    }

    /// Add a `column = ?N` condition to the `WHERE` clause.
    pub fn filter(&mut self, column: &str, value: impl Into<Value>) -> &mut Self {
        self.params.push(value.into());
        self.conditions
            .push(format!("{column} = ?{}", self.params.len()));
        self
    }

    /// True when no column would be updated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Statement text and parameters, or `None` when there is nothing to set.
    #[must_use]
    pub fn build(&self) -> Option<(String, Vec<Value>)> {
        if self.assignments.is_empty() {
            return None;
        }
        let mut sql = format!("UPDATE {} SET {}", self.table, self.assignments.join(", "));
        if !self.conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.conditions.join(" AND "));
        }
        Some((sql, self.params.clone()))
    }

    /// Run the statement; returns the number of affected rows (0 when empty).
    pub fn execute(&self, conn: &rusqlite::Connection) -> rusqlite::Result<usize> {
        match self.build() {
            Some((sql, params)) => conn.execute(&sql, rusqlite::params_from_iter(params)),
            None => Ok(0),
        }
    }

    /// Run the statement on any [`SqlHandle`].
    pub fn execute_on<H: SqlHandle + ?Sized>(&self, handle: &mut H) -> Result<u64> {
        match self.build() {
            Some((sql, params)) => handle.execute(&sql, &params),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_builder_empty() {
        let mut update = UpdateBuilder::new("coretracks");
        update.filter("TrackID", 7_i64);
        assert!(update.is_empty());
        assert!(update.build().is_none());
    }

    #[test]
    fn test_update_builder_numbers_placeholders_in_order() {
        let mut update = UpdateBuilder::new("statistics");
        update
            .set("rating", 8_i64)
            .set("playcounter", 12_i64)
            .filter("url", "./music/one.mp3".to_string())
            .filter("deviceid", -1_i64);

        let (sql, params) = update.build().unwrap();
        assert_eq!(
            sql,
            "UPDATE statistics SET rating = ?1, playcounter = ?2 WHERE url = ?3 AND deviceid = ?4"
        );
        assert_eq!(params.len(), 4);
        assert_eq!(params[2], Value::Text("./music/one.mp3".to_string()));
    }

    #[test]
    fn test_update_builder_executes() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE songs (id INTEGER, rating REAL); INSERT INTO songs VALUES (1, -1);")
            .unwrap();

        let mut update = UpdateBuilder::new("songs");
        update.set("rating", 0.8_f64).filter("id", 1_i64);
        assert_eq!(update.execute(&conn).unwrap(), 1);

        let rating: f64 = conn
            .query_row("SELECT rating FROM songs WHERE id = 1", [], |row| row.get(0))
            .unwrap();
        assert!((rating - 0.8).abs() < f64::EPSILON);
    }
}
