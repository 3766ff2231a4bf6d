//! Dialect-neutral statements.
//!
//! Amarok 1.4 kept the same tables in SQLite, MySQL and PostgreSQL, so its
//! importer talks to every backend through [`SqlHandle`]. Statements use `?`
//! or `?N` placeholders numbered in order of appearance; server handles
//! rewrite them for their own syntax.

use rusqlite::types::Value;

use crate::error::Result;

/// One result row with loosely typed columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row(pub Vec<Value>);

impl Row {
    /// Integer column; numeric text is parsed, anything else is `None`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn int(&self, index: usize) -> Option<i64> {
        match self.0.get(index)? {
            Value::Integer(i) => Some(*i),
            Value::Real(f) => Some(f.round() as i64),
            Value::Text(s) => s.trim().parse().ok(),
            Value::Null | Value::Blob(_) => None,
        }
    }

    #[must_use]
    pub fn text(&self, index: usize) -> Option<String> {
        match self.0.get(index)? {
            Value::Text(s) => Some(s.clone()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Real(f) => Some(f.to_string()),
            Value::Blob(b) => Some(String::from_utf8_lossy(b).into_owned()),
            Value::Null => None,
        }
    }
}

/// Statement execution on an open database handle.
pub trait SqlHandle {
    /// Run a query and collect every row.
    fn select(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Run a statement; returns the number of affected rows.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64>;
}

impl SqlHandle for rusqlite::Connection {
    fn select(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut stmt = self.prepare(sql)?;
        let columns = stmt.column_count();
        let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let values = (0..columns)
                .map(|i| row.get::<_, Value>(i))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            out.push(Row(values));
        }
        Ok(out)
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let changed =
            rusqlite::Connection::execute(self, sql, rusqlite::params_from_iter(params.iter()))?;
        Ok(u64::try_from(changed).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_accessors() {
        let row = Row(vec![
            Value::Integer(7),
            Value::Text(" 2001 ".into()),
            Value::Null,
            Value::Text("Discovery".into()),
        ]);
        assert_eq!(row.int(0), Some(7));
        assert_eq!(row.int(1), Some(2001));
        assert_eq!(row.int(2), None);
        assert_eq!(row.int(3), None);
        assert_eq!(row.text(0).as_deref(), Some("7"));
        assert_eq!(row.text(2), None);
        assert_eq!(row.int(9), None);
    }

    #[test]
    fn test_sqlite_select_and_execute() {
        let mut db = rusqlite::Connection::open_in_memory().unwrap();
        db.execute_batch("CREATE TABLE t (id INTEGER, name TEXT)").unwrap();
        let changed = SqlHandle::execute(
            &mut db,
            "INSERT INTO t VALUES (?1, ?2)",
            &[Value::Integer(1), Value::Text("one".into())],
        )
        .unwrap();
        assert_eq!(changed, 1);

        let rows = db
            .select("SELECT id, name FROM t WHERE id = ?", &[Value::Integer(1)])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].int(0), Some(1));
        assert_eq!(rows[0].text(1).as_deref(), Some("one"));
    }
}
