//! MySQL and PostgreSQL databases, read through sqlx.
//!
//! The importers are blocking, so a [`ServerHandle`] carries its own
//! current-thread runtime and drives every statement to completion on the
//! connection's owner thread.

use std::fmt;
use std::sync::Once;

use rusqlite::types::Value;
use sqlx::any::{AnyArguments, AnyRow};
use sqlx::query::Query;
use sqlx::{Any, AnyConnection, Connection, Row as _};
use tokio::runtime::{Builder, Runtime};

use super::connection::Backend;
use super::handle::{Row, SqlHandle};
use crate::error::Result;

static INSTALL_DRIVERS: Once = Once::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerDriver {
    MySql,
    PostgreSql,
}

impl ServerDriver {
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::MySql => 3306,
            Self::PostgreSql => 5432,
        }
    }

    const fn scheme(self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::PostgreSql => "postgres",
        }
    }
}

/// Connection settings of a database server.
#[derive(Clone)]
pub struct ServerBackend {
    driver: ServerDriver,
    host: String,
    port: u16,
    user: Option<String>,
    password: Option<String>,
    database: String,
}

impl ServerBackend {
    pub fn new(driver: ServerDriver, host: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            driver,
            host: host.into(),
            port: driver.default_port(),
            user: None,
            password: None,
            database: database.into(),
        }
    }

    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn credentials(mut self, user: Option<String>, password: Option<String>) -> Self {
        self.user = user;
        self.password = password;
        self
    }

    #[must_use]
    pub const fn driver(&self) -> ServerDriver {
        self.driver
    }

    /// Connection URL with user, password and database name percent-encoded.
    #[must_use]
    pub fn url(&self) -> String {
        let mut auth = String::new();
        if let Some(user) = &self.user {
            auth.push_str(&urlencoding::encode(user));
            if let Some(password) = &self.password {
                auth.push(':');
                auth.push_str(&urlencoding::encode(password));
            }
            auth.push('@');
        }
        format!(
            "{}://{auth}{}:{}/{}",
            self.driver.scheme(),
            self.host,
            self.port,
            urlencoding::encode(&self.database)
        )
    }
}

impl fmt::Debug for ServerBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBackend")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("database", &self.database)
            .finish()
    }
}

/// Open server connection. The connection is declared first so it is
/// dropped while its runtime still exists.
pub struct ServerHandle {
    conn: AnyConnection,
    runtime: Runtime,
    driver: ServerDriver,
}

impl ServerHandle {
    fn raw(&mut self, sql: &str) -> Result<()> {
        self.runtime
            .block_on(sqlx::raw_sql(sql).execute(&mut self.conn))?;
        Ok(())
    }
}

impl Backend for ServerBackend {
    type Handle = ServerHandle;

    fn open(&self) -> Result<Self::Handle> {
        INSTALL_DRIVERS.call_once(sqlx::any::install_default_drivers);
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let conn = runtime.block_on(AnyConnection::connect(&self.url()))?;
        Ok(ServerHandle {
            conn,
            runtime,
            driver: self.driver,
        })
    }

    fn begin(handle: &mut Self::Handle) -> Result<()> {
        handle.raw("START TRANSACTION")
    }

    fn commit(handle: &mut Self::Handle) -> Result<()> {
        handle.raw("COMMIT")
    }

    fn rollback(handle: &mut Self::Handle) -> Result<()> {
        handle.raw("ROLLBACK")
    }
}

impl SqlHandle for ServerHandle {
    fn select(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let sql = placeholders(sql, self.driver);
        let rows = self
            .runtime
            .block_on(bind(sqlx::query(&sql), params).fetch_all(&mut self.conn))?;
        Ok(rows.iter().map(decode_row).collect())
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let sql = placeholders(sql, self.driver);
        let done = self
            .runtime
            .block_on(bind(sqlx::query(&sql), params).execute(&mut self.conn))?;
        Ok(done.rows_affected())
    }
}

fn bind<'q>(
    mut query: Query<'q, Any, AnyArguments<'q>>,
    params: &[Value],
) -> Query<'q, Any, AnyArguments<'q>> {
    for value in params {
        query = match value {
            Value::Null => query.bind(None::<i64>),
            Value::Integer(i) => query.bind(*i),
            Value::Real(f) => query.bind(*f),
            Value::Text(s) => query.bind(s.clone()),
            Value::Blob(b) => query.bind(b.clone()),
        };
    }
    query
}

fn decode_row(row: &AnyRow) -> Row {
    Row((0..row.len()).map(|i| decode_value(row, i)).collect())
}

fn decode_value(row: &AnyRow, index: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return v.map_or(Value::Null, Value::Integer);
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(index) {
        return v.map_or(Value::Null, |i| Value::Integer(i64::from(i)));
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return v.map_or(Value::Null, Value::Text);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
        return v.map_or(Value::Null, Value::Real);
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(index) {
        return v.map_or(Value::Null, |b| Value::Integer(i64::from(b)));
    }
    Value::Null
}

/// Rewrite `?` and `?N` placeholders: bare `?` for MySQL, `$N` for PostgreSQL.
fn placeholders(sql: &str, driver: ServerDriver) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut position = 0;
    while let Some(c) = chars.next() {
        if c != '?' {
            out.push(c);
            continue;
        }
        let mut digits = String::new();
        while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
            digits.push(d);
            chars.next();
        }
        position += 1;
        match driver {
            ServerDriver::MySql => out.push('?'),
            ServerDriver::PostgreSql => {
                out.push('$');
                if digits.is_empty() {
                    out.push_str(&position.to_string());
                } else {
                    out.push_str(&digits);
                }
            }
        }
    }
    out
}
