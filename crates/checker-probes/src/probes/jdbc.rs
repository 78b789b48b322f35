//! SQL probe.
//!
//! Runs one query through `sqlx`'s driver-agnostic `AnyConnection`
//! (PostgreSQL, MySQL/MariaDB, SQLite) and renders the result set as an
//! ASCII table: column names in the header row, one row per result row,
//! NULL as an empty cell. `jdbc:`-prefixed URLs are accepted as-is so
//! existing check definitions keep working; TLS follows the URL
//! (`sslmode=require`, `ssl-mode=REQUIRED`).

use std::fmt;
use std::io::Write;
use std::time::Duration;

use comfy_table::Table;
use comfy_table::presets::ASCII_FULL;
use regex::Regex;
use reqwest::Url;
use sqlx::any::AnyRow;
use sqlx::{AnyConnection, Column, Connection, Database, Executor, Row, Statement, ValueRef};

/// `sqlx` does not re-export `AnyColumn`; name it through the `Any` database.
type AnyColumn = <sqlx::Any as Database>::Column;
use tracing::debug;

use checker_core::param::DEFAULT_PATTERN;
use checker_core::{
    CheckResult, ParameterSpec, ProbeError, ProbeOutcome, ResolvedOptions, evaluate,
};

use crate::probe::HealthProbe;

const URL: &str = "url";
const DRIVER: &str = "driver";
const USERNAME: &str = "username";
const PASSWORD: &str = "password";
const QUERY: &str = "query";

pub static PARAMETERS: &[ParameterSpec] = &[
    ParameterSpec::new('u', USERNAME, "The username of the database"),
    ParameterSpec::new('p', PASSWORD, "The password of the database"),
    ParameterSpec::connect_timeout('c', "The connection timeout of the database (in milliseconds)"),
    ParameterSpec::response_timeout('r', "The query timeout of the database (in milliseconds)"),
    ParameterSpec::new(
        'y',
        DRIVER,
        "The database driver (postgres, mysql, sqlite or a JDBC class name); inferred from the url",
    ),
    ParameterSpec::new('l', URL, "The database url to connect to").required(),
    ParameterSpec::new('q', QUERY, "The SQL query to execute").required(),
    ParameterSpec::pattern(
        'x',
        "The regex pattern to search in the SQL query result",
        DEFAULT_PATTERN,
    ),
];

/// Database family behind a URL or driver name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Postgres,
    MySql,
    Sqlite,
}

/// `--driver` values, matched case-insensitively.
const DRIVERS: &[(&str, Backend)] = &[
    ("postgres", Backend::Postgres),
    ("postgresql", Backend::Postgres),
    ("org.postgresql.Driver", Backend::Postgres),
    ("mysql", Backend::MySql),
    ("mariadb", Backend::MySql),
    ("com.mysql.jdbc.Driver", Backend::MySql),
    ("com.mysql.cj.jdbc.Driver", Backend::MySql),
    ("org.mariadb.jdbc.Driver", Backend::MySql),
    ("sqlite", Backend::Sqlite),
    ("org.sqlite.JDBC", Backend::Sqlite),
];

impl Backend {
    fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "postgres" | "postgresql" => Some(Backend::Postgres),
            "mysql" | "mariadb" => Some(Backend::MySql),
            "sqlite" => Some(Backend::Sqlite),
            _ => None,
        }
    }

    fn from_driver(driver: &str) -> Option<Self> {
        let driver = driver.trim();
        DRIVERS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(driver))
            .map(|(_, backend)| *backend)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Backend::Postgres => "postgres",
            Backend::MySql => "mysql",
            Backend::Sqlite => "sqlite",
        })
    }
}

/// Strip a `jdbc:` prefix and check the scheme is one we can connect to.
pub fn normalize_url(url: &str) -> CheckResult<(Backend, String)> {
    let trimmed = url.trim();
    let bare = trimmed.strip_prefix("jdbc:").unwrap_or(trimmed);
    let scheme = bare.split(':').next().unwrap_or_default();
    match Backend::from_scheme(&scheme.to_ascii_lowercase()) {
        Some(backend) => Ok((backend, bare.to_string())),
        None => Err(ProbeError::invalid_option(
            URL,
            url,
            "expected a postgresql://, mysql://, mariadb:// or sqlite: url",
        )),
    }
}

/// Rows of one result set, cells as text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl QueryResult {
    /// The ASCII table; empty when the statement returned no columns.
    pub fn render(&self) -> String {
        if self.columns.is_empty() {
            return String::new();
        }
        let mut table = Table::new();
        table.load_preset(ASCII_FULL);
        table.set_header(self.columns.clone());
        for row in &self.rows {
            table.add_row(row.iter().map(|cell| cell.clone().unwrap_or_default()));
        }
        table.to_string()
    }
}

fn column_names(columns: &[AnyColumn]) -> Vec<String> {
    columns.iter().map(|c| c.name().to_string()).collect()
}

/// One cell as text, trying each type the `Any` driver can decode.
fn cell(row: &AnyRow, index: usize) -> Option<String> {
    match row.try_get_raw(index) {
        Ok(value) if !value.is_null() => {}
        _ => return None,
    }
    row.try_get::<String, _>(index)
        .ok()
        .or_else(|| row.try_get::<i64, _>(index).ok().map(|v| v.to_string()))
        .or_else(|| row.try_get::<f64, _>(index).ok().map(|v| v.to_string()))
        .or_else(|| row.try_get::<bool, _>(index).ok().map(|v| v.to_string()))
        .or_else(|| {
            row.try_get::<Vec<u8>, _>(index)
                .ok()
                .map(|v| String::from_utf8_lossy(&v).into_owned())
        })
}

async fn fetch(connection: &mut AnyConnection, query: &str) -> CheckResult<QueryResult> {
    let rows = sqlx::query(query)
        .fetch_all(&mut *connection)
        .await
        .map_err(ProbeError::connection)?;

    // An empty result set still has a header; prepare the statement to get it.
    let columns = match rows.first() {
        Some(row) => column_names(row.columns()),
        None => match (&mut *connection).prepare(query).await {
            Ok(statement) => column_names(statement.columns()),
            Err(e) => {
                debug!(error = %e, "cannot describe empty result set");
                Vec::new()
            }
        },
    };
    let rows = rows
        .iter()
        .map(|row| (0..row.len()).map(|i| cell(row, i)).collect())
        .collect();

    Ok(QueryResult { columns, rows })
}

#[derive(Debug, Clone)]
pub struct JdbcSettings {
    pub backend: Backend,
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub connect_timeout: Duration,
    pub query_timeout: Duration,
    pub query: String,
    pub pattern: Regex,
}

impl JdbcSettings {
    pub fn from_options(options: &ResolvedOptions) -> CheckResult<Self> {
        let (backend, url) = normalize_url(options.require(URL)?)?;
        if let Some(driver) = options.get(DRIVER) {
            match Backend::from_driver(driver) {
                Some(named) if named == backend => {}
                Some(named) => {
                    return Err(ProbeError::invalid_option(
                        DRIVER,
                        driver,
                        format!("a {named} driver cannot open a {backend} url"),
                    ));
                }
                None => {
                    return Err(ProbeError::invalid_option(
                        DRIVER,
                        driver,
                        "supported drivers are postgres, mysql and sqlite",
                    ));
                }
            }
        }

        Ok(Self {
            backend,
            url,
            username: options.get(USERNAME).map(str::to_string),
            password: options.get(PASSWORD).map(str::to_string),
            connect_timeout: options.connect_timeout()?,
            query_timeout: options.response_timeout()?,
            query: options.require(QUERY)?.to_string(),
            pattern: options.pattern()?,
        })
    }

    /// The url handed to the driver, with `--username`/`--password` applied.
    /// SQLite has no credentials, so its url is used as given.
    pub fn connect_url(&self) -> CheckResult<String> {
        if self.backend == Backend::Sqlite
            || (self.username.is_none() && self.password.is_none())
        {
            return Ok(self.url.clone());
        }
        let mut url =
            Url::parse(&self.url).map_err(|e| ProbeError::invalid_option(URL, &self.url, e))?;
        if let Some(username) = &self.username {
            url.set_username(username)
                .map_err(|()| ProbeError::invalid_option(URL, &self.url, "url has no host"))?;
        }
        if let Some(password) = &self.password {
            url.set_password(Some(password))
                .map_err(|()| ProbeError::invalid_option(URL, &self.url, "url has no host"))?;
        }
        Ok(url.into())
    }

    async fn run(&self) -> CheckResult<QueryResult> {
        sqlx::any::install_default_drivers();
        super::install_crypto_provider();
        let url = self.connect_url()?;

        debug!(backend = %self.backend, "connecting to database");
        let connect = AnyConnection::connect(&url);
        let mut connection = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| {
                ProbeError::connection(format!(
                    "connect timed out after {}ms",
                    self.connect_timeout.as_millis()
                ))
            })?
            .map_err(ProbeError::connection)?;

        let result = tokio::time::timeout(self.query_timeout, fetch(&mut connection, &self.query))
            .await
            .map_err(|_| {
                ProbeError::connection(format!(
                    "query timed out after {}ms",
                    self.query_timeout.as_millis()
                ))
            })??;
        debug!(columns = result.columns.len(), rows = result.rows.len(), "query complete");

        if let Err(e) = connection.close().await {
            debug!(error = %e, "closing connection failed");
        }
        Ok(result)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JdbcProbe;

impl HealthProbe for JdbcProbe {
    fn parameters(&self) -> &'static [ParameterSpec] {
        PARAMETERS
    }

    fn check(
        &self,
        options: &ResolvedOptions,
        console: &mut dyn Write,
    ) -> CheckResult<ProbeOutcome> {
        let settings = JdbcSettings::from_options(options)?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ProbeError::connection(format!("cannot start async runtime: {e}")))?;
        let result = runtime.block_on(settings.run())?;
        evaluate(result.render(), &settings.pattern, console)
    }
}
