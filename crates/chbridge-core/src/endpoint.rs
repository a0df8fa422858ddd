//! Endpoint value objects
//!
//! Endpoints are immutable: every `with_*` method returns a new value. A
//! [`DatabaseEndpoint`] is hashable and is the key the connection pool uses,
//! so two equal endpoints always share one pooled connection.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default HTTP port of the ClickHouse server
pub const DEFAULT_CLICKHOUSE_PORT: u16 = 8123;

/// A connectable data location
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Endpoint {
    Database(DatabaseEndpoint),
    FlatFile(FlatFileEndpoint),
}

impl Endpoint {
    pub fn kind(&self) -> &'static str {
        match self {
            Endpoint::Database(_) => "database",
            Endpoint::FlatFile(_) => "flat_file",
        }
    }
}

impl From<DatabaseEndpoint> for Endpoint {
    fn from(endpoint: DatabaseEndpoint) -> Self {
        Endpoint::Database(endpoint)
    }
}

impl From<FlatFileEndpoint> for Endpoint {
    fn from(endpoint: FlatFileEndpoint) -> Self {
        Endpoint::FlatFile(endpoint)
    }
}

/// Parameters identifying a database server, database and credentials
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatabaseEndpoint {
    driver: String,
    host: String,
    port: u16,
    database: String,
    username: String,
    #[serde(default, skip_serializing)]
    password: Option<String>,
    #[serde(default)]
    secure: bool,
}

impl DatabaseEndpoint {
    /// A ClickHouse endpoint with the default user and no password
    pub fn clickhouse(host: impl Into<String>, port: u16, database: impl Into<String>) -> Self {
        Self::new("clickhouse", host, port, database)
    }

    pub fn new(
        driver: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
    ) -> Self {
        Self {
            driver: driver.into(),
            host: host.into(),
            port,
            database: database.into(),
            username: "default".to_string(),
            password: None,
            secure: false,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.username = username.into();
        self.password = password.filter(|p| !p.is_empty());
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn driver(&self) -> &str {
        &self.driver
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn secure(&self) -> bool {
        self.secure
    }

    /// Base URL of the server's HTTP interface
    pub fn url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

impl fmt::Debug for DatabaseEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseEndpoint")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("secure", &self.secure)
            .finish()
    }
}

impl fmt::Display for DatabaseEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}@{}:{}/{}",
            self.driver, self.username, self.host, self.port, self.database
        )
    }
}

/// A delimited text file
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlatFileEndpoint {
    path: PathBuf,
    delimiter: u8,
    has_header: bool,
}

impl FlatFileEndpoint {
    /// Comma-delimited file with a header line
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            delimiter: b',',
            has_header: true,
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_header(mut self, has_header: bool) -> Self {
        self.has_header = has_header;
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    pub fn has_header(&self) -> bool {
        self.has_header
    }
}

/// Parse a delimiter argument such as `,`, `;`, `\t` or `tab`
pub fn parse_delimiter(raw: &str) -> Option<u8> {
    match raw {
        "\\t" | "tab" | "\t" => Some(b'\t'),
        "pipe" => Some(b'|'),
        s if s.len() == 1 && s.is_ascii() => s.bytes().next(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_endpoints_hash_equal() {
        use std::collections::HashSet;

        let a = DatabaseEndpoint::clickhouse("localhost", 8123, "default");
        let b = DatabaseEndpoint::clickhouse("localhost", 8123, "default");
        let mut set = HashSet::new();
        set.insert(a);
        assert!(!set.insert(b));
    }

    #[test]
    fn test_with_methods_return_new_values() {
        let base = DatabaseEndpoint::clickhouse("localhost", 8123, "default");
        let other = base.clone().with_database("analytics");
        assert_eq!(base.database(), "default");
        assert_eq!(other.database(), "analytics");
        assert_ne!(base, other);
    }

    #[test]
    fn test_debug_redacts_password() {
        let endpoint = DatabaseEndpoint::clickhouse("localhost", 8123, "default")
            .with_credentials("admin", Some("hunter2".to_string()));
        let debug = format!("{:?}", endpoint);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
        assert!(!endpoint.to_string().contains("hunter2"));
    }

    #[test]
    fn test_empty_password_is_none() {
        let endpoint = DatabaseEndpoint::clickhouse("h", 1, "d").with_credentials("u", Some(String::new()));
        assert_eq!(endpoint.password(), None);
    }

    #[test]
    fn test_url_scheme() {
        let endpoint = DatabaseEndpoint::clickhouse("ch.internal", 8443, "default").with_secure(true);
        assert_eq!(endpoint.url(), "https://ch.internal:8443");
    }

    #[test]
    fn test_parse_delimiter() {
        assert_eq!(parse_delimiter(","), Some(b','));
        assert_eq!(parse_delimiter(";"), Some(b';'));
        assert_eq!(parse_delimiter("\\t"), Some(b'\t'));
        assert_eq!(parse_delimiter("tab"), Some(b'\t'));
        assert_eq!(parse_delimiter(",,"), None);
        assert_eq!(parse_delimiter(""), None);
    }
}
