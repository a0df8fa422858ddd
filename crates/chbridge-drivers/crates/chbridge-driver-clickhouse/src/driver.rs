//! ClickHouse driver implementation

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chbridge_core::{
    BridgeError, ColumnDef, Connection, ConnectionError, DEFAULT_CLICKHOUSE_PORT,
    DatabaseDriver, DatabaseEndpoint, JoinPlan, Result, Row, RowCursor, SelectRequest,
    TableSchema,
};

use crate::cursor::JsonEachRowCursor;
use crate::sql;

/// Server error codes meaning the credentials were refused
const AUTH_ERROR_CODES: &[&str] = &["Code: 192.", "Code: 193.", "Code: 516."];

/// ClickHouse database driver over the HTTP interface
pub struct ClickHouseDriver;

impl ClickHouseDriver {
    /// Create a new ClickHouse driver instance
    pub fn new() -> Self {
        tracing::debug!("ClickHouse driver initialized");
        Self
    }
}

impl Default for ClickHouseDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseDriver for ClickHouseDriver {
    fn id(&self) -> &'static str {
        "clickhouse"
    }

    fn name(&self) -> &'static str {
        "clickhouse"
    }

    fn display_name(&self) -> &'static str {
        "ClickHouse"
    }

    fn default_port(&self) -> Option<u16> {
        Some(DEFAULT_CLICKHOUSE_PORT)
    }

    #[tracing::instrument(
        skip(self, endpoint),
        fields(host = %endpoint.host(), port = endpoint.port(), database = %endpoint.database())
    )]
    async fn connect(&self, endpoint: &DatabaseEndpoint) -> Result<Arc<dyn Connection>> {
        tracing::debug!("connecting to ClickHouse");

        let mut client = clickhouse::Client::default()
            .with_url(endpoint.url())
            .with_user(endpoint.username())
            .with_database(endpoint.database());
        if let Some(password) = endpoint.password() {
            client = client.with_password(password);
        }

        // The handshake is the first query; the HTTP interface has no login step
        client
            .query("SELECT 1")
            .execute()
            .await
            .map_err(classify_connect_error)?;

        tracing::debug!("ClickHouse connection established");
        Ok(Arc::new(ClickHouseConnection::new(
            client,
            endpoint.database().to_string(),
        )))
    }
}

fn is_auth_failure(message: &str) -> bool {
    AUTH_ERROR_CODES.iter().any(|code| message.contains(code))
        || message.contains("Authentication failed")
}

/// Map a client error raised while talking to an established connection
pub(crate) fn classify_error(error: clickhouse::error::Error) -> BridgeError {
    use clickhouse::error::Error;

    match error {
        Error::Network(e) => BridgeError::Connection(ConnectionError::Unreachable(e.to_string())),
        Error::BadResponse(message) if is_auth_failure(&message) => {
            BridgeError::Connection(ConnectionError::AuthRejected(message))
        }
        Error::BadResponse(message) => BridgeError::Query(message),
        other => BridgeError::Driver(other.to_string()),
    }
}

/// Map a handshake failure; anything that is not a credential problem means
/// the endpoint cannot be used
fn classify_connect_error(error: clickhouse::error::Error) -> BridgeError {
    match classify_error(error) {
        BridgeError::Query(message) | BridgeError::Driver(message) => {
            BridgeError::Connection(ConnectionError::Unreachable(message))
        }
        other => other,
    }
}

/// ClickHouse connection wrapper implementing the Connection trait
pub struct ClickHouseConnection {
    client: clickhouse::Client,
    database: String,
    closed: AtomicBool,
}

impl ClickHouseConnection {
    /// Create a new ClickHouse connection wrapper
    pub fn new(client: clickhouse::Client, database: String) -> Self {
        Self {
            client,
            database,
            closed: AtomicBool::new(false),
        }
    }

    /// Get the database name
    pub fn database_name(&self) -> &str {
        &self.database
    }

    fn ensure_not_closed(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::Driver("Connection is closed".to_string()));
        }
        Ok(())
    }

    /// Run a query and collect every JSONEachRow object
    pub(crate) async fn fetch_objects(
        &self,
        sql: &str,
    ) -> Result<Vec<serde_json::Map<String, serde_json::Value>>> {
        self.ensure_not_closed()?;
        let mut cursor = self
            .client
            .query(sql)
            .fetch_bytes("JSONEachRow")
            .map_err(classify_error)?;

        let mut all_bytes = Vec::new();
        while let Some(chunk) = cursor.next().await.map_err(classify_error)? {
            all_bytes.extend_from_slice(&chunk);
        }

        let content = String::from_utf8_lossy(&all_bytes);
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|_| {
                    BridgeError::Query(format!("unexpected data in result: {}", line))
                })
            })
            .collect()
    }

    async fn run(&self, sql: &str) -> Result<()> {
        self.ensure_not_closed()?;
        let start = std::time::Instant::now();
        self.client
            .query(sql)
            .execute()
            .await
            .map_err(classify_error)?;
        tracing::debug!(
            duration_ms = start.elapsed().as_millis() as u64,
            "statement completed"
        );
        Ok(())
    }
}

#[async_trait]
impl Connection for ClickHouseConnection {
    fn driver_name(&self) -> &str {
        "clickhouse"
    }

    fn database(&self) -> &str {
        &self.database
    }

    #[tracing::instrument(skip(self, request), fields(table = %request.table, limit = ?request.limit))]
    async fn select_stream(&self, request: &SelectRequest) -> Result<Box<dyn RowCursor>> {
        self.ensure_not_closed()?;
        let sql = sql::select(&self.database, request);
        tracing::debug!(%sql, "opening result stream");
        let cursor = self
            .client
            .query(&sql)
            .fetch_bytes("JSONEachRow")
            .map_err(classify_error)?;
        Ok(Box::new(JsonEachRowCursor::new(cursor, request.columns.clone())))
    }

    async fn insert_rows(&self, table: &str, columns: &[ColumnDef], rows: &[Row]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        self.run(&sql::insert_json_rows(&self.database, table, columns, rows))
            .await?;
        tracing::debug!(table, rows = rows.len(), "batch inserted");
        Ok(rows.len() as u64)
    }

    async fn create_table(&self, schema: &TableSchema) -> Result<()> {
        let ddl = sql::create_table(&self.database, schema);
        tracing::info!(table = %schema.name, %ddl, "creating table");
        self.run(&ddl).await
    }

    async fn truncate_table(&self, table: &str) -> Result<()> {
        tracing::info!(table, "truncating table");
        self.run(&sql::truncate(&self.database, table)).await
    }

    async fn count_rows(&self, table: &str) -> Result<u64> {
        let objects = self.fetch_objects(&sql::count(&self.database, table)).await?;
        let count = objects
            .first()
            .and_then(|o| o.get("n"))
            .and_then(|n| match n {
                serde_json::Value::String(s) => s.parse::<u64>().ok(),
                other => other.as_u64(),
            })
            .ok_or_else(|| BridgeError::Query(format!("count() returned no value for {}", table)))?;
        Ok(count)
    }

    async fn insert_join(&self, plan: &JoinPlan, statement_id: &str) -> Result<()> {
        self.ensure_not_closed()?;
        let statement = sql::insert_join(&self.database, plan);
        tracing::debug!(sql = %statement, statement_id, "executing join");
        self.client
            .query(&statement)
            .with_option("query_id", statement_id)
            .execute()
            .await
            .map_err(classify_error)
    }

    async fn cancel_statement(&self, statement_id: &str) -> Result<()> {
        tracing::info!(statement_id, "killing statement");
        self.run(&sql::kill_query(statement_id)).await
    }

    async fn ping(&self) -> Result<()> {
        self.run("SELECT 1").await
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        tracing::debug!("ClickHouse connection closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn as_schema_introspection(&self) -> Option<&dyn chbridge_core::SchemaIntrospection> {
        Some(self)
    }
}

impl std::fmt::Debug for ClickHouseConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClickHouseConnection")
            .field("database", &self.database)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}
