//! In-process table store implementing the driver and connection traits.
//!
//! `MemoryDriver` hands out `MemoryConnection`s that share one `MemoryStore`,
//! so a test can seed tables through the store, run a transfer through the
//! engine and then inspect what landed. Failures can be injected at connect,
//! ping, read and insert time.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    BridgeError, ColumnDef, Connection, ConnectionError, DatabaseDriver, DatabaseEndpoint,
    JoinPlan, Result, Row, RowCursor, SchemaError, SchemaIntrospection,
    SelectRequest, TableInfo, TableSchema, Value,
};

#[derive(Debug, Clone)]
struct MemoryTable {
    schema: TableSchema,
    rows: Vec<Row>,
}

/// Tables shared by every connection of a [`MemoryDriver`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<BTreeMap<String, MemoryTable>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create (or replace) a table with the given rows
    pub fn seed(&self, schema: TableSchema, rows: Vec<Row>) {
        let name = schema.name.clone();
        self.tables.lock().insert(name, MemoryTable { schema, rows });
    }

    pub fn rows(&self, table: &str) -> Option<Vec<Row>> {
        self.tables.lock().get(table).map(|t| t.rows.clone())
    }

    pub fn schema(&self, table: &str) -> Option<TableSchema> {
        self.tables.lock().get(table).map(|t| t.schema.clone())
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.lock().contains_key(table)
    }
}

#[derive(Debug, Default)]
struct FailurePlan {
    ping: bool,
    reads_after: Option<usize>,
    inserts_after: Option<u64>,
    stall_joins: bool,
}

/// Connection over a [`MemoryStore`]
pub struct MemoryConnection {
    id: usize,
    database: String,
    store: Arc<MemoryStore>,
    closed: AtomicBool,
    failures: Mutex<FailurePlan>,
    inserted: Mutex<u64>,
    sql_log: Mutex<Vec<String>>,
    cancelled: Mutex<Vec<String>>,
}

impl MemoryConnection {
    pub fn new(database: impl Into<String>, store: Arc<MemoryStore>) -> Self {
        Self::with_id(0, database, store)
    }

    fn with_id(id: usize, database: impl Into<String>, store: Arc<MemoryStore>) -> Self {
        Self {
            id,
            database: database.into(),
            store,
            closed: AtomicBool::new(false),
            failures: Mutex::new(FailurePlan::default()),
            inserted: Mutex::new(0),
            sql_log: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
        }
    }

    /// Sequence number assigned by the driver that opened this connection
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Make every subsequent ping fail
    pub fn fail_pings(&self, fail: bool) {
        self.failures.lock().ping = fail;
    }

    /// Cursors opened from now on fail after yielding `rows` rows
    pub fn fail_reads_after(&self, rows: usize) {
        self.failures.lock().reads_after = Some(rows);
    }

    /// Inserts fail once `rows` rows have been written through this connection
    pub fn fail_inserts_after(&self, rows: u64) {
        self.failures.lock().inserts_after = Some(rows);
    }

    /// Joins write their rows and then never return, as if the server were
    /// still running the statement
    pub fn stall_joins(&self, stall: bool) {
        self.failures.lock().stall_joins = stall;
    }

    /// Ids passed to `cancel_statement`, in order
    pub fn cancelled_statements(&self) -> Vec<String> {
        self.cancelled.lock().clone()
    }

    /// Statements seen by this connection, in order
    pub fn sql_log(&self) -> Vec<String> {
        self.sql_log.lock().clone()
    }

    fn log(&self, sql: impl Into<String>) {
        self.sql_log.lock().push(sql.into());
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(AtomicOrdering::SeqCst) {
            return Err(BridgeError::Connection(ConnectionError::Unreachable(
                "connection is closed".into(),
            )));
        }
        Ok(())
    }

    /// Evaluate a join plan against the store and append the result
    fn materialize_join(&self, plan: &JoinPlan) -> Result<()> {
        let mut tables = self.store.tables.lock();
        let left = tables.get(&plan.left).ok_or_else(|| Self::missing(&plan.left))?;
        let right = tables
            .get(&plan.right)
            .ok_or_else(|| Self::missing(&plan.right))?;

        let conditions = plan
            .conditions
            .iter()
            .map(|c| Ok((lookup(left, &c.left.column)?, c.op, lookup(right, &c.right.column)?)))
            .collect::<Result<Vec<_>>>()?;
        let outputs = plan
            .outputs
            .iter()
            .map(|o| {
                let from_left = o.source.table == plan.left;
                let table = if from_left { left } else { right };
                Ok((from_left, lookup(table, &o.source.column)?))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut joined = Vec::new();
        for l in &left.rows {
            for r in &right.rows {
                let matches = conditions.iter().all(|(li, op, ri)| {
                    match (l.get(*li), r.get(*ri)) {
                        (Some(a), Some(b)) => compare(a, b).is_some_and(|ord| op.holds(ord)),
                        _ => false,
                    }
                });
                if matches {
                    joined.push(Row::new(
                        outputs
                            .iter()
                            .map(|(from_left, i)| {
                                let source = if *from_left { l } else { r };
                                source.get(*i).cloned().unwrap_or(Value::Null)
                            })
                            .collect(),
                    ));
                }
            }
        }

        let target = tables
            .get_mut(&plan.target)
            .ok_or_else(|| Self::missing(&plan.target))?;
        let positions = plan
            .outputs
            .iter()
            .map(|o| lookup(target, &o.alias))
            .collect::<Result<Vec<_>>>()?;
        let width = target.schema.columns.len();
        for row in joined {
            let mut values = vec![Value::Null; width];
            for (value, &pos) in row.values.into_iter().zip(&positions) {
                values[pos] = value;
            }
            target.rows.push(Row::new(values));
        }
        Ok(())
    }

    fn missing(table: &str) -> BridgeError {
        BridgeError::Schema(SchemaError::NotFound(table.to_string()))
    }
}

impl std::fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("id", &self.id)
            .field("database", &self.database)
            .field("closed", &self.closed.load(AtomicOrdering::SeqCst))
            .finish()
    }
}

struct MemoryCursor {
    columns: Vec<ColumnDef>,
    rows: std::vec::IntoIter<Row>,
    yielded: usize,
    fail_after: Option<usize>,
}

#[async_trait]
impl RowCursor for MemoryCursor {
    fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    async fn next_row(&mut self) -> Result<Option<Row>> {
        if self.fail_after.is_some_and(|limit| self.yielded >= limit) {
            return Err(BridgeError::Connection(ConnectionError::Unreachable(
                "connection reset by peer".into(),
            )));
        }
        let row = self.rows.next();
        if row.is_some() {
            self.yielded += 1;
        }
        Ok(row)
    }
}

fn lookup(table: &MemoryTable, column: &str) -> Result<usize> {
    table.schema.position(column).ok_or_else(|| {
        BridgeError::Schema(SchemaError::UnknownColumn {
            table: table.schema.name.clone(),
            column: column.to_string(),
        })
    })
}

/// Ordering used by joins; NULL never compares
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Int64(x), Value::Int64(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Date(x), Value::Date(y)) => Some(x.cmp(y)),
        (Value::DateTime(x), Value::DateTime(y)) => Some(x.cmp(y)),
        _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn driver_name(&self) -> &str {
        "memory"
    }

    fn database(&self) -> &str {
        &self.database
    }

    async fn select_stream(&self, request: &SelectRequest) -> Result<Box<dyn RowCursor>> {
        self.ensure_open()?;
        self.log(format!("SELECT FROM {}", request.table));
        let tables = self.store.tables.lock();
        let table = tables
            .get(&request.table)
            .ok_or_else(|| Self::missing(&request.table))?;
        let positions = request
            .columns
            .iter()
            .map(|c| {
                table.schema.position(&c.name).ok_or_else(|| {
                    BridgeError::Schema(SchemaError::UnknownColumn {
                        table: request.table.clone(),
                        column: c.name.clone(),
                    })
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let limit = request.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        let rows: Vec<Row> = table
            .rows
            .iter()
            .take(limit)
            .map(|row| {
                Row::new(
                    positions
                        .iter()
                        .map(|&i| row.get(i).cloned().unwrap_or(Value::Null))
                        .collect(),
                )
            })
            .collect();
        Ok(Box::new(MemoryCursor {
            columns: request.columns.clone(),
            rows: rows.into_iter(),
            yielded: 0,
            fail_after: self.failures.lock().reads_after,
        }))
    }

    async fn insert_rows(&self, table: &str, columns: &[ColumnDef], rows: &[Row]) -> Result<u64> {
        self.ensure_open()?;
        self.log(format!("INSERT INTO {} ({} rows)", table, rows.len()));
        if let Some(limit) = self.failures.lock().inserts_after {
            if *self.inserted.lock() + rows.len() as u64 > limit {
                return Err(BridgeError::Query("insert failed: disk full".into()));
            }
        }
        let mut tables = self.store.tables.lock();
        let target = tables.get_mut(table).ok_or_else(|| Self::missing(table))?;
        let positions = columns
            .iter()
            .map(|c| {
                target.schema.position(&c.name).ok_or_else(|| {
                    BridgeError::Schema(SchemaError::UnknownColumn {
                        table: table.to_string(),
                        column: c.name.clone(),
                    })
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let width = target.schema.columns.len();
        for row in rows {
            let mut values = vec![Value::Null; width];
            for (value, &pos) in row.values.iter().zip(&positions) {
                values[pos] = value.clone();
            }
            target.rows.push(Row::new(values));
        }
        *self.inserted.lock() += rows.len() as u64;
        Ok(rows.len() as u64)
    }

    async fn create_table(&self, schema: &TableSchema) -> Result<()> {
        self.ensure_open()?;
        self.log(format!("CREATE TABLE {}", schema.name));
        let mut tables = self.store.tables.lock();
        if tables.contains_key(&schema.name) {
            return Err(BridgeError::Query(format!(
                "table {} already exists",
                schema.name
            )));
        }
        tables.insert(
            schema.name.clone(),
            MemoryTable {
                schema: schema.clone(),
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    async fn truncate_table(&self, table: &str) -> Result<()> {
        self.ensure_open()?;
        self.log(format!("TRUNCATE TABLE {}", table));
        let mut tables = self.store.tables.lock();
        let target = tables.get_mut(table).ok_or_else(|| Self::missing(table))?;
        target.rows.clear();
        Ok(())
    }

    async fn count_rows(&self, table: &str) -> Result<u64> {
        self.ensure_open()?;
        self.log(format!("SELECT count() FROM {}", table));
        let tables = self.store.tables.lock();
        let target = tables.get(table).ok_or_else(|| Self::missing(table))?;
        Ok(target.rows.len() as u64)
    }

    async fn insert_join(&self, plan: &JoinPlan, statement_id: &str) -> Result<()> {
        self.ensure_open()?;
        self.log(format!(
            "INSERT INTO {} SELECT FROM {} JOIN {} /* {} */",
            plan.target, plan.left, plan.right, statement_id
        ));
        self.materialize_join(plan)?;
        let stall = self.failures.lock().stall_joins;
        if stall {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn cancel_statement(&self, statement_id: &str) -> Result<()> {
        self.ensure_open()?;
        self.log(format!("KILL QUERY {}", statement_id));
        self.cancelled.lock().push(statement_id.to_string());
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.ensure_open()?;
        self.log("SELECT 1");
        if self.failures.lock().ping {
            return Err(BridgeError::Connection(ConnectionError::Unreachable(
                "ping failed".into(),
            )));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, AtomicOrdering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(AtomicOrdering::SeqCst)
    }

    fn as_schema_introspection(&self) -> Option<&dyn SchemaIntrospection> {
        Some(self)
    }
}

#[async_trait]
impl SchemaIntrospection for MemoryConnection {
    async fn list_tables(&self) -> Result<Vec<TableInfo>> {
        self.ensure_open()?;
        let tables = self.store.tables.lock();
        Ok(tables
            .values()
            .map(|t| TableInfo {
                name: t.schema.name.clone(),
                engine: Some("Memory".into()),
                row_count: Some(t.rows.len() as u64),
            })
            .collect())
    }

    async fn describe_table(&self, table: &str) -> Result<TableSchema> {
        self.ensure_open()?;
        self.store
            .schema(table)
            .ok_or_else(|| Self::missing(table))
    }
}

/// Driver over a shared [`MemoryStore`]
pub struct MemoryDriver {
    store: Arc<MemoryStore>,
    connects: AtomicUsize,
    failure: Mutex<Option<ConnectionError>>,
    opened: Mutex<Vec<Arc<MemoryConnection>>>,
}

impl MemoryDriver {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            connects: AtomicUsize::new(0),
            failure: Mutex::new(None),
            opened: Mutex::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Number of successful `connect` calls
    pub fn connect_count(&self) -> usize {
        self.connects.load(AtomicOrdering::SeqCst)
    }

    /// Make `connect` fail with `error` until cleared with `None`
    pub fn fail_connects(&self, error: Option<ConnectionError>) {
        *self.failure.lock() = error;
    }

    /// Every connection this driver opened, oldest first
    pub fn connections(&self) -> Vec<Arc<MemoryConnection>> {
        self.opened.lock().clone()
    }

    pub fn last_connection(&self) -> Option<Arc<MemoryConnection>> {
        self.opened.lock().last().cloned()
    }
}

#[async_trait]
impl DatabaseDriver for MemoryDriver {
    fn id(&self) -> &'static str {
        "memory"
    }

    fn name(&self) -> &'static str {
        "memory"
    }

    fn display_name(&self) -> &'static str {
        "In-memory"
    }

    async fn connect(&self, endpoint: &DatabaseEndpoint) -> Result<Arc<dyn Connection>> {
        if let Some(error) = self.failure.lock().clone() {
            return Err(BridgeError::Connection(error));
        }
        let id = self.connects.fetch_add(1, AtomicOrdering::SeqCst);
        let conn = Arc::new(MemoryConnection::with_id(
            id,
            endpoint.database(),
            self.store.clone(),
        ));
        self.opened.lock().push(conn.clone());
        Ok(conn)
    }
}
