//! ClickHouse schema introspection implementation

use async_trait::async_trait;
use chbridge_core::{
    BridgeError, Result, SchemaError, SchemaIntrospection, TableInfo, TableSchema,
};

use super::ClickHouseConnection;
use crate::sql::quote_literal;
use crate::types::column_def;

fn text<'a>(object: &'a serde_json::Map<String, serde_json::Value>, key: &str) -> Option<&'a str> {
    object.get(key).and_then(|v| v.as_str())
}

#[async_trait]
impl SchemaIntrospection for ClickHouseConnection {
    #[tracing::instrument(skip(self), fields(database = %self.database_name()))]
    async fn list_tables(&self) -> Result<Vec<TableInfo>> {
        let objects = self
            .fetch_objects(&format!(
                "SELECT name, engine, total_rows
                 FROM system.tables
                 WHERE database = {} AND is_temporary = 0
                 ORDER BY name",
                quote_literal(self.database_name())
            ))
            .await?;

        Ok(objects
            .iter()
            .filter_map(|object| {
                Some(TableInfo {
                    name: text(object, "name")?.to_string(),
                    engine: text(object, "engine").map(str::to_string),
                    // total_rows is a quoted Nullable(UInt64)
                    row_count: object.get("total_rows").and_then(|v| match v {
                        serde_json::Value::String(s) => s.parse().ok(),
                        other => other.as_u64(),
                    }),
                })
            })
            .collect())
    }

    #[tracing::instrument(skip(self), fields(database = %self.database_name()))]
    async fn describe_table(&self, table: &str) -> Result<TableSchema> {
        let objects = self
            .fetch_objects(&format!(
                "SELECT name, type
                 FROM system.columns
                 WHERE database = {} AND table = {}
                 ORDER BY position",
                quote_literal(self.database_name()),
                quote_literal(table)
            ))
            .await?;

        // Every existing table has at least one column
        if objects.is_empty() {
            return Err(BridgeError::Schema(SchemaError::NotFound(table.to_string())));
        }

        let columns = objects
            .iter()
            .filter_map(|object| Some(column_def(text(object, "name")?, text(object, "type")?)))
            .collect();
        Ok(TableSchema::new(table, columns))
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let objects = self
            .fetch_objects(&format!(
                "SELECT 1 AS found FROM system.tables WHERE database = {} AND name = {}",
                quote_literal(self.database_name()),
                quote_literal(table)
            ))
            .await?;
        Ok(!objects.is_empty())
    }
}
