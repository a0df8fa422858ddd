//! Schema model and introspection trait

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Result, SchemaError};

/// Schema introspection interface
#[async_trait]
pub trait SchemaIntrospection: Send + Sync {
    /// List all tables in the connection's database
    async fn list_tables(&self) -> Result<Vec<TableInfo>>;

    /// Describe a table, failing with `SchemaError::NotFound` if it does not exist
    async fn describe_table(&self, table: &str) -> Result<TableSchema>;

    /// Check whether a table exists
    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.list_tables().await?.iter().any(|t| t.name == table))
    }
}

/// Logical column type shared by both endpoint kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Integer,
    Float,
    String,
    Boolean,
    DateTime,
    /// Type not known (flat-file columns before inference, or exotic server types)
    Unknown,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Integer => "Integer",
            ColumnType::Float => "Float",
            ColumnType::String => "String",
            ColumnType::Boolean => "Boolean",
            ColumnType::DateTime => "DateTime",
            ColumnType::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, typed column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    /// Native type name reported by the server, e.g. `Nullable(Int64)`
    pub data_type: Option<String>,
    pub nullable: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            data_type: None,
            nullable: true,
        }
    }

    pub fn with_data_type(mut self, data_type: impl Into<String>, nullable: bool) -> Self {
        self.data_type = Some(data_type.into());
        self.nullable = nullable;
        self
    }
}

/// Ordered column definitions of a table or flat file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// Table listing entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub engine: Option<String>,
    pub row_count: Option<u64>,
}

impl TableInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            engine: None,
            row_count: None,
        }
    }
}

/// An ordered, non-empty set of distinct column names.
///
/// Construction only checks shape; membership in a source schema is checked by
/// [`ColumnProjection::resolve`] before any stream is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ColumnProjection {
    columns: Vec<String>,
}

impl ColumnProjection {
    pub fn new<I, S>(columns: I) -> std::result::Result<Self, SchemaError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        if columns.is_empty() {
            return Err(SchemaError::EmptyProjection);
        }
        let mut seen = HashSet::with_capacity(columns.len());
        for column in &columns {
            if !seen.insert(column.as_str()) {
                return Err(SchemaError::DuplicateColumn(column.clone()));
            }
        }
        Ok(Self { columns })
    }

    /// Every column of the schema in schema order
    pub fn all(schema: &TableSchema) -> std::result::Result<Self, SchemaError> {
        Self::new(schema.column_names())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(String::as_str)
    }

    /// Resolve each projected name against `schema`, in projection order.
    /// Fails on the first name the schema does not contain.
    pub fn resolve(&self, schema: &TableSchema) -> std::result::Result<Vec<ColumnDef>, SchemaError> {
        self.columns
            .iter()
            .map(|name| {
                schema
                    .column(name)
                    .cloned()
                    .ok_or_else(|| SchemaError::UnknownColumn {
                        table: schema.name.clone(),
                        column: name.clone(),
                    })
            })
            .collect()
    }

    /// Positions of the projected columns within `schema`
    pub fn positions(&self, schema: &TableSchema) -> std::result::Result<Vec<usize>, SchemaError> {
        self.columns
            .iter()
            .map(|name| {
                schema.position(name).ok_or_else(|| SchemaError::UnknownColumn {
                    table: schema.name.clone(),
                    column: name.clone(),
                })
            })
            .collect()
    }
}

impl TryFrom<Vec<String>> for ColumnProjection {
    type Error = SchemaError;

    fn try_from(columns: Vec<String>) -> std::result::Result<Self, Self::Error> {
        Self::new(columns)
    }
}

impl From<ColumnProjection> for Vec<String> {
    fn from(projection: ColumnProjection) -> Self {
        projection.columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders() -> TableSchema {
        TableSchema::new(
            "orders",
            vec![
                ColumnDef::new("id", ColumnType::Integer),
                ColumnDef::new("total", ColumnType::Float),
                ColumnDef::new("placed_at", ColumnType::DateTime),
            ],
        )
    }

    #[test]
    fn test_projection_rejects_empty() {
        let empty: Vec<String> = Vec::new();
        assert_eq!(ColumnProjection::new(empty), Err(SchemaError::EmptyProjection));
    }

    #[test]
    fn test_projection_rejects_duplicates() {
        assert_eq!(
            ColumnProjection::new(["id", "total", "id"]),
            Err(SchemaError::DuplicateColumn("id".to_string()))
        );
    }

    #[test]
    fn test_resolve_keeps_projection_order() {
        let projection = ColumnProjection::new(["total", "id"]).unwrap();
        let resolved = projection.resolve(&orders()).unwrap();
        let names: Vec<_> = resolved.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["total", "id"]);
        assert_eq!(resolved[0].column_type, ColumnType::Float);
        assert_eq!(projection.positions(&orders()).unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_resolve_names_first_unknown_column() {
        let projection = ColumnProjection::new(["id", "discount", "coupon"]).unwrap();
        assert_eq!(
            projection.resolve(&orders()),
            Err(SchemaError::UnknownColumn {
                table: "orders".to_string(),
                column: "discount".to_string(),
            })
        );
    }

    #[test]
    fn test_projection_deserialize_validates() {
        let ok: ColumnProjection = serde_json::from_str(r#"["a","b"]"#).unwrap();
        assert_eq!(ok.columns(), &["a".to_string(), "b".to_string()]);
        assert!(serde_json::from_str::<ColumnProjection>("[]").is_err());
    }

    #[test]
    fn test_all_uses_schema_order() {
        let projection = ColumnProjection::all(&orders()).unwrap();
        assert_eq!(projection.len(), 3);
        assert_eq!(projection.iter().next(), Some("id"));
    }
}
