//! SQL rendering for the ClickHouse dialect
//!
//! The HTTP client treats `?` in query text as a bind placeholder. Every
//! user-supplied fragment that may contain one (identifiers, string literals,
//! JSON rows) is escaped so it reaches the server unchanged.

use chbridge_core::{
    ColumnDef, CompareOp, JoinPlan, Row, SelectRequest, TableSchema,
};

use crate::types::{cell_to_json, ddl_type};

/// Quote an identifier with backticks. `??` is the client's escape for a
/// literal `?`.
pub fn quote_ident(name: &str) -> String {
    let escaped = name
        .replace('\\', "\\\\")
        .replace('`', "\\`")
        .replace('?', "??");
    format!("`{}`", escaped)
}

/// Render a single-quoted string literal
pub fn quote_literal(value: &str) -> String {
    let escaped = value
        .replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace('?', "\\x3F");
    format!("'{}'", escaped)
}

/// `database`.`table`
pub fn qualified(database: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(database), quote_ident(table))
}

fn column_list(columns: &[ColumnDef]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn select(database: &str, request: &SelectRequest) -> String {
    let mut sql = format!(
        "SELECT {} FROM {}",
        column_list(&request.columns),
        qualified(database, &request.table)
    );
    if let Some(limit) = request.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    sql
}

pub fn count(database: &str, table: &str) -> String {
    format!("SELECT count() AS n FROM {}", qualified(database, table))
}

pub fn truncate(database: &str, table: &str) -> String {
    format!("TRUNCATE TABLE {}", qualified(database, table))
}

pub fn create_table(database: &str, schema: &TableSchema) -> String {
    let columns = schema
        .columns
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), ddl_type(c)))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE TABLE {} ({}) ENGINE = MergeTree ORDER BY tuple()",
        qualified(database, &schema.name),
        columns
    )
}

/// `INSERT ... FORMAT JSONEachRow` with the batch inlined as the request body
pub fn insert_json_rows(database: &str, table: &str, columns: &[ColumnDef], rows: &[Row]) -> String {
    let mut sql = format!(
        "INSERT INTO {} ({}) FORMAT JSONEachRow\n",
        qualified(database, table),
        column_list(columns)
    );
    for row in rows {
        let object: serde_json::Map<String, serde_json::Value> = columns
            .iter()
            .zip(&row.values)
            .map(|(column, value)| (column.name.clone(), cell_to_json(column, value)))
            .collect();
        let line = serde_json::Value::Object(object).to_string();
        sql.push_str(&line.replace('?', "\\u003f"));
        sql.push('\n');
    }
    sql
}

/// Stop a running statement and wait for it to finish
pub fn kill_query(query_id: &str) -> String {
    format!("KILL QUERY WHERE query_id = {} SYNC", quote_literal(query_id))
}

const LEFT_ALIAS: &str = "l";
const RIGHT_ALIAS: &str = "r";

/// `INSERT INTO target SELECT ... FROM left JOIN right`.
///
/// Equality terms go into `ON`; other comparisons are filtered in `WHERE` so
/// the statement stays valid for the hash join algorithm. Without any
/// equality the join becomes a filtered `CROSS JOIN`.
pub fn insert_join(database: &str, plan: &JoinPlan) -> String {
    let side = |table: &str| if table == plan.left { LEFT_ALIAS } else { RIGHT_ALIAS };

    let projections = plan
        .outputs
        .iter()
        .map(|o| {
            format!(
                "{}.{} AS {}",
                side(&o.source.table),
                quote_ident(&o.source.column),
                quote_ident(&o.alias)
            )
        })
        .collect::<Vec<_>>()
        .join(", ");

    let render = |op: CompareOp, left: &str, right: &str| {
        format!(
            "{}.{} {} {}.{}",
            LEFT_ALIAS,
            quote_ident(left),
            op.as_sql(),
            RIGHT_ALIAS,
            quote_ident(right)
        )
    };
    let (equalities, filters): (Vec<_>, Vec<_>) =
        plan.conditions.iter().partition(|c| c.op == CompareOp::Eq);

    let mut sql = format!(
        "INSERT INTO {} ({}) SELECT {} FROM {} AS {}",
        qualified(database, &plan.target),
        plan.outputs
            .iter()
            .map(|o| quote_ident(&o.alias))
            .collect::<Vec<_>>()
            .join(", "),
        projections,
        qualified(database, &plan.left),
        LEFT_ALIAS
    );
    if equalities.is_empty() {
        sql.push_str(&format!(
            " CROSS JOIN {} AS {}",
            qualified(database, &plan.right),
            RIGHT_ALIAS
        ));
    } else {
        let on = equalities
            .iter()
            .map(|c| render(c.op, &c.left.column, &c.right.column))
            .collect::<Vec<_>>()
            .join(" AND ");
        sql.push_str(&format!(
            " INNER JOIN {} AS {} ON {}",
            qualified(database, &plan.right),
            RIGHT_ALIAS,
            on
        ));
    }
    if !filters.is_empty() {
        let filter = filters
            .iter()
            .map(|c| render(c.op, &c.left.column, &c.right.column))
            .collect::<Vec<_>>()
            .join(" AND ");
        sql.push_str(&format!(" WHERE {}", filter));
    }
    sql
}
