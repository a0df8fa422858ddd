//! Server-side joins materialized into a target table
//!
//! The predicate is parsed and every column is resolved against both table
//! schemas before anything runs, so a bad request never touches the server.
//! The join itself executes as one `INSERT ... SELECT` statement.

use std::collections::{HashMap, HashSet};

use chbridge_core::{
    ColumnDef, ColumnProjection, ColumnRef, CompareOp, Connection, JoinCondition, JoinOutput,
    JoinPlan, SchemaError, TableSchema,
};
use sqlparser::ast::{BinaryOperator, Expr};
use sqlparser::dialect::ClickHouseDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::Token;

use crate::error::{JoinError, TransferError};
use crate::exporter::{describe, introspection};
use crate::progress::ProgressTracker;

/// A join as requested by the caller
#[derive(Debug, Clone)]
pub struct JoinSpec {
    pub left: String,
    pub right: String,
    /// Conjunction of column comparisons, e.g. `orders.customer_id = customers.id`
    pub predicate: String,
    pub target: String,
    /// Output columns, bare (`name`) or qualified (`customers.name`)
    pub projection: ColumnProjection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

struct JoinTables<'a> {
    left: &'a TableSchema,
    right: &'a TableSchema,
}

impl<'a> JoinTables<'a> {
    fn schema(&self, side: Side) -> &'a TableSchema {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }

    fn side_of(&self, table: &str) -> Option<Side> {
        if table == self.left.name {
            Some(Side::Left)
        } else if table == self.right.name {
            Some(Side::Right)
        } else {
            None
        }
    }

    fn resolve(
        &self,
        qualifier: Option<&str>,
        column: &str,
    ) -> Result<(Side, &'a ColumnDef), JoinError> {
        match qualifier {
            Some(table) => {
                let side = self
                    .side_of(table)
                    .ok_or_else(|| JoinError::UnknownColumn(format!("{}.{}", table, column)))?;
                self.schema(side)
                    .column(column)
                    .map(|def| (side, def))
                    .ok_or_else(|| JoinError::UnknownColumn(format!("{}.{}", table, column)))
            }
            None => match (self.left.column(column), self.right.column(column)) {
                (Some(_), Some(_)) => Err(JoinError::AmbiguousColumn {
                    column: column.to_string(),
                    left: self.left.name.clone(),
                    right: self.right.name.clone(),
                }),
                (Some(def), None) => Ok((Side::Left, def)),
                (None, Some(def)) => Ok((Side::Right, def)),
                (None, None) => Err(JoinError::UnknownColumn(column.to_string())),
            },
        }
    }

    fn column_ref(&self, side: Side, def: &ColumnDef) -> ColumnRef {
        ColumnRef::new(&self.schema(side).name, &def.name)
    }

    /// Resolve an identifier expression from the predicate
    fn resolve_expr(&self, expr: &Expr) -> Result<(Side, ColumnRef), JoinError> {
        let (qualifier, column) = match expr {
            Expr::Identifier(ident) => (None, ident.value.as_str()),
            Expr::CompoundIdentifier(parts) if parts.len() == 2 => {
                (Some(parts[0].value.as_str()), parts[1].value.as_str())
            }
            Expr::Nested(inner) => return self.resolve_expr(inner),
            other => {
                return Err(JoinError::InvalidPredicate(format!(
                    "expected a column reference, found `{}`",
                    other
                )));
            }
        };
        let (side, def) = self.resolve(qualifier, column)?;
        Ok((side, self.column_ref(side, def)))
    }

    /// Resolve a projection entry, which may be qualified by a table name
    fn resolve_output(&self, entry: &str) -> Result<(Side, &'a ColumnDef), JoinError> {
        if let Some((table, column)) = entry.split_once('.') {
            if self.side_of(table).is_some() {
                return self.resolve(Some(table), column);
            }
        }
        self.resolve(None, entry)
    }
}

fn compare_op(op: &BinaryOperator) -> Option<CompareOp> {
    match op {
        BinaryOperator::Eq => Some(CompareOp::Eq),
        BinaryOperator::NotEq => Some(CompareOp::NotEq),
        BinaryOperator::Lt => Some(CompareOp::Lt),
        BinaryOperator::LtEq => Some(CompareOp::LtEq),
        BinaryOperator::Gt => Some(CompareOp::Gt),
        BinaryOperator::GtEq => Some(CompareOp::GtEq),
        _ => None,
    }
}

fn collect_conditions(
    expr: &Expr,
    tables: &JoinTables<'_>,
    conditions: &mut Vec<JoinCondition>,
) -> Result<(), JoinError> {
    match expr {
        Expr::Nested(inner) => collect_conditions(inner, tables, conditions),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_conditions(left, tables, conditions)?;
            collect_conditions(right, tables, conditions)
        }
        Expr::BinaryOp { left, op, right } => {
            let op = compare_op(op).ok_or_else(|| {
                JoinError::InvalidPredicate(format!("unsupported operator `{}`", op))
            })?;
            let (left_side, left_ref) = tables.resolve_expr(left)?;
            let (right_side, right_ref) = tables.resolve_expr(right)?;
            let condition = match (left_side, right_side) {
                (Side::Left, Side::Right) => JoinCondition {
                    left: left_ref,
                    op,
                    right: right_ref,
                },
                (Side::Right, Side::Left) => JoinCondition {
                    left: right_ref,
                    op: op.flipped(),
                    right: left_ref,
                },
                _ => {
                    return Err(JoinError::InvalidPredicate(format!(
                        "`{}` must compare a column of '{}' with a column of '{}'",
                        expr, tables.left.name, tables.right.name
                    )));
                }
            };
            conditions.push(condition);
            Ok(())
        }
        other => Err(JoinError::InvalidPredicate(format!(
            "unsupported expression `{}`",
            other
        ))),
    }
}

/// Parse a predicate into a conjunction of comparisons
fn parse_predicate(predicate: &str, tables: &JoinTables<'_>) -> Result<Vec<JoinCondition>, JoinError> {
    let dialect = ClickHouseDialect {};
    let mut parser = Parser::new(&dialect)
        .try_with_sql(predicate)
        .map_err(|e| JoinError::InvalidPredicate(e.to_string()))?;
    let expr = parser
        .parse_expr()
        .map_err(|e| JoinError::InvalidPredicate(e.to_string()))?;
    let trailing = parser.peek_token();
    if trailing.token != Token::EOF {
        return Err(JoinError::InvalidPredicate(format!(
            "unexpected `{}` after expression",
            trailing.token
        )));
    }

    let mut conditions = Vec::new();
    collect_conditions(&expr, tables, &mut conditions)?;
    Ok(conditions)
}

/// Resolve a join request against both table schemas.
///
/// Returns the plan and the schema of the target table. Output columns keep
/// their bare names unless two of them share one, in which case each of those
/// becomes `<table>_<column>`.
pub fn plan_join(
    spec: &JoinSpec,
    left: &TableSchema,
    right: &TableSchema,
) -> Result<(JoinPlan, TableSchema), TransferError> {
    if spec.left == spec.right {
        return Err(JoinError::SameTable(spec.left.clone()).into());
    }
    let tables = JoinTables { left, right };
    let conditions = parse_predicate(&spec.predicate, &tables)?;

    let resolved = spec
        .projection
        .iter()
        .map(|entry| tables.resolve_output(entry))
        .collect::<Result<Vec<_>, _>>()?;

    let mut sources = HashSet::new();
    let mut bare_counts: HashMap<&str, usize> = HashMap::new();
    for (side, def) in &resolved {
        let source = tables.column_ref(*side, def);
        if !sources.insert(source.clone()) {
            return Err(SchemaError::DuplicateColumn(source.to_string()).into());
        }
        *bare_counts.entry(def.name.as_str()).or_default() += 1;
    }

    let mut outputs = Vec::with_capacity(resolved.len());
    let mut columns = Vec::with_capacity(resolved.len());
    let mut aliases = HashSet::new();
    for (side, def) in resolved {
        let source = tables.column_ref(side, def);
        let alias = if bare_counts[def.name.as_str()] > 1 {
            format!("{}_{}", source.table, source.column)
        } else {
            def.name.clone()
        };
        if !aliases.insert(alias.clone()) {
            return Err(SchemaError::DuplicateColumn(alias).into());
        }
        let mut column = def.clone();
        column.name = alias.clone();
        columns.push(column);
        outputs.push(JoinOutput { source, alias });
    }

    let plan = JoinPlan {
        left: spec.left.clone(),
        right: spec.right.clone(),
        conditions,
        outputs,
        target: spec.target.clone(),
    };
    Ok((plan, TableSchema::new(&spec.target, columns)))
}

/// Runs joins on the server
#[derive(Debug, Clone, Default)]
pub struct JoinEngine;

impl JoinEngine {
    pub fn new() -> Self {
        Self
    }

    /// Validate the join, create the target table if needed and materialize
    /// the result. Returns the number of rows added to the target.
    #[tracing::instrument(
        skip(self, connection, spec, tracker),
        fields(left = %spec.left, right = %spec.right, target = %spec.target)
    )]
    pub async fn join(
        &self,
        connection: &dyn Connection,
        spec: &JoinSpec,
        tracker: &ProgressTracker,
    ) -> Result<u64, TransferError> {
        if spec.left == spec.right {
            return Err(JoinError::SameTable(spec.left.clone()).into());
        }
        let left = describe(connection, &spec.left).await?;
        let right = describe(connection, &spec.right).await?;
        let (plan, target_schema) = plan_join(spec, &left, &right)?;

        let before = if introspection(connection)?.table_exists(&spec.target).await? {
            let existing = describe(connection, &spec.target).await?;
            for column in &target_schema.columns {
                if existing.column(&column.name).is_none() {
                    return Err(SchemaError::UnknownColumn {
                        table: spec.target.clone(),
                        column: column.name.clone(),
                    }
                    .into());
                }
            }
            connection.count_rows(&spec.target).await?
        } else {
            connection.create_table(&target_schema).await?;
            tracing::info!("target table created");
            0
        };

        if tracker.is_cancelled() {
            return Err(TransferError::Cancelled { rows_committed: 0 });
        }
        tracker.begin();

        let statement_id = format!("chbridge-join-{}", tracker.job_id());
        let token = tracker.cancellation_token().clone();
        tokio::select! {
            _ = token.cancelled() => {
                tracing::warn!(%statement_id, "join cancelled while running on the server");
                if let Err(e) = connection.cancel_statement(&statement_id).await {
                    tracing::warn!(error = %e, "server statement could not be stopped");
                }
                let after = connection.count_rows(&spec.target).await.unwrap_or(before);
                return Err(TransferError::Cancelled {
                    rows_committed: after.saturating_sub(before),
                });
            }
            result = connection.insert_join(&plan, &statement_id) => result?,
        }

        let after = connection.count_rows(&spec.target).await?;
        let added = after.saturating_sub(before);
        tracker.advance(added, 0);
        if tracker.is_cancelled() {
            return Err(TransferError::Cancelled {
                rows_committed: added,
            });
        }

        tracing::info!(rows = added, "join materialized");
        Ok(added)
    }
}
