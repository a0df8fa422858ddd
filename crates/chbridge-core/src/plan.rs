//! Resolved join plans
//!
//! A [`JoinPlan`] is what remains of a join request after the predicate has been
//! parsed and every column reference checked against both table schemas. Drivers
//! only render plans; they never see raw predicate text.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A column qualified by the table it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// Comparison operator allowed in a join predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "!=",
            CompareOp::Lt => "<",
            CompareOp::LtEq => "<=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
        }
    }

    /// The operator with its operands swapped: `a < b` is `b > a`
    pub fn flipped(&self) -> CompareOp {
        match self {
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::LtEq => CompareOp::GtEq,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::GtEq => CompareOp::LtEq,
            other => *other,
        }
    }

    /// Evaluate the operator on two ordered values
    pub fn holds(&self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            CompareOp::Eq => ordering == Equal,
            CompareOp::NotEq => ordering != Equal,
            CompareOp::Lt => ordering == Less,
            CompareOp::LtEq => ordering != Greater,
            CompareOp::Gt => ordering == Greater,
            CompareOp::GtEq => ordering != Less,
        }
    }
}

/// One `left op right` term of the join predicate; `left` always refers to the
/// plan's left table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinCondition {
    pub left: ColumnRef,
    pub op: CompareOp,
    pub right: ColumnRef,
}

/// A projected source column and the name it gets in the target table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinOutput {
    pub source: ColumnRef,
    pub alias: String,
}

/// Fully resolved inner join of two tables into a target table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinPlan {
    pub left: String,
    pub right: String,
    /// Conjunction of comparisons
    pub conditions: Vec<JoinCondition>,
    pub outputs: Vec<JoinOutput>,
    pub target: String,
}

impl JoinPlan {
    pub fn output_names(&self) -> Vec<String> {
        self.outputs.iter().map(|o| o.alias.clone()).collect()
    }
}
