//! Column type inference for flat files without a target table

use chbridge_core::{ColumnType, Row, Value};

use crate::value_encoding::parse_datetime;

/// Default number of data rows sampled before creating a table
pub const DEFAULT_SAMPLE_SIZE: usize = 100;

#[derive(Debug, Clone, Copy)]
struct Candidates {
    seen: bool,
    integer: bool,
    float: bool,
    datetime: bool,
}

impl Default for Candidates {
    fn default() -> Self {
        Self {
            seen: false,
            integer: true,
            float: true,
            datetime: true,
        }
    }
}

impl Candidates {
    fn observe(&mut self, raw: &str) {
        let raw = raw.trim();
        if raw.is_empty() {
            return;
        }
        self.seen = true;
        if self.integer && raw.parse::<i64>().is_err() {
            self.integer = false;
        }
        if self.float && raw.parse::<f64>().is_err() {
            self.float = false;
        }
        if self.datetime && parse_datetime(raw).is_none() {
            self.datetime = false;
        }
    }

    fn resolve(self) -> ColumnType {
        if !self.seen {
            ColumnType::String
        } else if self.integer {
            ColumnType::Integer
        } else if self.float {
            ColumnType::Float
        } else if self.datetime {
            ColumnType::DateTime
        } else {
            ColumnType::String
        }
    }
}

/// Accumulates observations column by column
#[derive(Debug, Clone)]
pub struct TypeInference {
    columns: Vec<Candidates>,
}

impl TypeInference {
    pub fn new(width: usize) -> Self {
        Self {
            columns: vec![Candidates::default(); width],
        }
    }

    /// Record one row of raw text values. NULLs and empty strings carry no
    /// information.
    pub fn observe(&mut self, row: &Row) {
        for (candidates, value) in self.columns.iter_mut().zip(&row.values) {
            if let Value::String(raw) = value {
                candidates.observe(raw);
            }
        }
    }

    pub fn finish(self) -> Vec<ColumnType> {
        self.columns.into_iter().map(Candidates::resolve).collect()
    }
}

/// Infer one type per column from sampled rows of raw text
pub fn infer_column_types(width: usize, rows: &[Row]) -> Vec<ColumnType> {
    let mut inference = TypeInference::new(width);
    for row in rows {
        inference.observe(row);
    }
    inference.finish()
}
