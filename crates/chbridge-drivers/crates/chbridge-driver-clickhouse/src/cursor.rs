//! Streaming JSONEachRow cursor
//!
//! Rows are decoded one network chunk at a time: a chunk is split on newlines,
//! complete lines become rows, and a trailing partial line is carried over to
//! the next chunk. At most one chunk of rows is buffered.

use std::collections::VecDeque;

use async_trait::async_trait;
use chbridge_core::{BridgeError, ColumnDef, Result, Row, RowCursor, Value};
use clickhouse::query::BytesCursor;

use crate::driver::classify_error;
use crate::types::json_to_value;

/// Incremental JSONEachRow decoder
#[derive(Debug)]
pub(crate) struct RowDecoder {
    columns: Vec<ColumnDef>,
    partial: Vec<u8>,
    ready: VecDeque<Row>,
}

impl RowDecoder {
    pub(crate) fn new(columns: Vec<ColumnDef>) -> Self {
        Self {
            columns,
            partial: Vec::new(),
            ready: VecDeque::new(),
        }
    }

    pub(crate) fn pop(&mut self) -> Option<Row> {
        self.ready.pop_front()
    }

    /// Decode every complete line in `chunk`, keeping the unterminated tail
    pub(crate) fn feed(&mut self, chunk: &[u8]) -> Result<()> {
        self.partial.extend_from_slice(chunk);
        let Some(last_newline) = self.partial.iter().rposition(|b| *b == b'\n') else {
            return Ok(());
        };
        let rest = self.partial.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.partial, rest);
        for line in complete.split(|b| *b == b'\n') {
            if let Some(row) = self.decode_line(line)? {
                self.ready.push_back(row);
            }
        }
        Ok(())
    }

    /// Decode the final line of a stream that does not end in a newline
    pub(crate) fn finish(&mut self) -> Result<()> {
        let tail = std::mem::take(&mut self.partial);
        if let Some(row) = self.decode_line(&tail)? {
            self.ready.push_back(row);
        }
        Ok(())
    }

    fn decode_line(&self, line: &[u8]) -> Result<Option<Row>> {
        let text = std::str::from_utf8(line)
            .map_err(|e| BridgeError::Query(format!("invalid UTF-8 in result: {}", e)))?
            .trim();
        if text.is_empty() {
            return Ok(None);
        }
        // A failing query appends the server exception text to the stream
        let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(text)
            .map_err(|_| BridgeError::Query(format!("unexpected data in result stream: {}", text)))?;
        let values = self
            .columns
            .iter()
            .map(|c| {
                object
                    .get(&c.name)
                    .map(|v| json_to_value(v, c.column_type))
                    .unwrap_or(Value::Null)
            })
            .collect();
        Ok(Some(Row::new(values)))
    }
}

/// Row cursor over an HTTP result body
pub struct JsonEachRowCursor {
    inner: BytesCursor,
    decoder: RowDecoder,
    finished: bool,
}

impl JsonEachRowCursor {
    pub fn new(inner: BytesCursor, columns: Vec<ColumnDef>) -> Self {
        Self {
            inner,
            decoder: RowDecoder::new(columns),
            finished: false,
        }
    }
}

#[async_trait]
impl RowCursor for JsonEachRowCursor {
    fn columns(&self) -> &[ColumnDef] {
        &self.decoder.columns
    }

    async fn next_row(&mut self) -> Result<Option<Row>> {
        loop {
            if let Some(row) = self.decoder.pop() {
                return Ok(Some(row));
            }
            if self.finished {
                return Ok(None);
            }
            match self.inner.next().await.map_err(classify_error)? {
                Some(chunk) => self.decoder.feed(&chunk)?,
                None => {
                    self.finished = true;
                    self.decoder.finish()?;
                }
            }
        }
    }
}
