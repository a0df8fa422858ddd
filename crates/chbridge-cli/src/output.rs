//! Terminal rendering of service results

use chbridge_services::{ColumnInfo, ProgressView};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use serde::Serialize;

pub struct Output {
    json: bool,
}

impl Output {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn is_json(&self) -> bool {
        self.json
    }

    /// Print `value` as pretty JSON
    pub fn json<T: Serialize>(&self, value: &T) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    pub fn table(&self, header: Vec<String>, rows: Vec<Vec<String>>) {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(header);
        for row in rows {
            table.add_row(row);
        }
        println!("{table}");
    }

    pub fn columns(&self, columns: &[ColumnInfo]) {
        let rows = columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                vec![
                    (i + 1).to_string(),
                    c.name.clone(),
                    c.column_type.clone(),
                    c.data_type.clone().unwrap_or_default(),
                    if c.nullable { "yes".into() } else { "no".into() },
                ]
            })
            .collect();
        self.table(
            ["#", "column", "type", "native type", "nullable"]
                .map(String::from)
                .to_vec(),
            rows,
        );
    }

    /// One progress line on stderr, so stdout stays clean for results
    pub fn progress(&self, event: &ProgressView) {
        if self.json {
            if let Ok(line) = serde_json::to_string(event) {
                eprintln!("{line}");
            }
            return;
        }
        let percent = match event.percent {
            Some(p) => format!("{p:5.1}%"),
            None => "    ?%".to_string(),
        };
        let skipped = if event.rows_skipped > 0 {
            format!(", {} skipped", event.rows_skipped)
        } else {
            String::new()
        };
        match &event.error {
            Some(error) => eprintln!(
                "[{percent}] {} rows{skipped}: {} ({error})",
                event.rows_processed, event.status
            ),
            None => eprintln!(
                "[{percent}] {} rows{skipped}: {}",
                event.rows_processed, event.status
            ),
        }
    }
}
