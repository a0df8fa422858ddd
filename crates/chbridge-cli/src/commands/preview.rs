use anyhow::Result;
use chbridge_core::{ColumnProjection, DatabaseEndpoint, FlatFileEndpoint};
use chbridge_services::{PreviewData, TransferService};

use crate::output::Output;

/// Execute the `preview` command
pub async fn table(
    service: &TransferService,
    endpoint: &DatabaseEndpoint,
    table: &str,
    projection: Option<&ColumnProjection>,
    limit: Option<usize>,
    out: &Output,
) -> Result<()> {
    let data = service.preview(endpoint, table, projection, limit).await?;
    render(data, out)
}

/// Execute the `preview-file` command
pub async fn file(
    service: &TransferService,
    file: &FlatFileEndpoint,
    projection: Option<&ColumnProjection>,
    limit: Option<usize>,
    out: &Output,
) -> Result<()> {
    let data = service.preview_flat_file(file, projection, limit).await?;
    render(data, out)
}

fn render(data: PreviewData, out: &Output) -> Result<()> {
    if out.is_json() {
        return out.json(&data);
    }
    let count = data.rows.len();
    let header = data.columns.into_iter().map(|c| c.name).collect();
    out.table(header, data.rows);
    println!("{} row(s)", count);
    Ok(())
}
