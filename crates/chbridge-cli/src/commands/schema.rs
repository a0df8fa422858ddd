use anyhow::Result;
use chbridge_core::{DatabaseEndpoint, FlatFileEndpoint};
use chbridge_services::TransferService;

use crate::output::Output;

/// Execute the `connect` command
pub async fn connect(service: &TransferService, endpoint: &DatabaseEndpoint, out: &Output) -> Result<()> {
    let info = service.connect(endpoint).await?;
    if out.is_json() {
        return out.json(&info);
    }
    println!(
        "Connected to {} as {} (database {})",
        info.url, info.username, info.database
    );
    Ok(())
}

/// Execute the `tables` command
pub async fn tables(service: &TransferService, endpoint: &DatabaseEndpoint, out: &Output) -> Result<()> {
    let tables = service.list_tables(endpoint).await?;
    if out.is_json() {
        return out.json(&tables);
    }
    let rows = tables
        .into_iter()
        .map(|t| {
            vec![
                t.name,
                t.engine.unwrap_or_default(),
                t.row_count.map(|n| n.to_string()).unwrap_or_default(),
            ]
        })
        .collect();
    out.table(
        ["table", "engine", "rows"].map(String::from).to_vec(),
        rows,
    );
    Ok(())
}

/// Execute the `describe` command
pub async fn describe(
    service: &TransferService,
    endpoint: &DatabaseEndpoint,
    table: &str,
    out: &Output,
) -> Result<()> {
    let details = service.describe_schema(endpoint, table).await?;
    if out.is_json() {
        return out.json(&details);
    }
    println!("{}", details.name);
    out.columns(&details.columns);
    Ok(())
}

/// Execute the `describe-file` command
pub fn describe_file(service: &TransferService, file: &FlatFileEndpoint, out: &Output) -> Result<()> {
    let details = service.describe_flat_file(file)?;
    if out.is_json() {
        return out.json(&details);
    }
    println!("{}", file.path().display());
    out.columns(&details.columns);
    Ok(())
}
