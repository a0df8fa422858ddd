use anyhow::Result;
use chbridge_core::{ColumnProjection, DatabaseEndpoint, FlatFileEndpoint};
use chbridge_interchange::{ExportRequest, IfTableExists, ImportRequest, JoinSpec, TransferHandle};
use chbridge_services::{
    ExportReport, JoinReport, ProgressView, ServiceError, TransferService, import_report,
};

use crate::output::Output;

/// Execute the `export` command
pub async fn export(
    service: &TransferService,
    endpoint: DatabaseEndpoint,
    table: String,
    destination: FlatFileEndpoint,
    projection: Option<ColumnProjection>,
    show_progress: bool,
    out: &Output,
) -> Result<()> {
    let mut request = ExportRequest::new(table, destination);
    if let Some(projection) = projection {
        request = request.with_projection(projection);
    }
    let handle = service.stream_export(endpoint, request.clone());
    let rows_written = drive(handle, show_progress, out).await?;

    let report = ExportReport {
        table: request.table,
        path: request.destination.path().display().to_string(),
        rows_written,
    };
    if out.is_json() {
        return out.json(&report);
    }
    println!("Exported {} row(s) from {} to {}", report.rows_written, report.table, report.path);
    Ok(())
}

/// Execute the `import` command
#[allow(clippy::too_many_arguments)]
pub async fn import(
    service: &TransferService,
    endpoint: DatabaseEndpoint,
    source: FlatFileEndpoint,
    table: String,
    projection: Option<ColumnProjection>,
    if_table_exists: IfTableExists,
    show_progress: bool,
    out: &Output,
) -> Result<()> {
    let mut request = ImportRequest::new(source, table);
    if let Some(projection) = projection {
        request = request.with_projection(projection);
    }
    let handle = service.stream_import(endpoint, request.clone(), if_table_exists);
    let summary = drive(handle, show_progress, out).await?;

    let report = import_report(&request, &summary);
    if out.is_json() {
        return out.json(&report);
    }
    if report.table_created {
        println!("Created table {}", report.table);
    }
    println!(
        "Imported {} row(s) into {}, skipped {}",
        report.written, report.table, report.skipped
    );
    for rejected in &report.rejections {
        match &rejected.column {
            Some(column) => eprintln!(
                "  line {}: column '{}' = '{}': {}",
                rejected.line, column, rejected.value, rejected.reason
            ),
            None => eprintln!("  line {}: {}", rejected.line, rejected.reason),
        }
    }
    if report.skipped > report.rejections.len() as u64 {
        eprintln!(
            "  ... and {} more",
            report.skipped - report.rejections.len() as u64
        );
    }
    Ok(())
}

/// Execute the `join` command
pub async fn join(
    service: &TransferService,
    endpoint: DatabaseEndpoint,
    spec: JoinSpec,
    show_progress: bool,
    out: &Output,
) -> Result<()> {
    let target = spec.target.clone();
    let handle = service.stream_join(endpoint, spec);
    let rows_written = drive(handle, show_progress, out).await?;

    let report = JoinReport {
        target,
        rows_written,
    };
    if out.is_json() {
        return out.json(&report);
    }
    println!("Wrote {} row(s) into {}", report.rows_written, report.target);
    Ok(())
}

/// Follow a transfer to its end, printing events if asked. Ctrl-C requests
/// cancellation, which lands at the next batch boundary.
async fn drive<T>(mut handle: TransferHandle<T>, show_progress: bool, out: &Output) -> Result<T> {
    let cancel = handle.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling after the current batch...");
            cancel.cancel();
        }
    });

    while let Some(event) = handle.next_event().await {
        if show_progress {
            out.progress(&ProgressView::from(&event));
        }
    }
    interrupt.abort();

    let result = handle.outcome().await.map_err(ServiceError::from)?;
    Ok(result)
}
