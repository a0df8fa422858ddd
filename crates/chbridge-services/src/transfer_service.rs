//! Transfer service
//!
//! The operation interface of the engine. Every call names its database
//! endpoint; the service leases that endpoint's connection from the
//! [`ConnectionManager`] for the duration of the call and returns view models.

use std::sync::Arc;

use chbridge_connection::{ConnectionLease, ConnectionManager, PoolStats};
use chbridge_core::{
    ColumnProjection, DatabaseEndpoint, Endpoint, FlatFileEndpoint, SchemaIntrospection,
};
use chbridge_drivers::DriverRegistry;
use chbridge_interchange::{
    ExportRequest, Exporter, IfTableExists, ImportRequest, ImportSummary, Importer, JoinEngine,
    JoinSpec, Previewer, ProgressReporter, ProgressTracker, TransferError, TransferHandle,
    TransferJob, TransferKind, describe_flat_file,
};

use crate::config::{BridgeConfig, TransferConfig};
use crate::error::{ServiceError, ServiceResult};
use crate::view_models::{
    ConnectionInfo, ExportReport, ImportReport, JoinReport, PreviewData, TableDetails,
    TableSummary,
};

/// Service for every engine operation
///
/// Blocking-style calls (`export`, `import`, `join`) run on the caller's task
/// and report only their result. The `stream_*` variants run on their own
/// task and hand back a [`TransferHandle`] for progress and cancellation.
pub struct TransferService {
    manager: Arc<ConnectionManager>,
    transfer: TransferConfig,
    exporter: Exporter,
    joins: JoinEngine,
    previewer: Previewer,
    reporter: ProgressReporter,
}

impl TransferService {
    /// Create a new transfer service
    ///
    /// # Arguments
    ///
    /// * `manager` - Connection manager owning the pooled connections
    /// * `transfer` - Batch, sampling, preview and progress settings
    pub fn new(manager: Arc<ConnectionManager>, transfer: TransferConfig) -> Self {
        Self {
            exporter: Exporter::new(transfer.export_options()),
            joins: JoinEngine::new(),
            previewer: Previewer::new(transfer.preview_options()),
            reporter: transfer.reporter(),
            manager,
            transfer,
        }
    }

    /// Build the connection manager and the service from a loaded config
    pub fn from_config(drivers: Arc<DriverRegistry>, config: &BridgeConfig) -> Self {
        let manager = Arc::new(ConnectionManager::new(drivers, config.pool.clone()));
        Self::new(manager, config.transfer.clone())
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.manager.stats()
    }

    /// Open (or reuse) the endpoint's connection and report what it reached
    #[tracing::instrument(skip(self, endpoint), fields(endpoint = %endpoint))]
    pub async fn connect(&self, endpoint: &DatabaseEndpoint) -> ServiceResult<ConnectionInfo> {
        let lease = self.lease(endpoint).await?;
        tracing::info!(driver = lease.driver_name(), "connected");
        Ok(ConnectionInfo::new(endpoint))
    }

    #[tracing::instrument(skip(self, endpoint), fields(endpoint = %endpoint))]
    pub async fn list_tables(&self, endpoint: &DatabaseEndpoint) -> ServiceResult<Vec<TableSummary>> {
        let lease = self.lease(endpoint).await?;
        let result = introspection(&lease)?.list_tables().await;
        let tables = settle(lease, result.map_err(TransferError::from)).await?;
        tracing::debug!(count = tables.len(), "tables listed");
        Ok(tables.into_iter().map(TableSummary::from).collect())
    }

    #[tracing::instrument(skip(self, endpoint), fields(endpoint = %endpoint))]
    pub async fn describe_schema(
        &self,
        endpoint: &DatabaseEndpoint,
        table: &str,
    ) -> ServiceResult<TableDetails> {
        let lease = self.lease(endpoint).await?;
        let result = introspection(&lease)?.describe_table(table).await;
        let schema = settle(lease, result.map_err(TransferError::from)).await?;
        Ok(TableDetails::from(&schema))
    }

    /// Column names of a delimited file; every type is `Unknown`
    #[tracing::instrument(skip(self, file), fields(path = %file.path().display()))]
    pub fn describe_flat_file(&self, file: &FlatFileEndpoint) -> ServiceResult<TableDetails> {
        let schema = describe_flat_file(file)?;
        Ok(TableDetails::from(&schema))
    }

    pub async fn export(
        &self,
        endpoint: &DatabaseEndpoint,
        request: ExportRequest,
    ) -> ServiceResult<ExportReport> {
        let lease = self.lease(endpoint).await?;
        let result = self
            .exporter
            .export(&*lease, &request, &ProgressTracker::detached())
            .await;
        let rows_written = settle(lease, result).await?;
        Ok(ExportReport {
            table: request.table,
            path: request.destination.path().display().to_string(),
            rows_written,
        })
    }

    pub async fn import(
        &self,
        endpoint: &DatabaseEndpoint,
        request: ImportRequest,
        if_table_exists: IfTableExists,
    ) -> ServiceResult<ImportReport> {
        let importer = Importer::new(self.transfer.import_options(if_table_exists));
        let lease = self.lease(endpoint).await?;
        let result = importer
            .import(&*lease, &request, &ProgressTracker::detached())
            .await;
        let summary = settle(lease, result).await?;
        Ok(import_report(&request, &summary))
    }

    pub async fn join(&self, endpoint: &DatabaseEndpoint, spec: JoinSpec) -> ServiceResult<JoinReport> {
        let lease = self.lease(endpoint).await?;
        let result = self
            .joins
            .join(&*lease, &spec, &ProgressTracker::detached())
            .await;
        let rows_written = settle(lease, result).await?;
        Ok(JoinReport {
            target: spec.target,
            rows_written,
        })
    }

    /// First rows of a table, at most `limit` (or the configured default)
    pub async fn preview(
        &self,
        endpoint: &DatabaseEndpoint,
        table: &str,
        projection: Option<&ColumnProjection>,
        limit: Option<usize>,
    ) -> ServiceResult<PreviewData> {
        let lease = self.lease(endpoint).await?;
        let result = self
            .previewer
            .preview_table(&*lease, table, projection, limit)
            .await;
        Ok(settle(lease, result).await?.into())
    }

    pub async fn preview_flat_file(
        &self,
        file: &FlatFileEndpoint,
        projection: Option<&ColumnProjection>,
        limit: Option<usize>,
    ) -> ServiceResult<PreviewData> {
        let preview = self
            .previewer
            .preview_flat_file(file, projection, limit)
            .await?;
        Ok(preview.into())
    }

    /// Run an export on its own task
    pub fn stream_export(&self, endpoint: DatabaseEndpoint, request: ExportRequest) -> TransferHandle<u64> {
        let mut job = TransferJob::new(
            TransferKind::Export,
            Endpoint::Database(endpoint.clone()),
            Endpoint::FlatFile(request.destination.clone()),
        );
        if let Some(projection) = &request.projection {
            job = job.with_projection(projection.clone());
        }

        let manager = self.manager.clone();
        let exporter = self.exporter.clone();
        self.reporter.start(job, move |tracker| async move {
            let lease = lease_unless_cancelled(&manager, &endpoint, &tracker).await?;
            let result = exporter.export(&*lease, &request, &tracker).await;
            settle(lease, result).await
        })
    }

    /// Run an import on its own task
    pub fn stream_import(
        &self,
        endpoint: DatabaseEndpoint,
        request: ImportRequest,
        if_table_exists: IfTableExists,
    ) -> TransferHandle<ImportSummary> {
        let mut job = TransferJob::new(
            TransferKind::Import,
            Endpoint::FlatFile(request.source.clone()),
            Endpoint::Database(endpoint.clone()),
        );
        if let Some(projection) = &request.projection {
            job = job.with_projection(projection.clone());
        }

        let manager = self.manager.clone();
        let importer = Importer::new(self.transfer.import_options(if_table_exists));
        self.reporter.start(job, move |tracker| async move {
            let lease = lease_unless_cancelled(&manager, &endpoint, &tracker).await?;
            let result = importer.import(&*lease, &request, &tracker).await;
            settle(lease, result).await
        })
    }

    /// Run a join on its own task
    pub fn stream_join(&self, endpoint: DatabaseEndpoint, spec: JoinSpec) -> TransferHandle<u64> {
        let job = TransferJob::new(
            TransferKind::Join,
            Endpoint::Database(endpoint.clone()),
            Endpoint::Database(endpoint.clone()),
        )
        .with_projection(spec.projection.clone());

        let manager = self.manager.clone();
        let joins = self.joins.clone();
        self.reporter.start(job, move |tracker| async move {
            let lease = lease_unless_cancelled(&manager, &endpoint, &tracker).await?;
            let result = joins.join(&*lease, &spec, &tracker).await;
            settle(lease, result).await
        })
    }

    async fn lease(&self, endpoint: &DatabaseEndpoint) -> ServiceResult<ConnectionLease> {
        self.manager.open(endpoint).await.map_err(|e| {
            tracing::error!(error = %e, "could not open connection");
            ServiceError::from(e)
        })
    }
}

/// Summary of a finished import, for callers of [`TransferService::stream_import`]
pub fn import_report(request: &ImportRequest, summary: &ImportSummary) -> ImportReport {
    ImportReport::new(
        &request.table,
        request.source.path().display().to_string(),
        summary,
    )
}

fn introspection(lease: &ConnectionLease) -> Result<&dyn SchemaIntrospection, TransferError> {
    lease.as_schema_introspection().ok_or_else(|| {
        TransferError::Query(format!(
            "{} does not support schema introspection",
            lease.driver_name()
        ))
    })
}

/// Wait for the endpoint's connection, giving up as soon as the transfer is
/// cancelled
async fn lease_unless_cancelled(
    manager: &ConnectionManager,
    endpoint: &DatabaseEndpoint,
    tracker: &ProgressTracker,
) -> Result<ConnectionLease, TransferError> {
    tokio::select! {
        biased;
        _ = tracker.cancellation_token().cancelled() => {
            tracing::debug!(%endpoint, "cancelled while waiting for a connection");
            Err(TransferError::Cancelled { rows_committed: 0 })
        }
        lease = manager.open(endpoint) => Ok(lease?),
    }
}

/// Hand the lease back, closing it instead when the connection itself failed
async fn settle<T>(lease: ConnectionLease, result: Result<T, TransferError>) -> Result<T, TransferError> {
    if let Err(TransferError::Connection(e)) = &result {
        tracing::warn!(error = %e, "discarding failed connection");
        lease.discard().await;
    }
    result
}
