//! End-to-end transfers against the in-memory store

use std::sync::Arc;

use chbridge_core::testing::{MemoryConnection, MemoryStore};
use chbridge_core::{
    ColumnDef, ColumnProjection, ColumnType, DatabaseEndpoint, FlatFileEndpoint, Row,
    SchemaError, TableSchema, Value,
};
use chbridge_interchange::{
    ExportOptions, ExportRequest, Exporter, IfTableExists, ImportOptions, ImportRequest,
    Importer, JoinEngine, JoinError, JoinSpec, Percent, ProgressReporter, ProgressTracker,
    RejectReason, TransferError, TransferJob, TransferKind, TransferStatus,
};
use futures::StreamExt;

fn orders_schema() -> TableSchema {
    TableSchema::new(
        "orders",
        vec![
            ColumnDef::new("id", ColumnType::Integer),
            ColumnDef::new("total", ColumnType::Float),
            ColumnDef::new("note", ColumnType::String),
        ],
    )
}

fn seeded() -> Arc<MemoryStore> {
    let store = MemoryStore::new();
    store.seed(
        orders_schema(),
        vec![
            Row::new(vec![Value::Int64(1), Value::Float64(10.5), Value::String("first".into())]),
            Row::new(vec![Value::Int64(2), Value::Float64(20.0), Value::Null]),
            Row::new(vec![Value::Int64(3), Value::Float64(30.25), Value::String("a,b".into())]),
        ],
    );
    store.seed(
        TableSchema::new(
            "customers",
            vec![
                ColumnDef::new("id", ColumnType::Integer),
                ColumnDef::new("name", ColumnType::String),
            ],
        ),
        vec![
            Row::new(vec![Value::Int64(1), Value::String("ada".into())]),
            Row::new(vec![Value::Int64(3), Value::String("grace".into())]),
            Row::new(vec![Value::Int64(4), Value::String("linus".into())]),
        ],
    );
    store
}

fn projection(columns: &[&str]) -> ColumnProjection {
    ColumnProjection::new(columns.iter().copied()).unwrap()
}

fn detached() -> ProgressTracker {
    ProgressTracker::detached()
}

mod export {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_export_writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let conn = MemoryConnection::new("default", seeded());
        let destination = FlatFileEndpoint::new(dir.path().join("orders.csv"));
        let request = ExportRequest::new("orders", destination.clone())
            .with_projection(projection(&["id", "total"]));

        let rows = Exporter::default()
            .export(&conn, &request, &detached())
            .await
            .unwrap();

        assert_eq!(rows, 3);
        assert_eq!(
            std::fs::read_to_string(destination.path()).unwrap(),
            "id,total\n1,10.5\n2,20.0\n3,30.25\n"
        );
    }

    #[tokio::test]
    async fn test_export_follows_projection_order_and_delimiter() {
        let dir = tempfile::tempdir().unwrap();
        let conn = MemoryConnection::new("default", seeded());
        let destination = FlatFileEndpoint::new(dir.path().join("orders.txt")).with_delimiter(b';');
        let request = ExportRequest::new("orders", destination.clone())
            .with_projection(projection(&["note", "id"]));

        Exporter::default()
            .export(&conn, &request, &detached())
            .await
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(destination.path()).unwrap(),
            "note;id\nfirst;1\n;2\na,b;3\n"
        );
    }

    #[tokio::test]
    async fn test_unknown_column_fails_before_file_exists() {
        let dir = tempfile::tempdir().unwrap();
        let conn = MemoryConnection::new("default", seeded());
        let destination = FlatFileEndpoint::new(dir.path().join("never.csv"));
        let request = ExportRequest::new("orders", destination.clone())
            .with_projection(projection(&["id", "discount"]));

        let err = Exporter::default()
            .export(&conn, &request, &detached())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            TransferError::Schema(SchemaError::UnknownColumn {
                table: "orders".into(),
                column: "discount".into(),
            })
        );
        assert!(!destination.path().exists());
    }

    #[tokio::test]
    async fn test_missing_table() {
        let dir = tempfile::tempdir().unwrap();
        let conn = MemoryConnection::new("default", seeded());
        let request = ExportRequest::new("nope", FlatFileEndpoint::new(dir.path().join("x.csv")));
        let err = Exporter::default()
            .export(&conn, &request, &detached())
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::Schema(SchemaError::NotFound("nope".into())));
    }

    #[tokio::test]
    async fn test_read_failure_keeps_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let conn = MemoryConnection::new("default", seeded());
        conn.fail_reads_after(2);
        let destination = FlatFileEndpoint::new(dir.path().join("partial.csv"));
        let exporter = Exporter::new(ExportOptions {
            batch_size: 1,
            ..Default::default()
        });

        let err = exporter
            .export(&conn, &ExportRequest::new("orders", destination.clone()), &detached())
            .await
            .unwrap_err();

        assert_eq!(err.rows_committed(), 2);
        assert!(err.to_string().contains("is incomplete"), "{err}");
        let contents = std::fs::read_to_string(destination.path()).unwrap();
        assert_eq!(contents.lines().count(), 3);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_write_failure_names_incomplete_file() {
        let conn = MemoryConnection::new("default", seeded());
        let request = ExportRequest::new("orders", FlatFileEndpoint::new("/dev/full"));
        let err = Exporter::default()
            .export(&conn, &request, &detached())
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Write { .. }));
        let message = err.to_string();
        assert!(message.contains("/dev/full"), "{message}");
        assert!(message.contains("the file is incomplete"), "{message}");
    }
}

mod import {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write(dir: &tempfile::TempDir, name: &str, contents: &str) -> FlatFileEndpoint {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        FlatFileEndpoint::new(path)
    }

    #[tokio::test]
    async fn test_import_creates_table_from_inferred_types() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        let conn = MemoryConnection::new("default", store.clone());
        let source = write(
            &dir,
            "sales.csv",
            "id,amount,sold_at,region\n1,9.99,2024-01-02 10:00:00,north\n2,15,2024-01-03,\n",
        );

        let summary = Importer::default()
            .import(&conn, &ImportRequest::new(source, "sales"), &detached())
            .await
            .unwrap();

        assert!(summary.table_created);
        assert_eq!(summary.written, 2);
        let schema = store.schema("sales").unwrap();
        let types: Vec<ColumnType> = schema.columns.iter().map(|c| c.column_type).collect();
        assert_eq!(
            types,
            vec![
                ColumnType::Integer,
                ColumnType::Float,
                ColumnType::DateTime,
                ColumnType::String,
            ]
        );
        let rows = store.rows("sales").unwrap();
        assert_eq!(rows[1].values[1], Value::Float64(15.0));
        assert_eq!(rows[1].values[3], Value::Null);
    }

    #[tokio::test]
    async fn test_malformed_rows_are_skipped_and_counted() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded();
        let conn = MemoryConnection::new("default", store.clone());
        // 3 well-formed, 1 short, 1 bad integer
        let source = write(
            &dir,
            "orders.csv",
            "id,total,note\n10,1.5,x\n11\n12,2.5,y\nthirteen,3.5,z\n14,4.5,w\n",
        );

        let summary = Importer::default()
            .import(&conn, &ImportRequest::new(source, "orders"), &detached())
            .await
            .unwrap();

        assert_eq!(summary.written, 3);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.written + summary.skipped, 5);
        assert!(!summary.table_created);
        assert_eq!(summary.rejections[0].line, 3);
        assert_eq!(
            summary.rejections[1].reason,
            RejectReason::TypeMismatch(ColumnType::Integer)
        );
        assert_eq!(store.rows("orders").unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_projection_must_exist_in_table() {
        let dir = tempfile::tempdir().unwrap();
        let conn = MemoryConnection::new("default", seeded());
        let source = write(&dir, "orders.csv", "id,total,discount\n1,2.0,0.5\n");

        let err = Importer::default()
            .import(&conn, &ImportRequest::new(source, "orders"), &detached())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TransferError::Schema(SchemaError::UnknownColumn {
                table: "orders".into(),
                column: "discount".into(),
            })
        );
    }

    #[tokio::test]
    async fn test_projection_subset_leaves_other_columns_null() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded();
        let conn = MemoryConnection::new("default", store.clone());
        let source = write(&dir, "orders.csv", "total,unused,id\n7.5,zzz,99\n");
        let request = ImportRequest::new(source, "orders").with_projection(projection(&["id", "total"]));

        Importer::default()
            .import(&conn, &request, &detached())
            .await
            .unwrap();

        let rows = store.rows("orders").unwrap();
        assert_eq!(
            rows.last().unwrap().values,
            vec![Value::Int64(99), Value::Float64(7.5), Value::Null]
        );
    }

    #[tokio::test]
    async fn test_if_table_exists_modes() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded();
        let conn = MemoryConnection::new("default", store.clone());
        let source = write(&dir, "orders.csv", "id,total,note\n50,1.0,n\n");

        let fail = Importer::new(ImportOptions {
            if_table_exists: IfTableExists::Fail,
            ..Default::default()
        });
        let err = fail
            .import(&conn, &ImportRequest::new(source.clone(), "orders"), &detached())
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::TableExists("orders".into()));
        assert_eq!(store.rows("orders").unwrap().len(), 3);

        let truncate = Importer::new(ImportOptions {
            if_table_exists: IfTableExists::Truncate,
            ..Default::default()
        });
        truncate
            .import(&conn, &ImportRequest::new(source, "orders"), &detached())
            .await
            .unwrap();
        assert_eq!(store.rows("orders").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_insert_failure_reports_committed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded();
        let conn = MemoryConnection::new("default", store.clone());
        conn.fail_inserts_after(2);
        let mut contents = String::from("id,total,note\n");
        for i in 0..5 {
            contents.push_str(&format!("{},1.0,n\n", 100 + i));
        }
        let source = write(&dir, "orders.csv", &contents);
        let importer = Importer::new(ImportOptions {
            batch_size: 2,
            ..Default::default()
        });

        let err = importer
            .import(&conn, &ImportRequest::new(source, "orders"), &detached())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Write { rows_committed: 2, .. }));
        assert_eq!(store.rows("orders").unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_export_then_import_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded();
        let conn = MemoryConnection::new("default", store.clone());
        let file = FlatFileEndpoint::new(dir.path().join("orders.csv"));

        let exported = Exporter::default()
            .export(&conn, &ExportRequest::new("orders", file.clone()), &detached())
            .await
            .unwrap();
        let summary = Importer::default()
            .import(&conn, &ImportRequest::new(file.clone(), "orders_copy"), &detached())
            .await
            .unwrap();

        assert_eq!(summary.written, exported);
        assert_eq!(summary.skipped, 0);

        let copy = FlatFileEndpoint::new(dir.path().join("orders_copy.csv"));
        Exporter::default()
            .export(&conn, &ExportRequest::new("orders_copy", copy.clone()), &detached())
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(file.path()).unwrap(),
            std::fs::read_to_string(copy.path()).unwrap()
        );
    }
}

mod join {
    use super::*;
    use pretty_assertions::assert_eq;

    fn spec(columns: &[&str]) -> JoinSpec {
        JoinSpec {
            left: "orders".into(),
            right: "customers".into(),
            predicate: "orders.id = customers.id".into(),
            target: "target".into(),
            projection: projection(columns),
        }
    }

    #[tokio::test]
    async fn test_join_materializes_matching_pairs() {
        let store = seeded();
        let conn = MemoryConnection::new("default", store.clone());

        let rows = JoinEngine::new()
            .join(&conn, &spec(&["customers.name", "orders.total"]), &detached())
            .await
            .unwrap();

        assert_eq!(rows, 2);
        assert_eq!(
            store.schema("target").unwrap().column_names(),
            vec!["name", "total"]
        );
        let mut names: Vec<String> = store
            .rows("target")
            .unwrap()
            .iter()
            .map(|r| r.values[0].to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["ada", "grace"]);
    }

    #[tokio::test]
    async fn test_join_into_existing_target_counts_new_rows() {
        let store = seeded();
        let conn = MemoryConnection::new("default", store.clone());
        let engine = JoinEngine::new();
        let spec = spec(&["customers.name", "orders.total"]);

        engine.join(&conn, &spec, &detached()).await.unwrap();
        let second = engine.join(&conn, &spec, &detached()).await.unwrap();

        assert_eq!(second, 2);
        assert_eq!(store.rows("target").unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_bare_shared_column_is_ambiguous() {
        let store = seeded();
        let conn = MemoryConnection::new("default", store.clone());

        let err = JoinEngine::new()
            .join(&conn, &spec(&["id", "name"]), &detached())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TransferError::Join(JoinError::AmbiguousColumn { ref column, .. }) if column == "id"
        ));
        assert!(!store.contains("target"));
    }

    #[tokio::test]
    async fn test_cancelled_join_stops_server_statement() {
        let store = seeded();
        let conn = Arc::new(MemoryConnection::new("default", store.clone()));
        conn.stall_joins(true);
        let job = TransferJob::new(
            TransferKind::Join,
            DatabaseEndpoint::new("memory", "localhost", 0, "default").into(),
            DatabaseEndpoint::new("memory", "localhost", 0, "default").into(),
        );

        let running = conn.clone();
        let spec = spec(&["customers.name", "orders.total"]);
        let mut handle = ProgressReporter::new(8).start(job, move |tracker| async move {
            JoinEngine::new().join(&*running, &spec, &tracker).await
        });
        // One event when the job starts, one when the statement is sent
        for _ in 0..2 {
            let event = handle.next_event().await.unwrap();
            assert_eq!(event.status, TransferStatus::Running);
        }
        handle.cancel();
        let job_id = handle.job_id();

        let err = handle.outcome().await.unwrap_err();
        assert_eq!(err, TransferError::Cancelled { rows_committed: 2 });
        assert_eq!(
            conn.cancelled_statements(),
            vec![format!("chbridge-join-{}", job_id)]
        );
    }

    #[tokio::test]
    async fn test_missing_source_table() {
        let conn = MemoryConnection::new("default", seeded());
        let mut spec = spec(&["name"]);
        spec.right = "clients".into();
        let err = JoinEngine::new().join(&conn, &spec, &detached()).await.unwrap_err();
        assert_eq!(err, TransferError::Schema(SchemaError::NotFound("clients".into())));
    }
}

mod progress {
    use super::*;
    use pretty_assertions::assert_eq;

    fn export_job(path: &std::path::Path) -> TransferJob {
        TransferJob::new(
            TransferKind::Export,
            DatabaseEndpoint::new("memory", "localhost", 0, "default").into(),
            FlatFileEndpoint::new(path).into(),
        )
    }

    fn big_store(rows: i64) -> Arc<MemoryStore> {
        let store = MemoryStore::new();
        store.seed(
            TableSchema::new("numbers", vec![ColumnDef::new("n", ColumnType::Integer)]),
            (0..rows).map(|i| Row::new(vec![Value::Int64(i)])).collect(),
        );
        store
    }

    #[tokio::test]
    async fn test_export_progress_reaches_completed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("numbers.csv");
        let conn = Arc::new(MemoryConnection::new("default", big_store(250)));
        let request = ExportRequest::new("numbers", FlatFileEndpoint::new(&path));
        let exporter = Exporter::new(ExportOptions {
            batch_size: 100,
            ..Default::default()
        });

        let handle = ProgressReporter::default().start(export_job(&path), move |tracker| async move {
            exporter.export(conn.as_ref(), &request, &tracker).await
        });
        let events: Vec<_> = handle.collect().await;

        let last = events.last().unwrap();
        assert_eq!(last.status, TransferStatus::Completed);
        assert_eq!(last.rows_processed, 250);
        assert_eq!(last.percent, Percent::Known(100.0));
        for pair in events.windows(2) {
            assert!(pair[1].rows_processed >= pair[0].rows_processed);
        }
    }

    #[tokio::test]
    async fn test_cancel_after_first_event_ends_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("numbers.csv");
        let conn = Arc::new(MemoryConnection::new("default", big_store(100_000)));
        let request = ExportRequest::new("numbers", FlatFileEndpoint::new(&path));
        let exporter = Exporter::new(ExportOptions {
            batch_size: 10,
            ..Default::default()
        });

        let mut handle = ProgressReporter::default().start(export_job(&path), move |tracker| async move {
            exporter.export(conn.as_ref(), &request, &tracker).await
        });
        let first = handle.next_event().await.unwrap();
        assert_eq!(first.status, TransferStatus::Running);
        handle.cancel();

        let mut last = first;
        while let Some(event) = handle.next_event().await {
            last = event;
        }
        assert_eq!(last.status, TransferStatus::Cancelled);
        assert!(last.rows_processed < 100_000);

        let err = handle.outcome().await.unwrap_err();
        assert!(err.is_cancelled());
        // Whatever was committed is left in place
        let lines = std::fs::read_to_string(&path).unwrap().lines().count() as u64;
        assert_eq!(lines, err.rows_committed() + 1);
    }
}
