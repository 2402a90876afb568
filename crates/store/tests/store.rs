//! Integration tests for `SqliteStore` on an in-memory database.

use std::time::Duration;

use chrono::Utc;
use sluice_core::{
    ChannelOutcome, DataSourceCatalog, DeliveryOptions, EmailOverrides, ExecutionRecord,
    ExecutionStatus, ExportMethod, SluiceError, TaskBody, TaskRepository, TaskStatus, TriggerKind,
};
use sluice_store::{NewTask, SqliteStore};
use uuid::Uuid;

fn new_task(name: &str, ds: i64, cron: Option<&str>) -> NewTask {
    NewTask {
        name: name.to_string(),
        description: Some("daily numbers".to_string()),
        status: TaskStatus::Active,
        data_source_id: ds,
        body: TaskBody::Sql {
            sql_content: "SELECT 1".to_string(),
        },
        cron_expression: cron.map(String::from),
        timezone: Some("Asia/Shanghai".to_string()),
        export_methods: vec![ExportMethod::Local, ExportMethod::Email],
        export_filename: Some("report_{date}_{task_name}".to_string()),
        delivery: DeliveryOptions {
            email: Some(EmailOverrides {
                recipients: vec!["ops@example.com".to_string()],
                ..Default::default()
            }),
            chat: None,
        },
        timeout_secs: Some(120),
    }
}

async fn store_with_source() -> (SqliteStore, i64) {
    let store = SqliteStore::in_memory().await.unwrap();
    let ds = store
        .create_data_source("warehouse", "sqlite::memory:")
        .await
        .unwrap();
    (store, ds.id)
}

// -- tasks ---------------------------------------------------------------

#[tokio::test]
async fn task_round_trips_through_storage() {
    let (store, ds) = store_with_source().await;
    let created = store.create_task(new_task("Sales", ds, Some("0 9 * * *"))).await.unwrap();

    let loaded = store.get(created.id).await.unwrap();
    assert_eq!(loaded, created);
    assert_eq!(loaded.export_methods, vec![ExportMethod::Local, ExportMethod::Email]);
    assert_eq!(loaded.timeout_secs, Some(120));
}

#[tokio::test]
async fn unknown_task_is_not_found() {
    let (store, _) = store_with_source().await;
    let err = store.get(404).await.unwrap_err();
    assert!(matches!(err, SluiceError::TaskNotFound(404)));
}

#[tokio::test]
async fn only_active_cron_tasks_are_scheduled() {
    let (store, ds) = store_with_source().await;
    let a = store.create_task(new_task("a", ds, Some("0 9 * * *"))).await.unwrap();
    let mut paused = new_task("b", ds, Some("*/5 * * * *"));
    paused.status = TaskStatus::Paused;
    store.create_task(paused).await.unwrap();
    store.create_task(new_task("manual", ds, None)).await.unwrap();
    store.create_task(new_task("blank", ds, Some("  "))).await.unwrap();

    let scheduled = store.list_active_scheduled_tasks().await.unwrap();
    let ids: Vec<i64> = scheduled.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![a.id]);
}

// -- data sources --------------------------------------------------------

#[tokio::test]
async fn data_source_lookup() {
    let (store, ds) = store_with_source().await;
    let source = store.data_source(ds).await.unwrap();
    assert_eq!(source.name, "warehouse");

    let err = store.data_source(77).await.unwrap_err();
    assert!(matches!(err, SluiceError::DataSourceNotFound(77)));
}

// -- execution records ---------------------------------------------------

#[tokio::test]
async fn record_upserts_until_terminal() {
    let (store, ds) = store_with_source().await;
    let task = store.create_task(new_task("a", ds, None)).await.unwrap();

    let mut rec = ExecutionRecord::pending(Uuid::new_v4(), task.id, TriggerKind::Manual, Utc::now());
    rec.mark_running(Utc::now()).unwrap();
    store.save_execution_record(&rec).await.unwrap();

    let running = store.get_execution_record(rec.execution_id).await.unwrap().unwrap();
    assert_eq!(running.status, ExecutionStatus::Running);
    assert!(running.end_time.is_none());

    rec.succeed(
        5,
        None,
        vec![ChannelOutcome {
            channel: "email".into(),
            success: false,
            error: Some("smtp down".into()),
            duration_ms: 12,
        }],
        Utc::now(),
        Duration::from_millis(250),
    )
    .unwrap();
    store.save_execution_record(&rec).await.unwrap();

    let done = store.get_execution_record(rec.execution_id).await.unwrap().unwrap();
    assert_eq!(done.status, ExecutionStatus::Success);
    assert_eq!(done.rows_affected, 5);
    assert_eq!(done.delivery_results.len(), 1);
    assert!(!done.delivery_results[0].success);
}

#[tokio::test]
async fn terminal_record_is_never_overwritten() {
    let (store, ds) = store_with_source().await;
    let task = store.create_task(new_task("a", ds, None)).await.unwrap();

    let mut rec = ExecutionRecord::pending(Uuid::new_v4(), task.id, TriggerKind::Scheduled, Utc::now());
    rec.mark_running(Utc::now()).unwrap();
    rec.fail("query failed", Utc::now(), Duration::from_secs(1)).unwrap();
    store.save_execution_record(&rec).await.unwrap();

    let mut forged = rec.clone();
    forged.status = ExecutionStatus::Cancelled;
    forged.error_message = None;
    store.save_execution_record(&forged).await.unwrap();

    let stored = store.get_execution_record(rec.execution_id).await.unwrap().unwrap();
    assert_eq!(stored.status, ExecutionStatus::Failed);
    assert_eq!(stored.error_message.as_deref(), Some("query failed"));
}

#[tokio::test]
async fn history_is_newest_first_and_limited() {
    let (store, ds) = store_with_source().await;
    let task = store.create_task(new_task("a", ds, None)).await.unwrap();

    let mut ids = Vec::new();
    for i in 0..3 {
        let created = Utc::now() + chrono::Duration::seconds(i);
        let rec = ExecutionRecord::pending(Uuid::new_v4(), task.id, TriggerKind::Manual, created);
        store.save_execution_record(&rec).await.unwrap();
        ids.push(rec.execution_id);
    }

    let history = store.list_execution_records(task.id, 2).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].execution_id, ids[2]);
    assert_eq!(history[1].execution_id, ids[1]);

    assert!(store.get_execution_record(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn file_database_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("nested/sluice.db").display());

    let id = {
        let store = SqliteStore::connect(&url).await.unwrap();
        let ds = store.create_data_source("w", "sqlite::memory:").await.unwrap();
        store.create_task(new_task("a", ds.id, Some("0 9 * * *"))).await.unwrap().id
    };

    let reopened = SqliteStore::connect(&url).await.unwrap();
    assert_eq!(reopened.get(id).await.unwrap().name, "a");
}
