//! Scheduler wired to the SQLite store, the SQL registry and CSV export.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;
use sluice_connector::{ScriptRunner, SqlRegistry};
use sluice_core::config::{ExecutionConfig, SchedulerConfig};
use sluice_core::{
    DataSourceRegistry, DeliveryOptions, ExecutionRecord, ExecutionStatus, ExportMethod, TaskBody,
    TaskRepository, TaskStatus, TriggerKind,
};
use sluice_scheduler::{
    DeliveryCoordinator, ExportFormat, FileExporter, Scheduler, SchedulerHandle, SystemClock,
    TaskExecutor,
};
use sluice_store::{NewTask, SqliteStore};
use uuid::Uuid;

const T: Duration = Duration::from_secs(10);

struct Env {
    store: Arc<SqliteStore>,
    scheduler: Scheduler,
    handle: SchedulerHandle,
    data_source_id: i64,
    export_dir: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

async fn env() -> Env {
    let dir = tempfile::tempdir().unwrap();
    let store_url = format!("sqlite://{}", dir.path().join("sluice.db").display());
    let store = Arc::new(SqliteStore::connect(&store_url).await.unwrap());

    let source_url = format!("sqlite://{}?mode=rwc", dir.path().join("source.db").display());
    let source = store.create_data_source("warehouse", &source_url).await.unwrap();

    let registry = Arc::new(SqlRegistry::new(store.clone(), ScriptRunner::new("python3")));
    registry
        .execute_query(source.id, "CREATE TABLE orders (id INTEGER, total REAL)", T)
        .await
        .unwrap();
    registry
        .execute_query(source.id, "INSERT INTO orders VALUES (1, 9.5), (2, 3.25)", T)
        .await
        .unwrap();

    let export_dir = dir.path().join("exports");
    let delivery = DeliveryCoordinator::new(
        Arc::new(FileExporter::new(&export_dir, ExportFormat::Csv)),
        Vec::new(),
        Duration::from_secs(5),
    );
    let executor = Arc::new(TaskExecutor::new(
        registry,
        store.clone(),
        delivery,
        ExecutionConfig::default(),
        Tz::UTC,
    ));
    let config = SchedulerConfig {
        worker_threads: 2,
        queue_capacity: 4,
        redispatch_delay_ms: 50,
        ..Default::default()
    };
    let scheduler = Scheduler::start(config, executor, Arc::new(SystemClock));
    let handle = scheduler.handle();

    Env {
        store,
        scheduler,
        handle,
        data_source_id: source.id,
        export_dir,
        _dir: dir,
    }
}

fn new_task(name: &str, data_source_id: i64, sql: &str, cron: Option<&str>) -> NewTask {
    NewTask {
        name: name.to_string(),
        description: None,
        status: TaskStatus::Active,
        data_source_id,
        body: TaskBody::Sql {
            sql_content: sql.to_string(),
        },
        cron_expression: cron.map(String::from),
        timezone: None,
        export_methods: vec![ExportMethod::Local],
        export_filename: Some("report_{date}_{task_name}".to_string()),
        delivery: DeliveryOptions::default(),
        timeout_secs: None,
    }
}

async fn wait_terminal(store: &SqliteStore, execution_id: Uuid) -> ExecutionRecord {
    for _ in 0..200 {
        if let Some(record) = store.get_execution_record(execution_id).await.unwrap() {
            if record.is_terminal() {
                return record;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("execution {execution_id} did not finish");
}

fn exported_files(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn manual_run_exports_and_records_history() {
    let env = env().await;
    let task = env
        .store
        .create_task(new_task("Sales", env.data_source_id, "SELECT id, total FROM orders ORDER BY id", None))
        .await
        .unwrap();

    let execution_id = env.handle.execute_now(task.id).await.unwrap();
    let record = wait_terminal(&env.store, execution_id).await;

    assert_eq!(record.status, ExecutionStatus::Success, "{:?}", record.error_message);
    assert_eq!(record.trigger, TriggerKind::Manual);
    assert_eq!(record.rows_affected, 2);

    let today = chrono::Utc::now().format("%Y%m%d").to_string();
    let path = record.output_file_path.clone().unwrap();
    assert!(path.ends_with(&format!("report_{today}_Sales.csv")));
    let csv = std::fs::read_to_string(&path).unwrap();
    assert_eq!(csv, "id,total\n1,9.5\n2,3.25\n");
    assert_eq!(record.file_size, Some(csv.len() as u64));

    let history = env.store.list_execution_records(task.id, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].execution_id, execution_id);
    env.scheduler.shutdown().await;
}

#[tokio::test]
async fn failing_query_is_recorded_as_failed() {
    let env = env().await;
    let task = env
        .store
        .create_task(new_task("Broken", env.data_source_id, "SELECT * FROM missing_table", None))
        .await
        .unwrap();

    let execution_id = env.handle.execute_now(task.id).await.unwrap();
    let record = wait_terminal(&env.store, execution_id).await;

    assert_eq!(record.status, ExecutionStatus::Failed);
    assert!(record.error_message.unwrap().contains("missing_table"));
    assert!(exported_files(&env.export_dir).is_empty());
    env.scheduler.shutdown().await;
}

#[tokio::test]
async fn scheduled_task_fires_from_store() {
    let env = env().await;
    let task = env
        .store
        .create_task(new_task("Ticker", env.data_source_id, "SELECT id FROM orders", Some("* * * * * *")))
        .await
        .unwrap();

    let report = env.handle.reload_schedule().await.unwrap();
    assert_eq!(report.added, vec![task.id]);

    let mut found = None;
    for _ in 0..160 {
        let history = env.store.list_execution_records(task.id, 10).await.unwrap();
        if let Some(record) = history.into_iter().find(|r| r.is_terminal()) {
            found = Some(record);
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    let record = found.expect("no scheduled run recorded");
    assert_eq!(record.trigger, TriggerKind::Scheduled);
    assert_eq!(record.status, ExecutionStatus::Success);
    env.scheduler.shutdown().await;
}

#[tokio::test]
async fn test_run_previews_without_history() {
    let env = env().await;
    let task = env
        .store
        .create_task(new_task("Preview", env.data_source_id, "SELECT id, total FROM orders;", None))
        .await
        .unwrap();

    let preview = env.handle.test_task(task.id, Some(1)).await.unwrap();

    assert!(preview.success, "{:?}", preview.errors);
    assert_eq!(preview.row_count, 1);
    assert_eq!(preview.columns, vec!["id", "total"]);
    assert!(env.store.list_execution_records(task.id, 10).await.unwrap().is_empty());
    assert!(exported_files(&env.export_dir).is_empty());
    env.scheduler.shutdown().await;
}
