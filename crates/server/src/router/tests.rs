use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono_tz::Tz;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sluice_core::config::{ExecutionConfig, SchedulerConfig};
use sluice_core::{
    DataSourceId, DataSourceRegistry, DeliveryOptions, ExportMethod, ResultSet, ScriptContext,
    SluiceError, TaskBody, TaskStatus,
};
use sluice_scheduler::{
    DeliveryCoordinator, ExportFormat, FileExporter, Scheduler, SystemClock, TaskExecutor,
};
use sluice_store::{NewTask, SqliteStore};
use tower::ServiceExt;

use super::build_router;
use crate::state::AppState;

/// Answers every query with two rows after a short pause; only source 1 exists.
struct SlowRegistry;

#[async_trait::async_trait]
impl DataSourceRegistry for SlowRegistry {
    async fn execute_query(
        &self,
        _data_source_id: DataSourceId,
        _sql: &str,
        _timeout: Duration,
    ) -> Result<ResultSet, SluiceError> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(ResultSet::new(
            vec!["id".to_string()],
            vec![vec![json!(1)], vec![json!(2)]],
        ))
    }

    async fn run_script(
        &self,
        _data_source_id: DataSourceId,
        _script_path: &str,
        _function_name: &str,
        _context: &ScriptContext,
        _timeout: Duration,
    ) -> Result<ResultSet, SluiceError> {
        Err(SluiceError::ScriptExecution("no interpreter".to_string()))
    }

    async fn test_connection(&self, data_source_id: DataSourceId) -> Result<(), SluiceError> {
        match data_source_id {
            1 => Ok(()),
            id => Err(SluiceError::DataSourceNotFound(id)),
        }
    }
}

struct TestApp {
    app: axum::Router,
    task_id: i64,
    scheduler: Scheduler,
    _dir: tempfile::TempDir,
}

async fn test_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let source = store
        .create_data_source("warehouse", "sqlite::memory:")
        .await
        .unwrap();
    let task = store
        .create_task(NewTask {
            name: "Sales".to_string(),
            description: None,
            status: TaskStatus::Active,
            data_source_id: source.id,
            body: TaskBody::Sql {
                sql_content: "SELECT id FROM orders".to_string(),
            },
            cron_expression: None,
            timezone: None,
            export_methods: vec![ExportMethod::Local],
            export_filename: None,
            delivery: DeliveryOptions::default(),
            timeout_secs: None,
        })
        .await
        .unwrap();

    let registry: Arc<dyn DataSourceRegistry> = Arc::new(SlowRegistry);
    let export_dir = dir.path().to_path_buf();
    let delivery = DeliveryCoordinator::new(
        Arc::new(FileExporter::new(&export_dir, ExportFormat::Csv)),
        Vec::new(),
        Duration::from_secs(5),
    );
    let executor = Arc::new(TaskExecutor::new(
        registry.clone(),
        store.clone(),
        delivery,
        ExecutionConfig::default(),
        Tz::UTC,
    ));
    let config = SchedulerConfig {
        worker_threads: 2,
        queue_capacity: 4,
        ..Default::default()
    };
    let scheduler = Scheduler::start(config, executor, Arc::new(SystemClock));

    let state = Arc::new(AppState {
        scheduler: scheduler.handle(),
        repository: store,
        registry,
        export_dir,
    });

    TestApp {
        app: build_router(state),
        task_id: task.id,
        scheduler,
        _dir: dir,
    }
}

async fn call(app: &axum::Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn health_reports_running_scheduler() {
    let t = test_app().await;
    let (status, body) = call(&t.app, "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["scheduler_running"], true);
    t.scheduler.shutdown().await;
}

#[tokio::test]
async fn execute_is_accepted_then_conflicts_while_running() {
    let t = test_app().await;
    let uri = format!("/tasks/{}/execute", t.task_id);

    let (status, body) = call(&t.app, "POST", &uri).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let execution_id = body["execution_id"].as_str().unwrap().to_string();

    let (status, body) = call(&t.app, "POST", &uri).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("is already running"));

    let record_uri = format!("/executions/{execution_id}");
    let mut finished = Value::Null;
    for _ in 0..100 {
        let (status, body) = call(&t.app, "GET", &record_uri).await;
        if status == StatusCode::OK && body["status"] == "success" {
            finished = body;
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(finished["rows_affected"], 2);

    let (status, body) = call(&t.app, "GET", &format!("/tasks/{}/executions", t.task_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    t.scheduler.shutdown().await;
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let t = test_app().await;
    let (status, _) = call(&t.app, "POST", "/tasks/999/execute").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&t.app, "GET", &format!("/executions/{}", uuid::Uuid::new_v4())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&t.app, "POST", "/data-sources/7/test").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    t.scheduler.shutdown().await;
}

#[tokio::test]
async fn cancel_without_a_run_reports_false() {
    let t = test_app().await;
    let (status, body) = call(&t.app, "POST", &format!("/tasks/{}/cancel", t.task_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancelled"], false);
    t.scheduler.shutdown().await;
}

#[tokio::test]
async fn test_endpoint_previews_without_history() {
    let t = test_app().await;
    let (status, body) = call(&t.app, "POST", &format!("/tasks/{}/test?limit=1", t.task_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["row_count"], 1);

    let (_, history) = call(&t.app, "GET", &format!("/tasks/{}/executions", t.task_id)).await;
    assert!(history.as_array().unwrap().is_empty());
    t.scheduler.shutdown().await;
}

#[tokio::test]
async fn download_rejects_traversal_and_serves_exports() {
    let t = test_app().await;
    let (status, _) = call(&t.app, "GET", "/api/files/download/..%2Fsluice.db").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&t.app, "GET", "/api/files/download/missing.csv").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    std::fs::write(t._dir.path().join("report.csv"), "id\n1\n").unwrap();
    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/files/download/report.csv")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()["content-disposition"]
        .to_str()
        .unwrap()
        .starts_with("attachment"));
    t.scheduler.shutdown().await;
}
