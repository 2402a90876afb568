mod api;
mod background;
mod router;
mod state;

use std::sync::Arc;

use anyhow::Context;
use sluice_connector::{ScriptRunner, SqlRegistry};
use sluice_core::Config;
use sluice_notify::{ChatNotifier, EmailNotifier, Notifier};
use sluice_scheduler::clock::parse_timezone;
use sluice_scheduler::{
    DeliveryCoordinator, ExportFormat, FileExporter, Scheduler, SystemClock, TaskExecutor,
};
use sluice_store::SqliteStore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn load_config() -> Config {
    sluice_core::config::load_dotenv();
    Config::from_env()
}

fn notifiers(config: &Config) -> anyhow::Result<Vec<Arc<dyn Notifier>>> {
    let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::new();
    if config.email.is_configured() {
        notifiers.push(Arc::new(
            EmailNotifier::from_config(&config.email).context("email notifier")?,
        ));
    } else {
        info!("SMTP not configured, email delivery disabled");
    }
    notifiers.push(Arc::new(
        ChatNotifier::from_config(&config.chat).context("chat notifier")?,
    ));
    Ok(notifiers)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn serve(config: &Config) -> anyhow::Result<()> {
    config.log_summary();

    let store = Arc::new(
        SqliteStore::connect(&config.store.database_url)
            .await
            .with_context(|| format!("opening task store {}", config.store.database_url))?,
    );
    let registry = Arc::new(SqlRegistry::new(
        store.clone(),
        ScriptRunner::new(config.execution.script_interpreter.clone()),
    ));

    let format = ExportFormat::parse(&config.export.format)?;
    tokio::fs::create_dir_all(&config.export.output_dir)
        .await
        .with_context(|| format!("creating {}", config.export.output_dir.display()))?;
    let delivery = DeliveryCoordinator::new(
        Arc::new(FileExporter::new(&config.export.output_dir, format)),
        notifiers(config)?,
        config.delivery.notifier_cap(),
    );

    let default_timezone = parse_timezone(&config.scheduler.default_timezone)?;
    let executor = Arc::new(TaskExecutor::new(
        registry.clone(),
        store.clone(),
        delivery,
        config.execution.clone(),
        default_timezone,
    ));
    let scheduler = Scheduler::start(config.scheduler.clone(), executor, Arc::new(SystemClock));
    let handle = scheduler.handle();

    match handle.reload_schedule().await {
        Ok(report) => {
            info!(scheduled = report.scheduled, "Initial schedule loaded");
            for error in &report.errors {
                warn!(task_id = error.task_id, "{}", error.message);
            }
        }
        Err(e) => warn!(error = %e, "initial schedule load failed"),
    }

    let reloader = config
        .scheduler
        .reload_interval()
        .map(|interval| background::spawn_periodic_reload(handle.clone(), interval));

    let state = Arc::new(state::AppState {
        scheduler: handle,
        repository: store,
        registry: registry.clone(),
        export_dir: config.export.output_dir.clone(),
    });
    let app = router::build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("Server listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(reloader) = reloader {
        reloader.abort();
    }
    scheduler.shutdown().await;
    registry.close().await;
    info!("Scheduler stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_level(true)
        .init();

    let config = load_config();
    serve(&config).await
}
