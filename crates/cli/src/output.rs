//! Plain-text rendering of server responses.

use serde_json::Value;
use sluice_core::ExecutionRecord;

fn text(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn status(status: &Value) -> String {
    let mut out = String::new();
    let running = status["scheduler_running"].as_bool().unwrap_or(false);
    out.push_str(&format!(
        "scheduler: {}  started: {}\n",
        if running { "running" } else { "stopped" },
        text(&status["started_at"])
    ));
    out.push_str(&format!(
        "tasks: {}  backlog: {}  workers: {}/{} busy  queued: {}/{}\n",
        text(&status["active_task_count"]),
        text(&status["backlog"]),
        text(&status["workers"]["busy"]),
        text(&status["workers"]["size"]),
        text(&status["workers"]["queued"]),
        text(&status["workers"]["queue_capacity"]),
    ));

    if let Some(fires) = status["next_fire_times"].as_array() {
        if !fires.is_empty() {
            out.push_str("\nnext fires:\n");
        }
        for fire in fires {
            out.push_str(&format!(
                "  {:>6}  {:<24} {:<20} {}\n",
                text(&fire["task_id"]),
                text(&fire["task_name"]),
                text(&fire["cron_expression"]),
                text(&fire["next_fire"]),
            ));
        }
    }

    if let Some(runs) = status["in_flight"].as_array() {
        if !runs.is_empty() {
            out.push_str("\nin flight:\n");
        }
        for run in runs {
            out.push_str(&format!(
                "  {:>6}  {}  {}\n",
                text(&run["task_id"]),
                text(&run["execution_id"]),
                text(&run["phase"]),
            ));
        }
    }

    if let Some(metrics) = status["metrics"].as_object() {
        out.push_str("\nmetrics:\n");
        for (key, value) in metrics {
            out.push_str(&format!("  {key}: {}\n", text(value)));
        }
    }
    out
}

pub fn record_line(record: &ExecutionRecord) -> String {
    let duration = record
        .duration_secs
        .map(|d| format!("{d:.2}s"))
        .unwrap_or_else(|| "-".to_string());
    let mut line = format!(
        "{}  {:<9} {:<9} {}  rows={} {}",
        record.execution_id,
        record.status.as_str(),
        record.trigger.as_str(),
        record.created_at.format("%Y-%m-%d %H:%M:%S"),
        record.rows_affected,
        duration,
    );
    if let Some(error) = &record.error_message {
        line.push_str(&format!("  error: {error}"));
    }
    line
}

pub fn record_detail(record: &ExecutionRecord) -> String {
    let mut out = record_line(record);
    out.push('\n');
    if let Some(path) = &record.output_file_path {
        out.push_str(&format!("  file: {path}"));
        if let Some(size) = record.file_size {
            out.push_str(&format!(" ({size} bytes)"));
        }
        out.push('\n');
    }
    for outcome in &record.delivery_results {
        out.push_str(&format!(
            "  {:<6} {} in {}ms",
            outcome.channel,
            if outcome.success { "delivered" } else { "failed" },
            outcome.duration_ms
        ));
        if let Some(error) = &outcome.error {
            out.push_str(&format!(": {error}"));
        }
        out.push('\n');
    }
    out
}

pub fn preview(preview: &Value) -> String {
    let mut out = String::new();
    let ok = preview["success"].as_bool().unwrap_or(false);
    out.push_str(&format!(
        "{} in {}s, {} rows\n",
        if ok { "ok" } else { "failed" },
        text(&preview["elapsed_secs"]),
        text(&preview["row_count"]),
    ));
    for error in preview["errors"].as_array().into_iter().flatten() {
        out.push_str(&format!("error: {}\n", text(error)));
    }
    for warning in preview["warnings"].as_array().into_iter().flatten() {
        out.push_str(&format!("warning: {}\n", text(warning)));
    }
    if let Some(columns) = preview["columns"].as_array() {
        if !columns.is_empty() {
            let header: Vec<String> = columns.iter().map(text).collect();
            out.push_str(&header.join("\t"));
            out.push('\n');
        }
    }
    for row in preview["rows"].as_array().into_iter().flatten() {
        let cells: Vec<String> = row.as_array().into_iter().flatten().map(text).collect();
        out.push_str(&cells.join("\t"));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn preview_renders_rows_as_tab_separated() {
        let rendered = preview(&json!({
            "success": true,
            "elapsed_secs": 0.5,
            "row_count": 2,
            "columns": ["id", "name"],
            "rows": [[1, "a"], [2, null]],
            "errors": [],
            "warnings": ["not a SELECT"],
        }));
        assert_eq!(
            rendered,
            "ok in 0.5s, 2 rows\nwarning: not a SELECT\nid\tname\n1\ta\n2\t-\n"
        );
    }

    #[test]
    fn status_lists_upcoming_fires() {
        let rendered = status(&json!({
            "scheduler_running": true,
            "started_at": "2024-05-01T00:00:00Z",
            "active_task_count": 1,
            "backlog": 0,
            "workers": {"size": 4, "busy": 1, "queue_capacity": 16, "queued": 0},
            "next_fire_times": [{
                "task_id": 3,
                "task_name": "Sales",
                "cron_expression": "0 0 9 * * *",
                "next_fire": "2024-05-02T09:00:00Z",
            }],
            "in_flight": [],
        }));
        assert!(rendered.starts_with("scheduler: running"));
        assert!(rendered.contains("workers: 1/4 busy"));
        assert!(rendered.contains("Sales"));
        assert!(!rendered.contains("in flight"));
    }
}
