//! Rendering result sets to files.
//!
//! Filename templates accept `{date}` (YYYYMMDD), `{time}` (HHMMSS),
//! `{datetime}` (YYYYMMDD_HHMMSS), `{task_name}` and the single fields
//! `{Y}` `{m}` `{d}` `{H}` `{M}` `{S}`. Unknown tokens stay literal.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::DateTime;
use chrono_tz::Tz;
use sluice_core::{ExportArtifact, ResultSet, SluiceError};

const DEFAULT_TEMPLATE: &str = "{task_name}_{datetime}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn parse(name: &str) -> Result<Self, SluiceError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(SluiceError::Config(format!("unsupported export format '{other}'"))),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

/// Values substituted into a filename template.
#[derive(Debug, Clone)]
pub struct ExportContext {
    pub task_name: String,
    /// Run time in the task's timezone.
    pub executed_at: DateTime<Tz>,
}

#[async_trait::async_trait]
pub trait Exporter: Send + Sync {
    /// Render `result` to exactly one file.
    async fn export(
        &self,
        result: &ResultSet,
        filename_template: Option<&str>,
        context: &ExportContext,
    ) -> Result<ExportArtifact, SluiceError>;
}

/// Substitute template tokens. No extension handling or sanitizing.
pub fn render_filename(template: &str, context: &ExportContext) -> String {
    let at = &context.executed_at;
    let template = if template.trim().is_empty() {
        DEFAULT_TEMPLATE
    } else {
        template
    };

    let mut out = String::with_capacity(template.len() + 16);
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };
        let token = &after[..close];
        let value = match token {
            "date" => Some(at.format("%Y%m%d").to_string()),
            "time" => Some(at.format("%H%M%S").to_string()),
            "datetime" => Some(at.format("%Y%m%d_%H%M%S").to_string()),
            "task_name" => Some(context.task_name.clone()),
            "Y" => Some(at.format("%Y").to_string()),
            "m" => Some(at.format("%m").to_string()),
            "d" => Some(at.format("%d").to_string()),
            "H" => Some(at.format("%H").to_string()),
            "M" => Some(at.format("%M").to_string()),
            "S" => Some(at.format("%S").to_string()),
            _ => None,
        };
        match value {
            Some(v) => out.push_str(&v),
            None => {
                out.push('{');
                out.push_str(token);
                out.push('}');
            }
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

/// Replace characters that are not valid in file names.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_matches('.');
    if trimmed.is_empty() {
        "export".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Create a new file in `dir`, suffixing `_1`, `_2`, ... while the name is
/// taken. The name is claimed atomically so concurrent exports never share a
/// file.
fn create_unique(dir: &Path, stem: &str, ext: &str) -> std::io::Result<(PathBuf, File)> {
    for n in 0u32.. {
        let path = match n {
            0 => dir.join(format!("{stem}.{ext}")),
            n => dir.join(format!("{stem}_{n}.{ext}")),
        };
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!("no free file name for {stem}.{ext}"),
    ))
}

/// Writes CSV or JSON files into a directory.
#[derive(Debug, Clone)]
pub struct FileExporter {
    output_dir: PathBuf,
    format: ExportFormat,
}

impl FileExporter {
    pub fn new(output_dir: impl Into<PathBuf>, format: ExportFormat) -> Self {
        Self {
            output_dir: output_dir.into(),
            format,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Rendered file stem, without the format's extension.
    fn target_stem(&self, template: Option<&str>, context: &ExportContext) -> String {
        let rendered = sanitize(&render_filename(template.unwrap_or_default(), context));
        let suffix = format!(".{}", self.format.extension());
        rendered
            .strip_suffix(&suffix)
            .map(str::to_string)
            .unwrap_or(rendered)
    }

    fn write_new(&self, stem: &str, result: &ResultSet) -> Result<PathBuf, SluiceError> {
        let (path, file) = create_unique(&self.output_dir, stem, self.format.extension())?;
        let written = match self.format {
            ExportFormat::Csv => write_csv(file, result),
            ExportFormat::Json => write_json(file, result),
        };
        if let Err(e) = written {
            if let Err(rm) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %rm, "failed to remove partial export");
            }
            return Err(e);
        }
        Ok(path)
    }
}

fn write_csv<W: Write>(out: W, result: &ResultSet) -> Result<(), SluiceError> {
    let export_err = |e: csv::Error| SluiceError::Export(e.to_string());
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(&result.columns).map_err(export_err)?;
    for row in &result.rows {
        writer
            .write_record(row.iter().map(cell_text))
            .map_err(export_err)?;
    }
    writer.flush()?;
    Ok(())
}

fn cell_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn write_json<W: Write>(out: W, result: &ResultSet) -> Result<(), SluiceError> {
    let records: Vec<serde_json::Map<String, serde_json::Value>> = result
        .rows
        .iter()
        .map(|row| {
            result
                .columns
                .iter()
                .cloned()
                .zip(row.iter().cloned())
                .collect()
        })
        .collect();
    let mut writer = BufWriter::new(out);
    serde_json::to_writer_pretty(&mut writer, &records)
        .map_err(|e| SluiceError::Export(e.to_string()))?;
    writer.flush()?;
    Ok(())
}

#[async_trait::async_trait]
impl Exporter for FileExporter {
    async fn export(
        &self,
        result: &ResultSet,
        filename_template: Option<&str>,
        context: &ExportContext,
    ) -> Result<ExportArtifact, SluiceError> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| SluiceError::Export(format!("{}: {e}", self.output_dir.display())))?;

        let stem = self.target_stem(filename_template, context);
        let exporter = self.clone();
        let result = result.clone();

        let path = tokio::task::spawn_blocking(move || exporter.write_new(&stem, &result))
            .await
            .map_err(|e| SluiceError::Export(e.to_string()))?
            .map_err(|e| match e {
                SluiceError::Io(io) => SluiceError::Export(io.to_string()),
                other => other,
            })?;

        let size = tokio::fs::metadata(&path)
            .await
            .map_err(|e| SluiceError::Export(e.to_string()))?
            .len();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        tracing::debug!(path = %path.display(), size, "export written");
        Ok(ExportArtifact {
            path,
            file_name,
            size,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn context(name: &str) -> ExportContext {
        ExportContext {
            task_name: name.to_string(),
            executed_at: Tz::UTC.with_ymd_and_hms(2024, 5, 1, 7, 8, 9).unwrap(),
        }
    }

    fn result() -> ResultSet {
        ResultSet::new(
            vec!["id".into(), "region".into(), "total".into()],
            vec![
                vec![json!(1), json!("north, east"), json!(9.5)],
                vec![json!(2), serde_json::Value::Null, json!(3)],
            ],
        )
    }

    #[test]
    fn template_tokens_resolve_to_run_values() {
        let name = render_filename("report_{date}_{task_name}", &context("Sales"));
        assert_eq!(name, "report_20240501_Sales");
        assert!(!name.contains('{'));
    }

    #[test]
    fn all_tokens() {
        let name = render_filename("{Y}-{m}-{d}T{H}{M}{S} {time} {datetime}", &context("x"));
        assert_eq!(name, "2024-05-01T070809 070809 20240501_070809");
    }

    #[test]
    fn unknown_and_unclosed_tokens_stay_literal() {
        assert_eq!(render_filename("a_{nope}_{date", &context("x")), "a_{nope}_{date");
    }

    #[test]
    fn empty_template_uses_default() {
        assert_eq!(render_filename("  ", &context("Sales")), "Sales_20240501_070809");
    }

    #[test]
    fn sanitize_replaces_separators() {
        assert_eq!(sanitize("a/b:c*d"), "a_b_c_d");
        assert_eq!(sanitize(".."), "export");
    }

    #[test]
    fn format_parse() {
        assert_eq!(ExportFormat::parse("CSV").unwrap(), ExportFormat::Csv);
        assert!(ExportFormat::parse("xlsx").is_err());
    }

    #[tokio::test]
    async fn csv_export_writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = FileExporter::new(dir.path(), ExportFormat::Csv);

        let artifact = exporter
            .export(&result(), Some("report_{date}_{task_name}"), &context("Sales"))
            .await
            .unwrap();

        assert_eq!(artifact.file_name, "report_20240501_Sales.csv");
        let text = std::fs::read_to_string(&artifact.path).unwrap();
        assert_eq!(text, "id,region,total\n1,\"north, east\",9.5\n2,,3\n");
        assert_eq!(artifact.size, text.len() as u64);
    }

    #[tokio::test]
    async fn existing_file_is_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = FileExporter::new(dir.path(), ExportFormat::Csv);

        let first = exporter.export(&result(), Some("fixed.csv"), &context("x")).await.unwrap();
        let second = exporter.export(&result(), Some("fixed"), &context("x")).await.unwrap();

        assert_eq!(first.file_name, "fixed.csv");
        assert_eq!(second.file_name, "fixed_1.csv");
    }

    #[tokio::test]
    async fn concurrent_exports_never_share_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = Arc::new(FileExporter::new(dir.path(), ExportFormat::Csv));

        let runs: Vec<_> = (0..8)
            .map(|_| {
                let exporter = Arc::clone(&exporter);
                tokio::spawn(async move {
                    exporter
                        .export(&result(), Some("report_{date}"), &context("x"))
                        .await
                        .unwrap()
                })
            })
            .collect();
        let mut names = Vec::new();
        for run in runs {
            names.push(run.await.unwrap().file_name);
        }
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 8);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 8);
    }

    /// Accepts nothing, so buffered output fails on flush.
    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn json_flush_errors_are_reported() {
        let err = write_json(FullDisk, &result()).unwrap_err();
        assert!(matches!(err, SluiceError::Io(_)), "got: {err:?}");
    }

    #[test]
    fn csv_flush_errors_are_reported() {
        assert!(write_csv(FullDisk, &result()).is_err());
    }

    #[tokio::test]
    async fn json_export_writes_records() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = FileExporter::new(dir.path().join("nested"), ExportFormat::Json);

        let artifact = exporter.export(&result(), None, &context("Sales")).await.unwrap();
        assert_eq!(artifact.file_name, "Sales_20240501_070809.json");

        let parsed: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&artifact.path).unwrap()).unwrap();
        assert_eq!(parsed[0]["region"], "north, east");
        assert_eq!(parsed[1]["total"], 3);
    }
}
