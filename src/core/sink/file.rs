//! JSON-lines file sink

use super::{Sink, SinkError, SinkKind, SinkRecord};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// File sink configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSinkConfig {
    /// Directory receiving the daily files
    pub directory: PathBuf,
    /// File name prefix
    pub prefix: String,
}

impl Default for FileSinkConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("gps_data"),
            prefix: "gps".to_string(),
        }
    }
}

/// Appends one JSON line per record to `<dir>/<prefix>_YYYY-MM-DD.jsonl`
pub struct FileSink {
    config: FileSinkConfig,
}

impl FileSink {
    pub fn new(config: FileSinkConfig) -> Self {
        Self { config }
    }

    /// Path of the file holding records for `date`
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        daily_path(&self.config, date)
    }
}

fn daily_path(config: &FileSinkConfig, date: NaiveDate) -> PathBuf {
    config
        .directory
        .join(format!("{}_{}.jsonl", config.prefix, date.format("%Y-%m-%d")))
}

fn append_lines(path: &Path, lines: &[String]) -> Result<(), SinkError> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = BufWriter::new(file);
    for line in lines {
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

#[async_trait]
impl Sink for FileSink {
    fn kind(&self) -> SinkKind {
        SinkKind::File
    }

    async fn deliver_batch(&self, batch: &[SinkRecord]) -> Result<(), SinkError> {
        let mut by_day: BTreeMap<NaiveDate, Vec<String>> = BTreeMap::new();
        for record in batch {
            let day = record.snapshot.effective_time().date_naive();
            by_day
                .entry(day)
                .or_default()
                .push(serde_json::to_string(&record.snapshot)?);
        }

        let config = self.config.clone();
        tokio::task::spawn_blocking(move || -> Result<(), SinkError> {
            fs::create_dir_all(&config.directory)?;
            for (day, lines) in &by_day {
                let path = daily_path(&config, *day);
                append_lines(&path, lines)?;
                debug!("Appended {} records to {}", lines.len(), path.display());
            }
            Ok(())
        })
        .await?
    }
}
