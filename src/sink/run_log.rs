//! CSV run log.
//!
//! One header line, written exactly once per file, then one line per processed
//! frame. Every record is flushed before `append` returns.
//!
//! Opening a log only validates it. The file is created or truncated when the run
//! opens the sink, after its source has opened.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::encoder::check_parent_dir;
use super::{LogRecord, RecordLog};
use crate::ingest::StreamInfo;

pub const LOG_HEADER: &str = "frame_index,detections_this_frame,detections_total,occupancy_percent";

/// How an existing log file is treated when a run opens it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOpenMode {
    /// Truncate and write a fresh header.
    Create,
    /// Keep existing records; the header must match.
    #[default]
    Append,
}

impl std::str::FromStr for LogOpenMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "append" => Ok(Self::Append),
            other => Err(anyhow!("log mode must be 'create' or 'append' (got '{}')", other)),
        }
    }
}

pub struct CsvRunLog {
    path: PathBuf,
    mode: LogOpenMode,
    writer: Option<BufWriter<File>>,
    closed: bool,
    existing: u64,
    records: u64,
}

impl CsvRunLog {
    /// Check `path` for `mode` without modifying it. An existing log opened for
    /// append must carry the expected header. The file is truncated or created
    /// only when the run opens the log or appends its first record.
    pub fn open<P: AsRef<Path>>(path: P, mode: LogOpenMode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        check_parent_dir(&path)?;
        let existing = match (mode, existing_len(&path)?) {
            (LogOpenMode::Append, len) if len > 0 => check_existing(&path)?,
            _ => 0,
        };
        Ok(Self {
            path,
            mode,
            writer: None,
            closed: false,
            existing,
            records: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records that were already in the file when it was opened.
    pub fn existing_records(&self) -> u64 {
        self.existing
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>> {
        if self.closed {
            return Err(anyhow!("run log {} is closed", self.path.display()));
        }
        if self.writer.is_none() {
            let writer = self.create_writer()?;
            self.writer = Some(writer);
        }
        self.writer
            .as_mut()
            .ok_or_else(|| anyhow!("run log {} is closed", self.path.display()))
    }

    fn create_writer(&mut self) -> Result<BufWriter<File>> {
        let path = self.path.clone();
        let path = path.as_path();
        let keep = self.mode == LogOpenMode::Append && existing_len(path)? > 0;
        let file = if keep {
            // Re-checked: the file may have changed since the log was prepared.
            self.existing = check_existing(path)?;
            OpenOptions::new()
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open run log {}", path.display()))?
        } else {
            self.existing = 0;
            File::create(path)
                .with_context(|| format!("failed to create run log {}", path.display()))?
        };

        let mut writer = BufWriter::new(file);
        if !keep {
            writeln!(writer, "{}", LOG_HEADER)
                .and_then(|_| writer.flush())
                .with_context(|| format!("failed to write run log header {}", path.display()))?;
        }
        log::info!(
            "CsvRunLog: {} ({} existing records)",
            path.display(),
            self.existing
        );
        Ok(writer)
    }
}

impl RecordLog for CsvRunLog {
    fn open(&mut self, _stream: &StreamInfo) -> Result<()> {
        self.writer().map(|_| ())
    }

    fn append(&mut self, record: &LogRecord) -> Result<()> {
        let path = self.path.clone();
        let writer = self.writer()?;
        writeln!(
            writer,
            "{},{},{},{}",
            record.frame_index,
            record.detections_this_frame,
            record.detections_total,
            record.occupancy_percent
        )
        .and_then(|_| writer.flush())
        .with_context(|| format!("failed to append to run log {}", path.display()))?;
        self.records += 1;
        Ok(())
    }

    fn records_written(&self) -> u64 {
        self.records
    }

    fn finish(&mut self) -> Result<()> {
        self.closed = true;
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .with_context(|| format!("failed to flush run log {}", self.path.display()))?;
        }
        Ok(())
    }
}

fn existing_len(path: &Path) -> Result<u64> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e).with_context(|| format!("failed to stat run log {}", path.display())),
    }
}

/// Validates the header of an existing log and counts its records.
fn check_existing(path: &Path) -> Result<u64> {
    let file =
        File::open(path).with_context(|| format!("failed to read run log {}", path.display()))?;
    let mut lines = BufReader::new(file).lines();
    let header = lines
        .next()
        .transpose()
        .with_context(|| format!("failed to read run log {}", path.display()))?
        .unwrap_or_default();
    if header.trim_end() != LOG_HEADER {
        return Err(anyhow!(
            "run log {} has an unexpected header '{}'",
            path.display(),
            header
        ));
    }
    let mut count = 0;
    for line in lines {
        let line = line.with_context(|| format!("failed to read run log {}", path.display()))?;
        if !line.trim().is_empty() {
            count += 1;
        }
    }
    Ok(count)
}

/// Parse every record of a run log file.
pub fn read_records<P: AsRef<Path>>(path: P) -> Result<Vec<LogRecord>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read run log {}", path.display()))?;
    let mut lines = raw.lines();
    match lines.next() {
        Some(header) if header.trim_end() == LOG_HEADER => {}
        _ => return Err(anyhow!("run log {} is missing its header", path.display())),
    }
    lines
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(n, line)| {
            parse_record(line).with_context(|| format!("{} record {}", path.display(), n + 1))
        })
        .collect()
}

fn parse_record(line: &str) -> Result<LogRecord> {
    let fields: Vec<&str> = line.trim_end().split(',').collect();
    if fields.len() != 4 {
        return Err(anyhow!("expected 4 fields, found {}", fields.len()));
    }
    Ok(LogRecord {
        frame_index: fields[0].parse().context("frame_index")?,
        detections_this_frame: fields[1].parse().context("detections_this_frame")?,
        detections_total: fields[2].parse().context("detections_total")?,
        occupancy_percent: fields[3].parse().context("occupancy_percent")?,
    })
}
