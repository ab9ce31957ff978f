//! Day-partitioned JSON Lines output.

use std::collections::{HashMap, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, trace};

use super::api::{ExportError, ExportResult};

/// Inclusive range of days that get written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Default for DateWindow {
    fn default() -> Self {
        Self {
            start: NaiveDate::from_ymd_opt(2022, 11, 16).unwrap_or(NaiveDate::MIN),
            end: NaiveDate::from_ymd_opt(2023, 7, 1).unwrap_or(NaiveDate::MAX),
        }
    }
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// the day part of an RFC 3339 style timestamp
pub fn partition_date(timestamp: &str) -> ExportResult<NaiveDate> {
    timestamp
        .get(..10)
        .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok())
        .ok_or_else(|| ExportError::InvalidDate(timestamp.to_string()))
}

/// default cap on day files held open at once
pub const DEFAULT_MAX_OPEN_FILES: usize = 64;

/// Appends serialized items to `<dir>/<YYYY-MM-DD>.jsonl`.
///
/// Files are opened lazily in append mode. At most `max_open` stay open; past
/// that the one opened longest ago is flushed and closed, and reopened for
/// append if its day comes up again.
pub struct PartitionedSink {
    dir: PathBuf,
    window: DateWindow,
    max_open: usize,
    files: Mutex<OpenFiles>,
}

#[derive(Default)]
struct OpenFiles {
    writers: HashMap<NaiveDate, BufWriter<File>>,
    /// open order, oldest first
    order: VecDeque<NaiveDate>,
}

impl OpenFiles {
    fn close_oldest(&mut self) -> ExportResult<()> {
        if let Some(date) = self.order.pop_front() {
            if let Some(mut writer) = self.writers.remove(&date) {
                trace!(%date, "closing partition");
                writer.flush()?;
            }
        }
        Ok(())
    }
}

impl PartitionedSink {
    pub fn new(dir: impl Into<PathBuf>, window: DateWindow) -> Self {
        Self {
            dir: dir.into(),
            window,
            max_open: DEFAULT_MAX_OPEN_FILES,
            files: Mutex::new(OpenFiles::default()),
        }
    }

    /// cap the number of open day files; zero is treated as one
    pub fn with_max_open(mut self, max_open: usize) -> Self {
        self.max_open = max_open.max(1);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn window(&self) -> DateWindow {
        self.window
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.jsonl", date.format("%Y-%m-%d")))
    }

    /// write one line; returns false when `date` is outside the window
    pub fn write<T: Serialize>(&self, date: NaiveDate, item: &T) -> ExportResult<bool> {
        if !self.window.contains(date) {
            return Ok(false);
        }

        let mut line = serde_json::to_vec(item)?;
        line.push(b'\n');

        let mut files = self.files.lock();
        if !files.writers.contains_key(&date) {
            if files.writers.len() >= self.max_open {
                files.close_oldest()?;
            }
            let path = self.path_for(date);
            debug!(path = %path.display(), "opening partition");
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            files.writers.insert(date, BufWriter::new(file));
            files.order.push_back(date);
        }
        if let Some(writer) = files.writers.get_mut(&date) {
            writer.write_all(&line)?;
        }

        Ok(true)
    }

    /// number of day files currently open
    pub fn open_partitions(&self) -> usize {
        self.files.lock().writers.len()
    }

    pub fn flush(&self) -> ExportResult<()> {
        for writer in self.files.lock().writers.values_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}

/// create the output directory, emptying it first when `clean` is set
pub fn prepare_dir(dir: &Path, clean: bool) -> ExportResult<()> {
    if clean && dir.exists() {
        info!(dir = %dir.display(), "cleaning output directory");
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};
    use tempfile::TempDir;

    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn read_lines(path: &Path) -> Vec<Value> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_default_window_is_inclusive() {
        let window = DateWindow::default();
        assert!(window.contains(day(2022, 11, 16)));
        assert!(window.contains(day(2023, 7, 1)));
        assert!(!window.contains(day(2022, 11, 15)));
        assert!(!window.contains(day(2023, 7, 2)));
    }

    #[test]
    fn test_partition_date() {
        assert_eq!(partition_date("2023-04-01T10:00:00.000Z").unwrap(), day(2023, 4, 1));
        assert_eq!(partition_date("2023-04-01").unwrap(), day(2023, 4, 1));
        assert!(matches!(partition_date("yesterday"), Err(ExportError::InvalidDate(_))));
        assert!(matches!(partition_date(""), Err(ExportError::InvalidDate(_))));
    }

    #[test]
    fn test_writes_one_file_per_day() {
        let dir = TempDir::new().unwrap();
        let sink = PartitionedSink::new(dir.path(), DateWindow::default());

        assert!(sink.write(day(2023, 4, 1), &json!({"n": 1})).unwrap());
        assert!(sink.write(day(2023, 4, 1), &json!({"n": 2})).unwrap());
        assert!(sink.write(day(2023, 4, 2), &json!({"n": 3})).unwrap());
        assert!(!sink.write(day(2021, 1, 1), &json!({"n": 4})).unwrap());
        sink.flush().unwrap();

        assert_eq!(sink.open_partitions(), 2);
        let first = read_lines(&dir.path().join("2023-04-01.jsonl"));
        assert_eq!(first, vec![json!({"n": 1}), json!({"n": 2})]);
        let second = read_lines(&dir.path().join("2023-04-02.jsonl"));
        assert_eq!(second, vec![json!({"n": 3})]);
        assert!(!dir.path().join("2021-01-01.jsonl").exists());
    }

    #[test]
    fn test_open_files_are_capped() {
        let dir = TempDir::new().unwrap();
        let sink = PartitionedSink::new(dir.path(), DateWindow::default()).with_max_open(3);

        let first = day(2023, 1, 1);
        let days: Vec<NaiveDate> = first.iter_days().take(10).collect();
        for (n, date) in days.iter().enumerate() {
            assert!(sink.write(*date, &json!({"n": n})).unwrap());
            assert!(sink.open_partitions() <= 3);
        }
        // first day was closed long ago and gets reopened for append
        sink.write(first, &json!({"n": 10})).unwrap();
        assert_eq!(sink.open_partitions(), 3);
        sink.flush().unwrap();

        for (n, date) in days.iter().enumerate().skip(1) {
            assert_eq!(read_lines(&sink.path_for(*date)), vec![json!({"n": n})]);
        }
        assert_eq!(
            read_lines(&sink.path_for(first)),
            vec![json!({"n": 0}), json!({"n": 10})]
        );
    }

    #[test]
    fn test_appends_to_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("2023-04-01.jsonl");
        fs::write(&path, "{\"n\":0}\n").unwrap();

        let sink = PartitionedSink::new(dir.path(), DateWindow::default());
        sink.write(day(2023, 4, 1), &json!({"n": 1})).unwrap();
        sink.flush().unwrap();

        assert_eq!(read_lines(&path).len(), 2);
    }

    #[test]
    fn test_prepare_dir_cleans() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("stream");
        prepare_dir(&out, false).unwrap();
        fs::write(out.join("old.jsonl"), "x").unwrap();

        prepare_dir(&out, false).unwrap();
        assert!(out.join("old.jsonl").exists());

        prepare_dir(&out, true).unwrap();
        assert!(out.exists());
        assert!(!out.join("old.jsonl").exists());
    }
}
