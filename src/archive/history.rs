use chrono::{Local, NaiveDate, NaiveDateTime};
use std::collections::BTreeSet;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::outcome::RunStatus;

pub const DEFAULT_HISTORY_DIR: &str = "history";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const FILE_DATE_FORMAT: &str = "%Y%m%d";

/// One audit line: `[YYYY-MM-DD HH:MM:SS] STATUS: <command line> | <summary>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub timestamp: NaiveDateTime,
    pub status: RunStatus,
    pub command_line: String,
    pub summary: String,
}

impl HistoryEntry {
    /// Line breaks in the command line are escaped so an entry always stays
    /// on a single line of the log.
    pub fn new(
        timestamp: NaiveDateTime,
        status: RunStatus,
        command_line: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            status,
            command_line: single_line(command_line.into()),
            summary: summary.into(),
        }
    }

    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.strip_prefix('[')?;
        let (stamp, rest) = rest.split_once("] ")?;
        let timestamp = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;
        let (status, rest) = rest.split_once(": ")?;
        let status = status.parse().ok()?;
        let (command_line, summary) = rest.rsplit_once(" | ").unwrap_or((rest, ""));
        Some(Self::new(timestamp, status, command_line, summary))
    }
}

impl fmt::Display for HistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.status,
            self.command_line
        )?;
        if !self.summary.is_empty() {
            write!(f, " | {}", self.summary)?;
        }
        Ok(())
    }
}

fn single_line(s: String) -> String {
    if !s.contains(['\r', '\n']) {
        return s;
    }
    s.replace('\r', "\\r").replace('\n', "\\n")
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("failed to create history directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to append to {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Append-only run log, one file per calendar day.
pub struct RunHistory {
    dir: PathBuf,
}

impl RunHistory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn log_path(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{}.log", date.format(FILE_DATE_FORMAT)))
    }

    pub fn record(&self, entry: &HistoryEntry) -> Result<PathBuf, HistoryError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| HistoryError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;

        let path = self.log_path(entry.timestamp.date());
        let write = |path: &Path| -> std::io::Result<()> {
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            writeln!(file, "{entry}")
        };
        write(&path).map_err(|source| HistoryError::Write {
            path: path.clone(),
            source,
        })?;

        debug!(path = %path.display(), "run recorded in history");
        Ok(path)
    }

    /// History is diagnostic only; a failed append never reaches the caller.
    pub fn record_or_warn(&self, entry: &HistoryEntry) {
        if let Err(e) = self.record(entry) {
            warn!("could not record run history: {e}");
        }
    }

    pub fn read_today(&self) -> Result<Vec<HistoryEntry>, HistoryError> {
        self.read_date(Local::now().date_naive())
    }

    pub fn read_date(&self, date: NaiveDate) -> Result<Vec<HistoryEntry>, HistoryError> {
        let path = self.log_path(date);
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(HistoryError::Read { path, source }),
        };

        Ok(contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| {
                let entry = HistoryEntry::parse(line);
                if entry.is_none() {
                    debug!(%line, "skipping unparseable history line");
                }
                entry
            })
            .collect())
    }

    /// Dates that have a `yyyymmdd.log` file; other files are ignored.
    pub fn list_dates(&self) -> Result<BTreeSet<NaiveDate>, HistoryError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(source) => {
                return Err(HistoryError::Read {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        Ok(entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name();
                let stem = name.to_str()?.strip_suffix(".log")?.to_string();
                if stem.len() != 8 || !stem.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                NaiveDate::parse_from_str(&stem, FILE_DATE_FORMAT).ok()
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(date: &str, time: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(&format!("{date} {time}"), TIMESTAMP_FORMAT).unwrap()
    }

    fn entry(stamp: NaiveDateTime, status: RunStatus) -> HistoryEntry {
        HistoryEntry::new(
            stamp,
            status,
            "redmine-fetch --output-dir /tmp/data 49121 99999",
            "成功:1, 失敗:1, 合計:2",
        )
    }

    #[test]
    fn line_format_matches_log_layout() {
        let e = entry(at("2024-05-01", "09:30:05"), RunStatus::Failure);
        assert_eq!(
            e.to_string(),
            "[2024-05-01 09:30:05] FAILED: redmine-fetch --output-dir /tmp/data 49121 99999 | 成功:1, 失敗:1, 合計:2"
        );
        assert_eq!(HistoryEntry::parse(&e.to_string()), Some(e));
    }

    #[test]
    fn parse_accepts_lines_without_summary() {
        let e = HistoryEntry::parse("[2024-05-01 10:00:00] SUCCESS: redmine-fetch -o x 1").unwrap();
        assert_eq!(e.status, RunStatus::Success);
        assert_eq!(e.command_line, "redmine-fetch -o x 1");
        assert_eq!(e.summary, "");
        assert!(HistoryEntry::parse("garbage").is_none());
        assert!(HistoryEntry::parse("[2024-05-01 10:00:00] MAYBE: x").is_none());
    }

    #[test]
    fn record_appends_to_dated_file() {
        let dir = tempfile::tempdir().unwrap();
        let history = RunHistory::new(dir.path().join("history"));
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();

        let first = entry(at("2024-05-01", "09:00:00"), RunStatus::Success);
        let second = entry(at("2024-05-01", "18:00:00"), RunStatus::Failure);
        let path = history.record(&first).unwrap();
        history.record(&second).unwrap();

        assert_eq!(path, dir.path().join("history").join("20240501.log"));
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.ends_with('\n'));
        assert_eq!(history.read_date(day).unwrap(), vec![first, second]);
    }

    #[test]
    fn multi_line_arguments_stay_on_one_log_line() {
        let dir = tempfile::tempdir().unwrap();
        let history = RunHistory::new(dir.path());
        let e = HistoryEntry::new(
            at("2024-05-02", "08:00:00"),
            RunStatus::Success,
            "redmine-fetch -o \"a\nb\" 1\r\n2",
            "成功:1, 失敗:0, 合計:1",
        );
        assert_eq!(e.command_line, "redmine-fetch -o \"a\\nb\" 1\\r\\n2");

        let path = history.record(&e).unwrap();
        let contents = std::fs::read_to_string(path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        let day = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        assert_eq!(history.read_date(day).unwrap(), vec![e]);
    }

    #[test]
    fn record_fails_when_directory_cannot_be_created() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("history");
        std::fs::write(&blocker, "not a directory").unwrap();
        let history = RunHistory::new(&blocker);

        let e = entry(at("2024-05-01", "09:00:00"), RunStatus::Success);
        assert!(matches!(
            history.record(&e),
            Err(HistoryError::CreateDir { .. })
        ));
        history.record_or_warn(&e);
    }

    #[test]
    fn read_missing_day_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let history = RunHistory::new(dir.path());
        assert!(history.read_today().unwrap().is_empty());
    }

    #[test]
    fn list_dates_uses_filenames_only() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "20240501.log",
            "20231231.log",
            "notes.log",
            "2024050.log",
            "20241340.log",
            "20240601.txt",
        ] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        let history = RunHistory::new(dir.path());

        let dates: Vec<String> = history
            .list_dates()
            .unwrap()
            .into_iter()
            .map(|d| d.format(FILE_DATE_FORMAT).to_string())
            .collect();
        assert_eq!(dates, vec!["20231231", "20240501"]);
    }

    #[test]
    fn list_dates_without_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let history = RunHistory::new(dir.path().join("nope"));
        assert!(history.list_dates().unwrap().is_empty());
    }
}
