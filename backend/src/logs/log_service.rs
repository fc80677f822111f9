use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use shared::LogEntry;

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serde JSON error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Bounded request log persisted as a JSON array, newest entry first.
#[derive(Clone)]
pub struct RequestLog {
    path: PathBuf,
    max_logs: usize,
    // Serialises read-modify-write cycles on the file.
    guard: Arc<Mutex<()>>,
}

impl RequestLog {
    pub fn new(path: impl Into<PathBuf>, max_logs: usize) -> Self {
        let log = Self {
            path: path.into(),
            max_logs: max_logs.max(1),
            guard: Arc::new(Mutex::new(())),
        };
        if let Err(e) = log.ensure_file() {
            log::error!("Error ensuring log file {} exists: {}", log.path.display(), e);
        } else {
            log::info!("Request log initialized with file: {}", log.path.display());
        }
        log
    }

    fn ensure_file(&self) -> Result<(), LogError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            if !dir.exists() {
                fs::create_dir_all(dir)?;
                log::info!("Created log directory: {}", dir.display());
            }
        }
        if !self.path.exists() {
            fs::write(&self.path, "[]")?;
        }
        Ok(())
    }

    pub fn record(&self, entry: LogEntry) {
        let _lock = self.guard.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(e) = self.append(entry) {
            log::error!("Error writing to log file {}: {}", self.path.display(), e);
        }
    }

    fn append(&self, entry: LogEntry) -> Result<(), LogError> {
        let mut logs = self.read_file().unwrap_or_else(|e| {
            log::warn!("Discarding unreadable log file {}: {}", self.path.display(), e);
            Vec::new()
        });
        logs.insert(0, entry);
        logs.truncate(self.max_logs);
        self.ensure_file()?;
        fs::write(&self.path, serde_json::to_string_pretty(&logs)?)?;
        Ok(())
    }

    fn read_file(&self) -> Result<Vec<LogEntry>, LogError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// All entries, newest first. An unreadable file reads as empty.
    pub fn all(&self) -> Vec<LogEntry> {
        let _lock = self.guard.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.read_file().unwrap_or_else(|e| {
            log::error!("Error reading log file {}: {}", self.path.display(), e);
            Vec::new()
        })
    }

    /// Entries from the same UTC calendar day as `date` (`YYYY-MM-DD` or RFC 3339).
    pub fn by_date(&self, date: &str) -> Vec<LogEntry> {
        let Some(day) = parse_day(date) else {
            return Vec::new();
        };
        self.all()
            .into_iter()
            .filter(|entry| parse_day(&entry.timestamp) == Some(day))
            .collect()
    }

    /// Case-insensitive match on method, endpoint, IP address or status.
    pub fn search(&self, query: &str) -> Vec<LogEntry> {
        let term = query.to_lowercase();
        self.all()
            .into_iter()
            .filter(|entry| {
                entry.method.to_lowercase().contains(&term)
                    || entry.endpoint.to_lowercase().contains(&term)
                    || entry.ip_address.to_lowercase().contains(&term)
                    || entry.status.to_string().contains(&term)
            })
            .collect()
    }
}

fn parse_day(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc).date_naive());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(timestamp: &str, method: &str, endpoint: &str, status: u16) -> LogEntry {
        LogEntry {
            timestamp: timestamp.to_string(),
            method: method.to_string(),
            endpoint: endpoint.to_string(),
            ip_address: "10.0.0.7".to_string(),
            status,
            response_time: 12,
        }
    }

    #[test]
    fn creates_file_with_empty_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/server.log");
        let log = RequestLog::new(&path, 10);
        assert_eq!(fs::read_to_string(&path).unwrap(), "[]");
        assert!(log.all().is_empty());
    }

    #[test]
    fn newest_first_and_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let log = RequestLog::new(dir.path().join("server.log"), 3);
        for i in 0..5 {
            log.record(entry("2025-03-01T10:00:00Z", "GET", &format!("/r/{}", i), 200));
        }
        let endpoints: Vec<_> = log.all().into_iter().map(|e| e.endpoint).collect();
        assert_eq!(endpoints, vec!["/r/4", "/r/3", "/r/2"]);
    }

    #[test]
    fn survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.log");
        RequestLog::new(&path, 10).record(entry("2025-03-01T10:00:00Z", "POST", "/submitReceipt", 200));
        let reopened = RequestLog::new(&path, 10);
        assert_eq!(reopened.all().len(), 1);
    }

    #[test]
    fn corrupt_file_reads_empty_and_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.log");
        fs::write(&path, "{not json").unwrap();
        let log = RequestLog::new(&path, 10);
        assert!(log.all().is_empty());

        log.record(entry("2025-03-01T10:00:00Z", "GET", "/health", 200));
        assert_eq!(log.all().len(), 1);
    }

    #[test]
    fn filters_by_utc_day() {
        let dir = tempfile::tempdir().unwrap();
        let log = RequestLog::new(dir.path().join("server.log"), 10);
        log.record(entry("2025-03-01T23:30:00Z", "GET", "/health", 200));
        log.record(entry("2025-03-02T00:10:00+02:00", "GET", "/health", 200));
        log.record(entry("2025-03-02T08:00:00Z", "GET", "/health", 200));

        assert_eq!(log.by_date("2025-03-01").len(), 2);
        assert_eq!(log.by_date("2025-03-02T12:00:00Z").len(), 1);
        assert!(log.by_date("yesterday").is_empty());
    }

    #[test]
    fn search_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let log = RequestLog::new(dir.path().join("server.log"), 10);
        log.record(entry("2025-03-01T10:00:00Z", "POST", "/submitReceipt", 409));
        log.record(entry("2025-03-01T10:00:01Z", "GET", "/health", 200));

        assert_eq!(log.search("submitreceipt").len(), 1);
        assert_eq!(log.search("post").len(), 1);
        assert_eq!(log.search("409").len(), 1);
        assert_eq!(log.search("10.0.0").len(), 2);
        assert!(log.search("delete").is_empty());
    }
}
