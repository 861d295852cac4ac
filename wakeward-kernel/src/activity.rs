use crate::models::{ActivityRecord, ActivityResult, SCHEDULE_FORMAT};
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use tracing::{error, warn};

/// Append-only record of user actions and device state changes.
/// Implementations swallow their own errors.
pub trait ActivityLog: Send + Sync {
    fn record(&self, action: &str, result: ActivityResult, details: &str);
}

/// One JSON object per line.
pub struct JsonlActivityLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlActivityLog {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into(), write_lock: Mutex::new(()) }
    }

    /// Last `limit` records, oldest first. Lines that do not parse are skipped.
    pub fn recent(&self, limit: usize) -> std::io::Result<Vec<ActivityRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        let records: Vec<ActivityRecord> = content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| match serde_json::from_str(l) {
                Ok(r) => Some(r),
                Err(e) => {
                    warn!("skipping unreadable activity line: {e}");
                    None
                }
            })
            .collect();
        let skip = records.len().saturating_sub(limit);
        Ok(records.into_iter().skip(skip).collect())
    }

    fn append(&self, record: &ActivityRecord) -> anyhow::Result<()> {
        let line = serde_json::to_string(record)?;
        let _guard = self.write_lock.lock();
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

impl ActivityLog for JsonlActivityLog {
    fn record(&self, action: &str, result: ActivityResult, details: &str) {
        let record = ActivityRecord {
            timestamp: chrono::Local::now().format(SCHEDULE_FORMAT).to_string(),
            action: action.to_string(),
            result,
            details: details.to_string(),
        };
        if let Err(e) = self.append(&record) {
            error!("failed to write activity record ({action}/{result}): {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_append_and_recent_keeps_tail() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlActivityLog::new(dir.path().join("activity.jsonl"));

        log.record("startup", ActivityResult::Success, "Application initialized");
        log.record("turn_on", ActivityResult::Denied, "Attempted during restricted hours");
        log.record("shutdown", ActivityResult::Error, "SSH Connect Error: refused");

        let all = log.recent(100).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].action, "startup");

        let tail = log.recent(2).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].result, ActivityResult::Denied);
        assert_eq!(tail[1].details, "SSH Connect Error: refused");
    }

    #[test]
    fn missing_file_reads_empty_and_bad_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activity.jsonl");
        let log = JsonlActivityLog::new(&path);
        assert!(log.recent(10).unwrap().is_empty());

        std::fs::write(&path, "garbage\n").unwrap();
        log.record("schedule", ActivityResult::Success, "Scheduled shutdown in 2 hours");
        let records = log.recent(10).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, "schedule");
    }

    #[test]
    fn unwritable_path_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlActivityLog::new(dir.path().join("missing-dir").join("activity.jsonl"));
        log.record("startup", ActivityResult::Success, "ignored");
    }
}
