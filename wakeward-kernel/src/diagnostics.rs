use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Size at which `system.log` rolls over.
pub const MAX_LOG_BYTES: u64 = 5 * 1024 * 1024;
/// Rolled files kept next to it: `system.log.1` (newest) .. `system.log.5`.
pub const LOG_BACKUPS: usize = 5;

const TAIL_CHUNK: u64 = 8 * 1024;

pub fn system_log_path(log_dir: &Path) -> PathBuf {
    log_dir.join("system.log")
}

/// Append-only log file that rotates once it would pass `max_bytes`.
pub struct RotatingFile {
    path: PathBuf,
    file: File,
    written: u64,
    max_bytes: u64,
    backups: usize,
}

impl RotatingFile {
    pub fn open(path: PathBuf, max_bytes: u64, backups: usize) -> io::Result<Self> {
        let file = open_append(&path)?;
        let written = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self { path, file, written, max_bytes, backups })
    }

    fn backup_path(&self, n: usize) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(format!(".{n}"));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        if self.backups == 0 {
            self.file = OpenOptions::new().write(true).truncate(true).open(&self.path)?;
        } else {
            match std::fs::remove_file(self.backup_path(self.backups)) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
                _ => {}
            }
            for n in (1..self.backups).rev() {
                let from = self.backup_path(n);
                if from.exists() {
                    std::fs::rename(&from, self.backup_path(n + 1))?;
                }
            }
            std::fs::rename(&self.path, self.backup_path(1))?;
            self.file = open_append(&self.path)?;
        }
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Stdout plus a rotating `<log_dir>/system.log`, filtered by `RUST_LOG` (default `info`).
/// Keep the returned guard alive for the whole process so the file writer flushes.
pub fn init_tracing(log_dir: &Path) -> anyhow::Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;
    let writer = RotatingFile::open(system_log_path(log_dir), MAX_LOG_BYTES, LOG_BACKUPS)?;
    let (file_writer, guard) = tracing_appender::non_blocking(writer);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .try_init()?;
    Ok(guard)
}

/// Last `limit` lines of the system log, oldest first. Reads backwards from
/// the end of the file, never the whole file.
pub fn recent_system_lines(path: &Path, limit: usize) -> io::Result<Vec<String>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    if limit == 0 {
        return Ok(Vec::new());
    }

    let mut pos = file.metadata()?.len();
    let mut buf: Vec<u8> = Vec::new();
    while pos > 0 && buf.iter().filter(|b| **b == b'\n').count() <= limit {
        let step = pos.min(TAIL_CHUNK);
        pos -= step;
        file.seek(SeekFrom::Start(pos))?;
        let mut chunk = vec![0u8; step as usize];
        file.read_exact(&mut chunk)?;
        chunk.extend_from_slice(&buf);
        buf = chunk;
    }

    let text = String::from_utf8_lossy(&buf);
    let lines: Vec<&str> = text.lines().collect();
    // first line is cut when we stopped mid-file
    let lines = if pos > 0 { &lines[1.min(lines.len())..] } else { &lines[..] };
    let skip = lines.len().saturating_sub(limit);
    Ok(lines[skip..].iter().map(|l| l.to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_lines_returns_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = system_log_path(dir.path());
        assert!(recent_system_lines(&path, 5).unwrap().is_empty());

        std::fs::write(&path, "one\ntwo\nthree\n").unwrap();
        assert_eq!(recent_system_lines(&path, 2).unwrap(), vec!["two", "three"]);
        assert_eq!(recent_system_lines(&path, 10).unwrap().len(), 3);
        assert!(recent_system_lines(&path, 0).unwrap().is_empty());
    }

    #[test]
    fn tail_spans_several_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = system_log_path(dir.path());
        let content: String = (0..5000).map(|i| format!("line {i} with some padding text\n")).collect();
        std::fs::write(&path, content).unwrap();

        let tail = recent_system_lines(&path, 3).unwrap();
        assert_eq!(tail, vec!["line 4997 with some padding text", "line 4998 with some padding text", "line 4999 with some padding text"]);
        assert_eq!(recent_system_lines(&path, 1000).unwrap().len(), 1000);
        assert_eq!(recent_system_lines(&path, 1000).unwrap()[0], "line 4000 with some padding text");
    }

    #[test]
    fn writer_rotates_and_caps_backups() {
        let dir = tempfile::tempdir().unwrap();
        let path = system_log_path(dir.path());
        let mut writer = RotatingFile::open(path.clone(), 100, 2).unwrap();

        for i in 0..20 {
            writer.write_all(format!("event number {i:02} ......\n").as_bytes()).unwrap();
        }
        writer.flush().unwrap();

        assert!(std::fs::metadata(&path).unwrap().len() <= 100);
        assert!(dir.path().join("system.log.1").exists());
        assert!(dir.path().join("system.log.2").exists());
        assert!(!dir.path().join("system.log.3").exists());
        let newest = recent_system_lines(&path, 1).unwrap();
        assert_eq!(newest, vec!["event number 19 ......"]);
    }

    #[test]
    fn reopened_writer_counts_existing_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = system_log_path(dir.path());
        std::fs::write(&path, "x".repeat(90)).unwrap();

        let mut writer = RotatingFile::open(path.clone(), 100, 1).unwrap();
        writer.write_all(b"this line does not fit\n").unwrap();

        assert_eq!(std::fs::read_to_string(dir.path().join("system.log.1")).unwrap(), "x".repeat(90));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "this line does not fit\n");
    }
}
