//! Append-only kill log at ~/memory_leak_killer.log

use std::fs::{self, File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::killer::KillReason;

pub const LOG_FILE_NAME: &str = "memory_leak_killer.log";

const ROTATE_BYTES: u64 = 50 * 1024 * 1024;

/// Single-writer appender; the scheduler loop is the only caller.
pub struct ActionLog {
    path: PathBuf,
    writer: LineWriter<File>,
}

impl ActionLog {
    pub fn open_default() -> io::Result<Self> {
        let home = directories::UserDirs::new()
            .map(|d| d.home_dir().to_path_buf())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "home directory not found"))?;
        Self::open(&home.join(LOG_FILE_NAME))
    }

    pub fn open(path: &Path) -> io::Result<Self> {
        rotate_if_large(path);
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: LineWriter::new(file),
        })
    }

    /// Append one kill event. Only kills land here; an idle run leaves the
    /// file untouched.
    pub fn record(
        &mut self,
        event: &str,
        pid: u32,
        name: &str,
        reason: KillReason,
        rss_mb: f64,
        slope_mbpm: f64,
    ) -> io::Result<()> {
        rotate_if_large(&self.path);
        writeln!(
            self.writer,
            "[{}] {} pid={} name={} reason={} rss={:.1} slope={:.1}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            event,
            pid,
            name,
            reason,
            rss_mb,
            slope_mbpm,
        )
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

fn rotate_if_large(path: &Path) {
    let too_large = fs::metadata(path).map(|m| m.len() > ROTATE_BYTES).unwrap_or(false);
    if too_large {
        let backup = path.with_extension("old");
        let _ = fs::remove_file(&backup);
        let _ = fs::rename(path, &backup);
    }
}
