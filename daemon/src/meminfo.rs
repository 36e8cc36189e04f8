//! System memory oracle (/proc/meminfo)

use std::fs;
use std::io;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemReading {
    pub total: u64,
    pub used_pct: f64,
}

pub trait MemoryProbe: Send + Sync {
    /// Total RAM in bytes and current used percentage. Uncached; callers
    /// decide how often to read.
    fn mem(&self) -> io::Result<MemReading>;
}

pub struct ProcMemoryProbe;

impl MemoryProbe for ProcMemoryProbe {
    fn mem(&self) -> io::Result<MemReading> {
        let raw = fs::read_to_string("/proc/meminfo")?;
        parse_meminfo(&raw).ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed /proc/meminfo"))
    }
}

fn parse_meminfo(raw: &str) -> Option<MemReading> {
    let mut total_kb = None;
    let mut available_kb = None;
    let mut free_kb = None;
    for line in raw.lines() {
        let mut fields = line.split_whitespace();
        match fields.next() {
            Some("MemTotal:") => total_kb = fields.next()?.parse::<u64>().ok(),
            Some("MemAvailable:") => available_kb = fields.next()?.parse::<u64>().ok(),
            Some("MemFree:") => free_kb = fields.next()?.parse::<u64>().ok(),
            _ => {}
        }
    }
    let total_kb = total_kb?;
    if total_kb == 0 {
        return None;
    }
    // MemAvailable is absent on very old kernels
    let available_kb = available_kb.or(free_kb)?;
    let used_pct = (total_kb.saturating_sub(available_kb)) as f64 / total_kb as f64 * 100.0;
    Some(MemReading {
        total: total_kb * 1024,
        used_pct,
    })
}
