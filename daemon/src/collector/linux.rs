use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use super::{ProcessCollector, ProcessSample};

pub struct LinuxProcessCollector {
    page_size: u64,
    clock_ticks: u64,
    boot_time: u64,
}

impl LinuxProcessCollector {
    pub fn new() -> Self {
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) as u64 };
        let clock_ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) as u64 }.max(1);
        Self {
            page_size,
            clock_ticks,
            boot_time: Self::boot_time(),
        }
    }

    fn boot_time() -> u64 {
        let stat = fs::read_to_string("/proc/stat").unwrap_or_default();
        for line in stat.lines() {
            if let Some(rest) = line.strip_prefix("btime ") {
                return rest.trim().parse().unwrap_or(0);
            }
        }
        0
    }

    fn parse_process(&self, pid: u32) -> Option<ProcessSample> {
        let proc_dir = Path::new("/proc").join(pid.to_string());

        let cmdline_raw = fs::read(proc_dir.join("cmdline")).ok()?;
        if cmdline_raw.is_empty() {
            // kernel thread or exiting process
            return None;
        }
        let cmdline = String::from_utf8_lossy(&cmdline_raw)
            .replace('\0', " ")
            .trim()
            .to_string();

        let stat = fs::read_to_string(proc_dir.join("stat")).ok()?;
        // comm may contain spaces; fields resume after the closing paren
        let open = stat.find('(')?;
        let close = stat.rfind(')')?;
        let name = stat.get(open + 1..close)?.to_string();
        let rest: Vec<&str> = stat.get(close + 1..)?.split_whitespace().collect();
        if rest.len() < 22 {
            return None;
        }
        let ppid: u32 = rest[1].parse().ok()?;
        let start_ticks: u64 = rest[19].parse().unwrap_or(0);
        let rss_pages: u64 = rest[21].parse().unwrap_or(0);

        Some(ProcessSample {
            pid,
            name,
            cmdline,
            create_time: (self.boot_time + start_ticks / self.clock_ticks) as f64,
            ppid,
            child_count: 0,
            rss: rss_pages * self.page_size,
        })
    }
}

impl Default for LinuxProcessCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessCollector for LinuxProcessCollector {
    fn snapshot(&self, deadline: Duration) -> Vec<ProcessSample> {
        let started = Instant::now();
        let mut processes = Vec::new();
        if let Ok(entries) = fs::read_dir("/proc") {
            for entry in entries.flatten() {
                if started.elapsed() > deadline {
                    break;
                }
                if let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) {
                    if let Some(info) = self.parse_process(pid) {
                        processes.push(info);
                    }
                }
            }
        }
        let counts: HashMap<u32, u32> = super::child_counts(&processes);
        for p in &mut processes {
            p.child_count = counts.get(&p.pid).copied().unwrap_or(0);
        }
        processes
    }

    fn get_process(&self, pid: u32) -> Option<ProcessSample> {
        self.parse_process(pid)
    }
}
