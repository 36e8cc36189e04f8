//! Process sampler (reads /proc on Linux)

use std::collections::{HashMap, HashSet};
use std::time::Duration;

mod linux;

pub use linux::LinuxProcessCollector;

/// One process as seen at sampling time. RSS is in bytes, creation time in
/// seconds on the same axis as the scheduler clock.
#[derive(Debug, Clone)]
pub struct ProcessSample {
    pub pid: u32,
    pub name: String,
    pub cmdline: String,
    pub create_time: f64,
    pub ppid: u32,
    pub child_count: u32,
    pub rss: u64,
}

pub trait ProcessCollector: Send + Sync {
    /// Enumerate user-space processes. Entries that vanish mid-iteration
    /// are skipped silently; enumeration stops at the soft `deadline` and
    /// returns whatever was read by then.
    fn snapshot(&self, deadline: Duration) -> Vec<ProcessSample>;

    fn get_process(&self, pid: u32) -> Option<ProcessSample>;
}

/// Direct-child counts per PID, as observed in one snapshot.
pub fn child_counts(snapshot: &[ProcessSample]) -> HashMap<u32, u32> {
    let mut counts = HashMap::new();
    for p in snapshot {
        *counts.entry(p.ppid).or_insert(0) += 1;
    }
    counts
}

/// PIDs with a terminal-emulator ancestor anywhere up the parent chain.
pub fn terminal_descendants(snapshot: &[ProcessSample], emulators: &[&str]) -> HashSet<u32> {
    let parents: HashMap<u32, u32> = snapshot.iter().map(|p| (p.pid, p.ppid)).collect();
    let names: HashMap<u32, &str> = snapshot.iter().map(|p| (p.pid, p.name.as_str())).collect();

    let mut out = HashSet::new();
    for p in snapshot {
        let mut cur = p.ppid;
        for _ in 0..32 {
            if cur <= 1 {
                break;
            }
            if names.get(&cur).is_some_and(|n| emulators.contains(n)) {
                out.insert(p.pid);
                break;
            }
            match parents.get(&cur) {
                Some(&up) => cur = up,
                None => break,
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pid: u32, ppid: u32, name: &str) -> ProcessSample {
        ProcessSample {
            pid,
            name: name.into(),
            cmdline: name.into(),
            create_time: 0.0,
            ppid,
            child_count: 0,
            rss: 0,
        }
    }

    #[test]
    fn child_counts_are_direct_only() {
        let snap = vec![entry(10, 1, "a"), entry(20, 10, "b"), entry(21, 10, "c"), entry(30, 20, "d")];
        let counts = child_counts(&snap);
        assert_eq!(counts.get(&10), Some(&2));
        assert_eq!(counts.get(&20), Some(&1));
        assert_eq!(counts.get(&21), None);
    }

    #[test]
    fn terminal_descendants_walk_the_ancestry() {
        let snap = vec![
            entry(10, 1, "kitty"),
            entry(20, 10, "zsh"),
            entry(30, 20, "python"),
            entry(40, 1, "chromium"),
        ];
        let descendants = terminal_descendants(&snap, &["kitty"]);
        assert!(descendants.contains(&20));
        assert!(descendants.contains(&30));
        assert!(!descendants.contains(&40));
        assert!(!descendants.contains(&10), "the emulator itself is not its own descendant");
    }
}
