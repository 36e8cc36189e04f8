//! Per-target sample history and tracking state

use std::collections::{HashMap, HashSet, VecDeque};

use crate::collector::ProcessSample;
use crate::docker::ContainerStat;
use crate::killer::KillReason;

/// One RSS observation: (seconds on the shared time axis, bytes).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub ts: f64,
    pub rss: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Grace,
    Watch,
    Confirming,
    Killable,
    Plateau,
    Cooling,
}

/// Result of the last regression pass over a full window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub slope_mbpm: f64,
    pub growth_mb: f64,
    pub r_squared: f64,
}

/// Tracking record for one process or one container.
#[derive(Debug, Clone)]
pub struct TrackRecord {
    pub name: String,
    pub cmdline: String,
    pub create_time: f64,
    pub ppid: u32,
    pub child_count: u32,
    pub samples: VecDeque<Sample>,
    pub state: TrackState,
    pub confirmations: u32,
    /// No kill before this instant while in GRACE or COOLING.
    pub not_before: f64,
    pub last_class: Option<Classification>,
    pub kill_reason: Option<KillReason>,
    /// Any ancestor is a terminal emulator.
    pub term_child: bool,
    pub last_seen: f64,
}

impl TrackRecord {
    pub fn new(name: String, cmdline: String, create_time: f64, ppid: u32, now: f64, grace_s: f64) -> Self {
        Self {
            name,
            cmdline,
            create_time,
            ppid,
            child_count: 0,
            samples: VecDeque::new(),
            state: TrackState::Grace,
            confirmations: 0,
            not_before: now + grace_s,
            last_class: None,
            kill_reason: None,
            term_child: false,
            last_seen: now,
        }
    }

    /// Append a sample, keeping timestamps strictly increasing and the ring
    /// bounded to `cap`.
    pub fn push_sample(&mut self, ts: f64, rss: u64, cap: usize) {
        if let Some(last) = self.samples.back() {
            if ts <= last.ts {
                return;
            }
        }
        self.samples.push_back(Sample { ts, rss });
        while self.samples.len() > cap {
            self.samples.pop_front();
        }
        self.last_seen = ts;
    }

    pub fn window_full(&self, cap: usize) -> bool {
        self.samples.len() >= cap
    }

    pub fn latest_rss(&self) -> u64 {
        self.samples.back().map_or(0, |s| s.rss)
    }

    pub fn age(&self, now: f64) -> f64 {
        (now - self.create_time).max(0.0)
    }

    /// Discard a corrupt window and fall back to plain watching.
    pub fn reset_history(&mut self) {
        self.samples.clear();
        self.state = TrackState::Watch;
        self.confirmations = 0;
        self.last_class = None;
        self.kill_reason = None;
    }
}

/// Tracked processes keyed by PID. Single writer: the scheduler loop.
#[derive(Default)]
pub struct ProcessTable {
    records: HashMap<u32, TrackRecord>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one snapshot into the table: create records for new PIDs (in
    /// GRACE), append a sample everywhere, and replace a record whose PID
    /// was reused by a different process.
    pub fn observe(
        &mut self,
        snapshot: &[ProcessSample],
        term_pids: &HashSet<u32>,
        now: f64,
        history_len: usize,
        grace_s: f64,
    ) {
        for p in snapshot {
            let stale = self
                .records
                .get(&p.pid)
                .is_some_and(|r| (r.create_time - p.create_time).abs() > 1.0);
            if stale {
                self.records.remove(&p.pid);
            }
            let rec = self.records.entry(p.pid).or_insert_with(|| {
                TrackRecord::new(p.name.clone(), p.cmdline.clone(), p.create_time, p.ppid, now, grace_s)
            });
            rec.name.clone_from(&p.name);
            rec.cmdline.clone_from(&p.cmdline);
            rec.ppid = p.ppid;
            rec.child_count = p.child_count;
            rec.term_child = term_pids.contains(&p.pid);
            rec.push_sample(now, p.rss, history_len);
        }
    }

    /// Drop records whose PID is gone from the snapshot and whose last
    /// sample is older than the gc horizon.
    pub fn gc(&mut self, live: &HashSet<u32>, now: f64, horizon_s: f64) {
        self.records
            .retain(|pid, rec| live.contains(pid) || now - rec.last_seen <= horizon_s);
    }

    pub fn pids_sorted(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self.records.keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    pub fn get(&self, pid: u32) -> Option<&TrackRecord> {
        self.records.get(&pid)
    }

    pub fn get_mut(&mut self, pid: u32) -> Option<&mut TrackRecord> {
        self.records.get_mut(&pid)
    }

    pub fn remove(&mut self, pid: u32) -> Option<TrackRecord> {
        self.records.remove(&pid)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u32, &TrackRecord)> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Tracked containers keyed by runtime id. Same shape as [`ProcessTable`];
/// a container's age is measured from first observation.
#[derive(Default)]
pub struct ContainerTable {
    records: HashMap<String, TrackRecord>,
}

impl ContainerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, stats: &[ContainerStat], now: f64, history_len: usize, grace_s: f64) {
        for c in stats {
            let rec = self
                .records
                .entry(c.id.clone())
                .or_insert_with(|| TrackRecord::new(c.name.clone(), c.name.clone(), now, 0, now, grace_s));
            rec.name.clone_from(&c.name);
            rec.push_sample(now, c.rss, history_len);
        }
    }

    pub fn gc(&mut self, live: &HashSet<String>, now: f64, horizon_s: f64) {
        self.records
            .retain(|id, rec| live.contains(id) || now - rec.last_seen <= horizon_s);
    }

    pub fn ids_sorted(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.records.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    pub fn get(&self, id: &str) -> Option<&TrackRecord> {
        self.records.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut TrackRecord> {
        self.records.get_mut(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<TrackRecord> {
        self.records.remove(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TrackRecord)> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(pid: u32, rss: u64, create_time: f64) -> ProcessSample {
        ProcessSample {
            pid,
            name: "proc".into(),
            cmdline: "/usr/bin/proc".into(),
            create_time,
            ppid: 1,
            child_count: 0,
            rss,
        }
    }

    #[test]
    fn ring_is_bounded_and_strictly_increasing() {
        let mut rec = TrackRecord::new("x".into(), "x".into(), 0.0, 1, 0.0, 0.0);
        for i in 0..10 {
            rec.push_sample(i as f64, 100 + i, 4);
        }
        assert_eq!(rec.samples.len(), 4);
        // duplicate and backwards timestamps are refused
        rec.push_sample(9.0, 1, 4);
        rec.push_sample(3.0, 1, 4);
        assert_eq!(rec.samples.len(), 4);
        let ts: Vec<f64> = rec.samples.iter().map(|s| s.ts).collect();
        assert!(ts.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn new_record_starts_in_grace() {
        let mut table = ProcessTable::new();
        table.observe(&[sample(42, 1000, 5.0)], &HashSet::new(), 10.0, 6, 60.0);
        let rec = table.get(42).unwrap();
        assert_eq!(rec.state, TrackState::Grace);
        assert_eq!(rec.not_before, 70.0);
        assert_eq!(rec.samples.len(), 1);
    }

    #[test]
    fn pid_reuse_replaces_record() {
        let mut table = ProcessTable::new();
        table.observe(&[sample(42, 1000, 5.0)], &HashSet::new(), 10.0, 6, 0.0);
        table.get_mut(42).unwrap().confirmations = 3;
        // same PID, new creation time: a different process
        table.observe(&[sample(42, 2000, 99.0)], &HashSet::new(), 110.0, 6, 0.0);
        let rec = table.get(42).unwrap();
        assert_eq!(rec.confirmations, 0);
        assert_eq!(rec.samples.len(), 1);
        assert_eq!(rec.create_time, 99.0);
    }

    #[test]
    fn gc_drops_only_stale_and_absent() {
        let mut table = ProcessTable::new();
        table.observe(&[sample(1, 100, 0.0), sample(2, 100, 0.0)], &HashSet::new(), 0.0, 6, 0.0);
        // only PID 2 is still live
        let live: HashSet<u32> = [2].into_iter().collect();
        table.gc(&live, 10.0, 30.0);
        assert!(table.get(1).is_some(), "absent but fresh record is kept");
        table.gc(&live, 100.0, 30.0);
        assert!(table.get(1).is_none(), "absent and stale record is dropped");
        assert!(table.get(2).is_some());
    }

    #[test]
    fn container_age_starts_at_first_observation() {
        let mut table = ContainerTable::new();
        let stat = ContainerStat {
            id: "abc123".into(),
            name: "webapp".into(),
            rss: 1 << 20,
        };
        table.observe(&[stat], 50.0, 6, 10.0);
        let rec = table.get("abc123").unwrap();
        assert_eq!(rec.create_time, 50.0);
        assert_eq!(rec.state, TrackState::Grace);
        assert_eq!(rec.not_before, 60.0);
    }
}
