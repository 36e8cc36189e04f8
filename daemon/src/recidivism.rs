//! Repeat-offender tracking: the same command line keeps coming back

use std::collections::{HashMap, VecDeque};

/// Normalized command-line signature: basename of argv[0] plus the next
/// two tokens, each stripped to its final path component.
pub fn fingerprint(cmdline: &str) -> String {
    cmdline
        .split_whitespace()
        .take(3)
        .map(|tok| tok.rsplit('/').next().unwrap_or(tok))
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct RecidivismTracker {
    threshold: usize,
    window_s: f64,
    kills: HashMap<String, VecDeque<f64>>,
}

impl RecidivismTracker {
    pub fn new(threshold: usize, window_s: f64) -> Self {
        Self {
            threshold,
            window_s,
            kills: HashMap::new(),
        }
    }

    /// Record a successful kill. Returns `Some(count)` when the fingerprint
    /// has crossed the threshold inside the window; the FIFO is cleared at
    /// that point so one offender cannot cause a notification storm.
    pub fn record_kill(&mut self, fp: &str, now: f64) -> Option<usize> {
        let fifo = self.kills.entry(fp.to_string()).or_default();
        fifo.push_back(now);
        while fifo.front().is_some_and(|&t| now - t > self.window_s) {
            fifo.pop_front();
        }
        if fifo.len() >= self.threshold {
            let count = fifo.len();
            fifo.clear();
            Some(count)
        } else {
            None
        }
    }

    /// Whether this fingerprint already has an un-expired kill on record.
    pub fn is_repeat(&self, fp: &str, now: f64) -> bool {
        self.kills
            .get(fp)
            .is_some_and(|fifo| fifo.iter().any(|&t| now - t <= self.window_s))
    }

    /// Drop expired entries so the counter never holds stale history.
    pub fn prune(&mut self, now: f64) {
        for fifo in self.kills.values_mut() {
            while fifo.front().is_some_and(|&t| now - t > self.window_s) {
                fifo.pop_front();
            }
        }
        self.kills.retain(|_, fifo| !fifo.is_empty());
    }

    #[cfg(test)]
    fn pending(&self, fp: &str) -> usize {
        self.kills.get(fp).map_or(0, VecDeque::len)
    }
}
