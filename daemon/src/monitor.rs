//! Scheduler engine: one tick every `interval` seconds drives sampling,
//! classification, mode-gated kills, pressure relief, and gc.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::actionlog::ActionLog;
use crate::collector::{self, ProcessCollector};
use crate::config::{Mode, Settings};
use crate::detector::{self, ClassifyCtx};
use crate::docker::ContainerRuntime;
use crate::history::{ContainerTable, ProcessTable, TrackState};
use crate::killer::{KillOutcome, KillReason, ProcessKiller};
use crate::meminfo::MemoryProbe;
use crate::notifier::Notifier;
use crate::recidivism::{self, RecidivismTracker};
use crate::relief::{self, Candidate, Target};
use crate::tuner::{Thresholds, Tuner};
use crate::whitelist::{Whitelist, TERMINAL_EMULATORS};

const MB: f64 = 1024.0 * 1024.0;

/// Bounded timeout handed to the container runtime for one stop.
const CONTAINER_STOP_S: u64 = 10;

/// Rate limiter for transient external failure logging.
struct Throttle {
    last: HashMap<&'static str, Instant>,
}

impl Throttle {
    fn new() -> Self {
        Self { last: HashMap::new() }
    }

    fn allow(&mut self, key: &'static str) -> bool {
        let now = Instant::now();
        match self.last.get(key) {
            Some(t) if now.duration_since(*t) < Duration::from_secs(60) => false,
            _ => {
                self.last.insert(key, now);
                true
            }
        }
    }
}

pub struct Engine<C, M, K>
where
    C: ProcessCollector,
    M: MemoryProbe,
    K: ProcessKiller,
{
    settings: Settings,
    tuner: Tuner,
    collector: C,
    memory: M,
    killer: K,
    runtime: Option<Arc<dyn ContainerRuntime>>,
    whitelist: Whitelist,
    table: ProcessTable,
    containers: ContainerTable,
    recidivism: RecidivismTracker,
    notifier: Notifier,
    log: ActionLog,
    throttle: Throttle,
}

impl<C, M, K> Engine<C, M, K>
where
    C: ProcessCollector,
    M: MemoryProbe,
    K: ProcessKiller,
{
    pub fn new(
        settings: Settings,
        collector: C,
        memory: M,
        killer: K,
        runtime: Option<Arc<dyn ContainerRuntime>>,
        log: ActionLog,
    ) -> Self {
        let mut whitelist = Whitelist::new(settings.whitelist_extra.iter().cloned()).with_runtime_pids();
        if settings.iterm_only {
            whitelist = whitelist.with_terminal_emulators();
        }
        let tuner = Tuner::new(settings.overrides.clone());
        let recidivism = RecidivismTracker::new(settings.notify_threshold, settings.notify_window_s as f64);
        Self {
            settings,
            tuner,
            collector,
            memory,
            killer,
            runtime,
            whitelist,
            table: ProcessTable::new(),
            containers: ContainerTable::new(),
            recidivism,
            notifier: Notifier::new(),
            log,
            throttle: Throttle::new(),
        }
    }

    pub fn processes(&self) -> &ProcessTable {
        &self.table
    }

    pub fn containers(&self) -> &ContainerTable {
        &self.containers
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// One scheduler pass. `now` is seconds on the shared sample clock.
    pub async fn tick(&mut self, now: f64) {
        let reading = match self.memory.mem() {
            Ok(r) => r,
            Err(e) => {
                if self.throttle.allow("meminfo") {
                    warn!("memory probe failed: {e}");
                }
                return;
            }
        };
        let thr = self.tuner.effective(reading.total, reading.used_pct);
        let deadline = Duration::from_secs_f64(self.settings.interval_s.max(1) as f64 / 2.0);

        // sample and fold into history
        let mut snapshot = self.collector.snapshot(deadline);
        let term_pids = if self.settings.iterm_only {
            let term = collector::terminal_descendants(&snapshot, TERMINAL_EMULATORS);
            snapshot.retain(|p| term.contains(&p.pid));
            term
        } else {
            HashSet::new()
        };
        self.table.observe(&snapshot, &term_pids, now, thr.history, thr.grace_s);

        let container_stats = match &self.runtime {
            Some(rt) if self.settings.docker => match rt.snapshot(deadline).await {
                Ok(stats) => stats,
                Err(e) => {
                    if self.throttle.allow("docker-stats") {
                        warn!("container runtime stats failed: {e}");
                    }
                    Vec::new()
                }
            },
            _ => Vec::new(),
        };
        self.containers.observe(&container_stats, now, thr.history, thr.grace_s);

        // classify, deterministic in PID order
        let interval_s = self.settings.interval_s as f64;
        let mut killable_procs = Vec::new();
        for pid in self.table.pids_sorted() {
            let whitelisted = self
                .table
                .get(pid)
                .is_some_and(|rec| self.whitelist.protected(pid, &rec.name));
            let Some(rec) = self.table.get_mut(pid) else { continue };
            let ctx = ClassifyCtx {
                now,
                total_ram: reading.total,
                interval_s,
                whitelisted,
            };
            if let Some(reason) = detector::advance(rec, &thr, &ctx) {
                killable_procs.push((pid, reason));
            }
        }
        let mut killable_containers = Vec::new();
        for id in self.containers.ids_sorted() {
            let Some(rec) = self.containers.get_mut(&id) else { continue };
            let ctx = ClassifyCtx {
                now,
                total_ram: reading.total,
                interval_s,
                whitelisted: false,
            };
            if let Some(reason) = detector::advance(rec, &thr, &ctx) {
                killable_containers.push((id, reason));
            }
        }

        // in protection mode confirmed leaks wait for the gate; a
        // predictive verdict fires regardless because the host is about
        // to run out either way
        let gate_open = match self.settings.mode {
            Mode::Hunting => true,
            Mode::Protection => reading.used_pct >= thr.leak_pct,
        };
        for (pid, reason) in killable_procs {
            if gate_open || reason == KillReason::Predictive {
                self.kill_process(pid, reason, now, &thr).await;
            } else if let Some(rec) = self.table.get(pid) {
                info!(
                    pid,
                    name = %rec.name,
                    used_pct = reading.used_pct,
                    "leak confirmed but below the protection gate"
                );
            }
        }
        for (id, reason) in killable_containers {
            if gate_open || reason == KillReason::Predictive {
                self.stop_container(&id, reason, now, &thr).await;
            }
        }

        if reading.used_pct >= thr.high_pct {
            info!(used_pct = reading.used_pct, "memory high, starting pressure relief");
            self.pressure_relief(now, &thr).await;
        }

        // gc dead targets
        let horizon = thr.cool_s + thr.history as f64 * interval_s;
        let live: HashSet<u32> = snapshot.iter().map(|p| p.pid).collect();
        self.table.gc(&live, now, horizon);
        let live_ids: HashSet<String> = container_stats.iter().map(|c| c.id.clone()).collect();
        self.containers.gc(&live_ids, now, horizon);
        self.recidivism.prune(now);
    }

    async fn kill_process(&mut self, pid: u32, mut reason: KillReason, now: f64, thr: &Thresholds) {
        let (name, cmdline, rss_mb, slope) = match self.table.get(pid) {
            Some(rec) => (
                rec.name.clone(),
                rec.cmdline.clone(),
                rec.latest_rss() as f64 / MB,
                rec.last_class.map_or(0.0, |c| c.slope_mbpm),
            ),
            None => return,
        };
        if self.whitelist.protected(pid, &name) {
            return;
        }
        let fp = recidivism::fingerprint(&cmdline);
        if reason == KillReason::Leak && self.recidivism.is_repeat(&fp, now) {
            reason = KillReason::Recidivist;
        }

        let grace = Duration::from_secs(self.settings.grace_kill_s);
        match self.killer.kill(pid, grace).await {
            KillOutcome::Killed => {
                info!(pid, name = %name, reason = %reason, rss_mb, "killed process");
                self.append_log("kill", pid, &name, reason, rss_mb, slope);
                self.note_kill(&fp, now);
                self.table.remove(pid);
            }
            KillOutcome::NotFound => {
                // already exited: no recidivism credit
                self.append_log("kill-missed", pid, &name, reason, rss_mb, slope);
                self.table.remove(pid);
            }
            KillOutcome::Denied => {
                warn!(pid, name = %name, "permission denied killing process");
                self.append_log("kill-denied", pid, &name, reason, rss_mb, slope);
                if let Some(rec) = self.table.get_mut(pid) {
                    rec.state = TrackState::Cooling;
                    rec.not_before = now + thr.cool_s;
                }
            }
        }
    }

    async fn stop_container(&mut self, id: &str, mut reason: KillReason, now: f64, thr: &Thresholds) {
        let Some(rt) = self.runtime.clone() else { return };
        let (name, rss_mb, slope) = match self.containers.get(id) {
            Some(rec) => (
                rec.name.clone(),
                rec.latest_rss() as f64 / MB,
                rec.last_class.map_or(0.0, |c| c.slope_mbpm),
            ),
            None => return,
        };
        let fp = format!("docker:{name}");
        if reason == KillReason::Leak && self.recidivism.is_repeat(&fp, now) {
            reason = KillReason::Recidivist;
        }

        if rt.stop(id, CONTAINER_STOP_S).await {
            info!(container = id, name = %name, reason = %reason, "stopped container");
            self.append_log("container-stop", 0, &name, reason, rss_mb, slope);
            self.note_kill(&fp, now);
            self.containers.remove(id);
        } else {
            if self.throttle.allow("docker-stop") {
                warn!(container = id, "container stop failed");
            }
            self.append_log("container-stop-failed", 0, &name, reason, rss_mb, slope);
            if let Some(rec) = self.containers.get_mut(id) {
                rec.state = TrackState::Cooling;
                rec.not_before = now + thr.cool_s;
            }
        }
    }

    /// Rank everything we may touch and kill from the top until usage
    /// drops below the floor, the cap is reached, or we run out.
    async fn pressure_relief(&mut self, now: f64, thr: &Thresholds) {
        let self_pid = std::process::id();
        let mut candidates = Vec::new();
        for (&pid, rec) in self.table.iter() {
            if pid == 1 || pid == self_pid {
                continue;
            }
            // a record still in grace may not be killed for any reason
            if rec.state == TrackState::Grace {
                continue;
            }
            if self.whitelist.protected(pid, &rec.name) {
                continue;
            }
            if self.settings.iterm_only && !rec.term_child {
                continue;
            }
            candidates.push(Candidate {
                target: Target::Process(pid),
                name: rec.name.clone(),
                state: rec.state,
                slope_mbpm: rec.last_class.map_or(0.0, |c| c.slope_mbpm),
                rss: rec.latest_rss(),
                child_count: rec.child_count,
                age_s: rec.age(now),
            });
        }
        if self.settings.docker {
            for (id, rec) in self.containers.iter() {
                if rec.state == TrackState::Grace {
                    continue;
                }
                candidates.push(Candidate {
                    target: Target::Container(id.clone()),
                    name: rec.name.clone(),
                    state: rec.state,
                    slope_mbpm: rec.last_class.map_or(0.0, |c| c.slope_mbpm),
                    rss: rec.latest_rss(),
                    child_count: 0,
                    age_s: rec.age(now),
                });
            }
        }

        let cap = relief::kill_cap(candidates.len());
        let ranked = relief::rank(candidates, &self.settings.weights);
        let mut kills = 0;
        for entry in ranked {
            if kills >= cap {
                break;
            }
            match entry.candidate.target {
                Target::Process(pid) => self.kill_process(pid, KillReason::Pressure, now, thr).await,
                Target::Container(id) => self.stop_container(&id, KillReason::Pressure, now, thr).await,
            }
            kills += 1;
            match self.memory.mem() {
                Ok(r) if r.used_pct <= thr.low_pct => {
                    info!(used_pct = r.used_pct, "pressure relieved");
                    break;
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    }

    fn note_kill(&mut self, fp: &str, now: f64) {
        if let Some(count) = self.recidivism.record_kill(fp, now) {
            let minutes = (self.settings.notify_window_s / 60).max(1);
            self.notifier
                .send(format!("{fp} was killed {count} times in the last {minutes} minutes"));
        }
    }

    fn append_log(&mut self, event: &str, pid: u32, name: &str, reason: KillReason, rss_mb: f64, slope: f64) {
        if let Err(e) = self.log.record(event, pid, name, reason, rss_mb, slope) {
            if self.throttle.allow("actionlog") {
                warn!("action log write failed: {e}");
            }
        }
    }

    /// Flush the action log on the way out.
    pub fn shutdown(&mut self) {
        if let Err(e) = self.log.flush() {
            warn!("action log flush failed: {e}");
        }
        info!("monitoring stopped");
    }
}
