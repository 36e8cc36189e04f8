//! Leak classification: least-squares regression over the sample window
//! plus the per-target state machine.

use std::collections::VecDeque;

use tracing::debug;

use crate::history::{Classification, Sample, TrackRecord, TrackState};
use crate::killer::KillReason;
use crate::tuner::Thresholds;

const MB: f64 = 1024.0 * 1024.0;

/// Slope magnitude (MB/min) under which a full window counts as flat.
const PLATEAU_SLOPE_MBPM: f64 = 0.5;

/// Fraction of total RAM kept free when projecting growth ahead.
const SAFETY_MARGIN: f64 = 0.05;

/// Per-tick context the state machine needs besides the record itself.
#[derive(Debug, Clone, Copy)]
pub struct ClassifyCtx {
    pub now: f64,
    pub total_ram: u64,
    pub interval_s: f64,
    pub whitelisted: bool,
}

/// Ordinary least-squares fit over one window.
/// Returns (slope bytes/sec, net growth bytes, r²).
pub fn window_stats(samples: &VecDeque<Sample>) -> (f64, f64, f64) {
    let n = samples.len();
    if n < 2 {
        return (0.0, 0.0, 0.0);
    }
    let first = samples.front().map(|s| s.rss).unwrap_or(0) as f64;
    let last = samples.back().map(|s| s.rss).unwrap_or(0) as f64;
    let growth = last - first;

    let mean_x: f64 = samples.iter().map(|s| s.ts).sum::<f64>() / n as f64;
    let mean_y: f64 = samples.iter().map(|s| s.rss as f64).sum::<f64>() / n as f64;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    let mut syy = 0.0;
    for s in samples {
        let dx = s.ts - mean_x;
        let dy = s.rss as f64 - mean_y;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }
    if sxx < 1e-9 {
        return (0.0, growth, 0.0);
    }
    let slope = sxy / sxx;
    let r_squared = if syy < 1e-9 { 0.0 } else { (sxy * sxy) / (sxx * syy) };
    (slope, growth, r_squared)
}

/// Advance one record through the state machine for this tick. Returns the
/// reason the record is currently killable, if it is; the caller decides
/// whether the kill actually fires.
pub fn advance(rec: &mut TrackRecord, thr: &Thresholds, ctx: &ClassifyCtx) -> Option<KillReason> {
    match rec.state {
        TrackState::Grace => {
            if ctx.now >= rec.not_before {
                rec.state = TrackState::Watch;
            }
            None
        }
        TrackState::Cooling => {
            if ctx.now >= rec.not_before {
                rec.state = TrackState::Watch;
                rec.confirmations = 0;
            }
            None
        }
        TrackState::Plateau => {
            rec.state = TrackState::Cooling;
            rec.not_before = ctx.now + thr.cool_s;
            None
        }
        // sticky until the scheduler acts on it
        TrackState::Killable => rec.kill_reason,
        TrackState::Watch | TrackState::Confirming => classify(rec, thr, ctx),
    }
}

fn classify(rec: &mut TrackRecord, thr: &Thresholds, ctx: &ClassifyCtx) -> Option<KillReason> {
    if !rec.window_full(thr.history) {
        return None;
    }

    let (slope_bps, growth_b, r_squared) = window_stats(&rec.samples);
    if !slope_bps.is_finite() || !growth_b.is_finite() {
        debug!(name = %rec.name, "corrupt sample window, resetting");
        rec.reset_history();
        return None;
    }
    let slope_mbpm = slope_bps * 60.0 / MB;
    let growth_mb = growth_b / MB;
    rec.last_class = Some(Classification {
        slope_mbpm,
        growth_mb,
        r_squared,
    });

    let leaking = slope_mbpm >= thr.slope_mbpm && growth_mb >= thr.growth_mb;
    if leaking {
        rec.confirmations = if rec.state == TrackState::Watch {
            1
        } else {
            rec.confirmations + 1
        };
        rec.state = TrackState::Confirming;

        if !ctx.whitelisted {
            // at the current rate the host runs out before we look again
            let projected = rec.latest_rss() as f64 + slope_bps * 2.0 * ctx.interval_s;
            let ceiling = ctx.total_ram as f64 * (1.0 - SAFETY_MARGIN);
            if projected > ceiling {
                rec.state = TrackState::Killable;
                rec.kill_reason = Some(KillReason::Predictive);
                return rec.kill_reason;
            }
            if rec.confirmations >= thr.conf {
                rec.state = TrackState::Killable;
                rec.kill_reason = Some(KillReason::Leak);
                return rec.kill_reason;
            }
        }
        None
    } else {
        match rec.state {
            TrackState::Confirming => {
                rec.confirmations = 0;
                rec.state = TrackState::Watch;
                None
            }
            _ => {
                if slope_mbpm.abs() < PLATEAU_SLOPE_MBPM && growth_b >= 0.0 {
                    rec.state = TrackState::Plateau;
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn thresholds(history: usize, slope: f64, growth: f64, conf: u32) -> Thresholds {
        Thresholds {
            slope_mbpm: slope,
            growth_mb: growth,
            history,
            grace_s: 0.0,
            cool_s: 300.0,
            high_pct: 90.0,
            low_pct: 85.0,
            leak_pct: 85.0,
            conf,
        }
    }

    fn ctx(now: f64, total_ram: u64) -> ClassifyCtx {
        ClassifyCtx {
            now,
            total_ram,
            interval_s: 1.0,
            whitelisted: false,
        }
    }

    fn record() -> TrackRecord {
        TrackRecord::new("hog".into(), "python ./hog.py".into(), 0.0, 1, 0.0, 0.0)
    }

    fn mb(v: u64) -> u64 {
        v * 1024 * 1024
    }

    #[test]
    fn window_stats_fits_a_line() {
        let mut samples = VecDeque::new();
        for i in 0..4u64 {
            samples.push_back(Sample {
                ts: i as f64,
                rss: mb(100 + 100 * i),
            });
        }
        let (slope, growth, r2) = window_stats(&samples);
        assert!((slope - mb(100) as f64).abs() < 1.0, "slope {slope}");
        assert_eq!(growth, mb(300) as f64);
        assert!((r2 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn linear_leak_confirms_then_becomes_killable() {
        // 100 MB/s grower, thresholds slope=20 MB/min growth=50 MB conf=2
        let thr = thresholds(4, 20.0, 50.0, 2);
        let mut rec = record();
        let mut verdicts = Vec::new();
        for t in 0..5u64 {
            rec.push_sample(t as f64, mb(100 + 100 * t), thr.history);
            verdicts.push(advance(&mut rec, &thr, &ctx(t as f64, 16 * GIB)));
        }
        // t=0 grace expiry, t=1..2 window not full, t=3 first confirmation
        assert_eq!(verdicts[..4], [None, None, None, None]);
        assert_eq!(rec.confirmations, 2);
        assert_eq!(verdicts[4], Some(KillReason::Leak));
        assert_eq!(rec.state, TrackState::Killable);
    }

    #[test]
    fn killable_is_sticky_until_acted_on() {
        let thr = thresholds(4, 20.0, 50.0, 1);
        let mut rec = record();
        rec.state = TrackState::Killable;
        rec.kill_reason = Some(KillReason::Leak);
        assert_eq!(advance(&mut rec, &thr, &ctx(10.0, 16 * GIB)), Some(KillReason::Leak));
        assert_eq!(advance(&mut rec, &thr, &ctx(11.0, 16 * GIB)), Some(KillReason::Leak));
    }

    #[test]
    fn exact_threshold_values_count_as_leaking() {
        // slope exactly 20 MB/min and growth exactly 60 MB over 3 minutes
        let thr = thresholds(4, 20.0, 60.0, 1);
        let mut rec = record();
        rec.state = TrackState::Watch;
        for i in 0..4u64 {
            rec.push_sample(60.0 * i as f64, mb(100 + 20 * i), thr.history);
        }
        let verdict = advance(&mut rec, &thr, &ctx(180.0, 16 * GIB));
        assert_eq!(verdict, Some(KillReason::Leak));
        let class = rec.last_class.unwrap();
        assert!((class.slope_mbpm - 20.0).abs() < 1e-6);
        assert!((class.growth_mb - 60.0).abs() < 1e-6);
    }

    #[test]
    fn lost_confirmation_resets_to_watch() {
        let thr = thresholds(4, 20.0, 50.0, 3);
        let mut rec = record();
        rec.state = TrackState::Watch;
        for t in 0..4u64 {
            rec.push_sample(t as f64, mb(100 + 100 * t), thr.history);
        }
        advance(&mut rec, &thr, &ctx(3.0, 16 * GIB));
        assert_eq!(rec.state, TrackState::Confirming);
        // growth stops: the window flattens out
        for t in 4..8u64 {
            rec.push_sample(t as f64, mb(400), thr.history);
        }
        advance(&mut rec, &thr, &ctx(7.0, 16 * GIB));
        assert_eq!(rec.state, TrackState::Watch);
        assert_eq!(rec.confirmations, 0);
    }

    #[test]
    fn whitelisted_record_never_becomes_killable() {
        let thr = thresholds(4, 20.0, 50.0, 2);
        let mut rec = record();
        rec.state = TrackState::Watch;
        let mut ctx = ctx(0.0, 16 * GIB);
        ctx.whitelisted = true;
        for t in 0..8u64 {
            rec.push_sample(t as f64, mb(100 + 100 * t), thr.history);
            ctx.now = t as f64;
            assert_eq!(advance(&mut rec, &thr, &ctx), None);
        }
        assert_eq!(rec.state, TrackState::Confirming);
        assert!(rec.confirmations >= thr.conf, "classification still runs for observability");
    }

    #[test]
    fn predictive_shortcut_bypasses_confirmations() {
        // 16 GiB host: ceiling is 15.2 GiB. 14.0→15.0 GiB across the
        // window projects past it within two intervals.
        let thr = thresholds(4, 20.0, 50.0, 2);
        let mut rec = record();
        rec.state = TrackState::Watch;
        for t in 0..4u64 {
            rec.push_sample(t as f64, (14 * GIB) + t * (GIB / 3), thr.history);
        }
        let verdict = advance(&mut rec, &thr, &ctx(3.0, 16 * GIB));
        assert_eq!(verdict, Some(KillReason::Predictive));
        assert_eq!(rec.state, TrackState::Killable);
        assert_eq!(rec.confirmations, 1);
    }

    #[test]
    fn cooling_blocks_until_expiry() {
        let thr = thresholds(4, 20.0, 50.0, 1);
        let mut rec = record();
        rec.state = TrackState::Cooling;
        rec.not_before = 100.0;
        rec.confirmations = 2;
        for t in 0..4u64 {
            rec.push_sample(t as f64, mb(100 + 100 * t), thr.history);
        }
        assert_eq!(advance(&mut rec, &thr, &ctx(50.0, 16 * GIB)), None);
        assert_eq!(rec.state, TrackState::Cooling);
        assert_eq!(advance(&mut rec, &thr, &ctx(100.0, 16 * GIB)), None);
        assert_eq!(rec.state, TrackState::Watch);
        assert_eq!(rec.confirmations, 0);
    }

    #[test]
    fn flat_full_window_plateaus_then_cools() {
        let thr = thresholds(4, 20.0, 50.0, 2);
        let mut rec = record();
        rec.state = TrackState::Watch;
        for t in 0..4u64 {
            rec.push_sample(t as f64, mb(400), thr.history);
        }
        advance(&mut rec, &thr, &ctx(3.0, 16 * GIB));
        assert_eq!(rec.state, TrackState::Plateau);
        advance(&mut rec, &thr, &ctx(4.0, 16 * GIB));
        assert_eq!(rec.state, TrackState::Cooling);
        assert_eq!(rec.not_before, 4.0 + thr.cool_s);
    }

    #[test]
    fn grace_ignores_samples() {
        let thr = thresholds(2, 0.0, 0.0, 1);
        let mut rec = TrackRecord::new("new".into(), "new".into(), 0.0, 1, 0.0, 60.0);
        for t in 0..4u64 {
            rec.push_sample(t as f64, mb(100 + 500 * t), thr.history);
            assert_eq!(advance(&mut rec, &thr, &ctx(t as f64, 16 * GIB)), None);
        }
        assert_eq!(rec.state, TrackState::Grace);
    }
}
