//! Pressure relief: rank kill candidates when system memory runs high

use std::cmp::Ordering;

use crate::history::TrackState;

/// Scoring weights for the relief pass. Passed by value; no module state.
#[derive(Debug, Clone)]
pub struct ScoreWeights {
    pub state: f64,
    pub slope: f64,
    pub rss: f64,
    pub children: f64,
    pub recency: f64,
    /// Candidates older than this many seconds score zero recency.
    pub recent_horizon_s: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            state: 3.0,
            slope: 2.0,
            rss: 2.0,
            children: 1.0,
            recency: 1.0,
            recent_horizon_s: 180.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Process(u32),
    Container(String),
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub target: Target,
    pub name: String,
    pub state: TrackState,
    pub slope_mbpm: f64,
    pub rss: u64,
    pub child_count: u32,
    pub age_s: f64,
}

#[derive(Debug, Clone)]
pub struct Ranked {
    pub candidate: Candidate,
    pub score: f64,
}

/// At most a third of the candidate set may be killed in one pass.
pub fn kill_cap(candidates: usize) -> usize {
    candidates / 3
}

fn state_factor(state: TrackState) -> f64 {
    match state {
        TrackState::Killable => 1.0,
        TrackState::Confirming => 0.5,
        _ => 0.0,
    }
}

fn normalize(value: f64, min: f64, max: f64) -> f64 {
    if max - min < 1e-9 {
        0.0
    } else {
        (value - min) / (max - min)
    }
}

/// Score and order candidates, most dangerous first, PID breaking ties.
/// Slope, RSS, and child count are min-max normalized over this set.
pub fn rank(candidates: Vec<Candidate>, weights: &ScoreWeights) -> Vec<Ranked> {
    if candidates.is_empty() {
        return Vec::new();
    }
    let slope_min = candidates.iter().map(|c| c.slope_mbpm).fold(f64::INFINITY, f64::min);
    let slope_max = candidates.iter().map(|c| c.slope_mbpm).fold(f64::NEG_INFINITY, f64::max);
    let rss_min = candidates.iter().map(|c| c.rss as f64).fold(f64::INFINITY, f64::min);
    let rss_max = candidates.iter().map(|c| c.rss as f64).fold(f64::NEG_INFINITY, f64::max);
    let kid_min = candidates.iter().map(|c| c.child_count as f64).fold(f64::INFINITY, f64::min);
    let kid_max = candidates.iter().map(|c| c.child_count as f64).fold(f64::NEG_INFINITY, f64::max);

    let mut ranked: Vec<Ranked> = candidates
        .into_iter()
        .map(|c| {
            let recency = if c.age_s <= weights.recent_horizon_s {
                1.0 / c.age_s.max(1.0)
            } else {
                0.0
            };
            let score = weights.state * state_factor(c.state)
                + weights.slope * normalize(c.slope_mbpm, slope_min, slope_max)
                + weights.rss * normalize(c.rss as f64, rss_min, rss_max)
                + weights.children * normalize(c.child_count as f64, kid_min, kid_max)
                + weights.recency * recency;
            Ranked { candidate: c, score }
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| target_order(&a.candidate.target, &b.candidate.target))
    });
    ranked
}

fn target_order(a: &Target, b: &Target) -> Ordering {
    match (a, b) {
        (Target::Process(x), Target::Process(y)) => x.cmp(y),
        (Target::Container(x), Target::Container(y)) => x.cmp(y),
        (Target::Process(_), Target::Container(_)) => Ordering::Less,
        (Target::Container(_), Target::Process(_)) => Ordering::Greater,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mb(v: u64) -> u64 {
        v * 1024 * 1024
    }

    fn candidate(pid: u32, rss: u64) -> Candidate {
        Candidate {
            target: Target::Process(pid),
            name: format!("proc{pid}"),
            state: TrackState::Watch,
            slope_mbpm: 0.0,
            rss,
            child_count: 0,
            age_s: 1000.0,
        }
    }

    #[test]
    fn biggest_resident_set_ranks_first_all_else_equal() {
        let cands = vec![
            candidate(105, mb(100)),
            candidate(101, mb(500)),
            candidate(103, mb(300)),
            candidate(102, mb(400)),
            candidate(104, mb(200)),
        ];
        let ranked = rank(cands, &ScoreWeights::default());
        let order: Vec<u32> = ranked
            .iter()
            .map(|r| match r.candidate.target {
                Target::Process(pid) => pid,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(order, vec![101, 102, 103, 104, 105]);
    }

    #[test]
    fn killable_state_outweighs_size() {
        let mut small = candidate(101, mb(100));
        small.state = TrackState::Killable;
        let big = candidate(102, mb(500));
        let ranked = rank(vec![big, small], &ScoreWeights::default());
        // w1·1 = 3 beats w3·1 = 2
        assert_eq!(ranked[0].candidate.target, Target::Process(101));
    }

    #[test]
    fn young_process_gets_a_recency_bump() {
        let mut young = candidate(101, mb(100));
        young.age_s = 2.0;
        let old = candidate(102, mb(100));
        let ranked = rank(vec![old, young], &ScoreWeights::default());
        assert_eq!(ranked[0].candidate.target, Target::Process(101));
        assert!((ranked[0].score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn shrinking_candidates_still_rank_by_relative_slope() {
        let mut slow = candidate(101, mb(100));
        slow.slope_mbpm = -5.0;
        let mut fast = candidate(102, mb(100));
        fast.slope_mbpm = -50.0;
        let ranked = rank(vec![fast, slow], &ScoreWeights::default());
        // the least-shrinking candidate normalizes to 1 and ranks first
        assert_eq!(ranked[0].candidate.target, Target::Process(101));
        assert!((ranked[0].score - 2.0).abs() < 1e-9);
        assert_eq!(ranked[1].score, 0.0);
    }

    #[test]
    fn recency_stops_at_the_horizon() {
        let mut aging = candidate(101, mb(100));
        aging.age_s = 181.0;
        let ranked = rank(vec![aging], &ScoreWeights::default());
        assert_eq!(ranked[0].score, 0.0);
    }

    #[test]
    fn ties_break_by_ascending_pid() {
        let cands = vec![candidate(104, mb(100)), candidate(102, mb(100)), candidate(103, mb(100))];
        let ranked = rank(cands, &ScoreWeights::default());
        let order: Vec<u32> = ranked
            .iter()
            .map(|r| match r.candidate.target {
                Target::Process(pid) => pid,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(order, vec![102, 103, 104]);
    }

    #[test]
    fn degenerate_normalization_scores_zero() {
        let ranked = rank(vec![candidate(101, mb(100))], &ScoreWeights::default());
        assert_eq!(ranked[0].score, 0.0);
    }

    #[test]
    fn cap_is_a_third_rounded_down() {
        assert_eq!(kill_cap(0), 0);
        assert_eq!(kill_cap(2), 0);
        assert_eq!(kill_cap(3), 1);
        assert_eq!(kill_cap(5), 1);
        assert_eq!(kill_cap(9), 3);
    }
}
