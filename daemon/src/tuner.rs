//! Adaptive detection thresholds: RAM-tier defaults, user overrides,
//! pressure tightening.

const GIB: u64 = 1024 * 1024 * 1024;

pub const DEF_GRACE_S: f64 = 60.0;
pub const DEF_COOL_S: f64 = 300.0;
pub const DEF_CONF: u32 = 2;
pub const DEF_LEAK_PCT: f64 = 85.0;

/// The detection parameters in force for one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    pub slope_mbpm: f64,
    pub growth_mb: f64,
    pub history: usize,
    pub grace_s: f64,
    pub cool_s: f64,
    pub high_pct: f64,
    pub low_pct: f64,
    pub leak_pct: f64,
    pub conf: u32,
}

/// User-supplied parameters; `None` falls through to the RAM-tier default.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub slope_mbpm: Option<f64>,
    pub growth_mb: Option<f64>,
    pub history: Option<usize>,
    pub grace_s: Option<f64>,
    pub cool_s: Option<f64>,
    pub high_pct: Option<f64>,
    pub low_pct: Option<f64>,
    pub leak_pct: Option<f64>,
    pub conf: Option<u32>,
}

struct Tier {
    slope_mbpm: f64,
    growth_mb: f64,
    history: usize,
    high_pct: f64,
    low_pct: f64,
}

fn tier_for(total_ram: u64) -> Tier {
    if total_ram <= 8 * GIB {
        Tier { slope_mbpm: 10.0, growth_mb: 20.0, history: 8, high_pct: 85.0, low_pct: 80.0 }
    } else if total_ram <= 16 * GIB {
        Tier { slope_mbpm: 20.0, growth_mb: 50.0, history: 6, high_pct: 90.0, low_pct: 85.0 }
    } else if total_ram <= 32 * GIB {
        Tier { slope_mbpm: 30.0, growth_mb: 100.0, history: 6, high_pct: 92.0, low_pct: 87.0 }
    } else {
        Tier { slope_mbpm: 40.0, growth_mb: 200.0, history: 6, high_pct: 94.0, low_pct: 89.0 }
    }
}

pub struct Tuner {
    overrides: Overrides,
}

impl Tuner {
    pub fn new(overrides: Overrides) -> Self {
        Self { overrides }
    }

    /// Thresholds for this tick. Tier defaults come from total RAM, user
    /// overrides win over the tier, and current pressure tightens the
    /// slope/growth pair so a stressed host confirms faster.
    pub fn effective(&self, total_ram: u64, used_pct: f64) -> Thresholds {
        let tier = tier_for(total_ram);
        let o = &self.overrides;
        let mut slope_mbpm = o.slope_mbpm.unwrap_or(tier.slope_mbpm);
        let mut growth_mb = o.growth_mb.unwrap_or(tier.growth_mb);
        let high_pct = o.high_pct.unwrap_or(tier.high_pct);

        let factor = if used_pct > high_pct {
            0.5
        } else if used_pct > high_pct - 5.0 {
            0.7
        } else {
            1.0
        };
        if factor < 1.0 {
            slope_mbpm = (slope_mbpm * factor).round();
            growth_mb = (growth_mb * factor).round();
        }

        Thresholds {
            slope_mbpm,
            growth_mb,
            history: o.history.unwrap_or(tier.history),
            grace_s: o.grace_s.unwrap_or(DEF_GRACE_S),
            cool_s: o.cool_s.unwrap_or(DEF_COOL_S),
            high_pct,
            low_pct: o.low_pct.unwrap_or(tier.low_pct),
            leak_pct: o.leak_pct.unwrap_or(DEF_LEAK_PCT),
            conf: o.conf.unwrap_or(DEF_CONF),
        }
    }
}
