use std::process::exit;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use clap::error::ErrorKind;
use clap::Parser;
use leakguard_daemon::{
    actionlog::ActionLog,
    collector::LinuxProcessCollector,
    config::{Config, Mode, Settings},
    docker::DockerCli,
    killer::SignalKiller,
    meminfo::{MemoryProbe, ProcMemoryProbe},
    monitor::Engine,
};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

/// Kill persistent memory leakers and relieve RAM pressure.
#[derive(Parser, Debug)]
#[command(name = "leakguard", version, about)]
struct Cli {
    /// Sampling interval in seconds
    #[arg(long, default_value_t = 5)]
    interval: u64,

    /// Samples per regression window (default: picked by RAM tier)
    #[arg(long)]
    history: Option<usize>,

    /// Minimum net growth (MB) within the window (default: RAM tier)
    #[arg(long)]
    growth: Option<f64>,

    /// Minimum growth rate (MB/min) within the window (default: RAM tier)
    #[arg(long)]
    slope: Option<f64>,

    /// Consecutive leaking windows required before a kill
    #[arg(long, default_value_t = 2)]
    conf: u32,

    /// Seconds to ignore a freshly started process
    #[arg(long, default_value_t = 60)]
    grace: u64,

    /// Cooldown seconds after a plateau or a failed kill
    #[arg(long, default_value_t = 300)]
    cool: u64,

    /// RAM percentage that triggers pressure relief (default: RAM tier)
    #[arg(long)]
    high: Option<f64>,

    /// RAM percentage at which pressure relief stops (default: RAM tier)
    #[arg(long)]
    low: Option<f64>,

    /// Seconds within which a process still counts as young when scoring
    #[arg(long, default_value_t = 180)]
    recent: u64,

    /// Relief score weight per child process
    #[arg(long = "child-wt", default_value_t = 1.0)]
    child_wt: f64,

    /// Kills of the same command line before a notification fires
    #[arg(long, default_value_t = 3)]
    notify_threshold: usize,

    /// Look-back window (seconds) for counting repeated kills
    #[arg(long, default_value_t = 600)]
    notify_window: u64,

    /// Only monitor processes spawned from a terminal emulator
    #[arg(long)]
    iterm_only: bool,

    /// Also monitor containers through the docker CLI
    #[arg(long)]
    docker: bool,

    /// Only kill leaks while system RAM is above --leak-threshold (default)
    #[arg(long, conflicts_with = "hunting_mode")]
    protection_mode: bool,

    /// Kill every confirmed leak regardless of system RAM
    #[arg(long)]
    hunting_mode: bool,

    /// Minimum RAM percentage for leak kills in protection mode
    #[arg(long, default_value_t = 85.0)]
    leak_threshold: f64,
}

fn build_settings(cli: &Cli, cfg: &Config) -> Settings {
    let mut s = Settings::from_config(cfg);
    s.interval_s = cli.interval;
    s.mode = if cli.hunting_mode { Mode::Hunting } else { Mode::Protection };
    s.iterm_only = s.iterm_only || cli.iterm_only;
    s.docker = s.docker || cli.docker;
    s.notify_threshold = cli.notify_threshold;
    s.notify_window_s = cli.notify_window;
    s.weights.children = cli.child_wt;
    s.weights.recent_horizon_s = cli.recent as f64;

    let o = &mut s.overrides;
    o.slope_mbpm = cli.slope.or(o.slope_mbpm);
    o.growth_mb = cli.growth.or(o.growth_mb);
    o.history = cli.history.or(o.history);
    o.high_pct = cli.high.or(o.high_pct);
    o.low_pct = cli.low.or(o.low_pct);
    o.grace_s = Some(cli.grace as f64);
    o.cool_s = Some(cli.cool as f64);
    o.conf = Some(cli.conf);
    o.leak_pct = Some(cli.leak_threshold);
    s
}

fn validate(cli: &Cli) -> Result<(), String> {
    if cli.interval < 1 {
        return Err("--interval must be at least 1 second".into());
    }
    if cli.history.is_some_and(|h| h < 2) {
        return Err("--history must be at least 2 samples".into());
    }
    if cli.slope.is_some_and(|v| v < 0.0) || cli.growth.is_some_and(|v| v < 0.0) {
        return Err("--slope and --growth must be non-negative".into());
    }
    if let (Some(high), Some(low)) = (cli.high, cli.low) {
        if high <= low {
            return Err(format!("--high ({high}) must be greater than --low ({low})"));
        }
    }
    if !(0.0..=100.0).contains(&cli.leak_threshold) {
        return Err("--leak-threshold must be between 0 and 100".into());
    }
    Ok(())
}

/// Seconds since the epoch; the shared clock for samples and windows.
fn now_s() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::try_parse().unwrap_or_else(|e| {
        let code = match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
            _ => 3,
        };
        let _ = e.print();
        exit(code);
    });
    if let Err(msg) = validate(&cli) {
        eprintln!("leakguard: {msg}");
        exit(3);
    }

    // we must be able to signal other users' processes
    if unsafe { libc::geteuid() } != 0 {
        eprintln!("leakguard: insufficient privilege to signal other users' processes (run as root)");
        exit(2);
    }

    tracing_subscriber::fmt::init();

    let config_path = Config::config_path();
    let config = if config_path.exists() {
        Config::load(&config_path).unwrap_or_else(|e| {
            warn!("failed to load config: {e}, using defaults");
            Config::default()
        })
    } else {
        Config::default()
    };
    let settings = build_settings(&cli, &config);

    let log = match ActionLog::open_default() {
        Ok(log) => log,
        Err(e) => {
            eprintln!("leakguard: cannot open action log: {e}");
            exit(1);
        }
    };

    let memory = ProcMemoryProbe;
    let reading = memory.mem()?;
    info!(
        total_gb = reading.total as f64 / (1024.0 * 1024.0 * 1024.0),
        used_pct = reading.used_pct,
        mode = if settings.mode == Mode::Hunting { "hunting" } else { "protection" },
        docker = settings.docker,
        iterm_only = settings.iterm_only,
        "monitoring started"
    );

    let runtime = settings
        .docker
        .then(|| Arc::new(DockerCli::new()) as Arc<dyn leakguard_daemon::docker::ContainerRuntime>);
    let interval = Duration::from_secs(settings.interval_s.max(1));
    let mut engine = Engine::new(settings, LinuxProcessCollector::new(), memory, SignalKiller, runtime, log);

    let mut sigterm = signal(SignalKind::terminate())?;
    loop {
        let started = Instant::now();
        engine.tick(now_s()).await;
        let pause = interval.saturating_sub(started.elapsed());
        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            _ = tokio::signal::ctrl_c() => break,
            _ = sigterm.recv() => break,
        }
    }
    engine.shutdown();
    Ok(())
}
