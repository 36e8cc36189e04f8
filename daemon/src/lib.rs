//! leakguard: a privileged memory watchdog. Samples every process (and
//! optionally every container), classifies sustained RSS growth as a leak
//! by linear regression, and terminates offenders either aggressively
//! (hunting) or under system memory pressure (protection).

pub mod actionlog;
pub mod collector;
pub mod config;
pub mod detector;
pub mod docker;
pub mod history;
pub mod killer;
pub mod meminfo;
pub mod monitor;
pub mod notifier;
pub mod recidivism;
pub mod relief;
pub mod tuner;
pub mod whitelist;
