//! Process termination: graceful signal first, forceful after a bounded wait

use std::fmt;
use std::time::Duration;

use tokio::time::{sleep, Instant};

/// Why a target was killed. Doubles as the action-log reason tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillReason {
    Leak,
    Pressure,
    Predictive,
    Recidivist,
}

impl KillReason {
    pub fn as_str(self) -> &'static str {
        match self {
            KillReason::Leak => "leak",
            KillReason::Pressure => "pressure",
            KillReason::Predictive => "predictive",
            KillReason::Recidivist => "recidivist",
        }
    }
}

impl fmt::Display for KillReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    Killed,
    NotFound,
    Denied,
}

#[async_trait::async_trait]
pub trait ProcessKiller: Send + Sync {
    /// Send the graceful termination signal; if the target is still alive
    /// after `grace`, send the forceful one. Idempotent against targets
    /// that have already exited.
    async fn kill(&self, pid: u32, grace: Duration) -> KillOutcome;
}

pub struct SignalKiller;

#[async_trait::async_trait]
impl ProcessKiller for SignalKiller {
    async fn kill(&self, pid: u32, grace: Duration) -> KillOutcome {
        match send_signal(pid, libc::SIGTERM) {
            Err(libc::ESRCH) => return KillOutcome::NotFound,
            Err(_) => return KillOutcome::Denied,
            Ok(()) => {}
        }

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            sleep(Duration::from_millis(100)).await;
            if !alive(pid) {
                return KillOutcome::Killed;
            }
        }

        match send_signal(pid, libc::SIGKILL) {
            // exited between the wait and the escalation
            Err(libc::ESRCH) | Ok(()) => KillOutcome::Killed,
            Err(_) => KillOutcome::Denied,
        }
    }
}

fn send_signal(pid: u32, signal: libc::c_int) -> Result<(), libc::c_int> {
    if unsafe { libc::kill(pid as libc::pid_t, signal) } == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EINVAL))
    }
}

fn alive(pid: u32) -> bool {
    let exists = if unsafe { libc::kill(pid as libc::pid_t, 0) } == 0 {
        true
    } else {
        // EPERM means it exists but belongs to someone we cannot signal
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    };
    if !exists {
        return false;
    }
    // a zombie took the signal and is only waiting on its parent
    !is_zombie(pid)
}

fn is_zombie(pid: u32) -> bool {
    let stat = match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(s) => s,
        Err(_) => return false,
    };
    stat.rfind(')')
        .and_then(|close| stat.get(close + 1..))
        .and_then(|rest| rest.split_whitespace().next())
        .is_some_and(|state| state == "Z")
}
