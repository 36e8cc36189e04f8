//! Processes that must never be killed

use std::collections::HashSet;

/// Core services, display stack, indexers, shells, container daemons, and
/// this program itself. Matched by exact basename, case-sensitive.
pub const STATIC_WHITELIST: &[&str] = &[
    // init and core daemons
    "systemd",
    "init",
    "systemd-journald",
    "systemd-logind",
    "systemd-udevd",
    "systemd-resolved",
    "dbus-daemon",
    "dbus-broker",
    "NetworkManager",
    "wpa_supplicant",
    "polkitd",
    "rsyslogd",
    "cron",
    "crond",
    // login path
    "sshd",
    "login",
    "agetty",
    // display stack
    "Xorg",
    "Xwayland",
    "gnome-shell",
    "gnome-session-binary",
    "kwin_wayland",
    "kwin_x11",
    "plasmashell",
    "sway",
    "mutter-x11-frames",
    // audio
    "pipewire",
    "wireplumber",
    "pulseaudio",
    // file indexing
    "tracker-miner-fs-3",
    "baloo_file",
    // shells
    "bash",
    "zsh",
    "sh",
    "fish",
    // container daemons (but not the containers they run)
    "dockerd",
    "containerd",
    "containerd-shim-runc-v2",
    // ourselves
    "leakguard",
];

/// Terminal emulators recognized by `--iterm-only` ancestry matching.
pub const TERMINAL_EMULATORS: &[&str] = &[
    "iTerm2",
    "gnome-terminal-server",
    "konsole",
    "alacritty",
    "kitty",
    "xterm",
    "foot",
    "wezterm-gui",
];

pub struct Whitelist {
    names: HashSet<String>,
    pids: HashSet<u32>,
}

impl Whitelist {
    pub fn new(extra_names: impl IntoIterator<Item = String>) -> Self {
        let mut names: HashSet<String> = STATIC_WHITELIST.iter().map(|s| s.to_string()).collect();
        names.extend(extra_names);
        Self {
            names,
            pids: HashSet::new(),
        }
    }

    /// Extend with the structural identities that are unsafe to kill no
    /// matter what they are named: PID 1, this process, and our session
    /// leader (the controlling terminal's shell).
    pub fn with_runtime_pids(mut self) -> Self {
        self.pids.insert(1);
        self.pids.insert(std::process::id());
        let sid = unsafe { libc::getsid(0) };
        if sid > 0 {
            self.pids.insert(sid as u32);
        }
        self
    }

    /// In iterm-only mode the emulator itself joins the whitelist.
    pub fn with_terminal_emulators(mut self) -> Self {
        self.names.extend(TERMINAL_EMULATORS.iter().map(|s| s.to_string()));
        self
    }

    pub fn insert_pid(&mut self, pid: u32) {
        self.pids.insert(pid);
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn contains_pid(&self, pid: u32) -> bool {
        self.pids.contains(&pid)
    }

    pub fn protected(&self, pid: u32, name: &str) -> bool {
        self.contains_pid(pid) || self.contains_name(name)
    }
}
