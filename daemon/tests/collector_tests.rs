use std::time::Duration;

use leakguard_daemon::collector::{LinuxProcessCollector, ProcessCollector};

#[test]
fn snapshot_includes_the_current_process() {
    let collector = LinuxProcessCollector::new();
    let snapshot = collector.snapshot(Duration::from_secs(5));
    let current_pid = std::process::id();
    let me = snapshot.iter().find(|p| p.pid == current_pid);
    assert!(me.is_some(), "current process should be in the snapshot");
    let me = me.unwrap();
    assert!(me.rss > 0, "rss should be reported in bytes");
    assert!(!me.cmdline.is_empty());
}

#[test]
fn get_process_reads_basic_facts() {
    let collector = LinuxProcessCollector::new();
    let me = collector.get_process(std::process::id()).expect("should find current process");
    assert!(!me.name.is_empty());
    assert!(me.ppid > 0);
    assert!(me.create_time > 0.0);
}

#[test]
fn get_process_returns_none_for_invalid_pid() {
    let collector = LinuxProcessCollector::new();
    assert!(collector.get_process(999_999_999).is_none());
}

#[test]
fn kernel_threads_are_excluded() {
    let collector = LinuxProcessCollector::new();
    // PID 2 is kthreadd on Linux: present in /proc, empty cmdline
    assert!(collector.get_process(2).is_none());
}
