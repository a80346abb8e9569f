//! Process memory sampling for the executor's memory guard.

/// Resident set size of the current process in megabytes, when the platform
/// exposes it. Returns `None` elsewhere; the guard is then a no-op.
pub fn current_rss_mb() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
        let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
        Some(kb / 1024)
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}
