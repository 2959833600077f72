//! System information line sent by the client's `info` command and by the
//! automated sequence.

use chrono::Local;
use std::fmt;

/// A snapshot of the host the client runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInfo {
    pub platform: &'static str,
    pub arch: &'static str,
    pub family: &'static str,
    pub hostname: String,
    pub pid: u32,
    pub version: &'static str,
    pub timestamp: String,
}

impl SystemInfo {
    pub fn collect() -> Self {
        Self {
            platform: std::env::consts::OS,
            arch: std::env::consts::ARCH,
            family: std::env::consts::FAMILY,
            hostname: hostname(),
            pid: std::process::id(),
            version: crate::VERSION,
            timestamp: Local::now().to_rfc3339(),
        }
    }
}

impl fmt::Display for SystemInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "System Info: platform={} arch={} family={} hostname={} pid={} version={} timestamp={}",
            self.platform,
            self.arch,
            self.family,
            self.hostname,
            self.pid,
            self.version,
            self.timestamp
        )
    }
}

fn hostname() -> String {
    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|s| s.trim().to_string())
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_line() {
        let line = SystemInfo::collect().to_string();
        assert!(line.starts_with("System Info: platform="));
        assert!(!line.contains('\n'));
        assert!(line.contains(&format!("pid={}", std::process::id())));
    }
}
