//! System Profile Crate
//!
//! Provides cached hardware information plus live memory queries for worker
//! sizing. Static facts (core counts, total memory, host) are computed once on
//! first access; available memory changes while the program runs and is
//! queried fresh through [`live_available_memory`].
//!
//! Uses std::sync::LazyLock (Rust 1.80+) for lazy initialization.

use std::sync::{Arc, LazyLock};

use sysinfo::{MemoryRefreshKind, RefreshKind, System};

/// Global system profile instance - computed once, cached forever
pub static SYSTEM: LazyLock<Arc<SystemProfile>> =
    LazyLock::new(|| Arc::new(SystemProfile::detect()));

/// System profile containing hardware and resource information
#[derive(Debug, Clone)]
pub struct SystemProfile {
    /// Total CPU cores (including hyperthreading)
    pub cpu_count: usize,

    /// Physical CPU cores (excluding hyperthreading)
    pub physical_cpu_count: usize,

    /// Total system memory in bytes
    pub total_memory: u64,

    /// Available system memory in bytes at startup
    pub available_memory: u64,

    /// Operating system name
    pub os_name: String,

    /// Operating system version
    pub os_version: String,

    /// System hostname
    pub hostname: String,
}

impl SystemProfile {
    /// Detect system profile (called once via LazyLock)
    fn detect() -> Self {
        let cpu_count = num_cpus::get();
        let physical_cpu_count = num_cpus::get_physical().max(1);

        let sys = memory_snapshot();

        Self {
            cpu_count,
            physical_cpu_count,
            total_memory: sys.total_memory(),
            available_memory: sys.available_memory(),
            os_name: System::name().unwrap_or_else(|| "Unknown".to_string()),
            os_version: System::os_version().unwrap_or_else(|| "Unknown".to_string()),
            hostname: System::host_name().unwrap_or_else(|| "Unknown".to_string()),
        }
    }

    /// Get the global system profile instance
    pub fn get() -> Arc<SystemProfile> {
        SYSTEM.clone()
    }

    /// Get a human-readable summary of system resources
    pub fn summary(&self) -> String {
        format!(
            "System: {} {}\n\
             CPUs: {} ({} physical)\n\
             Memory: {:.2} GB ({:.2} GB available now)\n\
             Host: {}",
            self.os_name,
            self.os_version,
            self.cpu_count,
            self.physical_cpu_count,
            bytes_to_gb(self.total_memory),
            bytes_to_gb(live_available_memory()),
            self.hostname
        )
    }
}

/// Quick access functions
impl SystemProfile {
    /// Get CPU count directly
    pub fn cpu_count() -> usize {
        SYSTEM.cpu_count
    }

    /// Get physical CPU count directly
    pub fn physical_cpu_count() -> usize {
        SYSTEM.physical_cpu_count
    }
}

/// Currently available system memory in bytes.
///
/// Unlike [`SystemProfile::available_memory`] this is refreshed on every call,
/// so sizing decisions made late in a long-running process see current numbers.
pub fn live_available_memory() -> u64 {
    memory_snapshot().available_memory()
}

fn memory_snapshot() -> System {
    let mut sys =
        System::new_with_specifics(RefreshKind::new().with_memory(MemoryRefreshKind::everything()));
    sys.refresh_memory();
    sys
}

fn bytes_to_gb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0 * 1024.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_profile_initialization() {
        let profile = SystemProfile::get();
        assert!(profile.cpu_count > 0);
        assert!(profile.physical_cpu_count > 0);
        assert!(profile.total_memory > 0);
    }

    #[test]
    fn test_static_access() {
        let profile1 = SystemProfile::get();
        let profile2 = SystemProfile::get();
        assert_eq!(profile1.cpu_count, profile2.cpu_count);

        assert_eq!(SystemProfile::cpu_count(), profile1.cpu_count);
        assert_eq!(SystemProfile::physical_cpu_count(), profile1.physical_cpu_count);
    }

    #[test]
    fn test_live_memory_is_bounded_by_total() {
        let profile = SystemProfile::get();
        assert!(live_available_memory() <= profile.total_memory);
    }

    #[test]
    fn test_summary() {
        let summary = SystemProfile::get().summary();
        assert!(summary.contains("CPUs:"));
        assert!(summary.contains("Memory:"));
        assert!(summary.contains("System:"));
    }
}
