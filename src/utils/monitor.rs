use std::time::{Duration, Instant};

#[cfg(feature = "cli")]
use std::sync::Mutex;
#[cfg(feature = "cli")]
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

#[derive(Debug, Clone)]
pub struct ProcessStats {
    pub cpu_usage: f32,
    pub memory_usage_mb: u64,
    pub peak_memory_mb: u64,
}

/// Tracks wall-clock time per phase; with the `cli` feature it also samples
/// process CPU and memory when enabled.
pub struct RunMonitor {
    start_time: Instant,
    phase_start: Instant,
    phases: Vec<(String, Duration)>,
    #[cfg(feature = "cli")]
    sampler: Option<ProcessSampler>,
}

#[cfg(feature = "cli")]
struct ProcessSampler {
    system: Mutex<System>,
    pid: Pid,
    peak_memory_mb: Mutex<u64>,
}

#[cfg(feature = "cli")]
impl ProcessSampler {
    fn new() -> Option<Self> {
        let pid = sysinfo::get_current_pid().ok()?;
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::everything(),
        );
        Some(Self {
            system: Mutex::new(system),
            pid,
            peak_memory_mb: Mutex::new(0),
        })
    }

    fn sample(&self) -> Option<ProcessStats> {
        let mut system = self.system.lock().ok()?;
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::everything(),
        );
        let process = system.process(self.pid)?;
        let memory_mb = process.memory() / 1024 / 1024;

        let mut peak = self.peak_memory_mb.lock().ok()?;
        if memory_mb > *peak {
            *peak = memory_mb;
        }

        Some(ProcessStats {
            cpu_usage: process.cpu_usage(),
            memory_usage_mb: memory_mb,
            peak_memory_mb: *peak,
        })
    }
}

impl RunMonitor {
    pub fn new(enabled: bool) -> Self {
        let now = Instant::now();
        #[cfg(not(feature = "cli"))]
        let _ = enabled;
        Self {
            start_time: now,
            phase_start: now,
            phases: Vec::new(),
            #[cfg(feature = "cli")]
            sampler: if enabled { ProcessSampler::new() } else { None },
        }
    }

    pub fn is_enabled(&self) -> bool {
        #[cfg(feature = "cli")]
        {
            self.sampler.is_some()
        }
        #[cfg(not(feature = "cli"))]
        {
            false
        }
    }

    pub fn stats(&self) -> Option<ProcessStats> {
        #[cfg(feature = "cli")]
        {
            self.sampler.as_ref().and_then(ProcessSampler::sample)
        }
        #[cfg(not(feature = "cli"))]
        {
            None
        }
    }

    /// Closes the current phase and starts timing the next one.
    pub fn finish_phase(&mut self, phase: &str) -> Duration {
        let elapsed = self.phase_start.elapsed();
        self.phases.push((phase.to_string(), elapsed));
        self.phase_start = Instant::now();

        match self.stats() {
            Some(stats) => tracing::info!(
                "📊 {} finished in {:?} - CPU: {:.1}%, Memory: {}MB, Peak: {}MB",
                phase,
                elapsed,
                stats.cpu_usage,
                stats.memory_usage_mb,
                stats.peak_memory_mb
            ),
            None => tracing::debug!("{} finished in {:?}", phase, elapsed),
        }
        elapsed
    }

    pub fn phases(&self) -> &[(String, Duration)] {
        &self.phases
    }

    pub fn total_elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn log_final_stats(&self) {
        let peak = self
            .stats()
            .map(|s| format!(", Peak Memory: {}MB", s.peak_memory_mb))
            .unwrap_or_default();
        tracing::info!("📊 Total Time: {:?}{}", self.total_elapsed(), peak);
    }
}

impl Default for RunMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phases_are_recorded_in_order() {
        let mut monitor = RunMonitor::new(false);
        monitor.finish_phase("extract");
        monitor.finish_phase("load");

        let names: Vec<&str> = monitor.phases().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["extract", "load"]);
        assert!(monitor.total_elapsed() >= monitor.phases()[0].1);
    }

    #[test]
    fn test_disabled_monitor_has_no_stats() {
        let monitor = RunMonitor::default();
        assert!(!monitor.is_enabled());
        assert!(monitor.stats().is_none());
    }
}
