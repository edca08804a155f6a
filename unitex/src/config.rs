//! Engine configuration.
//!
//! One immutable [`EngineConfig`] is passed by reference into the
//! orchestrator and the dispatch engine at construction time. It
//! replaces the scattered global toggles (multithreading on/off,
//! debug printing, perceptual metrics) of older texture pipelines.

use serde::{Deserialize, Serialize};

/// Immutable engine-wide configuration.
///
/// # Example
///
/// ```
/// use unitex::config::EngineConfig;
///
/// let config = EngineConfig::default().with_worker_cap(4);
/// assert_eq!(config.worker_cap, 4);
/// assert!(config.parallel_jobs);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Run independent compression jobs on a bounded worker pool.
    ///
    /// When false, jobs run serially and the intra-job block pool
    /// receives the available concurrency instead. The two strategies
    /// are never combined for the same batch.
    pub parallel_jobs: bool,

    /// Upper bound on worker threads. The effective pool size is
    /// `min(detected hardware concurrency, worker_cap)`. Zero means
    /// "no cap beyond hardware concurrency".
    pub worker_cap: u32,

    /// Emit verbose per-unit debug output.
    pub debug_output: bool,

    /// Use perceptual (luma-weighted) error metrics when computing
    /// PSNR rows for reports.
    pub perceptual_metrics: bool,

    /// Seed for the pseudo-random pre-fill of transcode destination
    /// buffers. The fill is deterministic per seed so failures
    /// reproduce.
    pub prefill_seed: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallel_jobs: true,
            worker_cap: 0,
            debug_output: false,
            perceptual_metrics: false,
            prefill_seed: 0xD5A2_C367,
        }
    }
}

impl EngineConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker cap.
    pub fn with_worker_cap(mut self, cap: u32) -> Self {
        self.worker_cap = cap;
        self
    }

    /// Enable or disable job-level parallelism.
    pub fn with_parallel_jobs(mut self, parallel: bool) -> Self {
        self.parallel_jobs = parallel;
        self
    }

    /// Enable perceptual error metrics.
    pub fn with_perceptual_metrics(mut self, perceptual: bool) -> Self {
        self.perceptual_metrics = perceptual;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.parallel_jobs);
        assert_eq!(config.worker_cap, 0);
        assert!(!config.debug_output);
        assert!(!config.perceptual_metrics);
    }

    #[test]
    fn test_builder_methods() {
        let config = EngineConfig::new()
            .with_worker_cap(8)
            .with_parallel_jobs(false)
            .with_perceptual_metrics(true);
        assert_eq!(config.worker_cap, 8);
        assert!(!config.parallel_jobs);
        assert!(config.perceptual_metrics);
    }

    #[test]
    fn test_serde_roundtrip() {
        let config = EngineConfig::new().with_worker_cap(2);
        let json = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}
