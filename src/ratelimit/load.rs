//! System load sampling for adaptive throttling.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};

/// Source of a system-load fraction between 0.0 and 1.0.
#[async_trait]
pub trait LoadSampler: Send + Sync {
    /// Take a fresh sample.
    async fn sample(&self) -> f64;
}

/// A load value set by hand.
///
/// Useful for tests, and for deployments that push load from an external
/// metrics pipeline.
#[derive(Debug, Default)]
pub struct FixedLoad {
    bits: AtomicU64,
}

impl FixedLoad {
    pub fn new(load: f64) -> Self {
        Self {
            bits: AtomicU64::new(clamp_load(load).to_bits()),
        }
    }

    pub fn set(&self, load: f64) {
        self.bits.store(clamp_load(load).to_bits(), Ordering::SeqCst);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl LoadSampler for FixedLoad {
    async fn sample(&self) -> f64 {
        self.get()
    }
}

/// Samples the one-minute load average normalised by CPU count.
///
/// Reads `/proc/loadavg`; hosts without it report zero load.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLoadSampler;

impl SystemLoadSampler {
    fn parse_loadavg(contents: &str, cpus: usize) -> Option<f64> {
        let one_minute: f64 = contents.split_whitespace().next()?.parse().ok()?;
        Some(clamp_load(one_minute / cpus.max(1) as f64))
    }
}

#[async_trait]
impl LoadSampler for SystemLoadSampler {
    async fn sample(&self) -> f64 {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        match tokio::fs::read_to_string("/proc/loadavg").await {
            Ok(contents) => Self::parse_loadavg(&contents, cpus).unwrap_or(0.0),
            Err(e) => {
                trace!(error = %e, "Load average unavailable");
                0.0
            }
        }
    }
}

/// Holds the latest load sample for adaptive rules.
pub struct LoadMonitor {
    sampler: Arc<dyn LoadSampler>,
    latest: AtomicU64,
}

impl std::fmt::Debug for LoadMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadMonitor")
            .field("latest", &self.latest())
            .finish()
    }
}

impl LoadMonitor {
    pub fn new(sampler: Arc<dyn LoadSampler>) -> Self {
        Self {
            sampler,
            latest: AtomicU64::new(0f64.to_bits()),
        }
    }

    /// The most recent sample. Zero until the first refresh.
    pub fn latest(&self) -> f64 {
        f64::from_bits(self.latest.load(Ordering::Relaxed))
    }

    /// Take a new sample and publish it.
    pub async fn refresh(&self) -> f64 {
        let load = clamp_load(self.sampler.sample().await);
        self.latest.store(load.to_bits(), Ordering::Relaxed);
        debug!(load = load, "System load sampled");
        load
    }
}

/// Adjusted request limit under load, if the rule should be throttled.
///
/// Returns `None` while the load is at or below the threshold. Otherwise
/// the limit shrinks by the amount the load overshoots the threshold.
pub fn adjusted_limit(max_requests: u64, load: f64, threshold: f64) -> Option<u64> {
    if load <= threshold {
        return None;
    }
    let reduction = (1.0 - (load - threshold)).clamp(0.0, 1.0);
    Some((max_requests as f64 * reduction).floor() as u64)
}

fn clamp_load(load: f64) -> f64 {
    if load.is_nan() {
        0.0
    } else {
        load.clamp(0.0, 1.0)
    }
}
