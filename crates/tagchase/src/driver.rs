//! Benchmark driver: owns the mappings and the accumulators, times each
//! outer iteration around a single engine invocation, and resets the
//! physical backing between samples.

use std::slice;
use std::time::{Duration, Instant};

use rand::Rng;
use thiserror::Error;
use tracing::debug;

use crate::region::{MapError, Region};
use crate::sys::TagCheckMode;
use crate::tags::{TagBackend, GRANULE_BYTES};
use crate::workload::{self, Sinks};

/// Prefix of the per-iteration stdout report line.
pub const REPORT_LABEL: &str = "tagged_chase: stack object emulation";

#[derive(Debug, Clone, Copy)]
pub struct BenchConfig {
    /// Buffer size in bytes; truncated to whole granules.
    pub buffer_bytes: u64,
    /// Timed samples, one report line each.
    pub outer_iterations: u64,
    /// Workload rounds inside one timed sample.
    pub inner_rounds: u64,
    pub mode: TagCheckMode,
}

#[derive(Debug, Error)]
pub enum BenchError {
    #[error("buffer of {bytes} bytes holds no whole granule")]
    BufferTooSmall { bytes: u64 },
    #[error(transparent)]
    Map(#[from] MapError),
}

/// What a finished run exposes for inspection.
#[derive(Debug)]
pub struct BenchReport {
    /// Wall-clock time of each outer iteration.
    pub samples: Vec<Duration>,
    /// Access groups executed across the whole run.
    pub groups: u64,
    /// Final accumulator state.
    pub sinks: Sinks,
}

/// Run the full outer/inner loop nest with the given backend and random
/// source, printing one timing line per outer iteration.
pub fn run<B, R>(cfg: &BenchConfig, backend: &mut B, rng: &mut R) -> Result<BenchReport, BenchError>
where
    B: TagBackend,
    R: Rng,
{
    let granule_count = (cfg.buffer_bytes as usize) / GRANULE_BYTES;
    if granule_count == 0 {
        return Err(BenchError::BufferTooSmall {
            bytes: cfg.buffer_bytes,
        });
    }

    let buffer = if cfg.mode.is_tagged() {
        Region::taggable(cfg.buffer_bytes as usize)?
    } else {
        Region::anonymous(cfg.buffer_bytes as usize)?
    };
    let index_region = Region::anonymous(granule_count * core::mem::size_of::<u64>())?;
    debug!(granule_count, mode = ?cfg.mode, "benchmark mappings ready");

    let mut sinks = Sinks::default();
    let mut samples = Vec::with_capacity(cfg.outer_iterations as usize);
    let mut groups = 0;

    for _ in 0..cfg.outer_iterations {
        // Decommit zeroed the chain; the workload rebuilds it before it is
        // ever read.
        let indices = unsafe {
            slice::from_raw_parts_mut(index_region.base() as *mut u64, granule_count)
        };

        let started = Instant::now();
        groups += workload::chase(&buffer, indices, backend, rng, &mut sinks, cfg.inner_rounds);
        let elapsed = started.elapsed();

        println!("{REPORT_LABEL} time is {} ns", elapsed.as_nanos());
        samples.push(elapsed);

        // Drop physical pages and TLB entries so the next sample starts
        // from an untouched mapping. A failed release poisons every later
        // sample, so it is fatal.
        buffer.decommit()?;
        index_region.decommit()?;
    }

    Ok(BenchReport {
        samples,
        groups,
        sinks,
    })
}

#[cfg(test)]
mod tests {
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    use super::*;
    use crate::tags::SimBackend;

    fn untagged(buffer_bytes: u64, outer: u64, inner: u64) -> BenchConfig {
        BenchConfig {
            buffer_bytes,
            outer_iterations: outer,
            inner_rounds: inner,
            mode: TagCheckMode::Off,
        }
    }

    fn run_untagged(cfg: &BenchConfig, seed: u64) -> BenchReport {
        let mut backend = SimBackend::new();
        let mut rng = SmallRng::seed_from_u64(seed);
        run(cfg, &mut backend, &mut rng).expect("benchmark run failed")
    }

    #[test]
    #[cfg_attr(miri, ignore = "anonymous mappings unsupported in Miri")]
    fn four_kib_buffer_runs_one_group_per_chain_position() {
        let report = run_untagged(&untagged(4096, 1, 1), 42);
        assert_eq!(report.samples.len(), 1);
        assert_eq!(report.groups, 251);
        assert_eq!(
            report.sinks.total,
            report.sinks.rand_val.wrapping_add(report.sinks.rand_val2)
        );
    }

    #[test]
    #[cfg_attr(miri, ignore = "anonymous mappings unsupported in Miri")]
    fn buffers_below_the_window_still_produce_samples() {
        // Five granules: too small for six live pointers, but the run must
        // complete and report.
        let report = run_untagged(&untagged(5 * 16, 2, 3), 42);
        assert_eq!(report.samples.len(), 2);
        assert_eq!(report.groups, 0);
    }

    #[test]
    #[cfg_attr(miri, ignore = "anonymous mappings unsupported in Miri")]
    fn buffer_bytes_truncate_to_whole_granules() {
        // 100 bytes hold six granules; each round fits exactly one window.
        let report = run_untagged(&untagged(100, 2, 1), 7);
        assert_eq!(report.groups, 2);
    }

    #[test]
    #[cfg_attr(miri, ignore = "anonymous mappings unsupported in Miri")]
    fn sub_granule_buffers_are_a_configuration_error() {
        let mut backend = SimBackend::new();
        let mut rng = SmallRng::seed_from_u64(1);
        let err = run(&untagged(15, 1, 1), &mut backend, &mut rng).unwrap_err();
        assert!(matches!(err, BenchError::BufferTooSmall { bytes: 15 }));
    }

    #[test]
    #[cfg_attr(miri, ignore = "anonymous mappings unsupported in Miri")]
    fn identical_untagged_runs_replay_identically() {
        let cfg = untagged(2048, 3, 2);
        let a = run_untagged(&cfg, 0xdead);
        let b = run_untagged(&cfg, 0xdead);
        assert_eq!(a.groups, b.groups);
        assert_eq!(a.sinks, b.sinks);
    }
}
