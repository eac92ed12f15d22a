//! CLI wrapper around the `tagchase` core: parses the benchmark
//! configuration, pins the process, enables tagged-address handling where
//! the hardware has it, and runs the timed loop nest.

use anyhow::Result;
use clap::Parser;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use tagchase::{driver, sys, BenchConfig, BenchReport, SimBackend, TagCheckMode};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Measures tag generation, tag stores and tagged loads/stores under a
/// randomized pointer chase that emulates stack-object access.
#[derive(Parser, Debug)]
#[command(name = "tagbench", arg_required_else_help = true)]
struct Args {
    /// Tagging mode: 0 buffer untagged, 1 tagged + async checking, 2 tagged + sync checking
    #[arg(short = 'm', value_name = "MODE", default_value_t = 0,
          value_parser = clap::value_parser!(u8).range(0..=2))]
    mode: u8,

    /// Buffer size in KiB
    #[arg(short = 's', value_name = "SIZE", default_value_t = 0)]
    size_kib: u64,

    /// Inner loop count: workload rounds inside one timed sample
    #[arg(short = 'l', value_name = "COUNT", default_value_t = 0)]
    inner_loops: u64,

    /// Outer loop count: timed samples
    #[arg(short = 'i', value_name = "COUNT", default_value_t = 0)]
    outer_iterations: u64,

    /// Logical cpu number to pin the task to
    #[arg(short = 'c', value_name = "CPU", default_value_t = 0)]
    cpu: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mode = TagCheckMode::try_from(args.mode)?;
    let cfg = BenchConfig {
        buffer_bytes: args.size_kib * 1024,
        outer_iterations: args.outer_iterations,
        inner_rounds: args.inner_loops,
        mode,
    };

    // Pinning happens before anything is measured and is never revisited.
    sys::pin_cpu(args.cpu)?;

    let report = if sys::tags_supported() {
        // All modes run on the real instructions when the extension is
        // there; mode 0 simply disables the checks.
        sys::enable_tag_checks(mode)?;
        println!("MTE is supported");
        run_hardware(&cfg, SmallRng::from_entropy())?
    } else if mode.is_tagged() {
        // Checked modes have no software stand-in; a partial measurement
        // would be worse than none.
        return Err(sys::SetupError::TagsUnsupported.into());
    } else {
        println!("MTE is not available, running untagged with simulated tag primitives");
        let mut backend = SimBackend::new();
        let mut rng = SmallRng::from_entropy();
        driver::run(&cfg, &mut backend, &mut rng)?
    };

    debug!(
        samples = report.samples.len(),
        groups = report.groups,
        total = report.sinks.total,
        "run complete"
    );
    Ok(())
}

#[cfg(all(target_arch = "aarch64", target_os = "linux"))]
fn run_hardware(cfg: &BenchConfig, mut rng: SmallRng) -> Result<BenchReport> {
    let mut backend = tagchase::MteBackend::new();
    Ok(driver::run(cfg, &mut backend, &mut rng)?)
}

#[cfg(not(all(target_arch = "aarch64", target_os = "linux")))]
fn run_hardware(_cfg: &BenchConfig, _rng: SmallRng) -> Result<BenchReport> {
    unreachable!("tags_supported() never holds off aarch64 linux")
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Args;

    #[test]
    fn rejects_an_empty_invocation() {
        assert!(Args::try_parse_from(["tagbench"]).is_err());
    }

    #[test]
    fn rejects_unknown_flags_trailing_words_and_bad_modes() {
        assert!(Args::try_parse_from(["tagbench", "-x", "1"]).is_err());
        assert!(Args::try_parse_from(["tagbench", "-m", "1", "trailing"]).is_err());
        assert!(Args::try_parse_from(["tagbench", "-m", "3"]).is_err());
    }

    #[test]
    fn parses_the_full_flag_set() {
        let args = Args::try_parse_from([
            "tagbench", "-m", "2", "-s", "64", "-l", "10", "-i", "3", "-c", "5",
        ])
        .expect("full flag set parses");
        assert_eq!(args.mode, 2);
        assert_eq!(args.size_kib, 64);
        assert_eq!(args.inner_loops, 10);
        assert_eq!(args.outer_iterations, 3);
        assert_eq!(args.cpu, 5);
    }

    #[test]
    fn flags_default_to_zero_when_omitted() {
        let args = Args::try_parse_from(["tagbench", "-s", "4"]).expect("single flag parses");
        assert_eq!(args.mode, 0);
        assert_eq!(args.size_kib, 4);
        assert_eq!(args.inner_loops, 0);
        assert_eq!(args.outer_iterations, 0);
        assert_eq!(args.cpu, 0);
    }
}
