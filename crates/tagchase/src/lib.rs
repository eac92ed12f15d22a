//! # tagchase
//!
//! Core of a microbenchmark that measures the cost of hardware memory
//! tagging (random tag generation, tag stores, tagged loads and stores)
//! under a randomized pointer chase emulating stack-object access.
//!
//! ## Modules
//!
//! - `chain`: randomized index permutation covering every granule once.
//! - `driver`: timed outer loop, mappings and reporting.
//! - `region`: anonymous mappings with decommit between samples.
//! - `sys`: tag-check mode, tagged-address control, CPU pinning.
//! - `tags`: granule model and the tagging primitives.
//! - `workload`: the six-pointer tagged access engine.

pub mod chain;
pub mod driver;
pub mod region;
pub mod sys;
pub mod tags;
pub mod workload;

pub use driver::{run, BenchConfig, BenchError, BenchReport, REPORT_LABEL};
pub use region::{MapError, Region};
pub use sys::{enable_tag_checks, pin_cpu, tags_supported, SetupError, TagCheckMode};
#[cfg(all(target_arch = "aarch64", target_os = "linux"))]
pub use tags::MteBackend;
pub use tags::{Granule, SimBackend, TagBackend, GRANULE_BYTES};
pub use workload::{chase, Sinks};
