//! Randomized index chain covering every granule exactly once.

use rand::Rng;

use crate::workload::Sinks;

/// Rebuild `indices` as a uniformly random permutation of `[0, len)`, so the
/// traversal order is decorrelated from buffer layout: Fisher-Yates, drawing
/// each swap partner uniformly from the unshuffled tail.
///
/// Chain creation also clears the running `total` accumulator for the round
/// about to start.
pub fn randomize<R: Rng>(indices: &mut [u64], rng: &mut R, sinks: &mut Sinks) {
    for (i, slot) in indices.iter_mut().enumerate() {
        *slot = i as u64;
    }
    let len = indices.len();
    for i in 0..len.saturating_sub(1) {
        let j = rng.gen_range(i..len);
        indices.swap(i, j);
    }
    sinks.total = 0;
}
