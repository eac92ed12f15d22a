//! The tagged access engine: a pointer chase over six concurrently-live
//! tagged pointers, emulating overlapping stack-slot liveness.
//!
//! Every round walks a fresh random permutation of the buffer. At each step
//! six pointers into consecutive chain positions are tagged (one random tag,
//! five derived from it), the tags are stamped into their granules, and a
//! fixed load/store ladder runs across them. The ladder's operand pairing
//! and evaluation order are what this benchmark measures; do not reorder it.

use std::ptr;

use rand::Rng;

use crate::chain;
use crate::region::Region;
use crate::tags::{granule_base, tag_of, Granule, TagBackend, GRANULE_BYTES};

/// Accumulators every access group drains into, so no load or store can be
/// proven dead. Owned by the driver and threaded through each round.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Sinks {
    pub rand_val: u64,
    pub rand_val2: u64,
    pub total: u64,
}

/// The six-pointer window needs six granules to stand on.
const WINDOW: usize = 6;

#[inline(always)]
fn vread(slot: &u64) -> u64 {
    unsafe { ptr::read_volatile(slot) }
}

#[inline(always)]
fn vwrite(slot: &mut u64, value: u64) {
    unsafe { ptr::write_volatile(slot, value) }
}

#[inline(always)]
unsafe fn word_ptr(base: *mut Granule, idx: u64, word: usize) -> *mut u64 {
    ptr::addr_of_mut!((*base.add(idx as usize)).word[word])
}

/// Run `rounds` passes of the tagged pointer chase over `buffer`.
///
/// Each pass rebuilds the index chain, flushes the cache over the buffer,
/// then executes one access group per chain position (none when the buffer
/// holds fewer granules than the pointer window). Returns the number of
/// access groups executed.
pub fn chase<B: TagBackend, R: Rng>(
    buffer: &Region,
    indices: &mut [u64],
    backend: &mut B,
    rng: &mut R,
    sinks: &mut Sinks,
    rounds: u64,
) -> u64 {
    let (base, count) = buffer.as_granules();
    assert_eq!(indices.len(), count, "index chain must cover the buffer");

    let mut groups = 0u64;
    for j in 0..rounds {
        chain::randomize(indices, rng, sinks);
        unsafe { backend.flush_range(base.cast::<u8>(), count * GRANULE_BYTES) };

        vwrite(&mut sinks.rand_val, rng.gen());
        vwrite(&mut sinks.rand_val2, rng.gen());

        // Rotating word selector: adjacent live pointers touch alternating
        // words of their granules.
        let first = rng.gen_range(0..2usize);
        let sel: [usize; WINDOW] = core::array::from_fn(|k| (first + k) % 2);

        if count < WINDOW {
            continue;
        }
        for i in 0..count - (WINDOW - 1) {
            unsafe {
                let p1 = word_ptr(base, indices[i], sel[0]);
                let p2 = word_ptr(base, indices[i + 1], sel[1]);
                let p3 = word_ptr(base, indices[i + 2], sel[2]);
                let p4 = word_ptr(base, indices[i + 3], sel[3]);
                let p5 = word_ptr(base, indices[i + 4], sel[4]);
                let p6 = word_ptr(base, indices[i + 5], sel[5]);

                let p1 = backend.random_tag(p1);
                let t1 = tag_of(p1);
                let p2 = backend.insert_tag(p2, t1 + 1);
                let p3 = backend.insert_tag(p3, t1 + 2);
                let p4 = backend.insert_tag(p4, t1 + 3);
                let p5 = backend.insert_tag(p5, t1 + 4);
                let p6 = backend.insert_tag(p6, t1 + 5);

                backend.store_tag(granule_base(p1));
                backend.store_tag(granule_base(p2));
                backend.store_tag(granule_base(p3));
                backend.store_tag(granule_base(p4));
                backend.store_tag(granule_base(p5));
                backend.store_tag(granule_base(p6));

                let step = i as u64 + j;
                // Load then store on p1 and on p2; p3 re-reads p2 right
                // after that store, which is the store-to-load forwarding
                // probe.
                *p1 = (*p1).wrapping_add(vread(&sinks.rand_val));
                *p2 = (*p2).wrapping_add(step);
                *p3 = (*p3).wrapping_add(*p2);
                let rv = vread(&sinks.rand_val).wrapping_add((*p3).wrapping_add(*p1));
                vwrite(&mut sinks.rand_val, rv);
                *p4 = (*p4).wrapping_add(vread(&sinks.rand_val2));
                *p5 = (*p5).wrapping_add(vread(&sinks.rand_val2).wrapping_sub(step));
                *p6 = (*p6).wrapping_add((*p4).wrapping_add(*p5));
                vwrite(&mut sinks.rand_val2, (*p3).wrapping_add(*p6));
                let total = vread(&sinks.rand_val).wrapping_add(vread(&sinks.rand_val2));
                vwrite(&mut sinks.total, total);
            }
            groups += 1;
        }
    }
    groups
}
