//! Anonymous memory mappings backing the benchmark buffer and index chain.
//!
//! Both regions keep their virtual mapping for the whole run; only the
//! physical backing is dropped between timed samples, so every sample starts
//! from untouched zero pages with no warm TLB or cache state carried over.

use std::io;

use memmap2::MmapMut;
use rustix::mm::{self, Advice};
use thiserror::Error;

use crate::tags::{Granule, GRANULE_BYTES};

#[derive(Debug, Error)]
pub enum MapError {
    #[error("failed to map memory: {0}")]
    MmapFailed(io::Error),
    #[error("failed to release backing pages: {0}")]
    DecommitFailed(io::Error),
    #[error("tagged mappings are not available on this target")]
    TaggingUnavailable,
}

/// A zero-initialized anonymous mapping with a stable base address.
#[derive(Debug)]
pub struct Region {
    base: *mut u8,
    len: usize,
    backing: Backing,
}

#[derive(Debug)]
enum Backing {
    /// Plain read-write mapping, unmapped on drop by memmap2.
    Anon(#[allow(dead_code)] MmapMut),
    /// Raw mapping carrying the taggable protection bit.
    Tagged,
}

impl Region {
    /// Plain anonymous read-write mapping.
    pub fn anonymous(len: usize) -> Result<Region, MapError> {
        let mut mapping = MmapMut::map_anon(len).map_err(MapError::MmapFailed)?;
        let base = mapping.as_mut_ptr();
        Ok(Region {
            base,
            len,
            backing: Backing::Anon(mapping),
        })
    }

    /// Anonymous mapping whose granules accept stored tags. Only available
    /// where the kernel knows the taggable protection bit.
    pub fn taggable(len: usize) -> Result<Region, MapError> {
        let base = imp::map_tagged(len)?;
        Ok(Region {
            base,
            len,
            backing: Backing::Tagged,
        })
    }

    #[inline]
    pub fn base(&self) -> *mut u8 {
        self.base
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// View the mapping as a granule array. A trailing partial granule is
    /// not counted.
    #[inline]
    pub fn as_granules(&self) -> (*mut Granule, usize) {
        (self.base as *mut Granule, self.len / GRANULE_BYTES)
    }

    /// Release the physical backing while keeping the virtual mapping, so
    /// the next touch faults in fresh zero pages.
    pub fn decommit(&self) -> Result<(), MapError> {
        unsafe {
            mm::madvise(self.base.cast(), self.len, Advice::LinuxDontNeed)
                .map_err(|errno| MapError::DecommitFailed(errno.into()))
        }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        if let Backing::Tagged = self.backing {
            unsafe {
                let _ = mm::munmap(self.base.cast(), self.len);
            }
        }
    }
}

#[cfg(all(target_arch = "aarch64", target_os = "linux"))]
mod imp {
    use core::ptr;

    use rustix::mm::{self, MapFlags, ProtFlags};

    use super::MapError;

    pub(super) fn map_tagged(len: usize) -> Result<*mut u8, MapError> {
        let prot = ProtFlags::READ
            | ProtFlags::WRITE
            | ProtFlags::from_bits_retain(libc::PROT_MTE as u32);
        let base = unsafe { mm::mmap_anonymous(ptr::null_mut(), len, prot, MapFlags::PRIVATE) }
            .map_err(|errno| MapError::MmapFailed(errno.into()))?;
        Ok(base as *mut u8)
    }
}

#[cfg(not(all(target_arch = "aarch64", target_os = "linux")))]
mod imp {
    use super::MapError;

    pub(super) fn map_tagged(_len: usize) -> Result<*mut u8, MapError> {
        Err(MapError::TaggingUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg_attr(miri, ignore = "anonymous mappings unsupported in Miri")]
    fn mapping_starts_zeroed_and_decommit_rezeroes() {
        let region = Region::anonymous(4096).expect("failed to map test region");
        let words = region.len() / core::mem::size_of::<u64>();
        unsafe {
            let base = region.base() as *mut u64;
            for i in 0..words {
                assert_eq!(*base.add(i), 0, "fresh mapping must be zeroed");
            }
            for i in 0..words {
                *base.add(i) = 0xfeed_face_dead_beef;
            }
            region.decommit().expect("decommit failed");
            for i in 0..words {
                assert_eq!(*base.add(i), 0, "decommit must drop dirtied pages");
            }
        }
    }

    #[test]
    #[cfg_attr(miri, ignore = "anonymous mappings unsupported in Miri")]
    fn granule_view_truncates_partial_tail() {
        let region = Region::anonymous(100).expect("failed to map test region");
        let (_, count) = region.as_granules();
        assert_eq!(count, 6);
    }

    #[cfg(not(all(target_arch = "aarch64", target_os = "linux")))]
    #[test]
    fn taggable_mappings_are_refused_off_target() {
        assert!(matches!(
            Region::taggable(4096),
            Err(MapError::TaggingUnavailable)
        ));
    }
}
