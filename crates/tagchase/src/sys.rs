//! Process-level setup: tag-check mode, the tagged-address control request,
//! and CPU pinning.

use std::io;

use rustix::process::{sched_setaffinity, CpuSet};
use thiserror::Error;
use tracing::debug;

/// How the hardware reports accesses whose pointer tag mismatches the tag
/// stored in the granule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagCheckMode {
    /// Buffer is untagged; tag instructions still execute but nothing is
    /// checked.
    Off,
    /// Tagged buffer, mismatches reported asynchronously.
    Async,
    /// Tagged buffer, mismatches fault at the offending access.
    Sync,
}

impl TagCheckMode {
    /// Whether the benchmark buffer must be mapped taggable.
    #[inline]
    pub fn is_tagged(self) -> bool {
        !matches!(self, TagCheckMode::Off)
    }
}

impl TryFrom<u8> for TagCheckMode {
    type Error = SetupError;

    fn try_from(raw: u8) -> Result<TagCheckMode, SetupError> {
        match raw {
            0 => Ok(TagCheckMode::Off),
            1 => Ok(TagCheckMode::Async),
            2 => Ok(TagCheckMode::Sync),
            other => Err(SetupError::UnknownMode(other)),
        }
    }
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("MTE is not supported on this hardware")]
    TagsUnsupported,
    #[error("failed to enable tagged address control: {0}")]
    TagControl(io::Error),
    #[error("unable to pin to cpu {cpu}: {source}")]
    Affinity { cpu: usize, source: io::Error },
    #[error("unknown tagging mode {0} (expected 0, 1 or 2)")]
    UnknownMode(u8),
}

/// Pin the process to one logical core. Runs before the first timed sample
/// and is never revisited; a failure here is fatal because cross-core
/// migration would contaminate every measurement.
pub fn pin_cpu(cpu: usize) -> Result<(), SetupError> {
    let mut set = CpuSet::new();
    set.set(cpu);
    sched_setaffinity(None, &set).map_err(|errno| SetupError::Affinity {
        cpu,
        source: errno.into(),
    })?;
    debug!(cpu, "pinned to core");
    Ok(())
}

/// Whether the cpu and kernel advertise the memory-tagging extension.
pub fn tags_supported() -> bool {
    imp::tags_supported()
}

/// Enable tagged-address handling for this process with the requested check
/// mode. Must run before tag instructions execute in any mode; checked modes
/// additionally gate on it before the buffer is even mapped.
pub fn enable_tag_checks(mode: TagCheckMode) -> Result<(), SetupError> {
    if !tags_supported() {
        return Err(SetupError::TagsUnsupported);
    }
    imp::enable_tag_checks(mode)
}

#[cfg(all(target_arch = "aarch64", target_os = "linux"))]
mod imp {
    use std::io;

    use super::{SetupError, TagCheckMode};

    // Include mask handed to the random tag generator: tag 0 stays excluded
    // so freshly tagged pointers never collide with the default granule tag.
    // Which further tags the hardware avoids is its own business.
    const TAG_INCLUDE_MASK: libc::c_ulong = 0xfffe;

    pub(super) fn tags_supported() -> bool {
        unsafe { libc::getauxval(libc::AT_HWCAP2) & libc::HWCAP2_MTE != 0 }
    }

    pub(super) fn enable_tag_checks(mode: TagCheckMode) -> Result<(), SetupError> {
        let tcf = match mode {
            TagCheckMode::Off => libc::PR_MTE_TCF_NONE,
            TagCheckMode::Async => libc::PR_MTE_TCF_ASYNC,
            TagCheckMode::Sync => libc::PR_MTE_TCF_SYNC,
        };
        let ctrl = libc::PR_TAGGED_ADDR_ENABLE as libc::c_ulong
            | tcf as libc::c_ulong
            | (TAG_INCLUDE_MASK << libc::PR_MTE_TAG_SHIFT);
        let ret = unsafe { libc::prctl(libc::PR_SET_TAGGED_ADDR_CTRL, ctrl, 0, 0, 0) };
        if ret != 0 {
            return Err(SetupError::TagControl(io::Error::last_os_error()));
        }
        Ok(())
    }
}

#[cfg(not(all(target_arch = "aarch64", target_os = "linux")))]
mod imp {
    use super::{SetupError, TagCheckMode};

    pub(super) fn tags_supported() -> bool {
        false
    }

    pub(super) fn enable_tag_checks(_mode: TagCheckMode) -> Result<(), SetupError> {
        Err(SetupError::TagsUnsupported)
    }
}
