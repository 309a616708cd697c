//! Process resource limits

use fiber_core::{RuntimeError, RuntimeResult};
use nix::sys::resource::{getrlimit, Resource};
use tracing::warn;

/// Largest descriptor table: an unlimited or very large limit is capped
const FD_TABLE_CAP: usize = 1 << 20;

/// Soft `RLIMIT_NOFILE`: every descriptor this process can open is below it.
pub fn fd_limit() -> RuntimeResult<usize> {
    let (soft, _hard) = getrlimit(Resource::RLIMIT_NOFILE)
        .map_err(|errno| RuntimeError::ResourceLimit(errno.into()))?;
    Ok(table_size(soft))
}

/// Descriptor table size for a soft limit.
fn table_size(soft: libc::rlim_t) -> usize {
    if soft == libc::RLIM_INFINITY {
        return FD_TABLE_CAP;
    }
    let limit = usize::try_from(soft).unwrap_or(usize::MAX);
    if limit > FD_TABLE_CAP {
        warn!(
            soft,
            cap = FD_TABLE_CAP,
            "RLIMIT_NOFILE above descriptor table cap; higher descriptors will be rejected"
        );
        return FD_TABLE_CAP;
    }
    limit
}
