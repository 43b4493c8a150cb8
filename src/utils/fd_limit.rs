//! File descriptor limit detection for capping stage worker counts (Unix).

/// Descriptors one classify or dump worker may hold at once (image, artifact, child pipes).
pub const FDS_PER_WORKER: usize = 6;

/// Fraction of the soft limit the worker pools may use together.
const FD_LIMIT_FRACTION: f64 = 0.8;

/// Soft limit for open descriptors, or `None` when unlimited or unavailable.
#[cfg(unix)]
pub fn max_open_fds() -> Option<u64> {
    use std::mem::MaybeUninit;
    let mut rlim = MaybeUninit::<libc::rlimit>::uninit();
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, rlim.as_mut_ptr()) } != 0 {
        return None;
    }
    let rlim = unsafe { rlim.assume_init() };
    let cur = rlim.rlim_cur;
    if cur == libc::RLIM_INFINITY || cur > i64::MAX as u64 {
        return None;
    }
    Some(cur)
}

#[cfg(not(unix))]
pub fn max_open_fds() -> Option<u64> {
    None
}

/// Cap `requested` so that `pools` pools of that size stay under ~80% of the limit. Never below 1.
pub fn cap_workers_by_fd_limit(requested: usize, pools: usize) -> usize {
    let Some(limit) = max_open_fds() else {
        return requested;
    };
    let usable = (limit as f64 * FD_LIMIT_FRACTION) as usize;
    let per_pool = usable / (FDS_PER_WORKER * pools.max(1));
    let capped = requested.min(per_pool).max(1);
    if capped < requested {
        log::debug!("Capping workers {} -> {} (FD limit {})", requested, capped, limit);
    }
    capped
}
