//! General utilities shared across the crate.

use std::time::{SystemTime, UNIX_EPOCH};

// ─────────────────────────────────────────────────────────────────────────────
// Time Utilities
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Thread Priority
// ─────────────────────────────────────────────────────────────────────────────

/// Moves the calling thread to realtime scheduling.
///
/// Called once by each audio thread right after it starts.
///
/// # Platform behavior
///
/// - **Unix**: `SCHED_RR` at `priority`. Requires root, `CAP_SYS_NICE`, or an
///   `RLIMIT_RTPRIO` grant (e.g. via rtkit/PAM limits).
/// - **Windows**: `THREAD_PRIORITY_TIME_CRITICAL`; `priority` is ignored.
///
/// Returns whether the change took effect. Failure is logged and otherwise
/// ignored: the thread keeps running at normal priority.
pub fn make_realtime(priority: i32) -> bool {
    set_thread_realtime(priority)
}

#[cfg(not(any(unix, target_os = "windows")))]
fn set_thread_realtime(priority: i32) -> bool {
    log::warn!("Realtime scheduling (priority {priority}) not supported on this platform");
    false
}

#[cfg(target_os = "windows")]
fn set_thread_realtime(_priority: i32) -> bool {
    use windows_sys::Win32::System::Threading::{
        GetCurrentThread, SetThreadPriority, THREAD_PRIORITY_TIME_CRITICAL,
    };

    // SAFETY: GetCurrentThread returns a pseudo-handle that doesn't need closing.
    let result = unsafe { SetThreadPriority(GetCurrentThread(), THREAD_PRIORITY_TIME_CRITICAL) };

    if result != 0 {
        log::info!("Audio thread priority raised to TIME_CRITICAL");
        true
    } else {
        log::warn!(
            "Failed to raise audio thread priority: {}",
            std::io::Error::last_os_error()
        );
        false
    }
}

#[cfg(unix)]
fn set_thread_realtime(priority: i32) -> bool {
    // SAFETY: sched_param is plain data; pthread_self always names the
    // calling thread.
    let rc = unsafe {
        let mut param: libc::sched_param = std::mem::zeroed();
        param.sched_priority = priority;
        libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_RR, &param)
    };

    if rc == 0 {
        log::info!("Audio thread switched to SCHED_RR priority {priority}");
        true
    } else {
        log::warn!(
            "Failed to enable realtime scheduling (SCHED_RR {}): {}",
            priority,
            std::io::Error::from_raw_os_error(rc)
        );
        false
    }
}
