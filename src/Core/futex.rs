//! Parking for pool threads on a 32-bit signal word.

use std::sync::atomic::AtomicU32;
use std::time::Duration;

#[cfg(target_os = "linux")]
fn futex_call(atomic: &AtomicU32, op: libc::c_int, val: u32, timeout: Option<Duration>) {
    use std::ptr;

    let ts = timeout.map(|d| libc::timespec {
        tv_sec: d.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
        tv_nsec: d.subsec_nanos() as libc::c_long,
    });
    let ts_ptr = ts
        .as_ref()
        .map_or(ptr::null::<libc::timespec>(), |t| t as *const libc::timespec);

    unsafe {
        libc::syscall(
            libc::SYS_futex,
            atomic as *const AtomicU32 as *const u32,
            op | libc::FUTEX_PRIVATE_FLAG,
            val,
            ts_ptr,
            ptr::null::<u32>(),
            0u32,
        );
    }
}

/// Sleep while `atomic` still holds `expected`, at most `timeout` if given.
/// May return spuriously; callers re-check their condition.
#[cfg(target_os = "linux")]
pub fn futex_wait(atomic: &AtomicU32, expected: u32, timeout: Option<Duration>) {
    use std::sync::atomic::Ordering;

    // Check condition first to avoid syscall if possible
    if atomic.load(Ordering::Relaxed) != expected {
        return;
    }
    futex_call(atomic, libc::FUTEX_WAIT, expected, timeout);
}

/// Wake one thread parked on `atomic`.
#[cfg(target_os = "linux")]
pub fn futex_wake(atomic: &AtomicU32) {
    futex_call(atomic, libc::FUTEX_WAKE, 1, None);
}

/// Wake every thread parked on `atomic`.
#[cfg(target_os = "linux")]
pub fn futex_wake_all(atomic: &AtomicU32) {
    futex_call(atomic, libc::FUTEX_WAKE, i32::MAX as u32, None);
}

#[cfg(not(target_os = "linux"))]
pub fn futex_wait(atomic: &AtomicU32, expected: u32, timeout: Option<Duration>) {
    use std::sync::atomic::Ordering;

    // Fallback for non-Linux: short sleep, then let the caller re-check
    if atomic.load(Ordering::Relaxed) == expected {
        let nap = Duration::from_micros(200);
        std::thread::sleep(timeout.map_or(nap, |t| t.min(nap)));
    }
}

#[cfg(not(target_os = "linux"))]
pub fn futex_wake(_atomic: &AtomicU32) {
    // No-op on non-Linux
}

#[cfg(not(target_os = "linux"))]
pub fn futex_wake_all(_atomic: &AtomicU32) {
    // No-op on non-Linux
}
