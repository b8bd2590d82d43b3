//! Futex-style wait/wake primitives, used by [`crate::worker`] to park idle
//! workers instead of spinning. Only the 32-bit width is used: workers park
//! on the pool's `idle_round` counter (see [`crate::worker::Pool`]).

use core::sync::atomic::{AtomicU32, Ordering};

#[cfg(windows)]
use windows_sys::Win32::System::Threading::{WaitOnAddress, WakeByAddressAll};

#[cfg(target_os = "linux")]
use libc::{SYS_futex, FUTEX_PRIVATE_FLAG, FUTEX_WAIT, FUTEX_WAKE};

#[cfg(target_os = "linux")]
#[inline]
fn futex_wait(addr: *const u32, expected: u32) {
    unsafe {
        libc::syscall(
            SYS_futex,
            addr,
            FUTEX_WAIT | FUTEX_PRIVATE_FLAG,
            expected,
            core::ptr::null::<libc::timespec>(),
        );
    }
}

#[cfg(target_os = "linux")]
#[inline]
fn futex_wake(addr: *const u32, count: i32) {
    unsafe {
        libc::syscall(SYS_futex, addr, FUTEX_WAKE | FUTEX_PRIVATE_FLAG, count);
    }
}

/// Wakes all threads waiting on the given address.
#[inline]
pub fn wake_all_u32(addr: &AtomicU32) {
    #[cfg(windows)]
    unsafe {
        WakeByAddressAll(addr as *const _ as *mut _);
    }
    #[cfg(target_os = "linux")]
    {
        futex_wake(addr as *const _ as *const u32, i32::MAX);
    }
}

/// Waits on the given address until the value changes from `expected`.
#[inline]
pub fn wait_on_u32(addr: &AtomicU32, expected: u32) {
    #[cfg(windows)]
    unsafe {
        let expected_ptr = &expected as *const u32 as *const _;
        let addr_ptr = addr as *const _ as *mut _;
        let size = core::mem::size_of::<u32>();
        WaitOnAddress(addr_ptr, expected_ptr, size, u32::MAX);
    }
    #[cfg(target_os = "linux")]
    unsafe {
        if addr.load(Ordering::SeqCst) == expected {
            futex_wait(addr as *const _ as *const u32, expected);
        }
    }
    #[cfg(not(any(windows, target_os = "linux")))]
    while addr.load(Ordering::SeqCst) == expected {
        std::thread::yield_now();
    }
}
