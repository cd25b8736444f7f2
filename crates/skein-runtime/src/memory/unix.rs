//! Unix page release

use skein_core::SchedResult;

/// Drop the physical pages behind `[base, base + len)`.
///
/// On Linux a private anonymous mapping reads back as zeroes after
/// MADV_DONTNEED; elsewhere the range is zeroed in place.
///
/// # Safety
///
/// The range must be a page-aligned, writable part of a private anonymous
/// mapping that nothing else is using.
pub(super) unsafe fn release_pages(base: *mut u8, len: usize) -> SchedResult<()> {
    cfg_if::cfg_if! {
        if #[cfg(any(target_os = "linux", target_os = "android"))] {
            let ret = libc::madvise(base as *mut libc::c_void, len, libc::MADV_DONTNEED);
            if ret != 0 {
                return Err(skein_core::SchedError::Stack(format!(
                    "madvise failed: {}",
                    std::io::Error::last_os_error()
                )));
            }
        } else {
            std::ptr::write_bytes(base, 0, len);
        }
    }
    Ok(())
}
