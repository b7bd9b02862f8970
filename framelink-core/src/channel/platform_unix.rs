//! POSIX backend: `shm_open` mapping + named-semaphore signal.
//!
//! All unsafe FFI is confined to this module. Names are the well-known
//! channel names with the leading slash POSIX requires.

use std::ffi::CString;
use std::time::Duration;

use crate::error::ShareError;

fn posix_name(name: &str) -> Result<CString, ShareError> {
    CString::new(format!("/{name}"))
        .map_err(|_| ShareError::Other(format!("invalid object name {name:?}")))
}

fn errno_string(context: &str) -> String {
    let err = std::io::Error::last_os_error();
    format!("{context}: {err}")
}

// ── SharedRegion ─────────────────────────────────────────────────

/// A named shared-memory mapping.
///
/// The creating side owns the name and unlinks it on drop, so a
/// re-initialize or clean shutdown leaves no stale OS object behind.
#[derive(Debug)]
pub struct SharedRegion {
    base: *mut u8,
    len: usize,
    name: CString,
    owner: bool,
}

// SAFETY: the mapping stays valid until drop and the producer side is the
// only writer; the raw pointer is just an address, not thread-affine.
unsafe impl Send for SharedRegion {}

impl SharedRegion {
    /// Create (or replace) the named segment at `len` bytes, zeroed.
    pub fn create(name: &str, len: usize) -> Result<Self, ShareError> {
        let cname = posix_name(name)?;
        unsafe {
            // Drop any stale segment from a crashed producer.
            libc::shm_unlink(cname.as_ptr());

            let fd = libc::shm_open(
                cname.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600,
            );
            if fd < 0 {
                return Err(ShareError::Mapping(errno_string("shm_open")));
            }
            if libc::ftruncate(fd, len as libc::off_t) != 0 {
                let msg = errno_string("ftruncate");
                libc::close(fd);
                libc::shm_unlink(cname.as_ptr());
                return Err(ShareError::Mapping(msg));
            }
            let base = libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            );
            libc::close(fd);
            if base == libc::MAP_FAILED {
                let msg = errno_string("mmap");
                libc::shm_unlink(cname.as_ptr());
                return Err(ShareError::Mapping(msg));
            }
            Ok(Self {
                base: base as *mut u8,
                len,
                name: cname,
                owner: true,
            })
        }
    }

    /// Open an existing named segment, sized from the segment itself.
    pub fn open(name: &str) -> Result<Self, ShareError> {
        let cname = posix_name(name)?;
        unsafe {
            let fd = libc::shm_open(cname.as_ptr(), libc::O_RDWR, 0);
            if fd < 0 {
                return Err(ShareError::ChannelNotFound(name.to_string()));
            }
            let mut st: libc::stat = std::mem::zeroed();
            if libc::fstat(fd, &mut st) != 0 {
                let msg = errno_string("fstat");
                libc::close(fd);
                return Err(ShareError::Mapping(msg));
            }
            let len = st.st_size as usize;
            let base = libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            );
            libc::close(fd);
            if base == libc::MAP_FAILED {
                return Err(ShareError::Mapping(errno_string("mmap")));
            }
            Ok(Self {
                base: base as *mut u8,
                len,
                name: cname,
                owner: false,
            })
        }
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.base
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.len);
            if self.owner {
                libc::shm_unlink(self.name.as_ptr());
            }
        }
    }
}

// ── FrameSignal ──────────────────────────────────────────────────

/// Named cross-process signal (POSIX semaphore).
///
/// Semantics match a Windows auto-reset event closely enough for this
/// protocol: `raise` wakes one waiter; a raise with no waiter leaves the
/// signal pending. The reader treats the signal purely as a wake-up and
/// re-reads the header for truth.
#[derive(Debug)]
pub struct FrameSignal {
    sem: *mut libc::sem_t,
    name: CString,
    owner: bool,
}

// SAFETY: sem_t operations are documented async-signal/thread safe; the
// pointer is process-global state, not thread-affine.
unsafe impl Send for FrameSignal {}

impl FrameSignal {
    pub fn create(name: &str) -> Result<Self, ShareError> {
        let cname = posix_name(name)?;
        unsafe {
            libc::sem_unlink(cname.as_ptr());
            let sem = libc::sem_open(cname.as_ptr(), libc::O_CREAT | libc::O_EXCL, 0o600, 0);
            if sem == libc::SEM_FAILED {
                return Err(ShareError::Signal(errno_string("sem_open")));
            }
            Ok(Self {
                sem,
                name: cname,
                owner: true,
            })
        }
    }

    pub fn open(name: &str) -> Result<Self, ShareError> {
        let cname = posix_name(name)?;
        unsafe {
            let sem = libc::sem_open(cname.as_ptr(), 0);
            if sem == libc::SEM_FAILED {
                return Err(ShareError::ChannelNotFound(name.to_string()));
            }
            Ok(Self {
                sem,
                name: cname,
                owner: false,
            })
        }
    }

    /// Raise the signal (never blocks).
    pub fn raise(&self) {
        unsafe {
            libc::sem_post(self.sem);
        }
    }

    /// Wait for the signal. Returns `Ok(false)` on timeout.
    pub fn wait(&self, timeout: Duration) -> Result<bool, ShareError> {
        unsafe {
            let mut now: libc::timespec = std::mem::zeroed();
            if libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) != 0 {
                return Err(ShareError::Signal(errno_string("clock_gettime")));
            }
            let nanos = now.tv_nsec as i64 + timeout.subsec_nanos() as i64;
            let deadline = libc::timespec {
                tv_sec: now.tv_sec + timeout.as_secs() as libc::time_t
                    + (nanos / 1_000_000_000) as libc::time_t,
                tv_nsec: nanos % 1_000_000_000,
            };
            loop {
                if libc::sem_timedwait(self.sem, &deadline) == 0 {
                    return Ok(true);
                }
                match std::io::Error::last_os_error().raw_os_error() {
                    Some(libc::ETIMEDOUT) => return Ok(false),
                    Some(libc::EINTR) => continue,
                    _ => return Err(ShareError::Signal(errno_string("sem_timedwait"))),
                }
            }
        }
    }
}

impl Drop for FrameSignal {
    fn drop(&mut self) {
        unsafe {
            libc::sem_close(self.sem);
            if self.owner {
                libc::sem_unlink(self.name.as_ptr());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique(tag: &str) -> String {
        use std::sync::atomic::{AtomicU32, Ordering};
        static N: AtomicU32 = AtomicU32::new(0);
        format!(
            "fl-test-{tag}-{}-{}",
            std::process::id(),
            N.fetch_add(1, Ordering::Relaxed)
        )
    }

    #[test]
    fn region_create_open_share_bytes() {
        let name = unique("region");
        let writer = SharedRegion::create(&name, 4096).unwrap();
        unsafe { *writer.as_ptr() = 0xAB };

        let reader = SharedRegion::open(&name).unwrap();
        assert_eq!(reader.len(), 4096);
        assert_eq!(unsafe { *reader.as_ptr() }, 0xAB);
    }

    #[test]
    fn region_unlinked_after_owner_drop() {
        let name = unique("unlink");
        drop(SharedRegion::create(&name, 4096).unwrap());
        assert!(matches!(
            SharedRegion::open(&name),
            Err(ShareError::ChannelNotFound(_))
        ));
    }

    #[test]
    fn signal_raise_then_wait() {
        let name = unique("sig");
        let sig = FrameSignal::create(&name).unwrap();
        sig.raise();
        assert!(sig.wait(Duration::from_millis(100)).unwrap());
        // Consumed — next wait times out.
        assert!(!sig.wait(Duration::from_millis(50)).unwrap());
    }

    #[test]
    fn signal_open_existing() {
        let name = unique("sig-open");
        let writer = FrameSignal::create(&name).unwrap();
        let reader = FrameSignal::open(&name).unwrap();
        writer.raise();
        assert!(reader.wait(Duration::from_millis(100)).unwrap());
    }
}
