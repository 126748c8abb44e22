//! Mirror-mapped ring buffer.
//!
//! The buffer owns an anonymous shared-memory object of `N` bytes and maps it
//! `MIRROR_COUNT` times into one contiguous virtual range. Every window backs
//! the same pages, so `buf[i] == buf[i mod N]` for any in-range index and a
//! byte sequence that wraps around the end of the ring is still addressable
//! as one contiguous slice. The request parser relies on this to hand out
//! token views straight into the receive buffer without copying.

use std::io;
use std::ops::{Index, IndexMut};
use std::os::unix::io::RawFd;
use std::ptr;

/// How many consecutive windows map the same pages. Two would suffice for the
/// parser (no token may exceed `N`); the third is slack for the read-ahead
/// chunk landing past the second window.
pub const MIRROR_COUNT: usize = 3;

pub fn page_size() -> usize {
    // SAFETY: sysconf with a valid name has no preconditions.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// A fixed-size circular byte region with a flat, never-wrapping view.
///
/// Uncopyable; the mapping and the backing descriptor are released together
/// on drop.
pub struct RingBuffer {
    base: *mut u8,
    length: usize,
    memory_fd: RawFd,
}

impl RingBuffer {
    /// Creates a ring of at least `wanted_length` bytes, rounded up to a
    /// multiple of the page size.
    pub fn create(wanted_length: usize) -> io::Result<RingBuffer> {
        let page = page_size();
        let page_count = wanted_length.div_ceil(page).max(1);

        // Partially initialised so Drop cleans up whatever was acquired if a
        // later step fails.
        let mut ret = RingBuffer {
            base: ptr::null_mut(),
            length: page_count * page,
            memory_fd: -1,
        };

        ret.memory_fd = anonymous_shared_memory()?;

        // SAFETY: the descriptor refers to a fresh shared-memory object that
        // nothing else holds.
        if unsafe { libc::ftruncate(ret.memory_fd, ret.length as libc::off_t) } != 0 {
            return Err(io::Error::last_os_error());
        }

        // Reserve the whole virtual range first, then pin each window onto
        // the shared pages with MAP_FIXED inside that reservation.
        // SAFETY: a NULL-hinted anonymous mapping of our own sizing.
        let reservation = unsafe {
            libc::mmap(
                ptr::null_mut(),
                MIRROR_COUNT * ret.length,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if reservation == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        ret.base = reservation as *mut u8;

        for i in 0..MIRROR_COUNT {
            // SAFETY: each window lies inside the reservation made above and
            // maps a descriptor we own.
            let window = unsafe {
                libc::mmap(
                    ret.base.add(i * ret.length) as *mut libc::c_void,
                    ret.length,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_FIXED | libc::MAP_SHARED,
                    ret.memory_fd,
                    0,
                )
            };
            if window == libc::MAP_FAILED {
                return Err(io::Error::last_os_error());
            }
        }

        Ok(ret)
    }

    /// Length of one window, i.e. the ring capacity `N`.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Whether `index` falls inside the mapped `[0, MIRROR_COUNT * N)` range.
    pub fn is_in_range(&self, index: usize) -> bool {
        index < MIRROR_COUNT * self.length
    }

    /// Reduces an index to its first-window equivalent.
    pub fn normalized_index(&self, index: usize) -> usize {
        index % self.length
    }

    /// Contiguous read view at `offset`; the slice may cross the wrap
    /// boundary of the underlying ring.
    pub fn slice(&self, offset: usize, len: usize) -> &[u8] {
        assert!(len == 0 || self.is_in_range(offset + len - 1));
        // SAFETY: the whole mapped range is readable once `create` returns,
        // and the assert keeps the slice inside it.
        unsafe { std::slice::from_raw_parts(self.base.add(offset), len) }
    }

    /// Contiguous write view at `offset`.
    pub fn slice_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        assert!(len == 0 || self.is_in_range(offset + len - 1));
        // SAFETY: as in `slice`, plus `&mut self` rules out aliased views.
        unsafe { std::slice::from_raw_parts_mut(self.base.add(offset), len) }
    }
}

impl Index<usize> for RingBuffer {
    type Output = u8;

    fn index(&self, index: usize) -> &u8 {
        assert!(self.is_in_range(index));
        // SAFETY: in-range per the assert.
        unsafe { &*self.base.add(index) }
    }
}

impl IndexMut<usize> for RingBuffer {
    fn index_mut(&mut self, index: usize) -> &mut u8 {
        assert!(self.is_in_range(index));
        // SAFETY: in-range per the assert; `&mut self` rules out aliases.
        unsafe { &mut *self.base.add(index) }
    }
}

impl Drop for RingBuffer {
    fn drop(&mut self) {
        // SAFETY: `base` is either null or the start of our reservation of
        // exactly MIRROR_COUNT * length bytes; the fd is ours to close.
        unsafe {
            if !self.base.is_null() {
                libc::munmap(self.base as *mut libc::c_void, MIRROR_COUNT * self.length);
            }
            if self.memory_fd != -1 {
                libc::close(self.memory_fd);
            }
        }
    }
}

/// An unnamed shared-memory object visible only through its descriptor.
#[cfg(target_os = "linux")]
fn anonymous_shared_memory() -> io::Result<RawFd> {
    // SAFETY: the name is NUL-terminated and only used for /proc listings.
    let fd = unsafe {
        libc::memfd_create(
            b"palisade-ring\0".as_ptr() as *const libc::c_char,
            libc::MFD_CLOEXEC,
        )
    };
    if fd == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

/// Fallback for Unixes without memfd: shm_open a process-unique name and
/// unlink it immediately so only the descriptor keeps the object alive.
#[cfg(all(unix, not(target_os = "linux")))]
fn anonymous_shared_memory() -> io::Result<RawFd> {
    use std::sync::atomic::{AtomicUsize, Ordering};

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    for _ in 0..4 {
        let serial = COUNTER.fetch_add(1, Ordering::Relaxed);
        let name = format!("/palisade-{}-{}\0", std::process::id(), serial);

        // SAFETY: the name is NUL-terminated.
        let fd = unsafe {
            libc::shm_open(
                name.as_ptr() as *const libc::c_char,
                libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
                0o600 as libc::c_uint,
            )
        };
        if fd == -1 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EEXIST) {
                continue;
            }
            return Err(err);
        }

        // SAFETY: unlinking the name we just created; the fd stays valid.
        unsafe { libc::shm_unlink(name.as_ptr() as *const libc::c_char) };
        return Ok(fd);
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        "could not create an anonymous shared memory object",
    ))
}
