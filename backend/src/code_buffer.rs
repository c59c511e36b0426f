use std::io;
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};

/// Default code cache size: 16 MiB.
const DEFAULT_CODE_BUF_SIZE: usize = 16 * 1024 * 1024;

/// Code cache region backed by mmap'd memory.
///
/// Emission goes through `&mut self`. Patching an exit branch of code that
/// may be executing goes through `&self` with a single aligned 32-bit
/// store, so a concurrent instruction fetch sees the old or the new word.
pub struct CodeBuffer {
    ptr: *mut u8,
    size: usize,
    offset: usize,
}

// SAFETY: CodeBuffer owns its mmap'd memory exclusively; the only shared
// mutation is `patch_u32_atomic`, which writes through an `AtomicU32`.
unsafe impl Send for CodeBuffer {}
unsafe impl Sync for CodeBuffer {}

impl CodeBuffer {
    /// Allocate a new code buffer of the given size (rounded up to page size).
    pub fn new(size: usize) -> io::Result<Self> {
        let page_size = page_size();
        let size = (size + page_size - 1) & !(page_size - 1);

        // SAFETY: mmap with MAP_ANONYMOUS | MAP_PRIVATE, no file backing.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            ptr: ptr as *mut u8,
            size,
            offset: 0,
        })
    }

    /// Allocate with the default size (16 MiB).
    pub fn with_default_size() -> io::Result<Self> {
        Self::new(DEFAULT_CODE_BUF_SIZE)
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.size - self.offset
    }

    #[inline]
    pub fn base_ptr(&self) -> *const u8 {
        self.ptr as *const u8
    }

    /// Cache address of `offset`, as seen by 32-bit code.
    #[inline]
    pub fn addr_at(&self, offset: usize) -> u32 {
        assert!(offset <= self.size);
        (self.ptr as usize).wrapping_add(offset) as u32
    }

    /// Set the write offset (e.g. to drop a partially emitted fragment).
    #[inline]
    pub fn set_offset(&mut self, offset: usize) {
        assert!(offset <= self.size);
        self.offset = offset;
    }

    /// Pad with zero bytes up to a multiple of `align`.
    pub fn align_to(&mut self, align: usize) {
        assert!(align.is_power_of_two());
        while self.offset & (align - 1) != 0 {
            self.emit_u8(0);
        }
    }

    // -- Emit methods --

    #[inline]
    pub fn emit_u8(&mut self, val: u8) {
        assert!(self.offset < self.size, "code buffer overflow");
        unsafe { self.ptr.add(self.offset).write(val) };
        self.offset += 1;
    }

    /// Emit one little-endian A32 instruction word.
    #[inline]
    pub fn emit_u32(&mut self, val: u32) {
        assert!(self.offset + 4 <= self.size, "code buffer overflow");
        unsafe { (self.ptr.add(self.offset) as *mut u32).write_unaligned(val) };
        self.offset += 4;
    }

    #[inline]
    pub fn emit_bytes(&mut self, data: &[u8]) {
        assert!(
            self.offset + data.len() <= self.size,
            "code buffer overflow"
        );
        unsafe {
            ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.ptr.add(self.offset),
                data.len(),
            );
        }
        self.offset += data.len();
    }

    /// Read the word at `offset`.
    #[inline]
    pub fn read_u32(&self, offset: usize) -> u32 {
        assert!(offset + 4 <= self.size);
        if offset % 4 == 0 {
            self.atomic_at(offset).load(Ordering::Acquire)
        } else {
            unsafe { (self.ptr.add(offset) as *const u32).read_unaligned() }
        }
    }

    /// Replace the aligned word at `offset` with one store.
    pub fn patch_u32_atomic(&self, offset: usize, val: u32) {
        assert!(offset + 4 <= self.size);
        assert!(offset % 4 == 0, "unaligned patch at {offset:#x}");
        self.atomic_at(offset).store(val, Ordering::Release);
    }

    fn atomic_at(&self, offset: usize) -> &AtomicU32 {
        // SAFETY: offset is in bounds and 4-aligned relative to a
        // page-aligned base, and the mapping lives as long as `self`.
        unsafe { &*(self.ptr.add(offset) as *const AtomicU32) }
    }

    // -- Permission management (W^X) --

    /// Make the buffer executable and non-writable.
    pub fn set_executable(&self) -> io::Result<()> {
        self.protect(libc::PROT_READ | libc::PROT_EXEC)
    }

    /// Make the buffer writable and non-executable.
    pub fn set_writable(&self) -> io::Result<()> {
        self.protect(libc::PROT_READ | libc::PROT_WRITE)
    }

    fn protect(&self, prot: libc::c_int) -> io::Result<()> {
        let ret = unsafe {
            libc::mprotect(self.ptr as *mut libc::c_void, self.size, prot)
        };
        if ret != 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    /// Emitted bytes (up to the current offset).
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr..ptr+offset has been written.
        unsafe { std::slice::from_raw_parts(self.ptr, self.offset) }
    }
}

impl Drop for CodeBuffer {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                libc::munmap(self.ptr as *mut libc::c_void, self.size);
            }
        }
    }
}

fn page_size() -> usize {
    // SAFETY: sysconf is always safe to call.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}
