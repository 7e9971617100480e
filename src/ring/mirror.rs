//! Ring backing storage.
//!
//! The real backing is [`MirrorRegion`]: a page-rounded byte region with a
//! second virtual window mapped immediately after it that aliases the same
//! physical pages. Any slot of up to `capacity` bytes is then contiguous in
//! the address space even when it straddles the physical ring boundary, so
//! reads and writes never need split-copy logic.
//!
//! [`SplitRegion`] is the plain-heap fallback used by the algorithm tests:
//! it performs the seam split manually and needs neither page-aligned sizes
//! nor privileged mappings.

use std::cell::UnsafeCell;

use crate::error::JitterError;

/// Byte storage behind the ring.
///
/// Offsets are interpreted modulo `capacity`; an access of `len <= capacity`
/// bytes starting anywhere in `[0, capacity)` is valid and wraps.
///
/// # Safety
///
/// Implementations mutate through `&self`. Callers must uphold the
/// single-producer/single-consumer discipline: at any moment the byte ranges
/// touched by the writing side and the reading side are disjoint. The jitter
/// buffer engine guarantees this via its occupancy counter.
pub unsafe trait RingStorage: Send + Sync {
    /// Usable ring capacity in bytes.
    fn capacity(&self) -> usize;

    /// Copy `src` into the ring starting at `offset`, wrapping as needed.
    fn write(&self, offset: usize, src: &[u8]);

    /// Copy `dst.len()` bytes out of the ring starting at `offset`.
    fn read(&self, offset: usize, dst: &mut [u8]);

    /// A contiguous in-place view of `[offset, offset + len)`, if the
    /// backing can provide one. Mirrored storage always can; the split
    /// fallback only for ranges that do not cross the seam.
    fn contiguous_mut(&self, offset: usize, len: usize) -> Option<*mut u8>;
}

/// Page-rounded region with a mirrored second mapping.
pub struct MirrorRegion {
    base: *mut u8,
    len: usize,
}

unsafe impl Send for MirrorRegion {}
unsafe impl Sync for MirrorRegion {}

#[cfg(unix)]
fn page_size() -> usize {
    // Safety: sysconf has no preconditions.
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page <= 0 {
        4096
    } else {
        page as usize
    }
}

#[cfg(target_os = "linux")]
impl MirrorRegion {
    /// Map `min_len` bytes (rounded up to page size) twice, back to back.
    ///
    /// A memfd provides the physical backing; a `PROT_NONE` reservation of
    /// twice the size pins the address range, and two `MAP_FIXED` shared
    /// mappings of the same file bytes fill it. Failure at any step tears
    /// down whatever was established and reports the OS error.
    pub fn allocate(min_len: usize) -> Result<Self, JitterError> {
        let page = page_size();
        let len = min_len.div_ceil(page).max(1) * page;

        unsafe {
            let fd = libc::memfd_create(
                c"jitterbuf-ring".as_ptr(),
                libc::MFD_CLOEXEC,
            );
            if fd < 0 {
                return Err(std::io::Error::last_os_error().into());
            }
            if libc::ftruncate(fd, len as libc::off_t) != 0 {
                let err = std::io::Error::last_os_error();
                libc::close(fd);
                return Err(err.into());
            }

            let base = libc::mmap(
                std::ptr::null_mut(),
                2 * len,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            );
            if base == libc::MAP_FAILED {
                let err = std::io::Error::last_os_error();
                libc::close(fd);
                return Err(err.into());
            }

            for half in 0..2 {
                let addr = (base as *mut u8).add(half * len);
                let mapped = libc::mmap(
                    addr.cast(),
                    len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED | libc::MAP_FIXED,
                    fd,
                    0,
                );
                if mapped == libc::MAP_FAILED {
                    let err = std::io::Error::last_os_error();
                    libc::munmap(base, 2 * len);
                    libc::close(fd);
                    return Err(err.into());
                }
            }

            // The mappings keep the backing alive on their own.
            libc::close(fd);

            Ok(Self {
                base: base as *mut u8,
                len,
            })
        }
    }
}

#[cfg(target_os = "macos")]
mod mach {
    pub type KernReturn = i32;
    pub type MachPort = u32;
    pub type VmAddress = u64;
    pub type VmSize = u64;
    pub type VmProt = i32;

    pub const KERN_SUCCESS: KernReturn = 0;
    pub const VM_FLAGS_ANYWHERE: i32 = 0x0001;
    pub const VM_FLAGS_FIXED: i32 = 0x0000;
    pub const VM_FLAGS_OVERWRITE: i32 = 0x4000;
    pub const VM_INHERIT_NONE: u32 = 2;

    extern "C" {
        pub static mach_task_self_: MachPort;
        pub fn mach_vm_allocate(
            task: MachPort,
            address: *mut VmAddress,
            size: VmSize,
            flags: i32,
        ) -> KernReturn;
        pub fn mach_vm_deallocate(task: MachPort, address: VmAddress, size: VmSize) -> KernReturn;
        #[allow(clippy::too_many_arguments)]
        pub fn mach_vm_remap(
            target_task: MachPort,
            target_address: *mut VmAddress,
            size: VmSize,
            mask: VmAddress,
            flags: i32,
            src_task: MachPort,
            src_address: VmAddress,
            copy: i32,
            cur_protection: *mut VmProt,
            max_protection: *mut VmProt,
            inheritance: u32,
        ) -> KernReturn;
    }

    pub fn kern_error(op: &str, code: KernReturn) -> std::io::Error {
        std::io::Error::other(format!("{op} failed with kern_return_t {code}"))
    }
}

#[cfg(target_os = "macos")]
impl MirrorRegion {
    /// Map `min_len` bytes (rounded up to page size) twice, back to back,
    /// via the Mach VM interface: allocate a double-size range, then remap
    /// the lower half's pages over the upper half.
    pub fn allocate(min_len: usize) -> Result<Self, JitterError> {
        use mach::*;

        let page = page_size();
        let len = min_len.div_ceil(page).max(1) * page;

        unsafe {
            let task = mach_task_self_;
            let mut base: VmAddress = 0;
            let kr = mach_vm_allocate(task, &mut base, (2 * len) as VmSize, VM_FLAGS_ANYWHERE);
            if kr != KERN_SUCCESS {
                return Err(kern_error("mach_vm_allocate", kr).into());
            }

            let mut mirror: VmAddress = base + len as VmAddress;
            let mut cur: VmProt = 0;
            let mut max: VmProt = 0;
            let kr = mach_vm_remap(
                task,
                &mut mirror,
                len as VmSize,
                0,
                VM_FLAGS_FIXED | VM_FLAGS_OVERWRITE,
                task,
                base,
                0,
                &mut cur,
                &mut max,
                VM_INHERIT_NONE,
            );
            if kr != KERN_SUCCESS {
                mach_vm_deallocate(task, base, (2 * len) as VmSize);
                return Err(kern_error("mach_vm_remap", kr).into());
            }

            Ok(Self {
                base: base as *mut u8,
                len,
            })
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
impl MirrorRegion {
    pub fn allocate(_min_len: usize) -> Result<Self, JitterError> {
        Err(JitterError::UnsupportedPlatform)
    }
}

impl Drop for MirrorRegion {
    fn drop(&mut self) {
        // Best-effort teardown of both windows.
        #[cfg(target_os = "linux")]
        unsafe {
            libc::munmap(self.base.cast(), 2 * self.len);
        }
        #[cfg(target_os = "macos")]
        unsafe {
            mach::mach_vm_deallocate(
                mach::mach_task_self_,
                self.base as mach::VmAddress,
                (2 * self.len) as mach::VmSize,
            );
        }
    }
}

unsafe impl RingStorage for MirrorRegion {
    fn capacity(&self) -> usize {
        self.len
    }

    fn write(&self, offset: usize, src: &[u8]) {
        debug_assert!(offset < self.len && src.len() <= self.len);
        // Safety: offset + src.len() <= 2 * len, inside the double mapping;
        // disjointness from concurrent reads is the trait contract.
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.base.add(offset), src.len());
        }
    }

    fn read(&self, offset: usize, dst: &mut [u8]) {
        debug_assert!(offset < self.len && dst.len() <= self.len);
        unsafe {
            std::ptr::copy_nonoverlapping(self.base.add(offset), dst.as_mut_ptr(), dst.len());
        }
    }

    fn contiguous_mut(&self, offset: usize, len: usize) -> Option<*mut u8> {
        debug_assert!(offset < self.len && len <= self.len);
        // The second window makes every in-capacity range contiguous.
        Some(unsafe { self.base.add(offset) })
    }
}

/// Heap-backed fallback storage that splits accesses at the seam.
pub struct SplitRegion {
    data: UnsafeCell<Box<[u8]>>,
}

unsafe impl Send for SplitRegion {}
unsafe impl Sync for SplitRegion {}

impl SplitRegion {
    /// Exact-size backing, no page rounding.
    pub fn new(len: usize) -> Self {
        assert!(len > 0, "ring capacity must be non-zero");
        Self {
            data: UnsafeCell::new(vec![0u8; len].into_boxed_slice()),
        }
    }

    fn ptr(&self) -> *mut u8 {
        // Safety: only raw-pointer arithmetic; aliasing is governed by the
        // RingStorage contract.
        unsafe { (*self.data.get()).as_mut_ptr() }
    }

    fn len(&self) -> usize {
        unsafe { (&*self.data.get()).len() }
    }
}

unsafe impl RingStorage for SplitRegion {
    fn capacity(&self) -> usize {
        self.len()
    }

    fn write(&self, offset: usize, src: &[u8]) {
        let cap = self.len();
        debug_assert!(offset < cap && src.len() <= cap);
        let first = src.len().min(cap - offset);
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.ptr().add(offset), first);
            if first < src.len() {
                std::ptr::copy_nonoverlapping(
                    src.as_ptr().add(first),
                    self.ptr(),
                    src.len() - first,
                );
            }
        }
    }

    fn read(&self, offset: usize, dst: &mut [u8]) {
        let cap = self.len();
        debug_assert!(offset < cap && dst.len() <= cap);
        let first = dst.len().min(cap - offset);
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr().add(offset), dst.as_mut_ptr(), first);
            if first < dst.len() {
                std::ptr::copy_nonoverlapping(
                    self.ptr(),
                    dst.as_mut_ptr().add(first),
                    dst.len() - first,
                );
            }
        }
    }

    fn contiguous_mut(&self, offset: usize, len: usize) -> Option<*mut u8> {
        if offset + len <= self.len() {
            Some(unsafe { self.ptr().add(offset) })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_region_roundtrip() {
        let region = SplitRegion::new(64);
        region.write(10, &[1, 2, 3, 4]);
        let mut out = [0u8; 4];
        region.read(10, &mut out);
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn test_split_region_wraps_at_seam() {
        let region = SplitRegion::new(16);
        region.write(14, &[0xAA, 0xBB, 0xCC, 0xDD]);

        let mut out = [0u8; 4];
        region.read(14, &mut out);
        assert_eq!(out, [0xAA, 0xBB, 0xCC, 0xDD]);

        // The tail landed at the physical start.
        let mut head = [0u8; 2];
        region.read(0, &mut head);
        assert_eq!(head, [0xCC, 0xDD]);
    }

    #[test]
    fn test_split_region_contiguous_only_within_seam() {
        let region = SplitRegion::new(16);
        assert!(region.contiguous_mut(0, 16).is_some());
        assert!(region.contiguous_mut(12, 4).is_some());
        assert!(region.contiguous_mut(12, 5).is_none());
    }

    #[cfg(any(target_os = "linux", target_os = "macos"))]
    mod mirrored {
        use super::*;

        #[test]
        fn test_capacity_is_page_rounded() {
            let region = MirrorRegion::allocate(1).expect("mirror allocation");
            assert!(region.capacity() >= 1);
            assert_eq!(region.capacity() % super::super::page_size(), 0);
        }

        #[test]
        fn test_rounds_up_not_down() {
            let page = super::super::page_size();
            let region = MirrorRegion::allocate(page + 1).expect("mirror allocation");
            assert_eq!(region.capacity(), 2 * page);
        }

        #[test]
        fn test_seam_is_aliased() {
            let region = MirrorRegion::allocate(1).expect("mirror allocation");
            let cap = region.capacity();

            // A write straddling the seam comes back whole...
            region.write(cap - 2, &[0x11, 0x22, 0x33, 0x44]);
            let mut out = [0u8; 4];
            region.read(cap - 2, &mut out);
            assert_eq!(out, [0x11, 0x22, 0x33, 0x44]);

            // ...and its tail is physically at the start of the region.
            let mut head = [0u8; 2];
            region.read(0, &mut head);
            assert_eq!(head, [0x33, 0x44]);
        }

        #[test]
        fn test_contiguous_everywhere() {
            let region = MirrorRegion::allocate(1).expect("mirror allocation");
            let cap = region.capacity();
            let ptr = region.contiguous_mut(cap - 1, cap).expect("mirrored range");
            unsafe {
                ptr.write(0x5A);
            }
            let mut out = [0u8; 1];
            region.read(cap - 1, &mut out);
            assert_eq!(out[0], 0x5A);
        }
    }
}
