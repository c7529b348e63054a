/*
 * This file is part of occ-sensors.
 *
 * Copyright (C) 2025 occ-sensors contributors
 *
 * occ-sensors is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * occ-sensors is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with occ-sensors. If not, see <https://www.gnu.org/licenses/>.
 */

//! Physical memory mapping
//!
//! Sensor registers live in the OCC's HOMER region in main memory. A
//! `PhysMapper` turns a physical address into a `MappedRegion` the process can
//! read. Regions are reference counted: every sensor holds the region it reads
//! from, so an accessible address can never outlive its mapping.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::endian;
use crate::error::{Result, SensorError};

pub trait PhysMapper {
    /// Map `len` bytes starting at `physical_address` for reading
    fn map(&self, physical_address: u64, len: usize) -> Result<Arc<MappedRegion>>;
}

/// A readable window onto physical memory
pub struct MappedRegion {
    physical_address: u64,
    ptr: NonNull<u8>,
    len: usize,
    _backing: Backing,
}

enum Backing {
    Mmap(MmapGuard),
    Image(Arc<[u8]>),
}

struct MmapGuard {
    addr: NonNull<libc::c_void>,
    len: usize,
}

impl Drop for MmapGuard {
    fn drop(&mut self) {
        // SAFETY: `addr`/`len` describe a mapping created by `DevMem::map`
        // and owned solely by this guard.
        unsafe {
            libc::munmap(self.addr.as_ptr(), self.len);
        }
    }
}

// SAFETY: the region is never written through, and reads are volatile loads
// from memory that stays mapped for as long as the region exists.
unsafe impl Send for MappedRegion {}
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    pub fn physical_address(&self) -> u64 {
        self.physical_address
    }

    /// Process-visible address of the first byte
    pub fn accessible_address(&self) -> u64 {
        self.ptr.as_ptr() as u64
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Decode a big-endian counter at `offset`. Unsupported widths and reads
    /// past the end of the region yield 0.
    pub fn read_be(&self, offset: usize, width_bits: u32) -> u64 {
        let width = endian::width_bytes(width_bits);
        let in_bounds = offset
            .checked_add(width)
            .map(|end| end <= self.len)
            .unwrap_or(false);
        if width == 0 || !in_bounds {
            return 0;
        }
        // SAFETY: `offset + width <= len` and the backing memory is alive.
        unsafe { endian::read_be_at(self.ptr.as_ptr().add(offset), width_bits) }
    }
}

impl fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let backing = match self._backing {
            Backing::Mmap(_) => "mmap",
            Backing::Image(_) => "image",
        };
        f.debug_struct("MappedRegion")
            .field("physical_address", &format_args!("{:#x}", self.physical_address))
            .field("accessible_address", &format_args!("{:#x}", self.accessible_address()))
            .field("len", &self.len)
            .field("backing", &backing)
            .finish()
    }
}

/// Maps physical memory through a memory device such as `/dev/mem`
#[derive(Debug)]
pub struct DevMem {
    file: File,
    path: PathBuf,
    page_size: usize,
}

impl DevMem {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_SYNC)
            .open(path)
            .map_err(|e| SensorError::file_read(path, e))?;
        // SAFETY: sysconf has no preconditions.
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        let page_size = usize::try_from(page_size).ok().filter(|p| *p > 0).unwrap_or(4096);
        debug!(path = %path.display(), page_size, "Opened memory device");
        Ok(Self {
            file,
            path: path.to_path_buf(),
            page_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PhysMapper for DevMem {
    fn map(&self, physical_address: u64, len: usize) -> Result<Arc<MappedRegion>> {
        if len == 0 {
            return Err(SensorError::mapping(physical_address, len, "empty mapping"));
        }
        let page_mask = self.page_size as u64 - 1;
        let aligned = physical_address & !page_mask;
        let delta = (physical_address - aligned) as usize;
        let map_len = delta
            .checked_add(len)
            .ok_or_else(|| SensorError::mapping(physical_address, len, "length overflow"))?;
        let offset = libc::off_t::try_from(aligned)
            .map_err(|_| SensorError::mapping(physical_address, len, "address beyond off_t"))?;

        // SAFETY: a fresh read-only shared mapping; the kernel validates the
        // descriptor, offset and length.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                map_len,
                libc::PROT_READ,
                libc::MAP_SHARED,
                self.file.as_raw_fd(),
                offset,
            )
        };
        if addr == libc::MAP_FAILED {
            let err = io::Error::last_os_error();
            return Err(SensorError::mapping(physical_address, len, err.to_string()));
        }
        let base = NonNull::new(addr)
            .ok_or_else(|| SensorError::mapping(physical_address, len, "null mapping"))?;
        let guard = MmapGuard { addr: base, len: map_len };

        // SAFETY: `delta < map_len`, so the pointer stays inside the mapping.
        let ptr = unsafe { NonNull::new_unchecked((addr as *mut u8).add(delta)) };
        trace!(phys = format_args!("{:#x}", physical_address), len, "Mapped physical memory");
        Ok(Arc::new(MappedRegion {
            physical_address,
            ptr,
            len,
            _backing: Backing::Mmap(guard),
        }))
    }
}

/// An in-memory copy of a physical address range
///
/// Serves mappings out of a captured image of the sensor region so discovery
/// can run against a dump instead of live hardware.
#[derive(Debug)]
pub struct MemoryImage {
    base: u64,
    bytes: Arc<[u8]>,
}

impl MemoryImage {
    pub fn new(base: u64, bytes: Vec<u8>) -> Self {
        Self {
            base,
            bytes: bytes.into(),
        }
    }

    /// Load an image file whose first byte sits at physical address `base`
    pub fn load(path: &Path, base: u64) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| SensorError::file_read(path, e))?;
        debug!(path = %path.display(), base = format_args!("{:#x}", base), len = bytes.len(), "Loaded memory image");
        Ok(Self::new(base, bytes))
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Regions currently handed out and not yet dropped
    pub fn live_mappings(&self) -> usize {
        Arc::strong_count(&self.bytes) - 1
    }
}

impl PhysMapper for MemoryImage {
    fn map(&self, physical_address: u64, len: usize) -> Result<Arc<MappedRegion>> {
        if len == 0 {
            return Err(SensorError::mapping(physical_address, len, "empty mapping"));
        }
        let offset = physical_address
            .checked_sub(self.base)
            .and_then(|o| usize::try_from(o).ok())
            .filter(|o| o.checked_add(len).map(|end| end <= self.bytes.len()).unwrap_or(false))
            .ok_or_else(|| SensorError::mapping(physical_address, len, "outside memory image"))?;

        // SAFETY: `offset + len <= bytes.len()`; the slice is kept alive by
        // the Arc stored next to the pointer.
        let ptr = unsafe { NonNull::new_unchecked(self.bytes.as_ptr().add(offset) as *mut u8) };
        Ok(Arc::new(MappedRegion {
            physical_address,
            ptr,
            len,
            _backing: Backing::Image(Arc::clone(&self.bytes)),
        }))
    }
}
