//! Named POSIX shared-memory segments.
//!
//! Each segment holds exactly one `T` and follows a strict ownership rule:
//! the process that [`create`](SharedSegment::create)s a segment is the only
//! one allowed to [`destroy`](SharedSegment::destroy) it. Every other process
//! [`attach`](SharedSegment::attach)es by name and only ever detaches.
//!
//! ```text
//!   supervisor                         worker
//!   ──────────                         ──────
//!   create("/palin-42-lock")  ───────▶ attach("/palin-42-lock")
//!   ...                                ...
//!   destroy()  (after drain)  ◀─────── detach()
//! ```

use crate::error::{PalinError, Result, SegmentOp};
use std::ffi::CString;
use std::fs::File;
use std::io;
use std::os::fd::{FromRawFd, OwnedFd};
use std::os::unix::io::AsRawFd;
use std::ptr::NonNull;

/// Longest segment name accepted, including the leading slash.
const MAX_NAME_LEN: usize = 255;

/// Types that may live inside a shared segment.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]`, contain no pointers or heap-owning
/// fields, accept the all-zero bit pattern as a valid value, and only use
/// interior mutability through atomics (other processes mutate the bytes
/// behind Rust's back).
pub unsafe trait Shareable: Sized {}

/// How a segment is mapped into the caller's address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

impl Access {
    fn open_flags(self) -> libc::c_int {
        match self {
            Self::ReadOnly => libc::O_RDONLY,
            Self::ReadWrite => libc::O_RDWR,
        }
    }

    fn prot(self) -> libc::c_int {
        match self {
            Self::ReadOnly => libc::PROT_READ,
            Self::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
        }
    }
}

/// Derive the segment name for a given owner process and tag.
///
/// Names look like `/palin-<pid>-<tag>` so concurrent supervisors never
/// collide on the same region.
pub fn segment_name(owner_pid: u32, tag: &str) -> Result<String> {
    let name = format!("/palin-{}-{}", owner_pid, tag);
    validate_name(&name)?;
    Ok(name)
}

fn validate_name(name: &str) -> Result<CString> {
    let valid = name.len() > 1
        && name.len() <= MAX_NAME_LEN
        && name.starts_with('/')
        && !name[1..].contains('/');
    if !valid {
        return Err(PalinError::SegmentName(name.to_string()));
    }
    CString::new(name).map_err(|_| PalinError::SegmentName(name.to_string()))
}

/// A mapping of a named shared-memory region holding one `T`.
pub struct SharedSegment<T: Shareable> {
    name: String,
    ptr: Option<NonNull<T>>,
    access: Access,
    owner: bool,
    destroyed: bool,
}

// The mapping is plain memory; all cross-process mutation goes through atomics.
unsafe impl<T: Shareable + Sync> Send for SharedSegment<T> {}
unsafe impl<T: Shareable + Sync> Sync for SharedSegment<T> {}

impl<T: Shareable> SharedSegment<T> {
    /// Allocate a new zero-filled region and map it read-write.
    ///
    /// Fails if a region with the same name already exists.
    pub fn create(name: &str) -> Result<Self> {
        let c_name = validate_name(name)?;
        let file = shm_open(&c_name, libc::O_CREAT | libc::O_EXCL | libc::O_RDWR, 0o600)
            .map_err(|source| resource(SegmentOp::Create, name, source))?;

        let mapped = file
            .set_len(std::mem::size_of::<T>() as u64)
            .and_then(|_| map::<T>(&file, Access::ReadWrite));

        match mapped {
            Ok(ptr) => {
                tracing::debug!(
                    segment = name,
                    bytes = std::mem::size_of::<T>(),
                    "Created shared segment"
                );
                Ok(Self {
                    name: name.to_string(),
                    ptr: Some(ptr),
                    access: Access::ReadWrite,
                    owner: true,
                    destroyed: false,
                })
            }
            Err(source) => {
                // Don't leave a half-built region behind.
                unsafe {
                    libc::shm_unlink(c_name.as_ptr());
                }
                Err(resource(SegmentOp::Create, name, source))
            }
        }
    }

    /// Map an existing region created by another process.
    ///
    /// Fails if the name is unknown (never created or already destroyed) or if
    /// the region's size doesn't match `T`.
    pub fn attach(name: &str, access: Access) -> Result<Self> {
        let c_name = validate_name(name)?;
        let file = shm_open(&c_name, access.open_flags(), 0)
            .map_err(|source| resource(SegmentOp::Attach, name, source))?;

        let len = file
            .metadata()
            .map_err(|source| resource(SegmentOp::Attach, name, source))?
            .len();
        if len != std::mem::size_of::<T>() as u64 {
            return Err(resource(
                SegmentOp::Attach,
                name,
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "segment is {} bytes, expected {}",
                        len,
                        std::mem::size_of::<T>()
                    ),
                ),
            ));
        }

        let ptr =
            map::<T>(&file, access).map_err(|source| resource(SegmentOp::Attach, name, source))?;
        tracing::debug!(segment = name, ?access, "Attached shared segment");
        Ok(Self {
            name: name.to_string(),
            ptr: Some(ptr),
            access,
            owner: false,
            destroyed: false,
        })
    }

    /// The region's name, which doubles as its cross-process handle.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this process created (and therefore must destroy) the region.
    #[cfg(test)]
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    pub fn is_attached(&self) -> bool {
        self.ptr.is_some()
    }

    /// Shared view of the mapped value.
    pub fn get(&self) -> Result<&T> {
        match self.ptr {
            // The mapping stays valid until detach, which needs `&mut self`.
            Some(ptr) => Ok(unsafe { ptr.as_ref() }),
            None => Err(self.not_attached()),
        }
    }

    /// Exclusive view for the owner, used to populate the region before
    /// anyone else attaches.
    pub fn get_mut(&mut self) -> Result<&mut T> {
        if !self.owner || self.access != Access::ReadWrite {
            return Err(resource(
                SegmentOp::Attach,
                &self.name,
                io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "only the creating process may write the segment directly",
                ),
            ));
        }
        match self.ptr {
            Some(mut ptr) => Ok(unsafe { ptr.as_mut() }),
            None => Err(self.not_attached()),
        }
    }

    /// Unmap the region from this process. Calling it again is a no-op.
    pub fn detach(&mut self) -> Result<()> {
        let Some(ptr) = self.ptr.take() else {
            return Ok(());
        };
        let rc = unsafe { libc::munmap(ptr.as_ptr().cast(), std::mem::size_of::<T>()) };
        if rc != 0 {
            return Err(PalinError::last_os(SegmentOp::Detach, &self.name));
        }
        tracing::trace!(segment = %self.name, "Detached shared segment");
        Ok(())
    }

    /// Detach and remove the region from the system.
    ///
    /// Only the creator may destroy; a second call is a no-op.
    pub fn destroy(&mut self) -> Result<()> {
        if !self.owner {
            return Err(resource(
                SegmentOp::Destroy,
                &self.name,
                io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "only the creating process may destroy the segment",
                ),
            ));
        }
        if self.destroyed {
            return Ok(());
        }
        self.detach()?;
        let c_name = validate_name(&self.name)?;
        if unsafe { libc::shm_unlink(c_name.as_ptr()) } != 0 {
            return Err(PalinError::last_os(SegmentOp::Destroy, &self.name));
        }
        self.destroyed = true;
        tracing::debug!(segment = %self.name, "Destroyed shared segment");
        Ok(())
    }

    fn not_attached(&self) -> PalinError {
        resource(
            SegmentOp::Attach,
            &self.name,
            io::Error::new(io::ErrorKind::NotConnected, "segment is detached"),
        )
    }
}

impl<T: Shareable> Drop for SharedSegment<T> {
    fn drop(&mut self) {
        let result = if self.owner {
            self.destroy()
        } else {
            self.detach()
        };
        if let Err(e) = result {
            tracing::warn!(segment = %self.name, error = %e, "Failed to release shared segment");
        }
    }
}

impl<T: Shareable> std::fmt::Debug for SharedSegment<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSegment")
            .field("name", &self.name)
            .field("attached", &self.is_attached())
            .field("access", &self.access)
            .field("owner", &self.owner)
            .field("destroyed", &self.destroyed)
            .finish()
    }
}

fn resource(op: SegmentOp, name: &str, source: io::Error) -> PalinError {
    PalinError::Resource {
        op,
        name: name.to_string(),
        source,
    }
}

fn shm_open(name: &CString, flags: libc::c_int, mode: libc::mode_t) -> io::Result<File> {
    let fd = unsafe { libc::shm_open(name.as_ptr(), flags, mode) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // Safety: shm_open just returned this descriptor and nothing else owns it.
    Ok(File::from(unsafe { OwnedFd::from_raw_fd(fd) }))
}

fn map<T>(file: &File, access: Access) -> io::Result<NonNull<T>> {
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            std::mem::size_of::<T>(),
            access.prot(),
            libc::MAP_SHARED,
            file.as_raw_fd(),
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    NonNull::new(ptr.cast::<T>())
        .ok_or_else(|| io::Error::other("mmap returned null"))
}
