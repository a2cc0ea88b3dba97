//! File Descriptor Table
//!
//! Open files and directories, and the per-context table that numbers them.
//! A descriptor owns one vnode reference and the module cookie for its open
//! instance; dropping the last holder closes the cookie, frees it and releases
//! the vnode. Descriptors are shared between tables after inheritance, so the
//! offset is atomic.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use super::error::{optional, FsError, FsResult};
use super::types::{FsCookie, OpenFlags};
use super::vnode::VnodeRef;
use crate::config::MAX_FD_TABLE_SIZE;

/// What a descriptor was opened as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    File,
    Directory,
}

/// Open file or directory
pub struct FileDescriptor {
    vnode: VnodeRef,
    cookie: FsCookie,
    kind: DescriptorKind,
    flags: OpenFlags,
    offset: AtomicU64,
}

impl FileDescriptor {
    pub fn new(vnode: VnodeRef, cookie: FsCookie, kind: DescriptorKind, flags: OpenFlags) -> Self {
        Self {
            vnode,
            cookie,
            kind,
            flags,
            offset: AtomicU64::new(0),
        }
    }

    pub fn vnode(&self) -> &VnodeRef {
        &self.vnode
    }

    pub fn cookie(&self) -> &FsCookie {
        &self.cookie
    }

    pub fn kind(&self) -> DescriptorKind {
        self.kind
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    pub fn is_readable(&self) -> bool {
        self.flags.contains(OpenFlags::READ)
    }

    pub fn is_writable(&self) -> bool {
        self.flags.contains(OpenFlags::WRITE)
    }

    /// Opened with `CLOEXEC`; seeds the close-on-exec flag of its first slot
    pub fn is_cloexec(&self) -> bool {
        self.flags.contains(OpenFlags::CLOEXEC)
    }

    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::SeqCst)
    }

    pub fn set_offset(&self, offset: u64) {
        self.offset.store(offset, Ordering::SeqCst);
    }
}

impl Drop for FileDescriptor {
    fn drop(&mut self) {
        let volume = self.vnode.volume();
        let node = self.vnode.fs_node();
        let (closed, freed) = match self.kind {
            DescriptorKind::File => (
                volume.close(node, &self.cookie),
                volume.free_cookie(node, &self.cookie),
            ),
            DescriptorKind::Directory => (
                volume.close_dir(node, &self.cookie),
                volume.free_dir_cookie(node, &self.cookie),
            ),
        };
        if let Err(err) = optional(closed).and(optional(freed)) {
            crate::log_warn!(
                "vfs",
                "closing descriptor on vnode {}:{} failed: {}",
                self.vnode.mount_id(),
                self.vnode.node_id(),
                err
            );
        }
    }
}

impl fmt::Debug for FileDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileDescriptor")
            .field("mount", &self.vnode.mount_id())
            .field("node", &self.vnode.node_id())
            .field("kind", &self.kind)
            .field("offset", &self.offset())
            .field("flags", &self.flags)
            .finish()
    }
}

/// File descriptor table for one I/O context
///
/// Close-on-exec belongs to the slot, not to the descriptor: two slots
/// sharing one descriptor after `dup` carry their own flag.
#[derive(Debug)]
pub struct FdTable {
    fds: Vec<Option<Arc<FileDescriptor>>>,
    close_on_exec: Vec<bool>,
}

impl FdTable {
    /// Create an empty table with `size` slots
    pub fn new(size: usize) -> Self {
        let mut fds = Vec::with_capacity(size);
        fds.resize_with(size, || None);
        Self {
            fds,
            close_on_exec: vec![false; size],
        }
    }

    /// Number of slots, used or not
    pub fn size(&self) -> usize {
        self.fds.len()
    }

    /// Install a descriptor in the lowest free slot
    pub fn alloc_fd(&mut self, fd: Arc<FileDescriptor>, close_on_exec: bool) -> FsResult<usize> {
        let slot = self
            .fds
            .iter()
            .position(|slot| slot.is_none())
            .ok_or(FsError::TooManyOpenFiles)?;
        self.fds[slot] = Some(fd);
        self.close_on_exec[slot] = close_on_exec;
        Ok(slot)
    }

    /// Install a descriptor at `fd_num`, returning whatever the slot held
    ///
    /// The slot's close-on-exec flag is cleared.
    pub fn install_at(
        &mut self,
        fd_num: usize,
        fd: Arc<FileDescriptor>,
    ) -> FsResult<Option<Arc<FileDescriptor>>> {
        let slot = self.fds.get_mut(fd_num).ok_or(FsError::BadDescriptor)?;
        let previous = slot.replace(fd);
        self.close_on_exec[fd_num] = false;
        Ok(previous)
    }

    pub fn get_fd(&self, fd_num: usize) -> FsResult<Arc<FileDescriptor>> {
        self.fds
            .get(fd_num)
            .and_then(|slot| slot.clone())
            .ok_or(FsError::BadDescriptor)
    }

    /// Remove a descriptor; the caller drops it outside any lock
    pub fn close_fd(&mut self, fd_num: usize) -> FsResult<Arc<FileDescriptor>> {
        let fd = self
            .fds
            .get_mut(fd_num)
            .and_then(|slot| slot.take())
            .ok_or(FsError::BadDescriptor)?;
        self.close_on_exec[fd_num] = false;
        Ok(fd)
    }

    pub fn close_on_exec(&self, fd_num: usize) -> FsResult<bool> {
        self.get_fd(fd_num)?;
        Ok(self.close_on_exec[fd_num])
    }

    pub fn set_close_on_exec(&mut self, fd_num: usize, close_on_exec: bool) -> FsResult<()> {
        self.get_fd(fd_num)?;
        self.close_on_exec[fd_num] = close_on_exec;
        Ok(())
    }

    /// Grow or shrink the table to `size` slots
    ///
    /// Shrinking fails with `Busy` while any slot being dropped is in use.
    pub fn resize(&mut self, size: usize) -> FsResult<()> {
        if size == 0 || size > MAX_FD_TABLE_SIZE {
            return Err(FsError::InvalidArgument);
        }
        if self.fds.iter().skip(size).any(|slot| slot.is_some()) {
            return Err(FsError::Busy);
        }

        self.fds.resize_with(size, || None);
        self.close_on_exec.resize(size, false);
        Ok(())
    }

    /// Copy for a child context, leaving out close-on-exec slots
    pub fn clone_inherited(&self) -> Self {
        let fds = self
            .fds
            .iter()
            .zip(self.close_on_exec.iter())
            .map(|(slot, &cloexec)| if cloexec { None } else { slot.clone() })
            .collect();
        Self {
            fds,
            close_on_exec: vec![false; self.size()],
        }
    }

    /// Take all close-on-exec descriptors out of the table
    pub fn take_cloexec(&mut self) -> Vec<Arc<FileDescriptor>> {
        let mut closed = Vec::new();
        for (slot, cloexec) in self.fds.iter_mut().zip(self.close_on_exec.iter_mut()) {
            if core::mem::replace(cloexec, false) {
                if let Some(fd) = slot.take() {
                    closed.push(fd);
                }
            }
        }
        closed
    }

    /// Take every descriptor out of the table
    pub fn take_all(&mut self) -> Vec<Arc<FileDescriptor>> {
        self.close_on_exec.fill(false);
        self.fds.iter_mut().filter_map(|slot| slot.take()).collect()
    }

    /// Get count of open FDs
    pub fn count(&self) -> usize {
        self.fds.iter().filter(|fd| fd.is_some()).count()
    }
}
