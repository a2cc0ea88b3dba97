//! I/O Contexts
//!
//! Per-execution-context state: the current directory and the descriptor
//! table. A context is an ordinary client of the node cache; it holds one
//! reference for its current directory and each descriptor holds its own.

use alloc::string::String;
use alloc::sync::Arc;
use spin::Mutex;

use super::error::{FsError, FsResult};
use super::file::{FdTable, FileDescriptor};
use super::types::NodeType;
use super::vnode::VnodeRef;
use super::Vfs;

/// Current directory and open descriptors of one execution context
pub struct IoContext {
    /// Current working directory; one reference held for the context
    cwd: Mutex<VnodeRef>,
    /// Descriptor table, numbered from 0
    fds: Mutex<FdTable>,
}

impl IoContext {
    fn new(cwd: VnodeRef, fds: FdTable) -> Self {
        Self {
            cwd: Mutex::new(cwd),
            fds: Mutex::new(fds),
        }
    }

    /// A new reference to the current directory
    pub fn cwd(&self) -> VnodeRef {
        self.cwd.lock().clone()
    }

    /// Swap the current directory, returning the old reference
    fn replace_cwd(&self, cwd: VnodeRef) -> VnodeRef {
        core::mem::replace(&mut *self.cwd.lock(), cwd)
    }

    /// Look up an open descriptor
    ///
    /// # Errors
    /// `BadDescriptor` if `fd` is out of range or its slot is empty.
    pub fn get_fd(&self, fd: usize) -> FsResult<Arc<FileDescriptor>> {
        self.fds.lock().get_fd(fd)
    }

    /// Install a freshly opened descriptor in the lowest free slot
    ///
    /// A descriptor opened with `CLOEXEC` starts with the slot's
    /// close-on-exec flag set.
    pub(super) fn install_fd(&self, descriptor: FileDescriptor) -> FsResult<usize> {
        let close_on_exec = descriptor.is_cloexec();
        let descriptor = Arc::new(descriptor);
        let result = self.fds.lock().alloc_fd(descriptor.clone(), close_on_exec);
        // On failure the descriptor is dropped here, closing it
        drop(descriptor);
        result
    }

    pub(super) fn dup_fd(&self, fd: usize) -> FsResult<usize> {
        let mut fds = self.fds.lock();
        let descriptor = fds.get_fd(fd)?;
        fds.alloc_fd(descriptor, false)
    }

    pub(super) fn dup2_fd(&self, old: usize, new: usize) -> FsResult<usize> {
        let replaced = {
            let mut fds = self.fds.lock();
            let descriptor = fds.get_fd(old)?;
            if old == new {
                return Ok(new);
            }
            fds.install_at(new, descriptor)?
        };
        // Closed outside the table lock
        drop(replaced);
        Ok(new)
    }

    pub(super) fn close_fd(&self, fd: usize) -> FsResult<()> {
        let descriptor = self.fds.lock().close_fd(fd)?;
        drop(descriptor);
        Ok(())
    }

    /// Whether `fd` is closed on exec
    pub fn close_on_exec(&self, fd: usize) -> FsResult<bool> {
        self.fds.lock().close_on_exec(fd)
    }

    pub(super) fn set_close_on_exec(&self, fd: usize, close_on_exec: bool) -> FsResult<()> {
        self.fds.lock().set_close_on_exec(fd, close_on_exec)
    }

    /// Number of descriptor slots
    pub fn table_size(&self) -> usize {
        self.fds.lock().size()
    }

    /// Number of slots holding a descriptor
    pub fn open_count(&self) -> usize {
        self.fds.lock().count()
    }
}

impl Drop for IoContext {
    fn drop(&mut self) {
        let descriptors = self.fds.lock().take_all();
        drop(descriptors);
    }
}

impl Vfs {
    /// Create a context, inheriting from `parent` when given
    ///
    /// A child shares the parent's current directory and every descriptor
    /// whose slot is not close-on-exec, at the same numbers. Without a parent
    /// the context starts at the root with a table of `fd_table_size` slots.
    pub fn new_io_context(&self, parent: Option<&IoContext>) -> FsResult<IoContext> {
        match parent {
            Some(parent) => {
                let fds = parent.fds.lock().clone_inherited();
                Ok(IoContext::new(parent.cwd(), fds))
            }
            None => Ok(IoContext::new(
                self.root()?,
                FdTable::new(self.config.fd_table_size),
            )),
        }
    }

    /// Close every close-on-exec descriptor, as on exec
    pub fn exec_io_context(&self, ctx: &IoContext) {
        let closed = ctx.fds.lock().take_cloexec();
        drop(closed);
    }

    /// Resize a context's descriptor table
    ///
    /// # Errors
    /// `InvalidArgument` for a size of zero or above `MAX_FD_TABLE_SIZE`,
    /// `Busy` when shrinking would drop an open descriptor.
    pub fn resize_fd_table(&self, ctx: &IoContext, size: usize) -> FsResult<()> {
        ctx.fds.lock().resize(size)?;
        crate::log_debug!("vfs", "descriptor table resized to {}", size);
        Ok(())
    }

    /// Absolute path of the current directory
    pub fn getcwd(&self, ctx: &IoContext) -> FsResult<String> {
        let cwd = ctx.cwd();
        self.vnode_to_path(&cwd)
    }

    /// Change the current directory; the target must be a directory
    pub fn setcwd(&self, ctx: &IoContext, path: &str) -> FsResult<()> {
        let cwd = ctx.cwd();
        let target = self.path_to_vnode(Some(&cwd), path, true)?;
        drop(cwd);

        let stat = target.volume().read_stat(target.fs_node())?;
        if stat.mode.node_type() != Some(NodeType::Directory) {
            return Err(FsError::NotADirectory);
        }

        let old = ctx.replace_cwd(target);
        drop(old);
        Ok(())
    }
}
