//! File System Operations
//!
//! Path- and descriptor-based entry points used by the system call layer.
//! Each one resolves its arguments through the path resolver, dispatches to
//! the owning module and adds only what the core alone knows: vnode
//! identities, mount boundaries and descriptor state.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use super::error::{FsError, FsResult};
use super::file::{DescriptorKind, FileDescriptor};
use super::io_context::IoContext;
use super::types::{AccessMode, DirEntry, NodeType, OpenFlags, SeekFrom, Stat, StatMask, VnodeKey};
use super::vnode::VnodeRef;
use super::Vfs;

impl Vfs {
    // Vnode-level helpers

    /// Stat a vnode, filling in its identity
    pub fn stat_vnode(&self, vnode: &VnodeRef) -> FsResult<Stat> {
        let mut stat = vnode.volume().read_stat(vnode.fs_node())?;
        stat.device = vnode.mount_id();
        stat.node = vnode.node_id();
        Ok(stat)
    }

    pub fn can_page(&self, vnode: &VnodeRef) -> bool {
        vnode.volume().can_page(vnode.fs_node())
    }

    pub fn read_pages(&self, vnode: &VnodeRef, pos: u64, buf: &mut [u8]) -> FsResult<usize> {
        vnode.volume().read_pages(vnode.fs_node(), pos, buf)
    }

    pub fn write_pages(&self, vnode: &VnodeRef, pos: u64, buf: &[u8]) -> FsResult<usize> {
        vnode.volume().write_pages(vnode.fs_node(), pos, buf)
    }

    fn file_descriptor(&self, ctx: &IoContext, fd: usize) -> FsResult<Arc<FileDescriptor>> {
        let descriptor = ctx.get_fd(fd)?;
        match descriptor.kind() {
            DescriptorKind::File => Ok(descriptor),
            DescriptorKind::Directory => Err(FsError::IsADirectory),
        }
    }

    fn dir_descriptor(&self, ctx: &IoContext, fd: usize) -> FsResult<Arc<FileDescriptor>> {
        let descriptor = ctx.get_fd(fd)?;
        match descriptor.kind() {
            DescriptorKind::Directory => Ok(descriptor),
            DescriptorKind::File => Err(FsError::NotADirectory),
        }
    }

    // Files

    /// Open a path, creating it first when `CREATE` is set
    pub fn open(&self, ctx: &IoContext, path: &str, flags: OpenFlags, perms: u32) -> FsResult<usize> {
        if flags.contains(OpenFlags::CREATE) {
            return self.create(ctx, path, flags, perms);
        }

        let cwd = ctx.cwd();
        let traverse = !flags.contains(OpenFlags::NOTRAVERSE);
        let vnode = self.path_to_vnode(Some(&cwd), path, traverse)?;
        drop(cwd);

        let cookie = vnode.volume().open(vnode.fs_node(), flags)?;
        ctx.install_fd(FileDescriptor::new(vnode, cookie, DescriptorKind::File, flags))
    }

    /// Create and open a file
    pub fn create(&self, ctx: &IoContext, path: &str, flags: OpenFlags, perms: u32) -> FsResult<usize> {
        let cwd = ctx.cwd();
        let (dir, name) = self.path_to_dir_vnode(Some(&cwd), path)?;
        drop(cwd);

        let created = dir.volume().create(dir.fs_node(), &name, flags, perms)?;
        let vnode = match created.vnode {
            Some(vnode) => vnode,
            None => match self.cache.fetch(VnodeKey::new(dir.mount_id(), created.node)) {
                Ok(vnode) => vnode,
                Err(err) => {
                    crate::log_warn!(
                        "vfs",
                        "created node {}:{} could not be loaded: {}",
                        dir.mount_id(),
                        created.node,
                        err
                    );
                    return Err(err);
                }
            },
        };

        vnode.set_parent_hint(dir.node_id());
        ctx.install_fd(FileDescriptor::new(
            vnode,
            created.cookie,
            DescriptorKind::File,
            flags,
        ))
    }

    pub fn close(&self, ctx: &IoContext, fd: usize) -> FsResult<()> {
        ctx.close_fd(fd)
    }

    /// Duplicate a descriptor into the lowest free slot
    pub fn dup(&self, ctx: &IoContext, fd: usize) -> FsResult<usize> {
        ctx.dup_fd(fd)
    }

    /// Duplicate `old` into slot `new`, closing what `new` held
    ///
    /// The new slot is not close-on-exec. Duplicating a descriptor onto
    /// itself only checks that it is open.
    pub fn dup2(&self, ctx: &IoContext, old: usize, new: usize) -> FsResult<usize> {
        ctx.dup2_fd(old, new)
    }

    pub fn set_close_on_exec(&self, ctx: &IoContext, fd: usize, close_on_exec: bool) -> FsResult<()> {
        ctx.set_close_on_exec(fd, close_on_exec)
    }

    pub fn read(&self, ctx: &IoContext, fd: usize, buf: &mut [u8]) -> FsResult<usize> {
        let descriptor = self.file_descriptor(ctx, fd)?;
        if !descriptor.is_readable() {
            return Err(FsError::BadDescriptor);
        }

        let vnode = descriptor.vnode();
        let pos = descriptor.offset();
        check_range(pos, buf.len())?;
        let count = vnode.volume().read(vnode.fs_node(), descriptor.cookie(), pos, buf)?;
        descriptor.set_offset(pos + count as u64);
        Ok(count)
    }

    pub fn write(&self, ctx: &IoContext, fd: usize, buf: &[u8]) -> FsResult<usize> {
        let descriptor = self.file_descriptor(ctx, fd)?;
        if !descriptor.is_writable() {
            return Err(FsError::BadDescriptor);
        }

        let vnode = descriptor.vnode();
        let pos = if descriptor.flags().contains(OpenFlags::APPEND) {
            self.stat_vnode(vnode)?.size
        } else {
            descriptor.offset()
        };
        check_range(pos, buf.len())?;
        let count = vnode.volume().write(vnode.fs_node(), descriptor.cookie(), pos, buf)?;
        descriptor.set_offset(pos + count as u64);
        Ok(count)
    }

    pub fn seek(&self, ctx: &IoContext, fd: usize, offset: i64, whence: SeekFrom) -> FsResult<u64> {
        let descriptor = self.file_descriptor(ctx, fd)?;
        let base = match whence {
            SeekFrom::Start => 0,
            SeekFrom::Current => descriptor.offset(),
            SeekFrom::End => self.stat_vnode(descriptor.vnode())?.size,
        };

        let pos = i128::from(base) + i128::from(offset);
        let pos = u64::try_from(pos).map_err(|_| FsError::InvalidArgument)?;
        descriptor.set_offset(pos);
        Ok(pos)
    }

    pub fn ioctl(&self, ctx: &IoContext, fd: usize, op: u32, arg: &mut [u8]) -> FsResult<usize> {
        let descriptor = ctx.get_fd(fd)?;
        let vnode = descriptor.vnode();
        vnode.volume().ioctl(vnode.fs_node(), descriptor.cookie(), op, arg)
    }

    /// Flush the node behind a descriptor
    ///
    /// Unlike the volume-wide syncs, a module without an `fsync` hook makes
    /// this fail with `Unsupported`.
    pub fn fsync(&self, ctx: &IoContext, fd: usize, data_only: bool) -> FsResult<()> {
        let descriptor = ctx.get_fd(fd)?;
        let vnode = descriptor.vnode();
        vnode.volume().fsync(vnode.fs_node(), data_only)
    }

    pub fn fstat(&self, ctx: &IoContext, fd: usize) -> FsResult<Stat> {
        let descriptor = ctx.get_fd(fd)?;
        self.stat_vnode(descriptor.vnode())
    }

    // Directories

    pub fn open_dir(&self, ctx: &IoContext, path: &str) -> FsResult<usize> {
        let cwd = ctx.cwd();
        let vnode = self.path_to_vnode(Some(&cwd), path, true)?;
        drop(cwd);

        let cookie = vnode.volume().open_dir(vnode.fs_node())?;
        ctx.install_fd(FileDescriptor::new(
            vnode,
            cookie,
            DescriptorKind::Directory,
            OpenFlags::READ,
        ))
    }

    /// Read up to `max` entries with identities fixed up across mounts
    pub fn read_dir(&self, ctx: &IoContext, fd: usize, max: usize) -> FsResult<Vec<DirEntry>> {
        let descriptor = self.dir_descriptor(ctx, fd)?;
        let dir = descriptor.vnode();
        let mut entries = dir.volume().read_dir(dir.fs_node(), descriptor.cookie(), max)?;
        for entry in entries.iter_mut() {
            self.fix_dir_entry(dir, entry);
        }
        Ok(entries)
    }

    /// Rewrite an entry so it names what path resolution would reach
    fn fix_dir_entry(&self, dir: &VnodeRef, entry: &mut DirEntry) {
        entry.device = dir.mount_id();
        entry.parent_device = dir.mount_id();
        entry.parent_node = dir.node_id();

        if entry.name == ".." {
            if !dir.is_mount_root() {
                return;
            }
            // ".." of a mount root is the parent of the covered directory
            if let Some(covered) = dir.mount().covers() {
                if let Ok((parent, _)) = covered.volume().lookup(covered.fs_node(), "..") {
                    entry.device = covered.mount_id();
                    entry.node = parent;
                }
            }
        } else if entry.name != "." {
            // A mount point shows the root of the mount on top of it
            if let Ok(child) = self.cache.acquire_cached(VnodeKey::new(dir.mount_id(), entry.node)) {
                if let Some(root) = child.covering_root() {
                    entry.device = root.mount_id();
                    entry.node = root.node_id();
                }
            }
        }
    }

    pub fn rewind_dir(&self, ctx: &IoContext, fd: usize) -> FsResult<()> {
        let descriptor = self.dir_descriptor(ctx, fd)?;
        let dir = descriptor.vnode();
        dir.volume().rewind_dir(dir.fs_node(), descriptor.cookie())
    }

    pub fn create_dir(&self, ctx: &IoContext, path: &str, perms: u32) -> FsResult<()> {
        let cwd = ctx.cwd();
        let (dir, name) = self.path_to_dir_vnode(Some(&cwd), path)?;
        drop(cwd);

        dir.volume().create_dir(dir.fs_node(), &name, perms)?;
        Ok(())
    }

    pub fn remove_dir(&self, ctx: &IoContext, path: &str) -> FsResult<()> {
        let cwd = ctx.cwd();
        let (dir, name) = self.path_to_dir_vnode(Some(&cwd), path)?;
        drop(cwd);

        dir.volume().remove_dir(dir.fs_node(), &name)
    }

    // Metadata

    pub fn read_stat(&self, ctx: &IoContext, path: &str, traverse_leaf: bool) -> FsResult<Stat> {
        let cwd = ctx.cwd();
        let vnode = self.path_to_vnode(Some(&cwd), path, traverse_leaf)?;
        drop(cwd);

        self.stat_vnode(&vnode)
    }

    pub fn write_stat(
        &self,
        ctx: &IoContext,
        path: &str,
        traverse_leaf: bool,
        stat: &Stat,
        mask: StatMask,
    ) -> FsResult<()> {
        let cwd = ctx.cwd();
        let vnode = self.path_to_vnode(Some(&cwd), path, traverse_leaf)?;
        drop(cwd);

        vnode.volume().write_stat(vnode.fs_node(), stat, mask)
    }

    pub fn access(&self, ctx: &IoContext, path: &str, mode: AccessMode) -> FsResult<()> {
        let cwd = ctx.cwd();
        let vnode = self.path_to_vnode(Some(&cwd), path, true)?;
        drop(cwd);

        vnode.volume().access(vnode.fs_node(), mode)
    }

    // Links

    pub fn rename(&self, ctx: &IoContext, from: &str, to: &str) -> FsResult<()> {
        let cwd = ctx.cwd();
        let (from_dir, from_name) = self.path_to_dir_vnode(Some(&cwd), from)?;
        let (to_dir, to_name) = self.path_to_dir_vnode(Some(&cwd), to)?;
        drop(cwd);

        if from_dir.mount_id() != to_dir.mount_id() {
            return Err(FsError::CrossDevice);
        }
        from_dir
            .volume()
            .rename(from_dir.fs_node(), &from_name, to_dir.fs_node(), &to_name)?;

        // A cached node keeps naming its new directory
        if let Ok((id, _)) = to_dir.volume().lookup(to_dir.fs_node(), &to_name) {
            if let Ok(moved) = self.cache.acquire_cached(VnodeKey::new(to_dir.mount_id(), id)) {
                moved.set_parent_hint(to_dir.node_id());
            }
        }
        Ok(())
    }

    /// Create a hard link at `path` to the existing node at `target`
    pub fn create_link(&self, ctx: &IoContext, path: &str, target: &str) -> FsResult<()> {
        let cwd = ctx.cwd();
        let (dir, name) = self.path_to_dir_vnode(Some(&cwd), path)?;
        let node = self.path_to_vnode(Some(&cwd), target, true)?;
        drop(cwd);

        if dir.mount_id() != node.mount_id() {
            return Err(FsError::CrossDevice);
        }
        dir.volume().link(dir.fs_node(), &name, node.fs_node())
    }

    pub fn unlink(&self, ctx: &IoContext, path: &str) -> FsResult<()> {
        let cwd = ctx.cwd();
        let (dir, name) = self.path_to_dir_vnode(Some(&cwd), path)?;
        drop(cwd);

        dir.volume().unlink(dir.fs_node(), &name)
    }

    pub fn create_symlink(&self, ctx: &IoContext, path: &str, target: &str, perms: u32) -> FsResult<()> {
        if target.len() > self.config.max_path_len {
            return Err(FsError::NameTooLong);
        }

        let cwd = ctx.cwd();
        let (dir, name) = self.path_to_dir_vnode(Some(&cwd), path)?;
        drop(cwd);

        dir.volume().create_symlink(dir.fs_node(), &name, target, perms)
    }

    pub fn read_link(&self, ctx: &IoContext, path: &str) -> FsResult<String> {
        let cwd = ctx.cwd();
        let vnode = self.path_to_vnode(Some(&cwd), path, false)?;
        drop(cwd);

        vnode.volume().read_link(vnode.fs_node())
    }

    pub fn write_link(&self, ctx: &IoContext, path: &str, target: &str) -> FsResult<()> {
        if target.len() > self.config.max_path_len {
            return Err(FsError::NameTooLong);
        }

        let cwd = ctx.cwd();
        let vnode = self.path_to_vnode(Some(&cwd), path, false)?;
        drop(cwd);

        vnode.volume().write_link(vnode.fs_node(), target)
    }

    /// Type of whatever `path` names, without following a final symlink
    pub fn node_type(&self, ctx: &IoContext, path: &str) -> FsResult<NodeType> {
        self.read_stat(ctx, path, false)?
            .mode
            .node_type()
            .ok_or(FsError::IoError)
    }

    pub fn sync(&self) {
        self.sync_all();
    }
}

/// Reject a transfer whose end offset does not fit in a u64
fn check_range(pos: u64, len: usize) -> FsResult<()> {
    match pos.checked_add(len as u64) {
        Some(_) => Ok(()),
        None => Err(FsError::InvalidArgument),
    }
}
