//! Filesystem Module Contract
//!
//! A filesystem type implements `FilesystemModule`; every mounted instance of
//! it is a `Volume`. All `Volume` hooks default to `Unsupported`, so a module
//! implements only what it supports and the core reports the rest.
//!
//! Hooks are always called with no VFS lock held. They may block, and they may
//! call back into the node cache through their `VolumeContext`.

use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use super::cache::NodeCache;
use super::error::{FsError, FsResult};
use super::types::{
    AccessMode, DirEntry, FsCookie, FsInfo, FsNode, MountId, NodeId, NodeType, OpenFlags, Stat,
    StatMask, VnodeKey,
};
use super::vnode::VnodeRef;

/// A filesystem type that can be mounted
pub trait FilesystemModule: Send + Sync {
    /// Registry name, e.g. "rootfs"
    fn name(&self) -> &str;

    fn version(&self) -> u32 {
        1
    }

    /// Attach a new instance and report its root node
    fn mount(
        &self,
        ctx: VolumeContext,
        device: Option<&str>,
        args: Option<&str>,
    ) -> FsResult<Mounted>;
}

/// Result of a module's mount hook
pub struct Mounted {
    pub volume: Arc<dyn Volume>,
    pub root: NodeId,
}

/// Result of a module's create hook
pub struct Created {
    pub node: NodeId,
    pub cookie: FsCookie,
    /// Set when the module already seeded the cache via `register_new`
    pub vnode: Option<VnodeRef>,
}

/// One mounted filesystem instance
#[allow(unused_variables)]
pub trait Volume: Send + Sync {
    // Volume operations

    fn unmount(&self) -> FsResult<()> {
        Err(FsError::Unsupported)
    }

    fn sync(&self) -> FsResult<()> {
        Err(FsError::Unsupported)
    }

    /// Fill volume-specific fields; identity fields are already set
    fn read_fs_info(&self, info: &mut FsInfo) -> FsResult<()> {
        Err(FsError::Unsupported)
    }

    // Node lifecycle

    fn lookup(&self, dir: &FsNode, name: &str) -> FsResult<(NodeId, NodeType)> {
        Err(FsError::Unsupported)
    }

    fn get_node_name(&self, node: &FsNode) -> FsResult<String> {
        Err(FsError::Unsupported)
    }

    /// Materialize the module handle for a node the cache is faulting in
    fn read_node(&self, id: NodeId) -> FsResult<FsNode> {
        Err(FsError::Unsupported)
    }

    /// Last reference to a live node went away
    fn put_node(&self, node: &FsNode) -> FsResult<()> {
        Err(FsError::Unsupported)
    }

    /// Last reference to a node marked for deletion went away
    fn remove_node(&self, node: &FsNode) -> FsResult<()> {
        Err(FsError::Unsupported)
    }

    // File operations

    fn create(&self, dir: &FsNode, name: &str, flags: OpenFlags, perms: u32) -> FsResult<Created> {
        Err(FsError::Unsupported)
    }

    fn open(&self, node: &FsNode, flags: OpenFlags) -> FsResult<FsCookie> {
        Err(FsError::Unsupported)
    }

    fn close(&self, node: &FsNode, cookie: &FsCookie) -> FsResult<()> {
        Err(FsError::Unsupported)
    }

    fn free_cookie(&self, node: &FsNode, cookie: &FsCookie) -> FsResult<()> {
        Err(FsError::Unsupported)
    }

    fn read(&self, node: &FsNode, cookie: &FsCookie, pos: u64, buf: &mut [u8]) -> FsResult<usize> {
        Err(FsError::Unsupported)
    }

    fn write(&self, node: &FsNode, cookie: &FsCookie, pos: u64, buf: &[u8]) -> FsResult<usize> {
        Err(FsError::Unsupported)
    }

    /// Flush one node to stable storage; `data_only` skips metadata
    fn fsync(&self, node: &FsNode, data_only: bool) -> FsResult<()> {
        Err(FsError::Unsupported)
    }

    fn ioctl(&self, node: &FsNode, cookie: &FsCookie, op: u32, arg: &mut [u8]) -> FsResult<usize> {
        Err(FsError::Unsupported)
    }

    // Links

    fn read_link(&self, node: &FsNode) -> FsResult<String> {
        Err(FsError::Unsupported)
    }

    fn write_link(&self, node: &FsNode, target: &str) -> FsResult<()> {
        Err(FsError::Unsupported)
    }

    fn create_symlink(&self, dir: &FsNode, name: &str, target: &str, perms: u32) -> FsResult<()> {
        Err(FsError::Unsupported)
    }

    fn link(&self, dir: &FsNode, name: &str, node: &FsNode) -> FsResult<()> {
        Err(FsError::Unsupported)
    }

    fn unlink(&self, dir: &FsNode, name: &str) -> FsResult<()> {
        Err(FsError::Unsupported)
    }

    fn rename(
        &self,
        from_dir: &FsNode,
        from_name: &str,
        to_dir: &FsNode,
        to_name: &str,
    ) -> FsResult<()> {
        Err(FsError::Unsupported)
    }

    // Metadata

    fn access(&self, node: &FsNode, mode: AccessMode) -> FsResult<()> {
        Err(FsError::Unsupported)
    }

    fn read_stat(&self, node: &FsNode) -> FsResult<Stat> {
        Err(FsError::Unsupported)
    }

    fn write_stat(&self, node: &FsNode, stat: &Stat, mask: StatMask) -> FsResult<()> {
        Err(FsError::Unsupported)
    }

    // Directories

    fn create_dir(&self, dir: &FsNode, name: &str, perms: u32) -> FsResult<NodeId> {
        Err(FsError::Unsupported)
    }

    fn remove_dir(&self, dir: &FsNode, name: &str) -> FsResult<()> {
        Err(FsError::Unsupported)
    }

    fn open_dir(&self, node: &FsNode) -> FsResult<FsCookie> {
        Err(FsError::Unsupported)
    }

    fn close_dir(&self, node: &FsNode, cookie: &FsCookie) -> FsResult<()> {
        Err(FsError::Unsupported)
    }

    fn free_dir_cookie(&self, node: &FsNode, cookie: &FsCookie) -> FsResult<()> {
        Err(FsError::Unsupported)
    }

    /// Return up to `max` entries; an empty batch means the end
    fn read_dir(&self, node: &FsNode, cookie: &FsCookie, max: usize) -> FsResult<Vec<DirEntry>> {
        Err(FsError::Unsupported)
    }

    fn rewind_dir(&self, node: &FsNode, cookie: &FsCookie) -> FsResult<()> {
        Err(FsError::Unsupported)
    }

    // Page cache pass-through

    fn can_page(&self, node: &FsNode) -> bool {
        false
    }

    fn read_pages(&self, node: &FsNode, pos: u64, buf: &mut [u8]) -> FsResult<usize> {
        Err(FsError::Unsupported)
    }

    fn write_pages(&self, node: &FsNode, pos: u64, buf: &[u8]) -> FsResult<usize> {
        Err(FsError::Unsupported)
    }
}

/// A module's handle back into the node cache for its own mount
#[derive(Clone)]
pub struct VolumeContext {
    mount: MountId,
    cache: Weak<NodeCache>,
}

impl VolumeContext {
    pub(crate) fn new(mount: MountId, cache: Weak<NodeCache>) -> Self {
        Self { mount, cache }
    }

    pub fn mount_id(&self) -> MountId {
        self.mount
    }

    fn cache(&self) -> FsResult<Arc<NodeCache>> {
        self.cache.upgrade().ok_or(FsError::NotFound)
    }

    /// Seed the cache with a node the module just created
    pub fn register_new(&self, node: NodeId, fs_node: FsNode) -> FsResult<VnodeRef> {
        self.cache()?.register_new(VnodeKey::new(self.mount, node), fs_node)
    }

    pub fn acquire_cached(&self, node: NodeId) -> FsResult<VnodeRef> {
        self.cache()?.acquire_cached(VnodeKey::new(self.mount, node))
    }

    /// Request `remove_node` instead of `put_node` once the node goes idle
    ///
    /// Returns `NotFound` when the node is not cached (or already tearing
    /// down), in which case the module reclaims it immediately.
    pub fn mark_for_deletion(&self, node: NodeId) -> FsResult<()> {
        self.cache()?.mark_for_deletion(VnodeKey::new(self.mount, node))
    }

    pub fn unmark_for_deletion(&self, node: NodeId) -> FsResult<()> {
        self.cache()?.unmark_for_deletion(VnodeKey::new(self.mount, node))
    }
}
