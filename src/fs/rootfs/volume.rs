//! rootfs Volume Implementation

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

use super::dir::{validate_name, DirCursor};
use super::node::{ram, NodeKind, RamNode, BLOCK_SIZE};
use crate::fs::vfs::{
    AccessMode, Created, DirEntry, FsCookie, FsError, FsInfo, FsNode, FsResult, NodeId, NodeType,
    OpenFlags, Stat, StatMask, Volume, VolumeContext,
};

/// Node id of the volume root
pub const ROOT_NODE: NodeId = 1;

/// Per-open state of a file
pub struct OpenFile {
    pub flags: OpenFlags,
}

/// One mounted rootfs instance
pub struct RootVolume {
    ctx: VolumeContext,
    pub(super) nodes: Mutex<BTreeMap<NodeId, Arc<RamNode>>>,
    next_id: AtomicU64,
    clock: AtomicU64,
    /// Held by every operation that locks more than one directory
    pub(super) tree_lock: Mutex<()>,
}

impl RootVolume {
    pub fn new(ctx: VolumeContext) -> Self {
        let root = Arc::new(RamNode::new_dir(ROOT_NODE, ROOT_NODE, 0o755, 0));
        let mut nodes = BTreeMap::new();
        nodes.insert(ROOT_NODE, root);

        Self {
            ctx,
            nodes: Mutex::new(nodes),
            next_id: AtomicU64::new(ROOT_NODE + 1),
            clock: AtomicU64::new(1),
            tree_lock: Mutex::new(()),
        }
    }

    /// Allocate a new node id; ids are never reused
    fn alloc_id(&self) -> NodeId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Advance the logical clock
    pub(super) fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst)
    }

    pub(super) fn node(&self, id: NodeId) -> FsResult<Arc<RamNode>> {
        self.nodes.lock().get(&id).cloned().ok_or(FsError::NotFound)
    }

    /// Drop one directory entry naming `node`
    pub(super) fn drop_link(&self, node: &RamNode) {
        if node.nlink.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.reclaim(node.id);
        }
    }

    /// Free a node with no links left, deferring while the VFS holds it
    pub(super) fn reclaim(&self, id: NodeId) {
        if self.ctx.mark_for_deletion(id).is_err() {
            self.nodes.lock().remove(&id);
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.lock().len()
    }
}

impl Volume for RootVolume {
    fn unmount(&self) -> FsResult<()> {
        self.nodes.lock().clear();
        Ok(())
    }

    fn sync(&self) -> FsResult<()> {
        Ok(())
    }

    fn read_fs_info(&self, info: &mut FsInfo) -> FsResult<()> {
        info.volume_name = String::from("rootfs");
        info.block_size = BLOCK_SIZE;
        info.total_nodes = self.node_count() as u64;
        Ok(())
    }

    fn lookup(&self, dir: &FsNode, name: &str) -> FsResult<(NodeId, NodeType)> {
        self.dir_lookup(ram(dir)?, name)
    }

    fn read_node(&self, id: NodeId) -> FsResult<FsNode> {
        let node: FsNode = self.node(id)?;
        Ok(node)
    }

    fn put_node(&self, _node: &FsNode) -> FsResult<()> {
        Ok(())
    }

    fn remove_node(&self, node: &FsNode) -> FsResult<()> {
        let node = ram(node)?;
        self.nodes.lock().remove(&node.id);
        Ok(())
    }

    fn create(&self, dir: &FsNode, name: &str, flags: OpenFlags, perms: u32) -> FsResult<Created> {
        let dir = ram(dir)?;
        validate_name(name)?;

        let existing = match self.dir_lookup(dir, name) {
            Ok(found) => Some(found),
            Err(FsError::NotFound) => None,
            Err(err) => return Err(err),
        };
        if let Some((id, node_type)) = existing {
            if flags.contains(OpenFlags::EXCLUSIVE) {
                return Err(FsError::AlreadyExists);
            }
            if node_type == NodeType::Directory {
                return Err(FsError::IsADirectory);
            }
            let node: FsNode = self.node(id)?;
            let cookie = self.open(&node, flags)?;
            return Ok(Created {
                node: id,
                cookie,
                vnode: None,
            });
        }

        let id = self.alloc_id();
        let node = RamNode::new_file(id, perms, self.tick());
        let vnode = self.dir_insert(dir, name, node, |node| {
            let handle: FsNode = node.clone();
            self.ctx.register_new(id, handle)
        })?;

        Ok(Created {
            node: id,
            cookie: Arc::new(OpenFile { flags }),
            vnode: Some(vnode),
        })
    }

    fn open(&self, node: &FsNode, flags: OpenFlags) -> FsResult<FsCookie> {
        let node = ram(node)?;
        if node.is_dir() && flags.contains(OpenFlags::WRITE) {
            return Err(FsError::IsADirectory);
        }
        if node.node_type == NodeType::File
            && flags.contains(OpenFlags::TRUNCATE | OpenFlags::WRITE)
        {
            node.truncate(0, self.tick())?;
        }
        Ok(Arc::new(OpenFile { flags }))
    }

    fn close(&self, _node: &FsNode, _cookie: &FsCookie) -> FsResult<()> {
        Ok(())
    }

    fn free_cookie(&self, _node: &FsNode, _cookie: &FsCookie) -> FsResult<()> {
        Ok(())
    }

    fn read(&self, node: &FsNode, _cookie: &FsCookie, pos: u64, buf: &mut [u8]) -> FsResult<usize> {
        ram(node)?.read_at(pos, buf, self.tick())
    }

    fn write(&self, node: &FsNode, _cookie: &FsCookie, pos: u64, buf: &[u8]) -> FsResult<usize> {
        ram(node)?.write_at(pos, buf, self.tick())
    }

    fn fsync(&self, node: &FsNode, _data_only: bool) -> FsResult<()> {
        // Memory is the backing store
        ram(node).map(|_| ())
    }

    fn read_link(&self, node: &FsNode) -> FsResult<String> {
        match &ram(node)?.data.lock().kind {
            NodeKind::Symlink(target) => Ok(target.clone()),
            _ => Err(FsError::InvalidArgument),
        }
    }

    fn write_link(&self, node: &FsNode, target: &str) -> FsResult<()> {
        let now = self.tick();
        let mut data = ram(node)?.data.lock();
        match &mut data.kind {
            NodeKind::Symlink(current) => *current = String::from(target),
            _ => return Err(FsError::InvalidArgument),
        }
        data.mtime = now;
        Ok(())
    }

    fn create_symlink(&self, dir: &FsNode, name: &str, target: &str, perms: u32) -> FsResult<()> {
        let node = RamNode::new_symlink(self.alloc_id(), target, perms, self.tick());
        self.dir_insert(ram(dir)?, name, node, |_| Ok(()))
    }

    fn link(&self, dir: &FsNode, name: &str, node: &FsNode) -> FsResult<()> {
        self.dir_link(ram(dir)?, name, ram(node)?)
    }

    fn unlink(&self, dir: &FsNode, name: &str) -> FsResult<()> {
        self.dir_unlink(ram(dir)?, name)
    }

    fn rename(&self, from_dir: &FsNode, from_name: &str, to_dir: &FsNode, to_name: &str) -> FsResult<()> {
        self.dir_rename(ram(from_dir)?, from_name, ram(to_dir)?, to_name)
    }

    fn access(&self, node: &FsNode, mode: AccessMode) -> FsResult<()> {
        let perms = ram(node)?.data.lock().perms;
        let mut required = 0;
        if mode.contains(AccessMode::READ) {
            required |= 0o400;
        }
        if mode.contains(AccessMode::WRITE) {
            required |= 0o200;
        }
        if mode.contains(AccessMode::EXECUTE) {
            required |= 0o100;
        }

        if perms & required == required {
            Ok(())
        } else {
            Err(FsError::PermissionDenied)
        }
    }

    fn read_stat(&self, node: &FsNode) -> FsResult<Stat> {
        Ok(ram(node)?.stat())
    }

    fn write_stat(&self, node: &FsNode, stat: &Stat, mask: StatMask) -> FsResult<()> {
        let node = ram(node)?;
        if mask.contains(StatMask::SIZE) {
            node.truncate(stat.size, self.tick())?;
        }

        let now = self.tick();
        let mut data = node.data.lock();
        if mask.contains(StatMask::MODE) {
            data.perms = stat.mode.permissions();
        }
        if mask.contains(StatMask::UID) {
            data.uid = stat.uid;
        }
        if mask.contains(StatMask::GID) {
            data.gid = stat.gid;
        }
        if mask.contains(StatMask::ATIME) {
            data.atime = stat.atime;
        }
        if mask.contains(StatMask::MTIME) {
            data.mtime = stat.mtime;
        }
        data.ctime = now;
        Ok(())
    }

    fn create_dir(&self, dir: &FsNode, name: &str, perms: u32) -> FsResult<NodeId> {
        let dir = ram(dir)?;
        let id = self.alloc_id();
        let node = RamNode::new_dir(id, dir.id, perms, self.tick());
        self.dir_insert(dir, name, node, |_| Ok(()))?;
        Ok(id)
    }

    fn remove_dir(&self, dir: &FsNode, name: &str) -> FsResult<()> {
        self.dir_remove_dir(ram(dir)?, name)
    }

    fn open_dir(&self, node: &FsNode) -> FsResult<FsCookie> {
        if !ram(node)?.is_dir() {
            return Err(FsError::NotADirectory);
        }
        Ok(Arc::new(DirCursor::new()))
    }

    fn close_dir(&self, _node: &FsNode, _cookie: &FsCookie) -> FsResult<()> {
        Ok(())
    }

    fn free_dir_cookie(&self, _node: &FsNode, _cookie: &FsCookie) -> FsResult<()> {
        Ok(())
    }

    fn read_dir(&self, node: &FsNode, cookie: &FsCookie, max: usize) -> FsResult<Vec<DirEntry>> {
        let cursor = cookie
            .downcast_ref::<DirCursor>()
            .ok_or(FsError::InvalidArgument)?;
        self.dir_read(ram(node)?, cursor, max)
    }

    fn rewind_dir(&self, _node: &FsNode, cookie: &FsCookie) -> FsResult<()> {
        cookie
            .downcast_ref::<DirCursor>()
            .ok_or(FsError::InvalidArgument)?
            .rewind();
        Ok(())
    }

    fn can_page(&self, node: &FsNode) -> bool {
        ram(node).is_ok_and(|node| node.node_type == NodeType::File)
    }

    fn read_pages(&self, node: &FsNode, pos: u64, buf: &mut [u8]) -> FsResult<usize> {
        ram(node)?.read_at(pos, buf, self.tick())
    }

    fn write_pages(&self, node: &FsNode, pos: u64, buf: &[u8]) -> FsResult<usize> {
        ram(node)?.write_at(pos, buf, self.tick())
    }
}
