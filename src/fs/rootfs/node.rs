//! rootfs Node Implementation

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};
use spin::Mutex;

use crate::fs::vfs::{FileMode, FsError, FsNode, FsResult, NodeId, NodeType, Stat};

/// Block size reported in stat
pub const BLOCK_SIZE: u32 = 4096;

/// Node data protected by the node lock
pub struct NodeData {
    /// Permission bits
    pub perms: u32,
    pub uid: u32,
    pub gid: u32,
    /// Logical timestamps from the volume clock
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
    pub kind: NodeKind,
}

/// Node kind-specific data
pub enum NodeKind {
    File(Vec<u8>),
    Directory(DirectoryData),
    Symlink(String),
}

/// Directory data
pub struct DirectoryData {
    /// Parent directory; the root is its own parent
    pub parent: NodeId,
    /// Entries other than "." and ".."
    pub entries: BTreeMap<String, NodeId>,
}

/// In-memory node
pub struct RamNode {
    pub(super) id: NodeId,
    pub(super) node_type: NodeType,
    /// Number of directory entries naming this node
    pub(super) nlink: AtomicU32,
    pub(super) data: Mutex<NodeData>,
}

impl RamNode {
    fn with_kind(id: NodeId, node_type: NodeType, nlink: u32, perms: u32, now: u64, kind: NodeKind) -> Self {
        Self {
            id,
            node_type,
            nlink: AtomicU32::new(nlink),
            data: Mutex::new(NodeData {
                perms: perms & 0o7777,
                uid: 0,
                gid: 0,
                atime: now,
                mtime: now,
                ctime: now,
                kind,
            }),
        }
    }

    /// Create a new directory node
    pub fn new_dir(id: NodeId, parent: NodeId, perms: u32, now: u64) -> Self {
        let dir = DirectoryData {
            parent,
            entries: BTreeMap::new(),
        };
        // "." and the parent's entry
        Self::with_kind(id, NodeType::Directory, 2, perms, now, NodeKind::Directory(dir))
    }

    /// Create a new regular file node
    pub fn new_file(id: NodeId, perms: u32, now: u64) -> Self {
        Self::with_kind(id, NodeType::File, 1, perms, now, NodeKind::File(Vec::new()))
    }

    /// Create a new symlink node
    pub fn new_symlink(id: NodeId, target: &str, perms: u32, now: u64) -> Self {
        Self::with_kind(
            id,
            NodeType::Symlink,
            1,
            perms,
            now,
            NodeKind::Symlink(String::from(target)),
        )
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn is_dir(&self) -> bool {
        self.node_type == NodeType::Directory
    }

    pub fn stat(&self) -> Stat {
        let data = self.data.lock();
        let size = match &data.kind {
            NodeKind::File(bytes) => bytes.len() as u64,
            NodeKind::Directory(dir) => dir.entries.len() as u64,
            NodeKind::Symlink(target) => target.len() as u64,
        };

        Stat {
            device: 0,
            node: self.id,
            mode: FileMode::from_type(self.node_type, data.perms),
            nlink: self.nlink.load(Ordering::SeqCst),
            uid: data.uid,
            gid: data.gid,
            size,
            block_size: BLOCK_SIZE,
            atime: data.atime,
            mtime: data.mtime,
            ctime: data.ctime,
        }
    }

    /// Copy file bytes at `pos` into `buf`
    pub fn read_at(&self, pos: u64, buf: &mut [u8], now: u64) -> FsResult<usize> {
        let mut data = self.data.lock();
        let bytes = match &data.kind {
            NodeKind::File(bytes) => bytes,
            NodeKind::Directory(_) => return Err(FsError::IsADirectory),
            NodeKind::Symlink(_) => return Err(FsError::InvalidArgument),
        };

        let start = usize::try_from(pos).map_err(|_| FsError::InvalidArgument)?;
        if start >= bytes.len() {
            return Ok(0);
        }
        let count = buf.len().min(bytes.len() - start);
        buf[..count].copy_from_slice(&bytes[start..start + count]);
        data.atime = now;
        Ok(count)
    }

    /// Write `buf` at `pos`, zero-filling any gap
    pub fn write_at(&self, pos: u64, buf: &[u8], now: u64) -> FsResult<usize> {
        let mut data = self.data.lock();
        let bytes = match &mut data.kind {
            NodeKind::File(bytes) => bytes,
            NodeKind::Directory(_) => return Err(FsError::IsADirectory),
            NodeKind::Symlink(_) => return Err(FsError::InvalidArgument),
        };

        let start = usize::try_from(pos).map_err(|_| FsError::InvalidArgument)?;
        let end = start.checked_add(buf.len()).ok_or(FsError::InvalidArgument)?;
        if end > bytes.len() {
            bytes.try_reserve(end - bytes.len()).map_err(|_| FsError::NoMemory)?;
            bytes.resize(end, 0);
        }
        bytes[start..end].copy_from_slice(buf);
        data.mtime = now;
        Ok(buf.len())
    }

    /// Resize a regular file
    pub fn truncate(&self, size: u64, now: u64) -> FsResult<()> {
        let size = usize::try_from(size).map_err(|_| FsError::InvalidArgument)?;
        let mut data = self.data.lock();
        match &mut data.kind {
            NodeKind::File(bytes) => {
                if size > bytes.len() {
                    bytes.try_reserve(size - bytes.len()).map_err(|_| FsError::NoMemory)?;
                }
                bytes.resize(size, 0);
            }
            NodeKind::Directory(_) => return Err(FsError::IsADirectory),
            NodeKind::Symlink(_) => return Err(FsError::InvalidArgument),
        }
        data.mtime = now;
        Ok(())
    }
}

impl NodeData {
    pub fn directory(&self) -> FsResult<&DirectoryData> {
        match &self.kind {
            NodeKind::Directory(dir) => Ok(dir),
            _ => Err(FsError::NotADirectory),
        }
    }

    pub fn directory_mut(&mut self) -> FsResult<&mut DirectoryData> {
        match &mut self.kind {
            NodeKind::Directory(dir) => Ok(dir),
            _ => Err(FsError::NotADirectory),
        }
    }
}

/// View a module handle as a rootfs node
pub fn ram(node: &FsNode) -> FsResult<&RamNode> {
    node.downcast_ref::<RamNode>().ok_or(FsError::InvalidArgument)
}
