//! Shared VFS Types
//!
//! Identities, metadata, flags and directory entries exchanged between the
//! switch layer, filesystem modules and callers.

use alloc::string::String;
use alloc::sync::Arc;
use core::any::Any;

use bitflags::bitflags;

/// Mount identifier, assigned monotonically and never reused
pub type MountId = u32;

/// Filesystem-local node identifier
pub type NodeId = u64;

/// Module-private node handle; the core never looks inside
pub type FsNode = Arc<dyn Any + Send + Sync>;

/// Module-private per-open state
pub type FsCookie = Arc<dyn Any + Send + Sync>;

/// Opaque page-cache object carried on a vnode
pub type PageCacheHandle = Arc<dyn Any + Send + Sync>;

/// Identity of a cached vnode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VnodeKey {
    pub mount: MountId,
    pub node: NodeId,
}

impl VnodeKey {
    pub const fn new(mount: MountId, node: NodeId) -> Self {
        Self { mount, node }
    }
}

/// Type tag a module reports from lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    File,
    Directory,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
}

/// File mode bits in POSIX layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct FileMode(pub u32);

impl FileMode {
    // File types
    pub const S_IFMT: u32 = 0o170000;   // File type mask
    pub const S_IFREG: u32 = 0o100000;  // Regular file
    pub const S_IFDIR: u32 = 0o040000;  // Directory
    pub const S_IFLNK: u32 = 0o120000;  // Symbolic link
    pub const S_IFCHR: u32 = 0o020000;  // Character device
    pub const S_IFBLK: u32 = 0o060000;  // Block device
    pub const S_IFIFO: u32 = 0o010000;  // FIFO
    pub const S_IFSOCK: u32 = 0o140000; // Socket

    pub const fn new(mode: u32) -> Self {
        Self(mode)
    }

    /// Build a mode from a node type and permission bits
    pub const fn from_type(node_type: NodeType, perms: u32) -> Self {
        let kind = match node_type {
            NodeType::File => Self::S_IFREG,
            NodeType::Directory => Self::S_IFDIR,
            NodeType::Symlink => Self::S_IFLNK,
            NodeType::CharDevice => Self::S_IFCHR,
            NodeType::BlockDevice => Self::S_IFBLK,
            NodeType::Fifo => Self::S_IFIFO,
            NodeType::Socket => Self::S_IFSOCK,
        };
        Self(kind | (perms & 0o7777))
    }

    pub const fn file_type(&self) -> u32 {
        self.0 & Self::S_IFMT
    }

    pub const fn permissions(&self) -> u32 {
        self.0 & 0o7777
    }

    pub const fn is_regular(&self) -> bool {
        self.file_type() == Self::S_IFREG
    }

    pub const fn is_directory(&self) -> bool {
        self.file_type() == Self::S_IFDIR
    }

    pub const fn is_symlink(&self) -> bool {
        self.file_type() == Self::S_IFLNK
    }

    pub fn node_type(&self) -> Option<NodeType> {
        match self.file_type() {
            Self::S_IFREG => Some(NodeType::File),
            Self::S_IFDIR => Some(NodeType::Directory),
            Self::S_IFLNK => Some(NodeType::Symlink),
            Self::S_IFCHR => Some(NodeType::CharDevice),
            Self::S_IFBLK => Some(NodeType::BlockDevice),
            Self::S_IFIFO => Some(NodeType::Fifo),
            Self::S_IFSOCK => Some(NodeType::Socket),
            _ => None,
        }
    }
}

/// Node metadata
///
/// Modules fill everything except `device` and `node`, which the core
/// overwrites with the vnode's identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stat {
    pub device: MountId,
    pub node: NodeId,
    pub mode: FileMode,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub block_size: u32,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
}

bitflags! {
    /// Fields selected by `write_stat`
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatMask: u32 {
        const MODE  = 1 << 0;
        const UID   = 1 << 1;
        const GID   = 1 << 2;
        const SIZE  = 1 << 3;
        const ATIME = 1 << 4;
        const MTIME = 1 << 5;
    }
}

bitflags! {
    /// Open and create flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const READ       = 1 << 0;
        const WRITE      = 1 << 1;
        const CREATE     = 1 << 2;
        const EXCLUSIVE  = 1 << 3;
        const TRUNCATE   = 1 << 4;
        const APPEND     = 1 << 5;
        const CLOEXEC    = 1 << 6;
        /// Do not follow a symlink in the final component
        const NOTRAVERSE = 1 << 7;

        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

bitflags! {
    /// Access check mode
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessMode: u32 {
        const EXECUTE = 1 << 0;
        const WRITE   = 1 << 1;
        const READ    = 1 << 2;
    }
}

/// One directory entry
///
/// Modules report `node` and `name`; the core fills the device fields and
/// rewrites identities across mount boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub device: MountId,
    pub node: NodeId,
    pub parent_device: MountId,
    pub parent_node: NodeId,
    pub name: String,
}

impl DirEntry {
    pub fn new(node: NodeId, name: &str) -> Self {
        Self {
            device: 0,
            node,
            parent_device: 0,
            parent_node: 0,
            name: String::from(name),
        }
    }
}

/// Mounted volume information
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FsInfo {
    pub device: MountId,
    pub root: NodeId,
    pub module_name: String,
    pub device_name: String,
    pub volume_name: String,
    pub block_size: u32,
    pub total_blocks: u64,
    pub free_blocks: u64,
    pub total_nodes: u64,
    pub free_nodes: u64,
}

/// Seek origin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFrom {
    Start,
    Current,
    End,
}
