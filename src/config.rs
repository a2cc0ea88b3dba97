//! Configuration constants for the VFS layer

use crate::sync::WaitPolicy;

/// Maximum number of symlinks followed while resolving one path
/// A chain of exactly this many links resolves; one more fails with SymlinkLoop
pub const MAX_SYMLINK_DEPTH: usize = 16;

/// Maximum number of parent steps taken when turning a vnode back into a path
pub const MAX_PATH_DEPTH: usize = 256;

/// Maximum path length accepted or produced, in bytes
pub const MAX_PATH_LEN: usize = 1024;

/// Maximum length of a single path component, in bytes
pub const MAX_NAME_LEN: usize = 255;

/// Number of descriptor slots in a fresh I/O context
pub const DEFAULT_FD_TABLE_SIZE: usize = 128;

/// Largest size a descriptor table may be resized to
pub const MAX_FD_TABLE_SIZE: usize = 8192;

/// Number of entries requested per module call when scanning a directory
pub const READ_DIR_BATCH: usize = 32;

/// Runtime configuration of a `Vfs` instance
#[derive(Debug, Clone, Copy)]
pub struct VfsConfig {
    pub max_symlink_depth: usize,
    pub max_path_depth: usize,
    pub max_path_len: usize,
    pub max_name_len: usize,
    pub fd_table_size: usize,
    /// How callers wait for a vnode that is under construction or teardown
    pub busy_wait: WaitPolicy,
}

impl VfsConfig {
    pub const fn new() -> Self {
        Self {
            max_symlink_depth: MAX_SYMLINK_DEPTH,
            max_path_depth: MAX_PATH_DEPTH,
            max_path_len: MAX_PATH_LEN,
            max_name_len: MAX_NAME_LEN,
            fd_table_size: DEFAULT_FD_TABLE_SIZE,
            busy_wait: WaitPolicy::unbounded(),
        }
    }

    pub const fn with_busy_wait(mut self, policy: WaitPolicy) -> Self {
        self.busy_wait = policy;
        self
    }

    pub const fn with_max_symlink_depth(mut self, depth: usize) -> Self {
        self.max_symlink_depth = depth;
        self
    }

    pub const fn with_fd_table_size(mut self, size: usize) -> Self {
        self.fd_table_size = size;
        self
    }
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self::new()
    }
}
