//! Virtual File System (VFS) Layer
//!
//! The switch layer between callers and filesystem modules. It turns paths
//! into reference-counted vnodes, routes every operation on a vnode to the
//! module that owns it, and keeps that routing correct across mounts.
//!
//! All state lives in one `Vfs` value. Its locks, in acquisition order:
//!
//! 1. `mount_op` serializes whole mount and unmount transactions.
//! 2. A covered vnode's cover link (`covered_by`), written only by mount and
//!    unmount and read while entering a mounted filesystem.
//! 3. The node-cache table lock.
//! 4. The mount-table lock, taken under the cache lock only to find the
//!    mount owning an identity being faulted in.
//! 5. A mount's vnode membership set.
//!
//! Module hooks are never called with the cache or mount-table lock held.

pub mod cache;
pub mod error;
pub mod file;
pub mod io_context;
pub mod module;
pub mod mount;
pub mod ops;
pub mod path;
pub mod registry;
pub mod types;
pub mod vnode;

use alloc::sync::Arc;
use spin::Mutex;

use crate::config::VfsConfig;

pub use cache::NodeCache;
pub use error::{FsError, FsResult};
pub use file::{DescriptorKind, FdTable, FileDescriptor};
pub use io_context::IoContext;
pub use module::{Created, FilesystemModule, Mounted, Volume, VolumeContext};
pub use mount::{Mount, MountTable};
pub use registry::{ModuleLoader, ModuleRegistry};
pub use types::*;
pub use vnode::{VnodeRef, VnodeState};

/// One virtual filesystem instance
pub struct Vfs {
    config: VfsConfig,
    registry: ModuleRegistry,
    mounts: Arc<MountTable>,
    cache: Arc<NodeCache>,
    mount_op: Mutex<()>,
}

impl Vfs {
    pub fn new(config: VfsConfig) -> Self {
        let mounts = Arc::new(MountTable::new());
        let cache = NodeCache::new(mounts.clone(), config.busy_wait);
        Self {
            config,
            registry: ModuleRegistry::new(),
            mounts,
            cache,
            mount_op: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &VfsConfig {
        &self.config
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn mounts(&self) -> &MountTable {
        &self.mounts
    }

    pub fn cache(&self) -> &NodeCache {
        &self.cache
    }

    /// A new reference to the root directory
    ///
    /// Taken through the node cache, so it fails with `NotFound` once the root
    /// mount has started unmounting.
    pub fn root(&self) -> FsResult<VnodeRef> {
        let mount = self.mounts.root_mount()?;
        self.cache
            .acquire_cached(VnodeKey::new(mount.id(), mount.root_node()))
    }
}

impl Drop for Vfs {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            crate::log_warn!("vfs", "mounts still busy at teardown: {}", err);
        }
    }
}
