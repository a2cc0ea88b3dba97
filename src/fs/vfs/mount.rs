//! Mount Table
//!
//! This module tracks every mounted filesystem instance and implements the
//! mount and unmount transactions. A mount holds one reference on its root
//! vnode and one on the vnode it covers. Unmounting proves the mount idle
//! under the node-cache lock before any of that is torn down.

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use spin::{Mutex, RwLock};

use super::error::{optional, FsError, FsResult};
use super::module::{FilesystemModule, Mounted, Volume, VolumeContext};
use super::types::{FsInfo, MountId, NodeId, NodeType, VnodeKey};
use super::vnode::VnodeRef;
use super::Vfs;

/// One attached filesystem instance
pub struct Mount {
    id: MountId,
    module: Arc<dyn FilesystemModule>,
    volume: Arc<dyn Volume>,
    /// Path the mount was attached at
    mount_point: String,
    device: Option<String>,
    root_node: NodeId,
    root: Mutex<Option<VnodeRef>>,
    covers: Mutex<Option<VnodeRef>>,
    /// Node ids of this mount's cached vnodes; guarded by the cache lock
    pub(super) vnodes: Mutex<BTreeSet<NodeId>>,
    unmounting: AtomicBool,
}

impl Mount {
    fn new(
        id: MountId,
        module: Arc<dyn FilesystemModule>,
        mounted: Mounted,
        mount_point: &str,
        device: Option<&str>,
    ) -> Self {
        Self {
            id,
            module,
            volume: mounted.volume,
            mount_point: mount_point.to_string(),
            device: device.map(|d| d.to_string()),
            root_node: mounted.root,
            root: Mutex::new(None),
            covers: Mutex::new(None),
            vnodes: Mutex::new(BTreeSet::new()),
            unmounting: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> MountId {
        self.id
    }

    pub fn module(&self) -> &Arc<dyn FilesystemModule> {
        &self.module
    }

    pub fn volume(&self) -> &Arc<dyn Volume> {
        &self.volume
    }

    pub fn mount_point(&self) -> &str {
        &self.mount_point
    }

    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    pub fn root_node(&self) -> NodeId {
        self.root_node
    }

    /// A new reference to the mount's root vnode
    ///
    /// The clone bypasses the cache lock, so callers must hold something that
    /// excludes unmount: the mount point's cover link, or `mount_op`.
    pub(super) fn root(&self) -> Option<VnodeRef> {
        self.root.lock().clone()
    }

    /// A new reference to the vnode this mount covers
    pub fn covers(&self) -> Option<VnodeRef> {
        self.covers.lock().clone()
    }

    pub fn is_unmounting(&self) -> bool {
        self.unmounting.load(Ordering::Acquire)
    }

    pub(super) fn set_unmounting(&self, unmounting: bool) {
        self.unmounting.store(unmounting, Ordering::Release);
    }

    /// Number of cached vnodes belonging to this mount
    pub fn vnode_count(&self) -> usize {
        self.vnodes.lock().len()
    }
}

impl fmt::Debug for Mount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mount")
            .field("id", &self.id)
            .field("module", &self.module.name())
            .field("mount_point", &self.mount_point)
            .field("root_node", &self.root_node)
            .field("unmounting", &self.is_unmounting())
            .finish()
    }
}

struct MountTableInner {
    /// Live mounts by id
    mounts: BTreeMap<MountId, Arc<Mount>>,
    /// Next mount id; ids start at 1 and are never reused
    next_id: MountId,
}

/// Registry of mounted filesystems
///
/// Mounts are added and removed only by `Vfs::mount` and `Vfs::unmount`;
/// everything public here is a read-only view.
pub struct MountTable {
    /// Map from mount id to mount
    inner: RwLock<MountTableInner>,
    /// The mount attached at "/", once there is one
    root: RwLock<Option<Arc<Mount>>>,
}

impl MountTable {
    /// Create an empty mount table
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MountTableInner {
                mounts: BTreeMap::new(),
                next_id: 1,
            }),
            root: RwLock::new(None),
        }
    }

    fn allocate_id(&self) -> MountId {
        let mut inner = self.inner.write();
        let id = inner.next_id;
        inner.next_id += 1;
        id
    }

    fn insert(&self, mount: Arc<Mount>) {
        self.inner.write().mounts.insert(mount.id(), mount);
    }

    fn remove(&self, id: MountId) -> Option<Arc<Mount>> {
        let removed = self.inner.write().mounts.remove(&id);
        removed
    }

    /// Get a mount by id
    ///
    /// # Errors
    /// `NotFound` if no mount with that id is attached.
    pub fn lookup_by_id(&self, id: MountId) -> FsResult<Arc<Mount>> {
        self.inner
            .read()
            .mounts
            .get(&id)
            .cloned()
            .ok_or(FsError::NotFound)
    }

    /// The mount attached at "/"
    ///
    /// # Errors
    /// `NotFound` before the first mount and after shutdown.
    pub fn root_mount(&self) -> FsResult<Arc<Mount>> {
        self.root.read().clone().ok_or(FsError::NotFound)
    }

    /// Iterate mount ids in ascending order
    ///
    /// Returns the first mount id at or after `*cookie` and advances the cookie
    /// past it.
    pub fn next_device(&self, cookie: &mut MountId) -> FsResult<MountId> {
        let inner = self.inner.read();
        let id = inner
            .mounts
            .range(*cookie..)
            .map(|(&id, _)| id)
            .next()
            .ok_or(FsError::NotFound)?;
        *cookie = id + 1;
        Ok(id)
    }

    /// All mounts, ordered by id
    ///
    /// The list is a copy; mounts may come and go once it is returned.
    pub fn snapshot(&self) -> Vec<Arc<Mount>> {
        self.inner.read().mounts.values().cloned().collect()
    }

    /// Number of attached mounts, the root mount included
    pub fn len(&self) -> usize {
        self.inner.read().mounts.len()
    }

    /// No filesystem is mounted
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MountTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Vfs {
    /// Attach a filesystem
    ///
    /// The first mount must target "/". Every later mount covers an existing
    /// directory that is not itself the root of a mount.
    pub fn mount(
        &self,
        path: &str,
        device: Option<&str>,
        module_name: &str,
        args: Option<&str>,
    ) -> FsResult<MountId> {
        if module_name.is_empty() || path.is_empty() {
            return Err(FsError::InvalidArgument);
        }

        let _op = self.mount_op.lock();
        let module = self.registry.get(module_name)?;
        let result = self.mount_locked(module, path, device, args);
        if result.is_err() {
            self.registry.put(module_name);
        }
        result
    }

    fn mount_locked(
        &self,
        module: Arc<dyn FilesystemModule>,
        path: &str,
        device: Option<&str>,
        args: Option<&str>,
    ) -> FsResult<MountId> {
        let covered = match self.mounts.root_mount() {
            Err(_) => {
                if path != "/" {
                    return Err(FsError::InvalidArgument);
                }
                None
            }
            Ok(_) => {
                let vnode = self.path_to_vnode(None, path, true)?;
                let stat = vnode.volume().read_stat(vnode.fs_node())?;
                if stat.mode.node_type() != Some(NodeType::Directory) {
                    return Err(FsError::NotADirectory);
                }
                if vnode.is_mount_root() {
                    return Err(FsError::AlreadyMountPoint);
                }
                Some(vnode)
            }
        };

        let id = self.mounts.allocate_id();
        let ctx = VolumeContext::new(id, Arc::downgrade(&self.cache));
        let mounted = module.mount(ctx, device, args)?;
        let mount = Arc::new(Mount::new(id, module, mounted, path, device));
        self.mounts.insert(mount.clone());

        let root = match self.cache.fetch(VnodeKey::new(id, mount.root_node())) {
            Ok(root) => root,
            Err(err) => {
                self.discard_mount(&mount);
                return Err(err);
            }
        };
        *mount.root.lock() = Some(root);

        match covered {
            Some(covered) => {
                let mut covered_by = covered.vnode().covered_by.write();
                if covered_by.is_some() {
                    drop(covered_by);
                    drop(mount.root.lock().take());
                    self.discard_mount(&mount);
                    return Err(FsError::AlreadyMountPoint);
                }
                *covered_by = Some(mount.clone());
                drop(covered_by);
                *mount.covers.lock() = Some(covered);
            }
            None => *self.mounts.root.write() = Some(mount.clone()),
        }

        crate::log_info!(
            "vfs",
            "mounted {} at {} (mount {}, device {})",
            mount.module().name(),
            path,
            id,
            device.unwrap_or("none")
        );
        Ok(id)
    }

    /// Undo a mount that never became visible
    fn discard_mount(&self, mount: &Arc<Mount>) {
        drop(self.mounts.remove(mount.id()));
        if let Err(err) = optional(mount.volume().unmount()) {
            crate::log_warn!("vfs", "unmount of failed mount {} reported {}", mount.id(), err);
        }
    }

    /// Detach the filesystem whose root `path` resolves to
    pub fn unmount(&self, path: &str) -> FsResult<()> {
        let _op = self.mount_op.lock();
        let vnode = self.path_to_vnode(None, path, true)?;
        if !vnode.is_mount_root() {
            return Err(FsError::NotAMountPoint);
        }

        let mount = vnode.mount().clone();
        if mount.covers.lock().is_none() {
            // The root mount only goes away with the whole VFS
            return Err(FsError::InvalidArgument);
        }
        self.unmount_locked(&mount, Some(vnode))
    }

    /// Tear down a mount; `held` is the caller's own reference to its root
    fn unmount_locked(&self, mount: &Arc<Mount>, held: Option<VnodeRef>) -> FsResult<()> {
        let root_refs = 1 + usize::from(held.is_some());
        let covers = mount.covers();

        {
            // Lock order: cover link, then node cache
            let mut covered_by = covers.as_ref().map(|c| c.vnode().covered_by.write());
            self.cache.begin_unmount(mount, root_refs)?;
            if let Some(link) = covered_by.as_mut() {
                **link = None;
            }
        }

        drop(covers);
        drop(mount.covers.lock().take());
        drop(held);
        drop(mount.root.lock().take());

        drop(self.mounts.remove(mount.id()));
        {
            let mut root = self.mounts.root.write();
            if root.as_ref().is_some_and(|r| Arc::ptr_eq(r, mount)) {
                *root = None;
            }
        }

        if let Err(err) = optional(mount.volume().unmount()) {
            crate::log_warn!("vfs", "module unmount of mount {} reported {}", mount.id(), err);
        }
        self.registry.put(mount.module().name());

        crate::log_info!(
            "vfs",
            "unmounted {} from {} (mount {})",
            mount.module().name(),
            mount.mount_point(),
            mount.id()
        );
        Ok(())
    }

    /// Unmount everything, newest first, ending with the root mount
    pub fn shutdown(&self) -> FsResult<()> {
        let _op = self.mount_op.lock();
        let mut mounts = self.mounts.snapshot();
        mounts.sort_by(|a, b| b.id().cmp(&a.id()));

        for mount in mounts.iter() {
            if mount.covers.lock().is_some() {
                self.unmount_locked(mount, None)?;
            }
        }
        for mount in mounts.iter() {
            if mount.covers.lock().is_none() {
                self.unmount_locked(mount, None)?;
            }
        }
        Ok(())
    }

    /// Flush one mounted volume
    ///
    /// Cached vnodes that carry a page cache are flushed node by node first,
    /// then the volume's own sync hook runs. Hooks the module lacks are
    /// skipped.
    ///
    /// # Errors
    /// `NotFound` for an unknown device; otherwise the first module error.
    pub fn sync_device(&self, device: MountId) -> FsResult<()> {
        let mount = self.mounts.lookup_by_id(device)?;
        let members: Vec<NodeId> = mount.vnodes.lock().iter().copied().collect();

        for node in members {
            // Vnodes that went away since the snapshot need no flushing
            let Ok(vnode) = self.cache.acquire_cached(VnodeKey::new(device, node)) else {
                continue;
            };
            if vnode.page_cache().is_some() {
                optional(mount.volume().fsync(vnode.fs_node(), false))?;
            }
        }

        optional(mount.volume().sync())?;
        crate::log_debug!("vfs", "synced mount {}", device);
        Ok(())
    }

    /// Flush every mounted volume, ignoring ones without a sync hook
    pub fn sync_all(&self) {
        for mount in self.mounts.snapshot() {
            if let Err(err) = optional(mount.volume().sync()) {
                crate::log_warn!("vfs", "sync of mount {} failed: {}", mount.id(), err);
            }
        }
    }

    /// Describe a mounted volume
    ///
    /// Identity fields come from the mount; the module fills in the rest when
    /// it has a `read_fs_info` hook.
    pub fn read_fs_info(&self, device: MountId) -> FsResult<FsInfo> {
        let mount = self.mounts.lookup_by_id(device)?;
        let mut info = FsInfo {
            device,
            root: mount.root_node(),
            module_name: mount.module().name().to_string(),
            device_name: mount.device().unwrap_or("").to_string(),
            ..FsInfo::default()
        };
        optional(mount.volume().read_fs_info(&mut info))?;
        Ok(info)
    }

    /// Enumerate mounts; see `MountTable::next_device`
    pub fn next_device(&self, cookie: &mut MountId) -> FsResult<MountId> {
        self.mounts.next_device(cookie)
    }
}
