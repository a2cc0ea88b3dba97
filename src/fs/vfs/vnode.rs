//! Vnodes
//!
//! A `Vnode` is the in-memory handle for one filesystem object while it is
//! cached. Callers never hold a `Vnode` directly: they hold a `VnodeRef`,
//! which owns exactly one reference. Cloning a `VnodeRef` acquires another
//! reference and dropping it releases one through the owning cache.

use alloc::sync::{Arc, Weak};
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use spin::{Mutex, Once, RwLock};

use super::cache::NodeCache;
use super::module::Volume;
use super::mount::Mount;
use super::types::{FsNode, MountId, NodeId, PageCacheHandle, VnodeKey};

/// Vnode lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VnodeState {
    /// Registered in the cache, module handle being materialized
    Constructing = 0,
    /// Safe to hand out
    Active = 1,
    /// Reference count hit zero, module being notified
    Dying = 2,
    /// Removed from the cache
    Dead = 3,
}

impl VnodeState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => VnodeState::Constructing,
            1 => VnodeState::Active,
            2 => VnodeState::Dying,
            _ => VnodeState::Dead,
        }
    }
}

/// Cached filesystem node
pub struct Vnode {
    key: VnodeKey,
    mount: Arc<Mount>,
    cache: Weak<NodeCache>,
    node: Once<FsNode>,
    pub(super) ref_count: AtomicUsize,
    state: AtomicU8,
    delete_pending: AtomicBool,
    /// Mount attached on top of this vnode, if it is a mount point
    pub(super) covered_by: RwLock<Option<Arc<Mount>>>,
    page_cache: Mutex<Option<PageCacheHandle>>,
    /// Directory this vnode was last reached through by name
    parent: Mutex<Option<NodeId>>,
}

impl Vnode {
    /// A vnode in the `Constructing` state with no references
    pub(super) fn new(key: VnodeKey, mount: Arc<Mount>, cache: Weak<NodeCache>) -> Self {
        Self {
            key,
            mount,
            cache,
            node: Once::new(),
            ref_count: AtomicUsize::new(0),
            state: AtomicU8::new(VnodeState::Constructing as u8),
            delete_pending: AtomicBool::new(false),
            covered_by: RwLock::new(None),
            page_cache: Mutex::new(None),
            parent: Mutex::new(None),
        }
    }

    pub fn key(&self) -> VnodeKey {
        self.key
    }

    pub fn mount(&self) -> &Arc<Mount> {
        &self.mount
    }

    pub fn state(&self) -> VnodeState {
        VnodeState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(super) fn set_state(&self, state: VnodeState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Under construction or teardown
    pub fn is_busy(&self) -> bool {
        matches!(self.state(), VnodeState::Constructing | VnodeState::Dying)
    }

    pub(super) fn set_node(&self, node: FsNode) {
        self.node.call_once(|| node);
    }

    pub(super) fn node(&self) -> Option<&FsNode> {
        self.node.get()
    }

    pub fn is_delete_pending(&self) -> bool {
        self.delete_pending.load(Ordering::Acquire)
    }

    pub(super) fn set_delete_pending(&self, pending: bool) {
        self.delete_pending.store(pending, Ordering::Release);
    }

    pub(super) fn take_page_cache(&self) -> Option<PageCacheHandle> {
        self.page_cache.lock().take()
    }
}

impl fmt::Debug for Vnode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vnode")
            .field("mount", &self.key.mount)
            .field("node", &self.key.node)
            .field("refs", &self.ref_count.load(Ordering::Relaxed))
            .field("state", &self.state())
            .field("delete_pending", &self.is_delete_pending())
            .finish()
    }
}

/// One counted reference to an active vnode
pub struct VnodeRef {
    vnode: Arc<Vnode>,
}

impl VnodeRef {
    /// Wrap a vnode whose reference count already accounts for this handle
    pub(super) fn adopt(vnode: Arc<Vnode>) -> Self {
        Self { vnode }
    }

    pub(super) fn vnode(&self) -> &Arc<Vnode> {
        &self.vnode
    }

    pub fn key(&self) -> VnodeKey {
        self.vnode.key
    }

    pub fn mount_id(&self) -> MountId {
        self.vnode.key.mount
    }

    pub fn node_id(&self) -> NodeId {
        self.vnode.key.node
    }

    pub fn mount(&self) -> &Arc<Mount> {
        &self.vnode.mount
    }

    pub fn volume(&self) -> &Arc<dyn Volume> {
        self.vnode.mount.volume()
    }

    /// The module's handle for this node
    pub fn fs_node(&self) -> &FsNode {
        match self.vnode.node() {
            Some(node) => node,
            None => unreachable!("vnode {:?} handed out before materialization", self.vnode.key),
        }
    }

    pub fn ref_count(&self) -> usize {
        self.vnode.ref_count.load(Ordering::Acquire)
    }

    pub fn is_delete_pending(&self) -> bool {
        self.vnode.is_delete_pending()
    }

    /// This vnode is the root of the mount it belongs to
    pub fn is_mount_root(&self) -> bool {
        self.vnode.key.node == self.vnode.mount.root_node()
    }

    /// The mount attached on top of this vnode
    pub fn covered_by(&self) -> Option<Arc<Mount>> {
        self.vnode.covered_by.read().clone()
    }

    /// Root of the mount covering this vnode
    ///
    /// The covering mount's root is acquired while the cover link is held,
    /// so an unmount that has already cleared the link cannot race with it.
    pub fn covering_root(&self) -> Option<VnodeRef> {
        let covered_by = self.vnode.covered_by.read();
        covered_by.as_ref().and_then(|mount| mount.root())
    }

    pub fn set_page_cache(&self, handle: Option<PageCacheHandle>) -> Option<PageCacheHandle> {
        core::mem::replace(&mut *self.vnode.page_cache.lock(), handle)
    }

    pub fn page_cache(&self) -> Option<PageCacheHandle> {
        self.vnode.page_cache.lock().clone()
    }

    /// Directory, in the same mount, that last named this vnode
    ///
    /// Only a hint: the entry may since have been renamed or unlinked.
    pub fn parent_hint(&self) -> Option<NodeId> {
        *self.vnode.parent.lock()
    }

    pub(super) fn set_parent_hint(&self, dir: NodeId) {
        *self.vnode.parent.lock() = Some(dir);
    }

    pub fn ptr_eq(a: &VnodeRef, b: &VnodeRef) -> bool {
        Arc::ptr_eq(&a.vnode, &b.vnode)
    }
}

impl Clone for VnodeRef {
    fn clone(&self) -> Self {
        // Holding a reference keeps the count above zero, so no lock is needed
        self.vnode.ref_count.fetch_add(1, Ordering::AcqRel);
        Self {
            vnode: self.vnode.clone(),
        }
    }
}

impl Drop for VnodeRef {
    fn drop(&mut self) {
        if let Some(cache) = self.vnode.cache.upgrade() {
            cache.put(&self.vnode);
        }
    }
}

impl PartialEq for VnodeRef {
    fn eq(&self, other: &Self) -> bool {
        Self::ptr_eq(self, other)
    }
}

impl Eq for VnodeRef {}

impl fmt::Debug for VnodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.vnode.fmt(f)
    }
}
