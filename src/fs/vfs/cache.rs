//! Node Cache
//!
//! Global table of live vnodes keyed by (mount, node). The table lock guards
//! membership, every vnode's state and every transition of a reference count
//! to or from zero. Module hooks run with the lock released; a vnode stays in
//! the table in a busy state for the duration so that concurrent callers wait
//! on it instead of constructing a second copy.

use alloc::sync::{Arc, Weak};
use core::sync::atomic::Ordering;
use hashbrown::HashMap;
use spin::Mutex;

use super::error::{optional, FsError, FsResult};
use super::mount::{Mount, MountTable};
use super::types::{FsNode, VnodeKey};
use super::vnode::{Vnode, VnodeRef, VnodeState};
use crate::sync::{wait_until, WaitPolicy};

/// Reference-counted vnode cache
pub struct NodeCache {
    /// Every cached vnode, in any state
    table: Mutex<HashMap<VnodeKey, Arc<Vnode>>>,
    /// Used to find the mount owning an identity being faulted in
    mounts: Arc<MountTable>,
    /// How callers wait out a busy vnode
    wait: WaitPolicy,
    /// Handed to each vnode so its last `VnodeRef` can release through us
    this: Weak<NodeCache>,
}

impl NodeCache {
    /// Create an empty cache over `mounts`
    pub fn new(mounts: Arc<MountTable>, wait: WaitPolicy) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            table: Mutex::new(HashMap::new()),
            mounts,
            wait,
            this: this.clone(),
        })
    }

    /// Wait for a busy vnode to settle, spinning on its own state
    fn wait_settled(&self, vnode: &Arc<Vnode>) -> FsResult<()> {
        wait_until(&self.wait, || !vnode.is_busy())?;
        Ok(())
    }

    /// Acquire a vnode that is already cached
    ///
    /// Never calls into a module. A busy vnode is waited out first.
    ///
    /// # Errors
    /// * `NotFound` - not cached, or its mount is unmounting
    /// * `TimedOut` - the wait policy gave up on a busy vnode
    pub fn acquire_cached(&self, key: VnodeKey) -> FsResult<VnodeRef> {
        loop {
            let table = self.table.lock();
            let vnode = table.get(&key).cloned().ok_or(FsError::NotFound)?;
            if vnode.is_busy() {
                drop(table);
                self.wait_settled(&vnode)?;
                continue;
            }
            if vnode.mount().is_unmounting() {
                return Err(FsError::NotFound);
            }

            vnode.ref_count.fetch_add(1, Ordering::AcqRel);
            return Ok(VnodeRef::adopt(vnode));
        }
    }

    /// Acquire a vnode, faulting it in from its module on a miss
    ///
    /// Concurrent fetches of one identity construct it once; the others wait
    /// for the first and share the result, or see `NotFound` if it failed.
    ///
    /// # Errors
    /// * `NotFound` - unknown or unmounting mount
    /// * `TimedOut` - the wait policy gave up on a busy vnode
    /// * any error from the module's `read_node`, unchanged
    pub fn fetch(&self, key: VnodeKey) -> FsResult<VnodeRef> {
        let (vnode, mount) = loop {
            let mut table = self.table.lock();
            if let Some(existing) = table.get(&key).cloned() {
                if existing.is_busy() {
                    drop(table);
                    self.wait_settled(&existing)?;
                    continue;
                }
                if existing.mount().is_unmounting() {
                    return Err(FsError::NotFound);
                }

                existing.ref_count.fetch_add(1, Ordering::AcqRel);
                return Ok(VnodeRef::adopt(existing));
            }

            // Lock order: node cache, then mount table
            let mount = self.mounts.lookup_by_id(key.mount)?;
            if mount.is_unmounting() {
                return Err(FsError::NotFound);
            }

            // Publish the busy entry before calling the module
            let vnode = Arc::new(Vnode::new(key, mount.clone(), self.this.clone()));
            table.insert(key, vnode.clone());
            mount.vnodes.lock().insert(key.node);
            break (vnode, mount);
        };

        crate::log_trace!("vfs", "faulting in vnode {}:{}", key.mount, key.node);
        match mount.volume().read_node(key.node) {
            Ok(node) => {
                vnode.set_node(node);
                let _table = self.table.lock();
                vnode.ref_count.store(1, Ordering::Release);
                vnode.set_state(VnodeState::Active);
                Ok(VnodeRef::adopt(vnode))
            }
            Err(err) => {
                let mut table = self.table.lock();
                table.remove(&key);
                mount.vnodes.lock().remove(&key.node);
                vnode.set_state(VnodeState::Dead);
                crate::log_debug!(
                    "vfs",
                    "vnode {}:{} failed to materialize: {}",
                    key.mount,
                    key.node,
                    err
                );
                Err(err)
            }
        }
    }

    /// Seed the cache with a node a module just created
    ///
    /// The returned reference is the node's only one. The module must call
    /// this before the node is reachable through `lookup`.
    ///
    /// # Panics
    /// If the identity is already cached.
    pub fn register_new(&self, key: VnodeKey, node: FsNode) -> FsResult<VnodeRef> {
        let mut table = self.table.lock();
        if let Some(existing) = table.get(&key) {
            crate::log_error!("vfs", "identity collision on new vnode: {:?}", existing);
            drop(table);
            panic!("vnode {}:{} registered while already cached", key.mount, key.node);
        }

        let mount = self.mounts.lookup_by_id(key.mount)?;
        if mount.is_unmounting() {
            return Err(FsError::NotFound);
        }

        let vnode = Arc::new(Vnode::new(key, mount.clone(), self.this.clone()));
        vnode.set_node(node);
        vnode.ref_count.store(1, Ordering::Release);
        vnode.set_state(VnodeState::Active);
        table.insert(key, vnode.clone());
        mount.vnodes.lock().insert(key.node);
        crate::log_trace!("vfs", "registered new vnode {}:{}", key.mount, key.node);
        Ok(VnodeRef::adopt(vnode))
    }

    /// Give back a reference
    ///
    /// Same as dropping the `VnodeRef`. Releasing the last reference tears the
    /// vnode down and calls the module's `put_node`, or `remove_node` when the
    /// node was marked for deletion.
    pub fn release(&self, vnode: VnodeRef) {
        drop(vnode);
    }

    /// Drop one reference; tear the vnode down when it was the last
    pub(super) fn put(&self, vnode: &Arc<Vnode>) {
        let table = self.table.lock();
        if vnode.is_busy() {
            drop(table);
            crate::log_error!("vfs", "release of busy vnode: {:?}", vnode);
            panic!("busy vnode {:?} released", vnode.key());
        }

        let previous = vnode.ref_count.fetch_sub(1, Ordering::AcqRel);
        if previous == 0 {
            drop(table);
            crate::log_error!("vfs", "release of unreferenced vnode: {:?}", vnode);
            panic!("vnode {:?} released with no references", vnode.key());
        }
        if previous > 1 {
            return;
        }

        vnode.set_state(VnodeState::Dying);
        drop(table);
        self.destroy(vnode);
    }

    fn destroy(&self, vnode: &Arc<Vnode>) {
        let key = vnode.key();
        drop(vnode.take_page_cache());

        if let Some(node) = vnode.node() {
            let volume = vnode.mount().volume();
            let result = if vnode.is_delete_pending() {
                volume.remove_node(node)
            } else {
                volume.put_node(node)
            };
            if let Err(err) = optional(result) {
                crate::log_warn!(
                    "vfs",
                    "module failed to release vnode {}:{}: {}",
                    key.mount,
                    key.node,
                    err
                );
            }
        }

        let mut table = self.table.lock();
        table.remove(&key);
        vnode.mount().vnodes.lock().remove(&key.node);
        vnode.set_state(VnodeState::Dead);
        crate::log_trace!("vfs", "destroyed vnode {}:{}", key.mount, key.node);
    }

    /// Request deletion once the node's last reference goes away
    ///
    /// # Errors
    /// `NotFound` if the vnode is not cached or already being torn down.
    pub fn mark_for_deletion(&self, key: VnodeKey) -> FsResult<()> {
        self.set_delete_pending(key, true)
    }

    /// Withdraw a deletion request
    pub fn unmark_for_deletion(&self, key: VnodeKey) -> FsResult<()> {
        self.set_delete_pending(key, false)
    }

    fn set_delete_pending(&self, key: VnodeKey, pending: bool) -> FsResult<()> {
        let table = self.table.lock();
        match table.get(&key) {
            Some(vnode)
                if matches!(vnode.state(), VnodeState::Constructing | VnodeState::Active) =>
            {
                vnode.set_delete_pending(pending);
                Ok(())
            }
            _ => Err(FsError::NotFound),
        }
    }

    /// Prove a mount quiescent and flag it as unmounting
    ///
    /// The mount's only cached vnode may be its root, held exactly
    /// `root_refs` times. Once flagged, no new reference into the mount can be
    /// taken through the cache.
    pub(super) fn begin_unmount(&self, mount: &Mount, root_refs: usize) -> FsResult<()> {
        let table = self.table.lock();
        let members = mount.vnodes.lock();
        if members.iter().any(|&node| node != mount.root_node()) {
            return Err(FsError::Busy);
        }

        let root_key = VnodeKey::new(mount.id(), mount.root_node());
        match table.get(&root_key) {
            Some(root)
                if !root.is_busy() && root.ref_count.load(Ordering::Acquire) == root_refs => {}
            _ => return Err(FsError::Busy),
        }

        mount.set_unmounting(true);
        Ok(())
    }

    /// Number of cached vnodes in any state
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` is cached in any state
    pub fn contains(&self, key: VnodeKey) -> bool {
        self.table.lock().contains_key(&key)
    }

    /// Reference count of a cached vnode
    pub fn ref_count(&self, key: VnodeKey) -> Option<usize> {
        self.table
            .lock()
            .get(&key)
            .map(|vnode| vnode.ref_count.load(Ordering::Acquire))
    }
}
