//! rootfs Directory Operations

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::Ordering;
use spin::Mutex;

use super::node::{NodeData, RamNode};
use super::volume::RootVolume;
use crate::config::MAX_NAME_LEN;
use crate::fs::vfs::{DirEntry, FsError, FsResult, NodeId, NodeType};

/// Directory read position
pub struct DirCursor {
    position: Mutex<usize>,
}

impl DirCursor {
    pub fn new() -> Self {
        Self {
            position: Mutex::new(0),
        }
    }

    pub fn rewind(&self) {
        *self.position.lock() = 0;
    }
}

/// Validate a name for a new entry
pub fn validate_name(name: &str) -> FsResult<()> {
    if name.is_empty() || name.contains('/') || name.contains('\0') {
        return Err(FsError::InvalidArgument);
    }
    if name.len() > MAX_NAME_LEN {
        return Err(FsError::NameTooLong);
    }
    if name == "." || name == ".." {
        return Err(FsError::AlreadyExists);
    }
    Ok(())
}

impl RootVolume {
    /// Look up a name in a directory
    pub(super) fn dir_lookup(&self, dir: &RamNode, name: &str) -> FsResult<(NodeId, NodeType)> {
        let data = dir.data.lock();
        let entries = data.directory()?;
        match name {
            "." => Ok((dir.id, NodeType::Directory)),
            ".." => Ok((entries.parent, NodeType::Directory)),
            _ => {
                let id = *entries.entries.get(name).ok_or(FsError::NotFound)?;
                Ok((id, self.node(id)?.node_type))
            }
        }
    }

    /// Insert a freshly built node under `name`
    ///
    /// `publish` runs with the directory locked, after the node is reachable
    /// by id but before the entry becomes visible.
    pub(super) fn dir_insert<T>(
        &self,
        dir: &RamNode,
        name: &str,
        node: RamNode,
        publish: impl FnOnce(&Arc<RamNode>) -> FsResult<T>,
    ) -> FsResult<T> {
        validate_name(name)?;

        let mut data = dir.data.lock();
        if data.directory()?.entries.contains_key(name) {
            return Err(FsError::AlreadyExists);
        }

        let node = Arc::new(node);
        let id = node.id;
        let is_dir = node.is_dir();
        self.nodes.lock().insert(id, node.clone());

        let published = match publish(&node) {
            Ok(published) => published,
            Err(err) => {
                self.nodes.lock().remove(&id);
                return Err(err);
            }
        };

        data.directory_mut()?.entries.insert(String::from(name), id);
        if is_dir {
            dir.nlink.fetch_add(1, Ordering::SeqCst);
        }
        data.mtime = self.tick();
        Ok(published)
    }

    /// Remove a non-directory entry
    pub(super) fn dir_unlink(&self, dir: &RamNode, name: &str) -> FsResult<()> {
        let target = {
            let mut data = dir.data.lock();
            let entries = data.directory_mut()?;
            let id = *entries.entries.get(name).ok_or(FsError::NotFound)?;
            let target = self.node(id)?;
            if target.is_dir() {
                return Err(FsError::IsADirectory);
            }
            entries.entries.remove(name);
            data.mtime = self.tick();
            target
        };

        self.drop_link(&target);
        Ok(())
    }

    /// Remove an empty directory entry
    pub(super) fn dir_remove_dir(&self, dir: &RamNode, name: &str) -> FsResult<()> {
        if name == "." || name == ".." {
            return Err(FsError::InvalidArgument);
        }

        // Parent and child are both locked; rename may hold them in id order
        let _tree = self.tree_lock.lock();
        let target = {
            let mut data = dir.data.lock();
            let entries = data.directory_mut()?;
            let id = *entries.entries.get(name).ok_or(FsError::NotFound)?;
            let target = self.node(id)?;
            if !target.data.lock().directory()?.entries.is_empty() {
                return Err(FsError::DirectoryNotEmpty);
            }
            entries.entries.remove(name);
            dir.nlink.fetch_sub(1, Ordering::SeqCst);
            data.mtime = self.tick();
            target
        };

        target.nlink.store(0, Ordering::SeqCst);
        self.reclaim(target.id);
        Ok(())
    }

    /// Add a hard link to an existing non-directory node
    pub(super) fn dir_link(&self, dir: &RamNode, name: &str, node: &RamNode) -> FsResult<()> {
        validate_name(name)?;
        if node.is_dir() {
            return Err(FsError::PermissionDenied);
        }

        let mut data = dir.data.lock();
        let entries = data.directory_mut()?;
        if entries.entries.contains_key(name) {
            return Err(FsError::AlreadyExists);
        }
        if node.nlink.load(Ordering::SeqCst) == 0 {
            return Err(FsError::NotFound);
        }

        entries.entries.insert(String::from(name), node.id);
        node.nlink.fetch_add(1, Ordering::SeqCst);
        data.mtime = self.tick();
        Ok(())
    }

    /// Move an entry, replacing a compatible target
    pub(super) fn dir_rename(
        &self,
        from: &RamNode,
        from_name: &str,
        to: &RamNode,
        to_name: &str,
    ) -> FsResult<()> {
        validate_name(from_name)?;
        validate_name(to_name)?;

        let _tree = self.tree_lock.lock();
        let moved = {
            let data = from.data.lock();
            let id = *data.directory()?.entries.get(from_name).ok_or(FsError::NotFound)?;
            self.node(id)?
        };

        if moved.is_dir() && from.id != to.id && self.is_ancestor(moved.id, to.id)? {
            return Err(FsError::InvalidArgument);
        }

        let replaced = if from.id == to.id {
            if from_name == to_name {
                return Ok(());
            }
            let mut data = from.data.lock();
            let replaced = self.swap_entries(&mut data, None, from.id, &moved, from_name, to_name)?;
            if replaced.as_ref().is_some_and(|r| r.is_dir()) {
                from.nlink.fetch_sub(1, Ordering::SeqCst);
            }
            data.mtime = self.tick();
            replaced
        } else {
            // Directory locks are taken in node id order
            let (mut from_data, mut to_data) = if from.id < to.id {
                let f = from.data.lock();
                (f, to.data.lock())
            } else {
                let t = to.data.lock();
                (from.data.lock(), t)
            };
            let replaced = self.swap_entries(
                &mut from_data,
                Some(&mut *to_data),
                from.id,
                &moved,
                from_name,
                to_name,
            )?;

            if moved.is_dir() {
                if let Ok(dir) = moved.data.lock().directory_mut() {
                    dir.parent = to.id;
                }
                from.nlink.fetch_sub(1, Ordering::SeqCst);
                if replaced.is_none() {
                    to.nlink.fetch_add(1, Ordering::SeqCst);
                }
            }
            let now = self.tick();
            from_data.mtime = now;
            to_data.mtime = now;
            replaced
        };

        if let Some(replaced) = replaced {
            if replaced.is_dir() {
                replaced.nlink.store(0, Ordering::SeqCst);
                self.reclaim(replaced.id);
            } else {
                self.drop_link(&replaced);
            }
        }
        Ok(())
    }

    /// Move `moved` from `from_name` to `to_name`; `to_data` is None within
    /// one directory. Returns the node the move displaced.
    fn swap_entries(
        &self,
        from_data: &mut NodeData,
        to_data: Option<&mut NodeData>,
        from_id: NodeId,
        moved: &RamNode,
        from_name: &str,
        to_name: &str,
    ) -> FsResult<Option<Arc<RamNode>>> {
        let target_dir = match to_data {
            Some(to_data) => to_data.directory_mut()?,
            None => from_data.directory_mut()?,
        };

        let replaced = match target_dir.entries.get(to_name) {
            None => None,
            Some(&id) if id == moved.id => return Ok(None),
            // The source directory still holds `moved`
            Some(&id) if id == from_id => return Err(FsError::DirectoryNotEmpty),
            Some(&id) => {
                let replaced = self.node(id)?;
                match (moved.is_dir(), replaced.is_dir()) {
                    (true, false) => return Err(FsError::NotADirectory),
                    (false, true) => return Err(FsError::IsADirectory),
                    (true, true) => {
                        if !replaced.data.lock().directory()?.entries.is_empty() {
                            return Err(FsError::DirectoryNotEmpty);
                        }
                    }
                    (false, false) => {}
                }
                Some(replaced)
            }
        };

        target_dir.entries.insert(String::from(to_name), moved.id);
        from_data.directory_mut()?.entries.remove(from_name);
        Ok(replaced)
    }

    /// Whether `ancestor` lies on the parent chain of `dir`
    fn is_ancestor(&self, ancestor: NodeId, dir: NodeId) -> FsResult<bool> {
        let mut current = dir;
        loop {
            if current == ancestor {
                return Ok(true);
            }
            let parent = self.node(current)?.data.lock().directory()?.parent;
            if parent == current {
                return Ok(false);
            }
            current = parent;
        }
    }

    /// Produce up to `max` entries from the cursor position
    pub(super) fn dir_read(&self, dir: &RamNode, cursor: &DirCursor, max: usize) -> FsResult<Vec<DirEntry>> {
        let data = dir.data.lock();
        let entries = data.directory()?;
        let mut position = cursor.position.lock();

        let all = [(".", dir.id), ("..", entries.parent)]
            .into_iter()
            .chain(entries.entries.iter().map(|(name, &id)| (name.as_str(), id)));
        let batch: Vec<DirEntry> = all
            .skip(*position)
            .take(max)
            .map(|(name, id)| DirEntry::new(id, name))
            .collect();

        *position += batch.len();
        Ok(batch)
    }
}
