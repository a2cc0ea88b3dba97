//! Path Resolution
//!
//! Forward resolution walks a path one component at a time through the node
//! cache, following symlinks and crossing mount boundaries in both directions.
//! Reverse resolution climbs ".." from a directory vnode back to the root and
//! rebuilds its absolute path; other vnodes are named through the directory
//! the resolver last reached them from.
//!
//! Every walk owns exactly one reference at a time: the starting vnode is
//! consumed and the returned vnode carries one reference for the caller.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use super::error::{optional, FsError, FsResult};
use super::types::{AccessMode, MountId, NodeId, NodeType, VnodeKey};
use super::vnode::VnodeRef;
use super::Vfs;
use crate::config::READ_DIR_BATCH;

/// Split the next component off a path
///
/// Leading slashes are skipped. A component followed only by slashes yields
/// "." as the remainder, so a trailing slash resolves the directory itself.
/// Returns `None` once the path is exhausted.
pub fn next_component(path: &str) -> Option<(&str, &str)> {
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        return None;
    }

    match path.find('/') {
        None => Some((path, "")),
        Some(end) => {
            let rest = &path[end..];
            if rest.trim_start_matches('/').is_empty() {
                Some((&path[..end], "."))
            } else {
                Some((&path[..end], rest))
            }
        }
    }
}

/// Split a path into its directory part and final component
///
/// "a" gives (".", "a"), "/a/b" gives ("/a/", "b"), and a trailing slash
/// makes the final component ".".
pub fn split_leaf(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        None => (".", path),
        Some(slash) => {
            let leaf = &path[slash + 1..];
            if leaf.is_empty() {
                (path, ".")
            } else {
                (&path[..=slash], leaf)
            }
        }
    }
}

/// Validate path and component lengths
pub fn check_path(path: &str, max_path: usize, max_name: usize) -> FsResult<()> {
    if path.is_empty() {
        return Err(FsError::NotFound);
    }
    if path.contains('\0') {
        return Err(FsError::InvalidArgument);
    }
    if path.len() > max_path {
        return Err(FsError::NameTooLong);
    }
    if path.split('/').any(|component| component.len() > max_name) {
        return Err(FsError::NameTooLong);
    }
    Ok(())
}

impl Vfs {
    /// Resolve a path
    ///
    /// Absolute paths start at the root; relative ones at `cwd`, or at the
    /// root when no current directory is given. `traverse_leaf` follows a
    /// symlink in the final component.
    pub fn path_to_vnode(
        &self,
        cwd: Option<&VnodeRef>,
        path: &str,
        traverse_leaf: bool,
    ) -> FsResult<VnodeRef> {
        check_path(path, self.config.max_path_len, self.config.max_name_len)?;

        let start = match cwd {
            Some(cwd) if !path.starts_with('/') => cwd.clone(),
            _ => self.root()?,
        };
        self.vnode_path_to_vnode(start, path, traverse_leaf, 0)
    }

    /// Resolve everything but the last component
    ///
    /// Returns the parent directory and the leaf name. The leaf is not
    /// looked up.
    pub fn path_to_dir_vnode(
        &self,
        cwd: Option<&VnodeRef>,
        path: &str,
    ) -> FsResult<(VnodeRef, String)> {
        check_path(path, self.config.max_path_len, self.config.max_name_len)?;

        let base = match cwd {
            Some(cwd) => cwd.clone(),
            None => self.root()?,
        };
        self.vnode_and_path_to_dir_vnode(base, path)
    }

    /// Resolve the directory part of `path` from `base`, consuming `base`
    fn vnode_and_path_to_dir_vnode(&self, base: VnodeRef, path: &str) -> FsResult<(VnodeRef, String)> {
        let (dir, leaf) = split_leaf(path);
        let start = if dir.starts_with('/') {
            drop(base);
            self.root()?
        } else {
            base
        };
        let dir = self.vnode_path_to_vnode(start, dir, true, 0)?;
        Ok((dir, leaf.to_string()))
    }

    /// Resolve a single entry of a directory given by identity
    pub fn entry_ref_to_vnode(
        &self,
        mount: MountId,
        dir: NodeId,
        name: &str,
        traverse_leaf: bool,
    ) -> FsResult<VnodeRef> {
        self.check_entry_name(name)?;

        let dir = self.cache.fetch(VnodeKey::new(mount, dir))?;
        self.vnode_path_to_vnode(dir, name, traverse_leaf, 0)
    }

    fn check_entry_name(&self, name: &str) -> FsResult<()> {
        if name.is_empty() || name.contains('/') {
            return Err(FsError::InvalidArgument);
        }
        if name.len() > self.config.max_name_len {
            return Err(FsError::NameTooLong);
        }
        Ok(())
    }

    /// Walk `path` starting at `start`, consuming the reference on `start`
    ///
    /// `link_count` is the number of symlinks already followed on the way here.
    pub fn vnode_path_to_vnode(
        &self,
        start: VnodeRef,
        path: &str,
        traverse_leaf: bool,
        link_count: usize,
    ) -> FsResult<VnodeRef> {
        if path.is_empty() {
            return Err(FsError::NotFound);
        }

        let mut current = start;
        // Type of `current` when already known from a lookup
        let mut current_type = None;
        let mut rest = path;

        while let Some((name, remainder)) = next_component(rest) {
            let is_last = remainder.is_empty();
            rest = remainder;

            if name.len() > self.config.max_name_len {
                return Err(FsError::NameTooLong);
            }

            // ".." at a mount root continues from the covered directory
            if name == ".." && current.is_mount_root() {
                if let Some(covered) = current.mount().covers() {
                    current = covered;
                    current_type = Some(NodeType::Directory);
                }
            }

            self.check_searchable(&current, current_type)?;

            let (id, mut node_type) = current.volume().lookup(current.fs_node(), name)?;
            let mut next = self.cache.fetch(VnodeKey::new(current.mount_id(), id))?;
            if node_type != NodeType::Directory && name != "." && name != ".." {
                next.set_parent_hint(current.node_id());
            }

            if node_type == NodeType::Symlink && (!is_last || traverse_leaf) {
                if link_count + 1 > self.config.max_symlink_depth {
                    return Err(FsError::SymlinkLoop);
                }

                let target = next.volume().read_link(next.fs_node())?;
                drop(next);

                let base = if target.starts_with('/') {
                    self.root()?
                } else {
                    current.clone()
                };
                next = self.vnode_path_to_vnode(base, &target, true, link_count + 1)?;
                node_type = NodeType::Symlink;
            }

            // A mount point resolves to the root of the mount on top of it
            current = match next.covering_root() {
                Some(root) => {
                    node_type = NodeType::Directory;
                    root
                }
                None => next,
            };
            current_type = match node_type {
                NodeType::Symlink => None,
                known => Some(known),
            };
        }

        Ok(current)
    }

    /// Require `dir` to be a directory the caller may search
    ///
    /// The type is read from the module only when the walk does not already
    /// know it. Modules without `access` or `read_stat` hooks allow the search.
    fn check_searchable(&self, dir: &VnodeRef, known: Option<NodeType>) -> FsResult<()> {
        let node_type = match known {
            Some(node_type) => Some(node_type),
            None => match dir.volume().read_stat(dir.fs_node()) {
                Ok(stat) => stat.mode.node_type(),
                Err(FsError::Unsupported) => None,
                Err(err) => return Err(err),
            },
        };
        if node_type.is_some_and(|t| t != NodeType::Directory) {
            return Err(FsError::NotADirectory);
        }

        match dir.volume().access(dir.fs_node(), AccessMode::EXECUTE) {
            Ok(()) | Err(FsError::Unsupported) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Rebuild the absolute path of a vnode
    ///
    /// Directories are climbed through "..". Any other vnode is named by
    /// scanning the directory it was last resolved through, so it fails with
    /// `NotFound` once that entry has been renamed away or unlinked.
    pub fn vnode_to_path(&self, vnode: &VnodeRef) -> FsResult<String> {
        if self.is_directory(vnode)? {
            return self.dir_vnode_to_path(vnode);
        }

        let dir = vnode.parent_hint().ok_or(FsError::NotFound)?;
        let dir = self.cache.fetch(VnodeKey::new(vnode.mount_id(), dir))?;
        let name = self.find_entry_name(&dir, vnode.node_id())?;
        self.join_entry_path(&dir, &name)
    }

    /// Absolute path of the entry `name` in a directory given by identity
    ///
    /// The entry itself need not exist. "." and ".." name the directory and
    /// its parent.
    pub fn entry_ref_to_path(&self, mount: MountId, dir: NodeId, name: &str) -> FsResult<String> {
        self.check_entry_name(name)?;

        let dir = self.cache.fetch(VnodeKey::new(mount, dir))?;
        match name {
            "." => self.dir_vnode_to_path(&dir),
            ".." => {
                let parent = self.vnode_path_to_vnode(dir, name, false, 0)?;
                self.dir_vnode_to_path(&parent)
            }
            _ => self.join_entry_path(&dir, name),
        }
    }

    /// Canonical absolute form of `path`
    ///
    /// Every directory component is resolved, so "." and ".." disappear and
    /// symlinks on the way are replaced by their targets. The final component
    /// need not exist; it is followed only when `traverse_link` is set and it
    /// names a symlink.
    pub fn normalize_path(
        &self,
        cwd: Option<&VnodeRef>,
        path: &str,
        traverse_link: bool,
    ) -> FsResult<String> {
        check_path(path, self.config.max_path_len, self.config.max_name_len)?;

        let mut base = match cwd {
            Some(cwd) => cwd.clone(),
            None => self.root()?,
        };
        let mut path = path.to_string();

        for _ in 0..=self.config.max_symlink_depth {
            let (dir, leaf) = self.vnode_and_path_to_dir_vnode(base, &path)?;

            if traverse_link {
                if let Ok(file) = self.vnode_path_to_vnode(dir.clone(), &leaf, false, 0) {
                    let is_link = match file.volume().read_stat(file.fs_node()) {
                        Ok(stat) => stat.mode.is_symlink(),
                        Err(FsError::Unsupported) => false,
                        Err(err) => return Err(err),
                    };
                    if is_link {
                        path = file.volume().read_link(file.fs_node())?;
                        base = dir;
                        continue;
                    }
                }
            }

            return match leaf.as_str() {
                "." | ".." => {
                    let dir = self.vnode_path_to_vnode(dir, &leaf, false, 0)?;
                    self.dir_vnode_to_path(&dir)
                }
                _ => self.join_entry_path(&dir, &leaf),
            };
        }

        Err(FsError::SymlinkLoop)
    }

    /// Whether reverse resolution can climb from `vnode` through ".."
    ///
    /// Modules that cannot stat a node are assumed to hand out directories.
    fn is_directory(&self, vnode: &VnodeRef) -> FsResult<bool> {
        if vnode.is_mount_root() || vnode.covered_by().is_some() {
            return Ok(true);
        }
        match vnode.volume().read_stat(vnode.fs_node()) {
            Ok(stat) => Ok(stat.mode.node_type().map_or(true, |t| t == NodeType::Directory)),
            Err(FsError::Unsupported) => Ok(true),
            Err(err) => Err(err),
        }
    }

    fn join_entry_path(&self, dir: &VnodeRef, name: &str) -> FsResult<String> {
        let mut path = self.dir_vnode_to_path(dir)?;
        if path != "/" {
            path.push('/');
        }
        path.push_str(name);
        if path.len() > self.config.max_path_len {
            return Err(FsError::BufferOverflow);
        }
        Ok(path)
    }

    fn dir_vnode_to_path(&self, vnode: &VnodeRef) -> FsResult<String> {
        let mut current = match vnode.covering_root() {
            Some(root) => root,
            None => vnode.clone(),
        };
        let mut names: Vec<String> = Vec::new();
        let mut length = 0;

        for _ in 0..self.config.max_path_depth {
            if current.is_mount_root() {
                match current.mount().covers() {
                    Some(covered) => {
                        current = covered;
                        continue;
                    }
                    None => return Ok(join_reversed(&names)),
                }
            }

            let volume = current.volume().clone();
            let (parent_id, _) = volume.lookup(current.fs_node(), "..")?;
            if parent_id == current.node_id() {
                // A module root that is not the mount root; nothing above it
                return Ok(join_reversed(&names));
            }
            let parent = self.cache.fetch(VnodeKey::new(current.mount_id(), parent_id))?;

            let name = match volume.get_node_name(current.fs_node()) {
                Err(FsError::Unsupported) => self.find_entry_name(&parent, current.node_id())?,
                other => other?,
            };

            length += name.len() + 1;
            if length > self.config.max_path_len {
                return Err(FsError::BufferOverflow);
            }
            names.push(name);
            current = parent;
        }

        Err(FsError::TooDeep)
    }

    /// Scan a directory for the entry naming `node`
    fn find_entry_name(&self, dir: &VnodeRef, node: NodeId) -> FsResult<String> {
        let volume = dir.volume();
        let cookie = volume.open_dir(dir.fs_node())?;

        let mut found = Err(FsError::NotFound);
        loop {
            let batch = match volume.read_dir(dir.fs_node(), &cookie, READ_DIR_BATCH) {
                Ok(batch) => batch,
                Err(err) => {
                    found = Err(err);
                    break;
                }
            };
            if batch.is_empty() {
                break;
            }
            if let Some(entry) = batch
                .into_iter()
                .find(|e| e.node == node && e.name != "." && e.name != "..")
            {
                found = Ok(entry.name);
                break;
            }
        }

        let closed = volume.close_dir(dir.fs_node(), &cookie);
        let freed = volume.free_dir_cookie(dir.fs_node(), &cookie);
        if let Err(err) = optional(closed).and(optional(freed)) {
            crate::log_warn!(
                "vfs",
                "closing scan of directory {}:{} failed: {}",
                dir.mount_id(),
                dir.node_id(),
                err
            );
        }
        found
    }
}

fn join_reversed(names: &[String]) -> String {
    if names.is_empty() {
        return String::from("/");
    }

    let mut path = String::new();
    for name in names.iter().rev() {
        path.push('/');
        path.push_str(name);
    }
    path
}
