//! VFS Correctness Tests
//!
//! This test suite verifies forward and reverse path resolution.
//!
//! Test cases:
//! - Full-path resolution equals component-by-component resolution
//! - Redundant slashes, "." and ".." components, trailing slashes
//! - Symlink following, link budgets and loops
//! - Mount transparency in both directions
//! - Round trips between vnodes and absolute paths, files included
//! - Entry paths and path normalization
//! - Directory search permission

mod common;

use common::{rootfs_vfs, rootfs_vfs_with, write_file};
use mello_vfs::config::MAX_SYMLINK_DEPTH;
use mello_vfs::fs::rootfs;
use mello_vfs::fs::vfs::{FsError, NodeType, OpenFlags, VnodeRef};
use mello_vfs::VfsConfig;

fn make_tree(vfs: &mello_vfs::Vfs, ctx: &mello_vfs::IoContext) {
    vfs.create_dir(ctx, "/a", 0o755).unwrap();
    vfs.create_dir(ctx, "/a/b", 0o755).unwrap();
    write_file(vfs, ctx, "/a/b/c", b"leaf");
}

#[test]
fn test_full_path_equals_stepwise() {
    let (vfs, ctx) = rootfs_vfs();
    make_tree(&vfs, &ctx);

    let full = vfs.path_to_vnode(None, "/a/b/c", true).unwrap();

    let root = vfs.root().unwrap();
    let a = vfs.vnode_path_to_vnode(root, "a", true, 0).unwrap();
    let a_key = a.key();
    let b = vfs.vnode_path_to_vnode(a, "b", true, 0).unwrap();
    let c = vfs.vnode_path_to_vnode(b, "c", true, 0).unwrap();

    assert!(VnodeRef::ptr_eq(&full, &c));
    assert_eq!(full.ref_count(), 2);

    // Intermediate references were consumed along the way
    assert!(!vfs.cache().contains(a_key));
    drop(c);
    assert_eq!(full.ref_count(), 1);
}

#[test]
fn test_redundant_components() {
    let (vfs, ctx) = rootfs_vfs();
    make_tree(&vfs, &ctx);

    let plain = vfs.path_to_vnode(None, "/a/b/c", true).unwrap();
    for path in ["//a///b//c", "/a/./b/c", "/a/b/../b/c", "/../a/b/c", "/a/b/./../../a/b/c"] {
        let other = vfs.path_to_vnode(None, path, true).unwrap();
        assert!(VnodeRef::ptr_eq(&plain, &other), "{}", path);
    }
}

#[test]
fn test_root_variants() {
    let (vfs, _ctx) = rootfs_vfs();
    let root = vfs.root().unwrap();

    for path in ["/", "//", "/.", "/..", "/../.."] {
        let resolved = vfs.path_to_vnode(None, path, true).unwrap();
        assert!(VnodeRef::ptr_eq(&root, &resolved), "{}", path);
    }
}

#[test]
fn test_trailing_slash() {
    let (vfs, ctx) = rootfs_vfs();
    make_tree(&vfs, &ctx);

    let dir = vfs.path_to_vnode(None, "/a/b", true).unwrap();
    let slashed = vfs.path_to_vnode(None, "/a/b/", true).unwrap();
    assert!(VnodeRef::ptr_eq(&dir, &slashed));

    assert_eq!(
        vfs.path_to_vnode(None, "/a/b/c/", true).unwrap_err(),
        FsError::NotADirectory
    );
}

#[test]
fn test_bad_paths() {
    let (vfs, ctx) = rootfs_vfs();
    make_tree(&vfs, &ctx);

    assert_eq!(vfs.path_to_vnode(None, "", true).unwrap_err(), FsError::NotFound);
    assert_eq!(vfs.path_to_vnode(None, "/a/x", true).unwrap_err(), FsError::NotFound);
    assert_eq!(
        vfs.path_to_vnode(None, "/a/b/c/d", true).unwrap_err(),
        FsError::NotADirectory
    );

    let long = format!("/{}", "x".repeat(256));
    assert_eq!(vfs.path_to_vnode(None, &long, true).unwrap_err(), FsError::NameTooLong);
}

#[test]
fn test_relative_to_cwd() {
    let (vfs, ctx) = rootfs_vfs();
    make_tree(&vfs, &ctx);

    vfs.setcwd(&ctx, "/a").unwrap();
    let cwd = ctx.cwd();
    let relative = vfs.path_to_vnode(Some(&cwd), "b/c", true).unwrap();
    let absolute = vfs.path_to_vnode(Some(&cwd), "/a/b/c", true).unwrap();
    assert!(VnodeRef::ptr_eq(&relative, &absolute));

    // Without a current directory relative paths start at the root
    let from_root = vfs.path_to_vnode(None, "a/b/c", true).unwrap();
    assert!(VnodeRef::ptr_eq(&relative, &from_root));
}

#[test]
fn test_path_to_dir_vnode() {
    let (vfs, ctx) = rootfs_vfs();
    make_tree(&vfs, &ctx);

    let b = vfs.path_to_vnode(None, "/a/b", true).unwrap();
    let (dir, leaf) = vfs.path_to_dir_vnode(None, "/a/b/c").unwrap();
    assert!(VnodeRef::ptr_eq(&b, &dir));
    assert_eq!(leaf, "c");

    // The leaf need not exist
    let (dir, leaf) = vfs.path_to_dir_vnode(None, "/a/b/missing").unwrap();
    assert!(VnodeRef::ptr_eq(&b, &dir));
    assert_eq!(leaf, "missing");
}

#[test]
fn test_entry_ref_to_vnode() {
    let (vfs, ctx) = rootfs_vfs();
    make_tree(&vfs, &ctx);

    let b = vfs.path_to_vnode(None, "/a/b", true).unwrap();
    let c = vfs
        .entry_ref_to_vnode(b.mount_id(), b.node_id(), "c", true)
        .unwrap();
    let expected = vfs.path_to_vnode(None, "/a/b/c", true).unwrap();
    assert!(VnodeRef::ptr_eq(&c, &expected));

    assert_eq!(
        vfs.entry_ref_to_vnode(b.mount_id(), b.node_id(), "x/y", true).unwrap_err(),
        FsError::InvalidArgument
    );
}

#[test]
fn test_symlink_following() {
    let (vfs, ctx) = rootfs_vfs();
    make_tree(&vfs, &ctx);

    vfs.create_symlink(&ctx, "/abs", "/a/b/c", 0o777).unwrap();
    vfs.create_symlink(&ctx, "/a/rel", "b/c", 0o777).unwrap();
    vfs.create_symlink(&ctx, "/a/lb", "b", 0o777).unwrap();
    vfs.create_symlink(&ctx, "/a/up", "../a/b", 0o777).unwrap();

    let target = vfs.path_to_vnode(None, "/a/b/c", true).unwrap();
    for path in ["/abs", "/a/rel", "/a/lb/c", "/a/up/c"] {
        let resolved = vfs.path_to_vnode(None, path, true).unwrap();
        assert!(VnodeRef::ptr_eq(&target, &resolved), "{}", path);
    }

    // Without traversal the link itself is returned, but only as a leaf
    let link = vfs.path_to_vnode(None, "/abs", false).unwrap();
    assert!(!VnodeRef::ptr_eq(&target, &link));
    assert_eq!(vfs.node_type(&ctx, "/abs").unwrap(), NodeType::Symlink);
    let through = vfs.path_to_vnode(None, "/a/lb/c", false).unwrap();
    assert!(VnodeRef::ptr_eq(&target, &through));
}

#[test]
fn test_symlink_chain_budget() {
    let (vfs, ctx) = rootfs_vfs();
    write_file(&vfs, &ctx, "/target", b"end");

    // /l1 -> /l2 -> ... -> /l16 -> /target
    for i in 1..=MAX_SYMLINK_DEPTH {
        let next = if i == MAX_SYMLINK_DEPTH {
            String::from("/target")
        } else {
            format!("/l{}", i + 1)
        };
        vfs.create_symlink(&ctx, &format!("/l{}", i), &next, 0o777).unwrap();
    }

    let target = vfs.path_to_vnode(None, "/target", true).unwrap();
    let resolved = vfs.path_to_vnode(None, "/l1", true).unwrap();
    assert!(VnodeRef::ptr_eq(&target, &resolved));

    vfs.create_symlink(&ctx, "/l0", "/l1", 0o777).unwrap();
    assert_eq!(
        vfs.path_to_vnode(None, "/l0", true).unwrap_err(),
        FsError::SymlinkLoop
    );
}

#[test]
fn test_configured_symlink_budget() {
    let (vfs, ctx) = rootfs_vfs_with(VfsConfig::new().with_max_symlink_depth(1));
    write_file(&vfs, &ctx, "/target", b"end");
    vfs.create_symlink(&ctx, "/one", "/target", 0o777).unwrap();
    vfs.create_symlink(&ctx, "/two", "/one", 0o777).unwrap();

    assert!(vfs.path_to_vnode(None, "/one", true).is_ok());
    assert_eq!(
        vfs.path_to_vnode(None, "/two", true).unwrap_err(),
        FsError::SymlinkLoop
    );
}

#[test]
fn test_symlink_cycle() {
    let (vfs, ctx) = rootfs_vfs();
    vfs.create_symlink(&ctx, "/x", "/y", 0o777).unwrap();
    vfs.create_symlink(&ctx, "/y", "x", 0o777).unwrap();

    assert_eq!(vfs.path_to_vnode(None, "/x", true).unwrap_err(), FsError::SymlinkLoop);
    assert_eq!(vfs.path_to_vnode(None, "/y/z", false).unwrap_err(), FsError::SymlinkLoop);
}

#[test]
fn test_mount_transparency() {
    let (vfs, ctx) = rootfs_vfs();
    vfs.create_dir(&ctx, "/mnt", 0o755).unwrap();
    write_file(&vfs, &ctx, "/mnt/hidden", b"under");

    let covered = vfs.path_to_vnode(None, "/mnt", true).unwrap();
    let device = vfs.mount("/mnt", None, rootfs::NAME, None).unwrap();
    assert_eq!(device, 2);

    let top = vfs.path_to_vnode(None, "/mnt", true).unwrap();
    assert_eq!(top.mount_id(), device);
    assert_eq!(top.node_id(), rootfs::ROOT_NODE);
    assert!(top.is_mount_root());
    assert_eq!(covered.covered_by().unwrap().id(), device);
    assert!(VnodeRef::ptr_eq(&covered.covering_root().unwrap(), &top));

    assert_eq!(
        vfs.path_to_vnode(None, "/mnt/hidden", true).unwrap_err(),
        FsError::NotFound
    );
    write_file(&vfs, &ctx, "/mnt/new", b"over");
    let new = vfs.path_to_vnode(None, "/mnt/new", true).unwrap();
    assert_eq!(new.mount_id(), device);
}

#[test]
fn test_dotdot_leaves_mount() {
    let (vfs, ctx) = rootfs_vfs();
    vfs.create_dir(&ctx, "/mnt", 0o755).unwrap();
    vfs.mount("/mnt", None, rootfs::NAME, None).unwrap();
    vfs.create_dir(&ctx, "/mnt/sub", 0o755).unwrap();

    let root = vfs.root().unwrap();
    let up = vfs.path_to_vnode(None, "/mnt/..", true).unwrap();
    assert!(VnodeRef::ptr_eq(&root, &up));
    assert_eq!(up.mount_id(), 1);

    let mnt = vfs.path_to_vnode(None, "/mnt", true).unwrap();
    let back = vfs.path_to_vnode(None, "/mnt/sub/..", true).unwrap();
    assert!(VnodeRef::ptr_eq(&mnt, &back));

    // A relative ".." walk starting inside the mount
    vfs.setcwd(&ctx, "/mnt/sub").unwrap();
    let cwd = ctx.cwd();
    let tmp = vfs.path_to_vnode(Some(&cwd), "../../tmp", true).unwrap();
    let expected = vfs.path_to_vnode(None, "/tmp", true).unwrap();
    assert!(VnodeRef::ptr_eq(&tmp, &expected));
}

#[test]
fn test_symlink_into_mount() {
    let (vfs, ctx) = rootfs_vfs();
    vfs.create_dir(&ctx, "/mnt", 0o755).unwrap();
    vfs.mount("/mnt", None, rootfs::NAME, None).unwrap();
    write_file(&vfs, &ctx, "/mnt/f", b"data");

    vfs.create_symlink(&ctx, "/tmp/to_mnt", "/mnt", 0o777).unwrap();
    let via_link = vfs.path_to_vnode(None, "/tmp/to_mnt/f", true).unwrap();
    let direct = vfs.path_to_vnode(None, "/mnt/f", true).unwrap();
    assert!(VnodeRef::ptr_eq(&via_link, &direct));
}

#[test]
fn test_vnode_to_path_round_trip() {
    let (vfs, ctx) = rootfs_vfs();
    make_tree(&vfs, &ctx);
    vfs.create_dir(&ctx, "/mnt", 0o755).unwrap();
    vfs.mount("/mnt", None, rootfs::NAME, None).unwrap();
    vfs.create_dir(&ctx, "/mnt/x", 0o755).unwrap();
    vfs.create_dir(&ctx, "/mnt/x/y", 0o755).unwrap();

    for path in ["/", "/a", "/a/b", "/tmp", "/mnt", "/mnt/x", "/mnt/x/y"] {
        let vnode = vfs.path_to_vnode(None, path, true).unwrap();
        let rebuilt = vfs.vnode_to_path(&vnode).unwrap();
        assert_eq!(rebuilt, path);
        let again = vfs.path_to_vnode(None, &rebuilt, true).unwrap();
        assert!(VnodeRef::ptr_eq(&vnode, &again));
    }

    // The covered directory names the same place as the mount on top of it
    let root = vfs.root().unwrap();
    let mnt = vfs.path_to_vnode(None, "/mnt", true).unwrap();
    let covered = mnt.mount().covers().unwrap();
    assert_eq!(covered.mount_id(), root.mount_id());
    assert_eq!(vfs.vnode_to_path(&covered).unwrap(), "/mnt");
}

#[test]
fn test_vnode_to_path_for_files() {
    let (vfs, ctx) = rootfs_vfs();
    make_tree(&vfs, &ctx);
    vfs.create_dir(&ctx, "/mnt", 0o755).unwrap();
    vfs.mount("/mnt", None, rootfs::NAME, None).unwrap();
    write_file(&vfs, &ctx, "/mnt/f", b"x");
    write_file(&vfs, &ctx, "/tmp/file", b"x");
    vfs.create_symlink(&ctx, "/tmp/l", "file", 0o777).unwrap();

    for (path, traverse) in [
        ("/tmp/file", true),
        ("/a/b/c", true),
        ("/mnt/f", true),
        ("/tmp/l", false),
    ] {
        let vnode = vfs.path_to_vnode(None, path, traverse).unwrap();
        assert_eq!(vfs.vnode_to_path(&vnode).unwrap(), path);
    }

    // A followed link names its target
    let target = vfs.path_to_vnode(None, "/tmp/l", true).unwrap();
    assert_eq!(vfs.vnode_to_path(&target).unwrap(), "/tmp/file");
    drop(target);

    // A freshly created file is named through its directory
    let fd = vfs
        .open(&ctx, "/a/new", OpenFlags::CREATE | OpenFlags::WRITE, 0o644)
        .unwrap();
    let created = ctx.get_fd(fd).unwrap();
    assert_eq!(vfs.vnode_to_path(created.vnode()).unwrap(), "/a/new");

    // Renames are followed while the node stays cached
    let held = vfs.path_to_vnode(None, "/tmp/file", true).unwrap();
    vfs.rename(&ctx, "/tmp/file", "/a/b/moved").unwrap();
    assert_eq!(vfs.vnode_to_path(&held).unwrap(), "/a/b/moved");

    vfs.unlink(&ctx, "/a/b/moved").unwrap();
    assert_eq!(vfs.vnode_to_path(&held).unwrap_err(), FsError::NotFound);
}

#[test]
fn test_entry_ref_to_path() {
    let (vfs, ctx) = rootfs_vfs();
    vfs.create_dir(&ctx, "/mnt", 0o755).unwrap();
    let id = vfs.mount("/mnt", None, rootfs::NAME, None).unwrap();

    let tmp = vfs.path_to_vnode(None, "/tmp", true).unwrap();
    let (mount, dir) = (tmp.mount_id(), tmp.node_id());
    assert_eq!(vfs.entry_ref_to_path(mount, dir, "missing").unwrap(), "/tmp/missing");
    assert_eq!(vfs.entry_ref_to_path(mount, dir, ".").unwrap(), "/tmp");
    assert_eq!(vfs.entry_ref_to_path(mount, dir, "..").unwrap(), "/");
    assert_eq!(
        vfs.entry_ref_to_path(mount, dir, "a/b").unwrap_err(),
        FsError::InvalidArgument
    );
    assert_eq!(vfs.entry_ref_to_path(mount, dir, "").unwrap_err(), FsError::InvalidArgument);

    let mnt_root = vfs.path_to_vnode(None, "/mnt", true).unwrap();
    assert_eq!(mnt_root.mount_id(), id);
    assert_eq!(vfs.entry_ref_to_path(id, mnt_root.node_id(), "f").unwrap(), "/mnt/f");
    assert_eq!(vfs.entry_ref_to_path(id, mnt_root.node_id(), "..").unwrap(), "/");
}

#[test]
fn test_normalize_path() {
    let (vfs, ctx) = rootfs_vfs();
    make_tree(&vfs, &ctx);
    vfs.create_symlink(&ctx, "/a/link", "b/c", 0o777).unwrap();
    vfs.create_symlink(&ctx, "/dirlink", "/a/b", 0o777).unwrap();

    assert_eq!(vfs.normalize_path(None, "//a/./b/../b/c", true).unwrap(), "/a/b/c");
    assert_eq!(vfs.normalize_path(None, "/a/b/..", true).unwrap(), "/a");
    assert_eq!(vfs.normalize_path(None, "/", true).unwrap(), "/");
    // The leaf need not exist
    assert_eq!(vfs.normalize_path(None, "/a/b/new", true).unwrap(), "/a/b/new");
    // Directory links are always resolved, a leaf link only on request
    assert_eq!(vfs.normalize_path(None, "/dirlink/c", false).unwrap(), "/a/b/c");
    assert_eq!(vfs.normalize_path(None, "/a/link", false).unwrap(), "/a/link");
    assert_eq!(vfs.normalize_path(None, "/a/link", true).unwrap(), "/a/b/c");

    vfs.setcwd(&ctx, "/a").unwrap();
    let cwd = ctx.cwd();
    assert_eq!(vfs.normalize_path(Some(&cwd), "b/../link", true).unwrap(), "/a/b/c");
    assert_eq!(vfs.normalize_path(Some(&cwd), ".", true).unwrap(), "/a");

    assert_eq!(
        vfs.normalize_path(None, "/missing/x", true).unwrap_err(),
        FsError::NotFound
    );
    vfs.create_symlink(&ctx, "/tmp/p", "q", 0o777).unwrap();
    vfs.create_symlink(&ctx, "/tmp/q", "p", 0o777).unwrap();
    assert_eq!(vfs.normalize_path(None, "/tmp/p", true).unwrap_err(), FsError::SymlinkLoop);
    assert_eq!(vfs.normalize_path(None, "/tmp/p", false).unwrap(), "/tmp/p");
}

#[test]
fn test_vnode_to_path_budget() {
    let mut config = VfsConfig::new();
    // Each parent step counts, and so does arriving at the root
    config.max_path_depth = 3;
    let (vfs, ctx) = rootfs_vfs_with(config);
    make_tree(&vfs, &ctx);
    vfs.create_dir(&ctx, "/a/b/d", 0o755).unwrap();

    let shallow = vfs.path_to_vnode(None, "/a/b", true).unwrap();
    assert_eq!(vfs.vnode_to_path(&shallow).unwrap(), "/a/b");
    let deep = vfs.path_to_vnode(None, "/a/b/d", true).unwrap();
    assert_eq!(vfs.vnode_to_path(&deep).unwrap_err(), FsError::TooDeep);
}

#[test]
fn test_vnode_to_path_overflow() {
    let mut config = VfsConfig::new();
    config.max_path_len = 8;
    let (vfs, ctx) = rootfs_vfs_with(config);
    vfs.create_dir(&ctx, "/abc", 0o755).unwrap();
    vfs.setcwd(&ctx, "/abc").unwrap();
    vfs.create_dir(&ctx, "defgh", 0o755).unwrap();

    let fits = vfs.path_to_vnode(None, "/abc", true).unwrap();
    assert_eq!(vfs.vnode_to_path(&fits).unwrap(), "/abc");
    let cwd = ctx.cwd();
    let long = vfs.path_to_vnode(Some(&cwd), "defgh", true).unwrap();
    assert_eq!(vfs.vnode_to_path(&long).unwrap_err(), FsError::BufferOverflow);
}

#[test]
fn test_getcwd_follows_setcwd() {
    let (vfs, ctx) = rootfs_vfs();
    make_tree(&vfs, &ctx);

    assert_eq!(vfs.getcwd(&ctx).unwrap(), "/");
    vfs.setcwd(&ctx, "/a/b").unwrap();
    assert_eq!(vfs.getcwd(&ctx).unwrap(), "/a/b");
    vfs.setcwd(&ctx, "..").unwrap();
    assert_eq!(vfs.getcwd(&ctx).unwrap(), "/a");

    assert_eq!(vfs.setcwd(&ctx, "b/c").unwrap_err(), FsError::NotADirectory);
    assert_eq!(vfs.getcwd(&ctx).unwrap(), "/a");
}

#[test]
fn test_search_permission() {
    let (vfs, ctx) = rootfs_vfs();
    vfs.create_dir(&ctx, "/locked", 0o755).unwrap();
    write_file(&vfs, &ctx, "/locked/f", b"secret");
    vfs.create_dir(&ctx, "/closed", 0o600).unwrap();

    assert!(vfs.path_to_vnode(None, "/locked/f", true).is_ok());
    assert_eq!(
        vfs.path_to_vnode(None, "/closed/f", true).unwrap_err(),
        FsError::PermissionDenied
    );
    // The directory itself is still reachable
    assert!(vfs.path_to_vnode(None, "/closed", true).is_ok());
}
