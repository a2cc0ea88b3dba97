//! Filesystem Subsystem
//!
//! The VFS switch layer plus the in-memory root filesystem used to bring it up.

pub mod rootfs;
pub mod vfs;

use alloc::sync::Arc;

use crate::config::VfsConfig;
use vfs::{FsResult, Vfs};

/// Directories created on the root filesystem at bootstrap
pub const BOOT_DIRECTORIES: [&str; 3] = ["/dev", "/boot", "/tmp"];

/// Build a VFS with rootfs mounted at "/" and the standard directories in place
pub fn bootstrap(config: VfsConfig) -> FsResult<Vfs> {
    let vfs = Vfs::new(config);
    vfs.registry().register(Arc::new(rootfs::RootFs))?;
    vfs.mount("/", None, rootfs::NAME, None)?;

    let ctx = vfs.new_io_context(None)?;
    for dir in BOOT_DIRECTORIES {
        vfs.create_dir(&ctx, dir, 0o755)?;
    }
    drop(ctx);

    crate::log_info!("vfs", "root filesystem ready");
    Ok(vfs)
}
