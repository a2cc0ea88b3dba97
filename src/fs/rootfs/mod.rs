//! rootfs - In-memory root filesystem
//!
//! The filesystem mounted at "/" during bootstrap. Nodes live in a table keyed
//! by node id; directories map names to ids. A node whose last link goes away
//! while the VFS still holds it is marked for deletion and freed when the
//! VFS releases it.

mod dir;
mod node;
mod volume;

use alloc::sync::Arc;

pub use node::RamNode;
pub use volume::{RootVolume, ROOT_NODE};

use crate::fs::vfs::{FilesystemModule, FsResult, Mounted, VolumeContext};

/// Registry name of the filesystem
pub const NAME: &str = "rootfs";

/// rootfs filesystem type
pub struct RootFs;

impl FilesystemModule for RootFs {
    fn name(&self) -> &str {
        NAME
    }

    fn mount(&self, ctx: VolumeContext, _device: Option<&str>, _args: Option<&str>) -> FsResult<Mounted> {
        crate::log_debug!("rootfs", "new volume for mount {}", ctx.mount_id());
        Ok(Mounted {
            volume: Arc::new(RootVolume::new(ctx)),
            root: ROOT_NODE,
        })
    }
}
