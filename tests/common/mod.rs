//! Shared fixtures for the filesystem test suites
//!
//! `ProbeFs` is a flat filesystem that records every node lifecycle hook the
//! VFS calls and can slow down or fail node materialization on request.
//! Names `f<N>` are files and `d<N>` are directories with node id N; the root
//! is node 1.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mello_vfs::fs::vfs::{
    FileMode, FilesystemModule, FsError, FsNode, FsResult, Mounted, NodeId, NodeType, Stat,
    Volume, VolumeContext,
};
use mello_vfs::{bootstrap, IoContext, Vfs, VfsConfig};

pub const PROBE: &str = "probefs";
pub const PROBE_ROOT: NodeId = 1;

/// Counters and knobs shared between a test and its probe volumes
#[derive(Default)]
pub struct Probe {
    pub materialized: AtomicUsize,
    pub released: AtomicUsize,
    pub removed: AtomicUsize,
    pub synced: AtomicUsize,
    pub fsynced: AtomicUsize,
    pub unmounted: AtomicBool,
    pub delay_ms: AtomicU64,
    pub failing: Mutex<HashSet<NodeId>>,
}

impl Probe {
    pub fn materialized(&self) -> usize {
        self.materialized.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn removed(&self) -> usize {
        self.removed.load(Ordering::SeqCst)
    }

    pub fn synced(&self) -> usize {
        self.synced.load(Ordering::SeqCst)
    }

    pub fn fsynced(&self) -> usize {
        self.fsynced.load(Ordering::SeqCst)
    }

    pub fn set_delay(&self, ms: u64) {
        self.delay_ms.store(ms, Ordering::SeqCst);
    }

    pub fn fail(&self, id: NodeId, failing: bool) {
        let mut set = self.failing.lock().unwrap();
        if failing {
            set.insert(id);
        } else {
            set.remove(&id);
        }
    }
}

pub struct ProbeNode {
    pub id: NodeId,
}

pub struct ProbeFs {
    pub probe: Arc<Probe>,
}

impl FilesystemModule for ProbeFs {
    fn name(&self) -> &str {
        PROBE
    }

    fn mount(&self, _ctx: VolumeContext, _device: Option<&str>, _args: Option<&str>) -> FsResult<Mounted> {
        Ok(Mounted {
            volume: Arc::new(ProbeVolume {
                probe: self.probe.clone(),
            }),
            root: PROBE_ROOT,
        })
    }
}

pub struct ProbeVolume {
    probe: Arc<Probe>,
}

fn probe_id(node: &FsNode) -> FsResult<NodeId> {
    node.downcast_ref::<ProbeNode>()
        .map(|n| n.id)
        .ok_or(FsError::InvalidArgument)
}

fn probe_type(id: NodeId) -> NodeType {
    if id == PROBE_ROOT || id >= 1000 {
        NodeType::Directory
    } else {
        NodeType::File
    }
}

impl Volume for ProbeVolume {
    fn unmount(&self) -> FsResult<()> {
        self.probe.unmounted.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn sync(&self) -> FsResult<()> {
        self.probe.synced.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn fsync(&self, node: &FsNode, _data_only: bool) -> FsResult<()> {
        probe_id(node)?;
        self.probe.fsynced.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn lookup(&self, dir: &FsNode, name: &str) -> FsResult<(NodeId, NodeType)> {
        let dir = probe_id(dir)?;
        let id = match name {
            "." => dir,
            ".." => PROBE_ROOT,
            _ => {
                let (want, number) = match name.split_at(1) {
                    ("f", number) => (NodeType::File, number),
                    ("d", number) => (NodeType::Directory, number),
                    _ => return Err(FsError::NotFound),
                };
                let id: NodeId = number.parse().map_err(|_| FsError::NotFound)?;
                if probe_type(id) != want {
                    return Err(FsError::NotFound);
                }
                id
            }
        };
        Ok((id, probe_type(id)))
    }

    fn read_node(&self, id: NodeId) -> FsResult<FsNode> {
        self.probe.materialized.fetch_add(1, Ordering::SeqCst);
        let delay = self.probe.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        if self.probe.failing.lock().unwrap().contains(&id) {
            return Err(FsError::IoError);
        }
        Ok(Arc::new(ProbeNode { id }))
    }

    fn put_node(&self, _node: &FsNode) -> FsResult<()> {
        self.probe.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn remove_node(&self, _node: &FsNode) -> FsResult<()> {
        self.probe.removed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read_stat(&self, node: &FsNode) -> FsResult<Stat> {
        let id = probe_id(node)?;
        Ok(Stat {
            node: id,
            mode: FileMode::from_type(probe_type(id), 0o755),
            nlink: 1,
            ..Stat::default()
        })
    }
}

/// A VFS whose root filesystem is a probe
pub fn probe_vfs(config: VfsConfig) -> (Vfs, Arc<Probe>) {
    let probe = Arc::new(Probe::default());
    let vfs = Vfs::new(config);
    vfs.registry()
        .register(Arc::new(ProbeFs {
            probe: probe.clone(),
        }))
        .unwrap();
    vfs.mount("/", None, PROBE, None).unwrap();
    (vfs, probe)
}

/// A bootstrapped VFS with rootfs at "/" and a context rooted there
pub fn rootfs_vfs() -> (Vfs, IoContext) {
    rootfs_vfs_with(VfsConfig::default())
}

pub fn rootfs_vfs_with(config: VfsConfig) -> (Vfs, IoContext) {
    let vfs = bootstrap(config).unwrap();
    let ctx = vfs.new_io_context(None).unwrap();
    (vfs, ctx)
}

/// Create a file holding `contents`
pub fn write_file(vfs: &Vfs, ctx: &IoContext, path: &str, contents: &[u8]) {
    use mello_vfs::fs::vfs::OpenFlags;

    let fd = vfs
        .open(ctx, path, OpenFlags::CREATE | OpenFlags::WRITE | OpenFlags::TRUNCATE, 0o644)
        .unwrap();
    assert_eq!(vfs.write(ctx, fd, contents).unwrap(), contents.len());
    vfs.close(ctx, fd).unwrap();
}
