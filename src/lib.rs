//! mello-vfs: the virtual filesystem switch layer of the MelloOS kernel
//!
//! Mount table, reference-counted vnode cache and path resolution, with an
//! in-memory root filesystem for bootstrap.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[macro_use]
pub mod log;

pub mod config;
pub mod fs;
pub mod sync;

pub use config::VfsConfig;
pub use fs::bootstrap;
pub use fs::vfs::{FsError, FsResult, IoContext, Vfs, VnodeRef};
