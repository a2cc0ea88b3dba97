//! Synchronization helpers for the VFS layer
//! Locks come from the `spin` crate; this module adds the bounded
//! backoff wait used while a vnode is busy.

mod wait;

pub use wait::{wait_until, WaitPolicy, WaitTimedOut};
