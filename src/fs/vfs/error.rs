//! VFS Error Types
//!
//! One error type is shared by the switch layer and every filesystem module,
//! so module failures pass through the core unchanged.

use core::fmt;

use crate::sync::WaitTimedOut;

/// Result type for filesystem operations
pub type FsResult<T> = Result<T, FsError>;

/// Filesystem error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// No such file, directory, mount or module
    NotFound,
    /// File exists
    AlreadyExists,
    /// Mount or node still referenced
    Busy,
    /// Not a directory
    NotADirectory,
    /// Is a directory
    IsADirectory,
    /// Too many levels of symbolic links
    SymlinkLoop,
    /// Tree deeper than the traversal bound
    TooDeep,
    /// Link or rename spanning two mounts
    CrossDevice,
    /// The module does not implement this operation
    Unsupported,
    /// Out of memory
    NoMemory,
    /// Invalid argument
    InvalidArgument,
    /// Permission denied
    PermissionDenied,
    /// Opaque module-reported I/O failure
    IoError,
    /// Name or path too long
    NameTooLong,
    /// Target is already the root of a mount
    AlreadyMountPoint,
    /// Target is not the root of a mount
    NotAMountPoint,
    /// Result does not fit the caller's bound
    BufferOverflow,
    /// Descriptor is not open or has the wrong kind
    BadDescriptor,
    /// Descriptor table is full
    TooManyOpenFiles,
    /// Directory not empty
    DirectoryNotEmpty,
    /// Read-only filesystem
    ReadOnly,
    /// Waited too long for a busy vnode
    TimedOut,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "No such file or directory"),
            Self::AlreadyExists => write!(f, "File exists"),
            Self::Busy => write!(f, "Device or resource busy"),
            Self::NotADirectory => write!(f, "Not a directory"),
            Self::IsADirectory => write!(f, "Is a directory"),
            Self::SymlinkLoop => write!(f, "Too many symbolic links"),
            Self::TooDeep => write!(f, "Directory tree too deep"),
            Self::CrossDevice => write!(f, "Cross-device link"),
            Self::Unsupported => write!(f, "Operation not supported"),
            Self::NoMemory => write!(f, "Out of memory"),
            Self::InvalidArgument => write!(f, "Invalid argument"),
            Self::PermissionDenied => write!(f, "Permission denied"),
            Self::IoError => write!(f, "I/O error"),
            Self::NameTooLong => write!(f, "Name too long"),
            Self::AlreadyMountPoint => write!(f, "Already a mount point"),
            Self::NotAMountPoint => write!(f, "Not a mount point"),
            Self::BufferOverflow => write!(f, "Buffer overflow"),
            Self::BadDescriptor => write!(f, "Bad file descriptor"),
            Self::TooManyOpenFiles => write!(f, "Too many open files"),
            Self::DirectoryNotEmpty => write!(f, "Directory not empty"),
            Self::ReadOnly => write!(f, "Read-only filesystem"),
            Self::TimedOut => write!(f, "Timed out waiting for busy node"),
        }
    }
}

impl From<WaitTimedOut> for FsError {
    fn from(_: WaitTimedOut) -> Self {
        FsError::TimedOut
    }
}

/// Treat `Unsupported` as success for optional hooks
pub(crate) fn optional(result: FsResult<()>) -> FsResult<()> {
    match result {
        Err(FsError::Unsupported) => Ok(()),
        other => other,
    }
}
