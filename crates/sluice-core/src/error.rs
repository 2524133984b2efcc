//! Error types for the Sluice virtual filesystem

use std::io;

use thiserror::Error;

/// Filesystem-level errors
///
/// `Clone` so that one failed resolution can be handed to every caller
/// waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FsError {
    #[error("no such file: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("operation not supported: {0}")]
    Unsupported(String),

    #[error("resource closed: {0}")]
    Closed(String),

    #[error("interrupted: {0}")]
    Interrupted(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("I/O error: {message}")]
    Io { kind: io::ErrorKind, message: String },
}

impl FsError {
    pub fn not_found(what: impl Into<String>) -> Self {
        FsError::NotFound(what.into())
    }

    pub fn not_a_directory(what: impl Into<String>) -> Self {
        FsError::NotADirectory(what.into())
    }

    pub fn is_a_directory(what: impl Into<String>) -> Self {
        FsError::IsADirectory(what.into())
    }

    pub fn already_exists(what: impl Into<String>) -> Self {
        FsError::AlreadyExists(what.into())
    }

    pub fn unsupported(op: impl Into<String>) -> Self {
        FsError::Unsupported(op.into())
    }

    pub fn closed(what: impl Into<String>) -> Self {
        FsError::Closed(what.into())
    }

    pub fn interrupted(what: impl Into<String>) -> Self {
        FsError::Interrupted(what.into())
    }

    pub fn invalid_path(what: impl Into<String>) -> Self {
        FsError::InvalidPath(what.into())
    }

    pub fn permission_denied(what: impl Into<String>) -> Self {
        FsError::PermissionDenied(what.into())
    }

    /// Error code for this failure
    pub fn code(&self) -> ErrorCode {
        ErrorCode::from(self)
    }
}

impl From<io::Error> for FsError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => FsError::NotFound(e.to_string()),
            io::ErrorKind::AlreadyExists => FsError::AlreadyExists(e.to_string()),
            io::ErrorKind::Interrupted => FsError::Interrupted(e.to_string()),
            io::ErrorKind::Unsupported => FsError::Unsupported(e.to_string()),
            io::ErrorKind::PermissionDenied => FsError::PermissionDenied(e.to_string()),
            kind => FsError::Io {
                kind,
                message: e.to_string(),
            },
        }
    }
}

impl From<FsError> for io::Error {
    fn from(e: FsError) -> Self {
        let kind = match &e {
            FsError::NotFound(_) => io::ErrorKind::NotFound,
            FsError::NotADirectory(_) => io::ErrorKind::InvalidInput,
            FsError::IsADirectory(_) => io::ErrorKind::InvalidInput,
            FsError::AlreadyExists(_) => io::ErrorKind::AlreadyExists,
            FsError::Unsupported(_) => io::ErrorKind::Unsupported,
            FsError::Closed(_) => io::ErrorKind::BrokenPipe,
            FsError::Interrupted(_) => io::ErrorKind::Interrupted,
            FsError::InvalidPath(_) => io::ErrorKind::InvalidInput,
            FsError::PermissionDenied(_) => io::ErrorKind::PermissionDenied,
            FsError::Io { kind, .. } => *kind,
        };
        io::Error::new(kind, e)
    }
}

/// Result alias used across the workspace
pub type FsResult<T> = Result<T, FsError>;

/// Status codes handed to the protocol layer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    Ok = 0,
    NotFound = 100,
    NotADirectory = 101,
    IsADirectory = 102,
    AlreadyExists = 103,
    Unsupported = 104,
    InvalidPath = 105,
    PermissionDenied = 106,
    Closed = 200,
    Interrupted = 201,
    IoError = 202,
}

impl From<&FsError> for ErrorCode {
    fn from(e: &FsError) -> Self {
        match e {
            FsError::NotFound(_) => ErrorCode::NotFound,
            FsError::NotADirectory(_) => ErrorCode::NotADirectory,
            FsError::IsADirectory(_) => ErrorCode::IsADirectory,
            FsError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            FsError::Unsupported(_) => ErrorCode::Unsupported,
            FsError::Closed(_) => ErrorCode::Closed,
            FsError::Interrupted(_) => ErrorCode::Interrupted,
            FsError::InvalidPath(_) => ErrorCode::InvalidPath,
            FsError::PermissionDenied(_) => ErrorCode::PermissionDenied,
            FsError::Io { .. } => ErrorCode::IoError,
        }
    }
}

/// Map error code to libc errno
impl ErrorCode {
    pub fn to_errno(self) -> i32 {
        match self {
            ErrorCode::Ok => 0,
            ErrorCode::NotFound => libc::ENOENT,
            ErrorCode::NotADirectory => libc::ENOTDIR,
            ErrorCode::IsADirectory => libc::EISDIR,
            ErrorCode::AlreadyExists => libc::EEXIST,
            ErrorCode::Unsupported => libc::EROFS,
            ErrorCode::InvalidPath => libc::EINVAL,
            ErrorCode::PermissionDenied => libc::EACCES,
            ErrorCode::Closed => libc::EBADF,
            ErrorCode::Interrupted => libc::EINTR,
            ErrorCode::IoError => libc::EIO,
        }
    }
}
