//! Closed error taxonomy shared by every component of the pipeline.
//!
//! The reference crate this grew from propagates `Result<T, String>`
//! everywhere; once a pipeline has five collaborating components and a
//! documented, closed set of failure modes, a real enum pulls its weight.

use std::fmt;
use std::path::PathBuf;

/// The closed set of failure modes a pipeline component can report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    #[error("invalid argument")]
    InvalidArgument,
    #[error("invalid path")]
    InvalidPath,
    #[error("permission denied")]
    PermissionDenied,
    #[error("not found")]
    NotFound,
    #[error("device lost")]
    DeviceLost,
    #[error("read failed")]
    ReadFailed,
    #[error("write failed")]
    WriteFailed,
    #[error("seek failed")]
    SeekFailed,
    #[error("offset out of range")]
    OffsetOutOfRange,
    #[error("size out of bounds")]
    SizeOutOfBounds,
    #[error("mismatched profile")]
    MismatchedProfile,
    #[error("unsupported format")]
    UnsupportedFormat,
    #[error("checksum error")]
    ChecksumError,
    #[error("hash mismatch")]
    HashMismatch,
    #[error("aborted")]
    Aborted,
    #[error("internal invariant violated")]
    InternalInvariant,
}

/// A component error: a closed [`ErrorKind`] plus a free-text context that
/// names the offending value or operation; the module path that constructs
/// the error already says which component failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreError {
    pub kind: ErrorKind,
    pub context: String,
}

impl CoreError {
    pub fn new(kind: ErrorKind, context: impl Into<String>) -> Self {
        CoreError {
            kind,
            context: context.into(),
        }
    }

    pub fn invalid_argument(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, context)
    }

    pub fn invalid_path(path: &std::path::Path) -> Self {
        Self::new(ErrorKind::InvalidPath, path.display().to_string())
    }

    pub fn not_found(path: &std::path::Path) -> Self {
        Self::new(ErrorKind::NotFound, path.display().to_string())
    }

    pub fn permission_denied(path: &std::path::Path) -> Self {
        Self::new(ErrorKind::PermissionDenied, path.display().to_string())
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.context.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.context)
        }
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            _ => classify_os_error(&err),
        };
        CoreError::new(kind, err.to_string())
    }
}

/// Classifies the "device vanished mid-operation" family of OS errors
/// (ESPIPE/EPERM/ENXIO/ENODEV) as [`ErrorKind::DeviceLost`], everything else
/// as [`ErrorKind::ReadFailed`].
fn classify_os_error(err: &std::io::Error) -> ErrorKind {
    #[cfg(unix)]
    {
        use libc_errno_compat::{EINVAL, ENODEV, ENXIO, EPERM, ESPIPE};
        if let Some(code) = err.raw_os_error() {
            if code == ESPIPE || code == EPERM || code == ENXIO || code == ENODEV || code == EINVAL
            {
                return ErrorKind::DeviceLost;
            }
        }
    }
    let _ = err;
    ErrorKind::ReadFailed
}

#[cfg(unix)]
mod libc_errno_compat {
    //! Minimal errno constants so `error.rs` does not need a dependency on
    //! the `libc` crate just to classify three or four numbers.
    pub const EPERM: i32 = 1;
    pub const ENXIO: i32 = 6;
    pub const EINVAL: i32 = 22;
    pub const ESPIPE: i32 = 29;
    pub const ENODEV: i32 = 19;
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Helper for constructing an [`InvalidPath`](ErrorKind::InvalidPath) /
/// [`NotFound`](ErrorKind::NotFound) error from a path that failed to open.
pub fn path_open_error(path: &PathBuf, err: std::io::Error) -> CoreError {
    match err.kind() {
        std::io::ErrorKind::NotFound => CoreError::not_found(path),
        std::io::ErrorKind::PermissionDenied => CoreError::permission_denied(path),
        _ => CoreError::new(ErrorKind::InvalidPath, format!("{}: {}", path.display(), err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = CoreError::invalid_argument("chunk size must be nonzero");
        assert_eq!(
            err.to_string(),
            "invalid argument: chunk size must be nonzero"
        );
    }

    #[test]
    fn display_without_context() {
        let err = CoreError::new(ErrorKind::Aborted, "");
        assert_eq!(err.to_string(), "aborted");
    }

    #[test]
    fn io_not_found_maps_to_not_found_kind() {
        let io_err = std::io::Error::from(std::io::ErrorKind::NotFound);
        let err: CoreError = io_err.into();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }
}
