//! Error types for the BucketFS gateway

use bucketfs_meta::MetaError;
use thiserror::Error;

/// NFSv3 status: OK (success)
pub const NFS3_OK: u32 = 0;
/// NFSv3 status: not owner
pub const NFS3ERR_PERM: u32 = 1;
/// NFSv3 status: no such file or directory
pub const NFS3ERR_NOENT: u32 = 2;
/// NFSv3 status: I/O error
pub const NFS3ERR_IO: u32 = 5;
/// NFSv3 status: file exists
pub const NFS3ERR_EXIST: u32 = 17;
/// NFSv3 status: invalid argument
pub const NFS3ERR_INVAL: u32 = 22;
/// NFSv3 status: name too long
pub const NFS3ERR_NAMETOOLONG: u32 = 63;
/// NFSv3 status: directory not empty
pub const NFS3ERR_NOTEMPTY: u32 = 66;
/// NFSv3 status: stale file handle
pub const NFS3ERR_STALE: u32 = 70;
/// NFSv3 status: illegal file handle
pub const NFS3ERR_BADHANDLE: u32 = 10001;
/// NFSv3 status: operation not supported
pub const NFS3ERR_NOTSUPP: u32 = 10004;
/// NFSv3 status: buffer too small
pub const NFS3ERR_TOOSMALL: u32 = 10005;
/// NFSv3 status: server fault
pub const NFS3ERR_SERVERFAULT: u32 = 10006;

/// Errors surfaced by the gateway, each carrying one NFSv3 status.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// NFS: not owner / operation not permitted
    #[error("NFS: operation not permitted")]
    Nfs3Perm,
    /// NFS: no such file or directory
    #[error("NFS: no such file or directory")]
    Nfs3NoEnt,
    /// NFS: I/O error
    #[error("NFS: I/O error")]
    Nfs3Io,
    /// NFS: already exists
    #[error("NFS: already exists")]
    Nfs3Exist,
    /// NFS: invalid argument
    #[error("NFS: invalid argument")]
    Nfs3Inval,
    /// NFS: name too long
    #[error("NFS: name too long")]
    Nfs3NameTooLong,
    /// NFS: directory not empty
    #[error("NFS: directory not empty")]
    Nfs3NotEmpty,
    /// NFS: stale file handle
    #[error("NFS: stale file handle")]
    Nfs3Stale,
    /// NFS: bad handle
    #[error("NFS: bad handle")]
    Nfs3BadHandle,
    /// NFS: operation not supported
    #[error("NFS: not supported")]
    Nfs3NotSupp,
    /// NFS: buffer too small
    #[error("NFS: buffer too small")]
    Nfs3TooSmall,
    /// NFS: server fault
    #[error("NFS: server fault")]
    Nfs3ServerFault,
    /// Export registry error
    #[error("Export error: {reason}")]
    ExportError {
        /// What went wrong
        reason: String,
    },
}

impl GatewayError {
    /// Converts the error to an NFSv3 status code for protocol responses.
    pub fn nfs3_status(&self) -> u32 {
        match self {
            GatewayError::Nfs3Perm => NFS3ERR_PERM,
            GatewayError::Nfs3NoEnt => NFS3ERR_NOENT,
            GatewayError::Nfs3Io => NFS3ERR_IO,
            GatewayError::Nfs3Exist => NFS3ERR_EXIST,
            GatewayError::Nfs3Inval => NFS3ERR_INVAL,
            GatewayError::Nfs3NameTooLong => NFS3ERR_NAMETOOLONG,
            GatewayError::Nfs3NotEmpty => NFS3ERR_NOTEMPTY,
            GatewayError::Nfs3Stale => NFS3ERR_STALE,
            GatewayError::Nfs3BadHandle => NFS3ERR_BADHANDLE,
            GatewayError::Nfs3NotSupp => NFS3ERR_NOTSUPP,
            GatewayError::Nfs3TooSmall => NFS3ERR_TOOSMALL,
            GatewayError::Nfs3ServerFault => NFS3ERR_SERVERFAULT,
            GatewayError::ExportError { .. } => NFS3ERR_INVAL,
        }
    }
}

impl From<MetaError> for GatewayError {
    fn from(err: MetaError) -> Self {
        tracing::debug!(error = %err, "namespace error");
        match err {
            MetaError::NoSuchEntry(_) => GatewayError::Nfs3NoEnt,
            MetaError::AlreadyExists(_) => GatewayError::Nfs3Exist,
            MetaError::InvalidArgument(_) => GatewayError::Nfs3Inval,
            MetaError::PathTooLong { .. } => GatewayError::Nfs3NameTooLong,
            MetaError::PermissionDenied(_) => GatewayError::Nfs3Perm,
            MetaError::BackendUnavailable(_) => GatewayError::Nfs3Io,
            MetaError::Unknown(_) => GatewayError::Nfs3ServerFault,
            MetaError::TooSmall { .. } => GatewayError::Nfs3TooSmall,
            MetaError::NotSupported(_) => GatewayError::Nfs3NotSupp,
            MetaError::StaleHandle => GatewayError::Nfs3Stale,
            MetaError::DirectoryNotEmpty(_) => GatewayError::Nfs3NotEmpty,
        }
    }
}

/// Result type alias using GatewayError as the error type.
pub type Result<T> = std::result::Result<T, GatewayError>;
