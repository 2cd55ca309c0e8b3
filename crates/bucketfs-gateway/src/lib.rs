#![warn(missing_docs)]

//! BucketFS gateway: exposes namespace trees over object storage to an
//! NFS-style protocol front-end

pub mod config;
pub mod error;
pub mod export;
pub mod export_manager;
pub mod protocol;
pub mod stats;

pub use config::{ExportConfig, GatewayConfig};
pub use error::{GatewayError, Result};
pub use export::{Credentials, Export, Sattr3};
pub use export_manager::ExportManager;
pub use protocol::{DigestType, Entryplus3, Fattr3, FileHandle3, Ftype3};
