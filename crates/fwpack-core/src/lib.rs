//! Core library for fwpack: package manifests, installation sets, object
//! hashing and server sync. Used by the CLI binary; can be reused by other
//! tools (e.g. CI uploaders).

pub mod config;
pub mod error;
pub mod http_client;
pub mod installation_set;
pub mod object;
pub mod options;
pub mod package;
pub mod progress;
pub mod sync;

// Re-export main API for CLI
pub use config::Config;
pub use error::{FwpackError, Result};
pub use http_client::HttpTransport;
pub use installation_set::{
    InstallationSet, InstallationSetManager, InstallationSetMode, LoadReport,
};
pub use object::{LoadCache, Object, ObjectMetadata, ObjectSpec, ObjectTemplate};
pub use options::{Mode, OptionSpec, OptionValue, Symmetry, MODES};
pub use package::{
    create_package, open_package, ActiveBackupBackend, Package, PackageMetadata,
    ACTIVE_BACKUP_BACKENDS,
};
pub use progress::{NoProgress, Progress};
pub use sync::{CommitStatus, PullReport, Remote, Request, Response, Transport, TransportError};
