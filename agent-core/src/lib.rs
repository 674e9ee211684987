//! Guest agent core library: metadata types, layered config and the command runner.
//!
//! Public API surface:
//! - [`types`]: metadata descriptor and attribute accessors
//! - [`config`]: layered `instance_configs.cfg` loading
//! - [`run`]: external command execution behind [`CommandRunner`]
//! - [`os_info`]: host OS identification
//! - [`platform`]: runtime platform selection
//! - [`error`]: [`ConfigError`], [`CommandError`]

pub mod config;
pub mod error;
pub mod os_info;
pub mod platform;
pub mod run;
pub mod types;

pub use config::Config;
pub use error::{CommandError, ConfigError};
pub use platform::Platform;
pub use run::{CommandOutput, CommandRunner, TokioRunner};
pub use types::{
    Attributes, Descriptor, Instance, NetworkInterface, OsLoginFlags, Project, TrustedCert,
    TrustedCertificates, VirtualClock,
};
