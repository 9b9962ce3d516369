//! Core types and configuration for stagewright.
//!
//! This crate defines the `stagewright.yml` schema ([`ProjectConfig`]), the
//! environment substitution pass ([`env`]), script entry parsing
//! ([`ScriptEntry`]), compile diagnostics ([`Diagnostics`]) and the entry plan
//! that the compiler hands to the in-container entrypoint ([`EntryPlan`]).

pub mod config;
pub mod diagnostics;
pub mod env;
pub mod error;
pub mod layout;
pub mod plan;
pub mod script;
pub mod shell;
pub mod stage;

pub use config::{
    AptConfig, CustomScripts, DeviceKind, ImageConfig, MountKind, MountSpec, ProjectConfig,
    ProxyConfig, SshConfig, SshUserSpec, StageConfig,
};
pub use diagnostics::{Diagnostic, Diagnostics, Finding, Location, ResolutionWarning, ValidationError};
pub use env::EnvSnapshot;
pub use error::{Error, Result};
pub use plan::{CustomEntry, EntryPlan, HookPaths, SshRuntime, StorageLink};
pub use script::ScriptEntry;
pub use stage::{Hook, Invocation, StageId};
