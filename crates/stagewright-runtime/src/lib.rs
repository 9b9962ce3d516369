//! In-container entrypoint for stagewright images.
//!
//! The compiler writes an entry plan and four hook wrappers per stage into
//! the image; [`Entrypoint`] reads them on every container start and decides
//! what runs. Nothing here talks back to the compiler.

pub mod entrypoint;
pub mod launcher;
pub mod profile;
pub mod signals;

use std::path::PathBuf;

use stagewright_core::StageId;

pub use entrypoint::{Entrypoint, ExecCommand, Exit, exec};
pub use launcher::{LaunchError, Launcher, Signal, SystemLauncher};
pub use profile::register_login;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Plan(#[from] stagewright_core::Error),

    #[error("no entry plan for {stage}")]
    NoPlan { stage: StageId },

    #[error("ssh is enabled but {path} does not exist; is openssh-server installed?")]
    SshConfigMissing { path: PathBuf },

    #[error("failed to link storage at {path}")]
    Link {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write first-run marker {path}")]
    Marker {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to update shell profile {path}")]
    Profile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error("failed to exec {program}")]
    Exec {
        program: String,
        source: std::io::Error,
    },
}
