//! The entry plan: everything the in-container entrypoint needs to know about
//! a stage, written by the compiler as JSON next to the wrapper scripts.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::stage::StageId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPlan {
    pub stage: StageId,
    /// Present when sshd should be started.
    pub ssh: Option<SshRuntime>,
    pub hooks: HookPaths,
    /// Marker whose presence means `on_first_run` already succeeded.
    pub first_run_marker: String,
    pub custom_entry: Option<CustomEntry>,
    /// Storage symlinks, in mount declaration order.
    pub links: Vec<StorageLink>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshRuntime {
    pub port: u16,
}

/// In-image paths of the runtime wrappers. `on_build` has no entry here; it
/// only runs during the image build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookPaths {
    pub on_first_run: String,
    pub on_every_run: String,
    pub on_user_login: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomEntry {
    pub script: String,
    pub args: Vec<String>,
}

/// `link` is the stable path users address; it points at `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLink {
    pub name: String,
    pub link: String,
    pub target: String,
}

impl EntryPlan {
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| crate::Error::PlanLoad {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&content).map_err(|e| crate::Error::PlanParse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn to_json(&self) -> crate::Result<String> {
        let mut json = serde_json::to_string_pretty(self)
            .map_err(|e| crate::Error::PlanSerialize { source: e })?;
        json.push('\n');
        Ok(json)
    }
}
