//! Fixed paths shared by the compiler (which writes them into artifacts) and
//! the entrypoint (which reads them inside the container).

use std::path::{Path, PathBuf};

use crate::stage::{Hook, StageId};

/// Config file looked up in the project directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "stagewright.yml";

/// Project-relative directory copied into every image.
pub const INSTALLATION_DIR: &str = "installation";

/// Project-relative location of the entrypoint binary copied into images.
pub const HOST_BINARY_PATH: &str = "installation/bin/stagewright";

pub const COMPOSE_FILE: &str = "docker-compose.yml";

pub const IMAGE_INSTALL_DIR: &str = "/stagewright/installation";
pub const IMAGE_BINARY_PATH: &str = "/stagewright/bin/stagewright";
pub const IMAGE_RUNTIME_DIR: &str = "/stagewright/runtime";

pub const HARD_VOLUME_ROOT: &str = "/hard/volume";
pub const HARD_IMAGE_ROOT: &str = "/hard/image";

pub const SSHD_CONFIG: &str = "/etc/ssh/sshd_config";

const GENERATED: &str = "generated";
const ENTRY_PLAN_FILE: &str = "entry-plan.json";
const SETUP_USERS_FILE: &str = "_setup-users.sh";

pub fn dockerfile_name(stage: StageId) -> String {
    format!("{}.Dockerfile", stage.dir_name())
}

// ── Host side (project directory) ──

pub fn host_generated_dir(project_dir: &Path, stage: StageId) -> PathBuf {
    project_dir
        .join(INSTALLATION_DIR)
        .join(stage.dir_name())
        .join(GENERATED)
}

/// Project-relative generated directory, as written into Dockerfiles.
pub fn generated_rel(stage: StageId) -> String {
    format!("{INSTALLATION_DIR}/{}/{GENERATED}", stage.dir_name())
}

pub fn ssh_keys_rel(stage: StageId) -> String {
    format!("{}/ssh_keys", generated_rel(stage))
}

// ── Image side ──

pub fn image_generated_dir(stage: StageId) -> String {
    format!("{IMAGE_INSTALL_DIR}/{}/{GENERATED}", stage.dir_name())
}

pub fn image_wrapper_path(stage: StageId, hook: Hook) -> String {
    format!("{}/{}", image_generated_dir(stage), hook.wrapper_file_name())
}

pub fn image_setup_users_path(stage: StageId) -> String {
    format!("{}/{SETUP_USERS_FILE}", image_generated_dir(stage))
}

pub fn image_plan_path(stage: StageId) -> String {
    format!("{}/{ENTRY_PLAN_FILE}", image_generated_dir(stage))
}

pub fn image_ssh_keys_dir(stage: StageId) -> String {
    format!("{}/ssh_keys", image_generated_dir(stage))
}

/// Presence-only marker suppressing `on_first_run` after it succeeded once.
pub fn image_marker_path(stage: StageId) -> String {
    format!("{IMAGE_RUNTIME_DIR}/{}.first-run.done", stage.dir_name())
}

/// Translate a script path from the config into the path the image sees.
/// Relative paths are relative to the project's `installation/` directory.
pub fn image_script_path(script_path: &str) -> String {
    if script_path.starts_with('/') {
        script_path.to_owned()
    } else {
        format!(
            "{IMAGE_INSTALL_DIR}/{}",
            script_path.trim_start_matches("./")
        )
    }
}

pub fn setup_users_file_name() -> &'static str {
    SETUP_USERS_FILE
}

pub fn entry_plan_file_name() -> &'static str {
    ENTRY_PLAN_FILE
}
