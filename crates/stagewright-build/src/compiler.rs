use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use stagewright_core::diagnostics::{Diagnostics, Location, ResolutionWarning, ValidationError};
use stagewright_core::{
    EntryPlan, EnvSnapshot, Hook, HookPaths, ProjectConfig, SshRuntime, StageConfig, StageId,
    layout,
};

use crate::compose::ComposeFile;
use crate::dockerfile::{AptMirror, DEFAULT_BASE_IMAGE, DockerfileGenerator};
use crate::identity::{self, AccountDb, IdentityResolver, ResolvedUser};
use crate::keys::{KeyDeriver, SshKeygen};
use crate::lifecycle::{self, StageScripts};
use crate::mounts::{self, MountPlan};
use crate::writer::{ArtifactSet, FileMode, WriteError};

#[allow(clippy::expect_used)]
static PORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,5}):(\d{1,5})(/(tcp|udp))?$").expect("constant regex pattern is valid")
});

#[allow(clippy::expect_used)]
static ENV_ENTRY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*=").expect("constant regex pattern is valid")
});

/// Compiles a [`ProjectConfig`] into build artifacts.
///
/// ```text
/// config ── env substitution ── schema ── identity ── mounts ── scripts ── emit
/// ```
///
/// Every stage is validated before anything is emitted; a compile either
/// returns the full artifact set or every problem it found.
pub struct Compiler<K: KeyDeriver = SshKeygen> {
    keys: K,
    /// Fixed account snapshot; derived from stage_1's base image when unset.
    accounts: Option<AccountDb>,
}

impl Compiler<SshKeygen> {
    pub fn new() -> Self {
        Self {
            keys: SshKeygen,
            accounts: None,
        }
    }
}

impl Default for Compiler<SshKeygen> {
    fn default() -> Self {
        Self::new()
    }
}

/// Successful compile output. `diagnostics` only holds warnings.
#[derive(Debug)]
pub struct Compilation {
    pub artifacts: ArtifactSet,
    pub diagnostics: Diagnostics,
    pub plans: Vec<EntryPlan>,
}

impl Compilation {
    /// Replace the generated artifacts in `project_dir`.
    pub fn write(&self, project_dir: &Path) -> Result<(), WriteError> {
        self.artifacts.write(project_dir)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("config is invalid:\n{0}")]
    Invalid(Diagnostics),
    #[error(transparent)]
    Config(#[from] stagewright_core::Error),
    #[error("failed to render {}", layout::COMPOSE_FILE)]
    Compose(#[source] serde_yaml::Error),
}

/// Per-stage results of the resolution passes.
struct ResolvedStage<'c> {
    id: StageId,
    config: &'c StageConfig,
    users: Vec<ResolvedUser>,
    mounts: MountPlan,
    scripts: StageScripts,
}

impl<K: KeyDeriver> Compiler<K> {
    pub fn with_key_deriver<D: KeyDeriver>(self, keys: D) -> Compiler<D> {
        Compiler {
            keys,
            accounts: self.accounts,
        }
    }

    /// Accounts assumed to exist in the base image.
    pub fn with_accounts(mut self, accounts: AccountDb) -> Self {
        self.accounts = Some(accounts);
        self
    }

    /// Load, substitute and compile a config file. A document that does not
    /// match the schema is reported as a diagnostic like any other problem.
    pub fn compile_file(
        &self,
        project_dir: &Path,
        config_path: &Path,
        env: &EnvSnapshot,
    ) -> Result<Compilation, CompileError> {
        match ProjectConfig::load(config_path, env) {
            Ok(config) => self.compile(project_dir, &config),
            Err(stagewright_core::Error::Schema { source, .. }) => {
                let mut diags = Diagnostics::new();
                diags.error(
                    Location::document(),
                    ValidationError::Schema {
                        detail: source.to_string(),
                    },
                );
                Err(CompileError::Invalid(diags))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn compile(
        &self,
        project_dir: &Path,
        config: &ProjectConfig,
    ) -> Result<Compilation, CompileError> {
        let mut diags = Diagnostics::new();

        check_stage_wiring(config, &mut diags);
        for (id, stage) in config.stages() {
            check_fields(id, stage, &mut diags);
        }

        let accounts = self.accounts.clone().unwrap_or_else(|| {
            let base = config
                .stage_1
                .image
                .base
                .as_deref()
                .unwrap_or(DEFAULT_BASE_IMAGE);
            tracing::debug!(base, "using account snapshot of base image");
            AccountDb::for_base_image(base)
        });
        let resolver = IdentityResolver::new(&self.keys, &accounts, project_dir);
        let mut resolved: Vec<ResolvedStage<'_>> = config
            .stages()
            .map(|(id, stage)| ResolvedStage {
                id,
                config: stage,
                users: resolver.resolve(id, &stage.ssh, &mut diags),
                mounts: MountPlan::default(),
                scripts: StageScripts::default(),
            })
            .collect();
        for stage in &mut resolved {
            stage.mounts = mounts::resolve(&config.project, stage.id, stage.config, &mut diags);
        }
        for stage in &mut resolved {
            stage.scripts =
                lifecycle::parse_scripts(project_dir, stage.id, &stage.config.custom, &mut diags);
        }

        if !project_dir.join(layout::HOST_BINARY_PATH).is_file() {
            diags.warn(
                Location::document(),
                ResolutionWarning::MissingRuntimeBinary {
                    path: layout::HOST_BINARY_PATH.to_owned(),
                },
            );
        }

        if diags.has_errors() {
            tracing::debug!(diagnostics = diags.len(), "compile rejected");
            return Err(CompileError::Invalid(diags));
        }

        let (artifacts, plans) = emit(config, &resolved)?;
        tracing::info!(
            stages = resolved.len(),
            files = artifacts.len(),
            warnings = diags.len(),
            "compiled"
        );
        Ok(Compilation {
            artifacts,
            diagnostics: diags,
            plans,
        })
    }
}

fn check_stage_wiring(config: &ProjectConfig, diags: &mut Diagnostics) {
    let Some(stage_2) = &config.stage_2 else {
        return;
    };
    if config.stage_1.image.output.is_none() {
        diags.error(
            Location::stage(StageId::Two).section("image"),
            ValidationError::MissingDependency,
        );
    }
    if let Some(base) = &stage_2.image.base {
        diags.warn(
            Location::stage(StageId::Two).section("image.base"),
            ResolutionWarning::Stage2BaseIgnored {
                image: base.clone(),
            },
        );
    }
    mounts::check_shadowed(&config.stage_1, stage_2, diags);
}

fn check_fields(stage: StageId, config: &StageConfig, diags: &mut Diagnostics) {
    for (i, port) in config.ports.iter().enumerate() {
        if !is_valid_port_mapping(port) {
            diags.error(
                Location::stage(stage).section("ports").index(i),
                ValidationError::InvalidPort {
                    value: port.clone(),
                },
            );
        }
    }
    for (i, entry) in config.environment.iter().enumerate() {
        if !ENV_ENTRY_RE.is_match(entry) {
            diags.error(
                Location::stage(stage).section("environment").index(i),
                ValidationError::InvalidEnvEntry {
                    value: entry.clone(),
                },
            );
        }
    }
    if AptMirror::parse(&config.apt.mirror).is_none() {
        diags.error(
            Location::stage(stage).section("apt.mirror"),
            ValidationError::InvalidAptMirror {
                value: config.apt.mirror.clone(),
            },
        );
    }
}

fn is_valid_port_mapping(value: &str) -> bool {
    let Some(caps) = PORT_RE.captures(value) else {
        return false;
    };
    [1, 2].iter().all(|&i| {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .is_some_and(|p| (1..=65535).contains(&p))
    })
}

fn emit(
    config: &ProjectConfig,
    resolved: &[ResolvedStage<'_>],
) -> Result<(ArtifactSet, Vec<EntryPlan>), CompileError> {
    let mut artifacts = ArtifactSet::new();
    let mut compose = ComposeFile::default();
    let mut plans = Vec::new();
    let stage_1_output = config.stage_1.image.output.as_deref();

    for stage in resolved {
        let id = stage.id;
        let base_image = match id {
            StageId::One => stage
                .config
                .image
                .base
                .as_deref()
                .unwrap_or(DEFAULT_BASE_IMAGE),
            StageId::Two => stage_1_output.unwrap_or(DEFAULT_BASE_IMAGE),
        };
        let generated = PathBuf::from(layout::generated_rel(id));

        let dockerfile = DockerfileGenerator::new(id, stage.config, base_image, &stage.mounts)
            .with_user_setup(stage.config.ssh.enable || !stage.users.is_empty())
            .with_login_users(login_users(resolved, id))
            .render();
        artifacts.insert(layout::dockerfile_name(id), dockerfile, FileMode::Regular);

        for hook in Hook::ALL {
            artifacts.insert(
                generated.join(hook.wrapper_file_name()),
                lifecycle::render_wrapper(id, hook, stage.scripts.entries(hook)),
                FileMode::Executable,
            );
        }

        artifacts.insert(
            generated.join(layout::setup_users_file_name()),
            identity::render_setup_script(id, &stage.config.ssh, &stage.users),
            FileMode::Executable,
        );
        for key in identity::key_files(id, &stage.users) {
            let mode = if key.private {
                FileMode::Private
            } else {
                FileMode::Regular
            };
            artifacts.insert(key.path, key.content, mode);
        }

        let plan = EntryPlan {
            stage: id,
            ssh: stage.config.ssh.enable.then(|| SshRuntime {
                port: stage.config.ssh.port,
            }),
            hooks: HookPaths {
                on_first_run: layout::image_wrapper_path(id, Hook::OnFirstRun),
                on_every_run: layout::image_wrapper_path(id, Hook::OnEveryRun),
                on_user_login: layout::image_wrapper_path(id, Hook::OnUserLogin),
            },
            first_run_marker: layout::image_marker_path(id),
            custom_entry: stage.scripts.custom_entry(),
            links: stage.mounts.links(),
        };
        artifacts.insert(
            generated.join(layout::entry_plan_file_name()),
            plan.to_json()?,
            FileMode::Regular,
        );
        plans.push(plan);

        let compose_base = (id == StageId::Two).then_some(base_image);
        compose.add_stage(id, stage.config, compose_base, &stage.mounts);
    }

    artifacts.insert(
        layout::COMPOSE_FILE,
        compose.render().map_err(CompileError::Compose)?,
        FileMode::Regular,
    );
    Ok((artifacts, plans))
}

/// Non-root accounts that exist in an image of `stage`: users of every stage
/// up to it, first declaration wins.
fn login_users(resolved: &[ResolvedStage<'_>], stage: StageId) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for s in resolved.iter().filter(|s| stage.up_to().contains(&s.id)) {
        for user in s.users.iter().filter(|u| !u.is_root()) {
            if !names.contains(&user.name) {
                names.push(user.name.clone());
            }
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_mappings() {
        assert!(is_valid_port_mapping("8080:80"));
        assert!(is_valid_port_mapping("5353:53/udp"));
        assert!(!is_valid_port_mapping("80"));
        assert!(!is_valid_port_mapping("0:80"));
        assert!(!is_valid_port_mapping("70000:80"));
        assert!(!is_valid_port_mapping("8080:80/sctp"));
    }
}
