use std::path::{Path, PathBuf};

use stagewright_core::{EntryPlan, StageId, StorageLink, layout};

use crate::RuntimeError;
use crate::launcher::{Launcher, Signal, SystemLauncher};

/// A command that replaces the entrypoint process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// How a container start ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exit {
    /// Hand the process over to this command.
    Exec(ExecCommand),
    /// A termination signal arrived while blocking in the foreground.
    Terminated(Signal),
}

/// The container start sequence, parameterized over the launcher for
/// testability.
///
/// ```text
/// detect mode ── custom entry? ──yes──> exec it
///                      │no
///        links ── first-run (per stage, once) ── every-run ── sshd
///                      │
///         interactive? ──yes──> exec login shell
///                      │no
///              wait for SIGTERM/SIGINT/SIGHUP/SIGQUIT
/// ```
pub struct Entrypoint<L: Launcher = SystemLauncher> {
    launcher: L,
    stage: StageId,
    root: PathBuf,
}

impl Entrypoint<SystemLauncher> {
    pub fn new(stage: StageId) -> Self {
        Self {
            launcher: SystemLauncher,
            stage,
            root: PathBuf::from("/"),
        }
    }
}

impl<L: Launcher> Entrypoint<L> {
    pub fn with_launcher(launcher: L, stage: StageId) -> Self {
        Self {
            launcher,
            stage,
            root: PathBuf::from("/"),
        }
    }

    /// Resolve every in-image path below `root` instead of `/`.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub async fn run(&self) -> Result<Exit, RuntimeError> {
        let plans = self.load_plans()?;
        let interactive = self.launcher.is_interactive();
        tracing::info!(stage = %self.stage, interactive, "container starting");

        // A later stage's custom entry point replaces an earlier one.
        if let Some(entry) = plans.iter().rev().find_map(|p| p.custom_entry.as_ref()) {
            tracing::info!(script = %entry.script, "running custom entry point");
            let mut args = vec![self.host_path(&entry.script).display().to_string()];
            args.extend(entry.args.iter().cloned());
            return Ok(Exit::Exec(ExecCommand {
                program: "bash".to_owned(),
                args,
            }));
        }

        let Some(active) = plans.last() else {
            return Err(RuntimeError::NoPlan { stage: self.stage });
        };

        self.apply_links(&active.links)?;

        for plan in &plans {
            self.first_run(plan).await?;
        }
        for plan in &plans {
            self.run_hook(plan.stage, "on_every_run", &plan.hooks.on_every_run)
                .await;
        }

        if let Some(ssh) = active.ssh {
            let config = self.host_path(layout::SSHD_CONFIG);
            if !config.is_file() {
                return Err(RuntimeError::SshConfigMissing { path: config });
            }
            match self.launcher.spawn_sshd().await {
                Ok(()) => tracing::info!(port = ssh.port, "sshd started"),
                Err(e) => tracing::warn!(error = %e, "failed to start sshd"),
            }
        }

        if interactive {
            tracing::info!("starting login shell");
            return Ok(Exit::Exec(ExecCommand {
                program: "bash".to_owned(),
                args: vec!["-l".to_owned()],
            }));
        }

        tracing::info!("waiting for a termination signal");
        let signal = self.launcher.wait_for_termination().await?;
        tracing::info!(%signal, "shutting down");
        Ok(Exit::Terminated(signal))
    }

    fn load_plans(&self) -> Result<Vec<EntryPlan>, RuntimeError> {
        self.stage
            .up_to()
            .iter()
            .map(|&stage| {
                let path = self.host_path(&layout::image_plan_path(stage));
                tracing::debug!(path = %path.display(), "loading entry plan");
                EntryPlan::load(&path).map_err(RuntimeError::from)
            })
            .collect()
    }

    async fn first_run(&self, plan: &EntryPlan) -> Result<(), RuntimeError> {
        let marker = self.host_path(&plan.first_run_marker);
        if marker.exists() {
            tracing::debug!(stage = %plan.stage, "first-run hooks already done");
            return Ok(());
        }
        if !self
            .run_hook(plan.stage, "on_first_run", &plan.hooks.on_first_run)
            .await
        {
            // No marker: the hooks run again on the next start.
            return Ok(());
        }
        if let Some(parent) = marker.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RuntimeError::Marker {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        std::fs::File::create(&marker).map_err(|e| RuntimeError::Marker {
            path: marker.clone(),
            source: e,
        })?;
        tracing::info!(stage = %plan.stage, marker = %marker.display(), "first-run complete");
        Ok(())
    }

    /// Returns whether the wrapper succeeded. Failures are logged, never fatal.
    async fn run_hook(&self, stage: StageId, hook: &str, wrapper: &str) -> bool {
        let script = self.host_path(wrapper);
        tracing::info!(%stage, hook, "running hooks");
        match self.launcher.run_script(&script.display().to_string()).await {
            Ok(0) => true,
            Ok(code) => {
                tracing::warn!(%stage, hook, code, "hook wrapper reported failures");
                false
            }
            Err(e) => {
                tracing::warn!(%stage, hook, error = %e, "failed to run hook wrapper");
                false
            }
        }
    }

    fn apply_links(&self, links: &[StorageLink]) -> Result<(), RuntimeError> {
        for link in links {
            let path = self.host_path(&link.link);
            let target = self.host_path(&link.target);
            std::fs::create_dir_all(&target).map_err(|e| RuntimeError::Link {
                path: target.clone(),
                source: e,
            })?;
            if link_in_place(&path, &target)? {
                tracing::info!(name = %link.name, link = %path.display(), target = %target.display(), "storage linked");
            }
        }
        Ok(())
    }

    fn host_path(&self, in_image: &str) -> PathBuf {
        self.root.join(in_image.trim_start_matches('/'))
    }
}

/// Point `path` at `target`. An existing symlink is replaced and an empty
/// directory is removed; anything else is left alone with a warning so no
/// data is lost. Returns whether the link is in place.
fn link_in_place(path: &Path, target: &Path) -> Result<bool, RuntimeError> {
    let link_err = |e: std::io::Error| RuntimeError::Link {
        path: path.to_path_buf(),
        source: e,
    };

    if let Ok(meta) = path.symlink_metadata() {
        if meta.file_type().is_symlink() {
            if std::fs::read_link(path).map_err(link_err)? == target {
                return Ok(true);
            }
            std::fs::remove_file(path).map_err(link_err)?;
        } else if meta.is_dir() {
            let empty = std::fs::read_dir(path)
                .map_err(link_err)?
                .next()
                .is_none();
            if !empty {
                tracing::warn!(path = %path.display(), "not linking storage over a non-empty directory");
                return Ok(false);
            }
            std::fs::remove_dir(path).map_err(link_err)?;
        } else {
            tracing::warn!(path = %path.display(), "not linking storage over an existing file");
            return Ok(false);
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(link_err)?;
    }
    std::os::unix::fs::symlink(target, path).map_err(link_err)?;
    Ok(true)
}

/// Replace the current process with `command`. Only returns on failure.
pub fn exec(command: &ExecCommand) -> RuntimeError {
    use std::os::unix::process::CommandExt;

    tracing::debug!(program = %command.program, args = ?command.args, "exec");
    let source = std::process::Command::new(&command.program)
        .args(&command.args)
        .exec();
    RuntimeError::Exec {
        program: command.program.clone(),
        source,
    }
}
