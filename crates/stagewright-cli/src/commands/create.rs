use std::path::Path;

use stagewright_core::layout;

const CONFIG_TEMPLATE: &str = r#"# stagewright project
#
# Values may reference the environment as ${VAR} or ${VAR:-default};
# a .env file next to this one is read first.
project: {project}

stage_1:
  image:
    base: ubuntu:24.04
    output: {project}-stage-1:latest
  ssh:
    enable: false
    port: 22
    # host_port: 2222
    # users:
    #   me:
    #     password: ${SSH_PASSWORD:-change-me}
    #     uid: 1100
    #     pubkey_file: keys/me.pub
  proxy: {}
  apt:
    mirror: default
    keep_after_build: true
  ports: []
  environment:
    - TZ=${TZ:-UTC}
  device: cpu
  mounts: {}
  custom:
    on_build:
      - stage-1/custom/install-packages.sh
    on_first_run: []
    on_every_run: []
    on_user_login: []

stage_2:
  image:
    output: {project}-stage-2:latest
  mounts:
    workspace:
      kind: auto-volume
      dst_path: /workspace
  custom:
    on_first_run:
      - stage-2/custom/first-run.sh
    on_user_login:
      - stage-2/custom/login-banner.sh
"#;

const INSTALL_PACKAGES: &str = r#"#!/bin/bash
# Runs once while stage_1 is built.
set -euo pipefail
apt-get update
apt-get install -y --no-install-recommends ca-certificates curl openssh-server
rm -rf /var/lib/apt/lists/*
"#;

const FIRST_RUN: &str = r#"#!/bin/bash
# Runs on the first start of a stage_2 container.
echo "first start of $(hostname)"
"#;

const LOGIN_BANNER: &str = r#"# Sourced by every login shell; keep it quiet and fast.
echo "stagewright container $(hostname)"
"#;

/// Scaffold a project directory.
pub fn create(dir: &Path, force: bool) -> anyhow::Result<()> {
    let config_path = dir.join(layout::DEFAULT_CONFIG_FILE);
    if config_path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }

    let project = project_name(dir);
    std::fs::create_dir_all(dir)?;
    std::fs::write(&config_path, CONFIG_TEMPLATE.replace("{project}", &project))?;

    let install = dir.join(layout::INSTALLATION_DIR);
    for (rel, content) in [
        ("stage-1/custom/install-packages.sh", INSTALL_PACKAGES),
        ("stage-2/custom/first-run.sh", FIRST_RUN),
        ("stage-2/custom/login-banner.sh", LOGIN_BANNER),
    ] {
        let path = install.join(rel);
        if path.exists() {
            continue;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        set_executable(&path)?;
    }

    install_binary(dir)?;

    println!("Created project '{project}' in {}", dir.display());
    println!();
    println!("  cd {}", dir.display());
    println!("  stagewright compile            # generate Dockerfiles and compose");
    println!("  docker compose build stage-1 && docker compose build stage-2");
    println!("  docker compose up -d stage-2");

    Ok(())
}

/// Copy the running binary to where the Dockerfiles expect it.
fn install_binary(dir: &Path) -> anyhow::Result<()> {
    let target = dir.join(layout::HOST_BINARY_PATH);
    let current = std::env::current_exe()?;
    if target.exists() && std::fs::canonicalize(&target)? == std::fs::canonicalize(&current)? {
        return Ok(());
    }
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(&current, &target)?;
    set_executable(&target)?;
    tracing::debug!(from = %current.display(), to = %target.display(), "installed entrypoint binary");
    Ok(())
}

fn set_executable(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

/// Directory name reduced to characters that are valid in volume and image
/// names.
fn project_name(dir: &Path) -> String {
    let raw = std::fs::canonicalize(dir)
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .or_else(|| dir.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_default();
    let name: String = raw
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let name = name.trim_matches('-');
    if name.is_empty() {
        "stagewright".to_owned()
    } else {
        name.to_owned()
    }
}
