//! All-or-nothing artifact writes.
//!
//! Artifacts are first written into a staging directory inside the project
//! (same filesystem, so the final step is a handful of renames). The current
//! generated roots are moved aside, the staged roots are moved in, and on any
//! failure the previous roots are put back.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use stagewright_core::{StageId, layout};

/// File mode of a generated artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Regular,
    Executable,
    Private,
}

impl FileMode {
    #[cfg(unix)]
    fn bits(self) -> u32 {
        match self {
            Self::Regular => 0o644,
            Self::Executable => 0o755,
            Self::Private => 0o600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub content: String,
    pub mode: FileMode,
}

/// Every file one compile produces, keyed by project-relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactSet {
    files: BTreeMap<PathBuf, Artifact>,
}

impl ArtifactSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, content: String, mode: FileMode) {
        self.files.insert(path.into(), Artifact { content, mode });
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<&Artifact> {
        self.files.get(path.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PathBuf, &Artifact)> {
        self.files.iter()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Replace every generated root in `project_dir` with this set.
    pub fn write(&self, project_dir: &Path) -> Result<(), WriteError> {
        let work = tempfile::Builder::new()
            .prefix(".stagewright-")
            .tempdir_in(project_dir)
            .map_err(|e| WriteError::Create {
                path: project_dir.to_path_buf(),
                source: e,
            })?;
        let staging = work.path().join("staging");
        let backup = work.path().join("backup");

        for (rel, artifact) in &self.files {
            write_file(&staging.join(rel), artifact)?;
        }

        let roots = managed_roots();
        let mut moved_aside = Vec::new();
        for root in &roots {
            let current = project_dir.join(root);
            if current.symlink_metadata().is_ok() {
                if let Err(e) = move_path(&current, &backup.join(root)) {
                    restore(project_dir, &backup, &moved_aside, &[]);
                    return Err(e);
                }
                moved_aside.push(root.clone());
            }
        }

        let mut moved_in = Vec::new();
        for root in &roots {
            let staged = staging.join(root);
            if !staged.exists() {
                continue;
            }
            if let Err(e) = move_path(&staged, &project_dir.join(root)) {
                restore(project_dir, &backup, &moved_aside, &moved_in);
                return Err(e);
            }
            moved_in.push(root.clone());
        }

        tracing::debug!(
            project_dir = %project_dir.display(),
            files = self.files.len(),
            replaced = moved_aside.len(),
            "artifacts written"
        );
        work.close().map_err(|e| WriteError::Remove {
            path: project_dir.to_path_buf(),
            source: e,
        })
    }
}

/// Delete every generated root. Returns the project-relative roots removed.
pub fn remove_generated(project_dir: &Path) -> Result<Vec<PathBuf>, WriteError> {
    let mut removed = Vec::new();
    for root in managed_roots() {
        let path = project_dir.join(&root);
        let Ok(meta) = path.symlink_metadata() else {
            continue;
        };
        let result = if meta.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        result.map_err(|e| WriteError::Remove {
            path: path.clone(),
            source: e,
        })?;
        tracing::debug!(path = %path.display(), "removed");
        removed.push(root);
    }
    Ok(removed)
}

/// Paths owned by the compiler. Anything else in the project is user data.
pub fn managed_roots() -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = StageId::ALL
        .iter()
        .map(|s| PathBuf::from(layout::dockerfile_name(*s)))
        .collect();
    roots.push(PathBuf::from(layout::COMPOSE_FILE));
    roots.extend(
        StageId::ALL
            .iter()
            .map(|s| PathBuf::from(layout::generated_rel(*s))),
    );
    roots
}

/// Best effort: put the previous roots back after a failed swap.
fn restore(project_dir: &Path, backup: &Path, moved_aside: &[PathBuf], moved_in: &[PathBuf]) {
    for root in moved_in {
        let path = project_dir.join(root);
        let result = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove new artifact");
        }
    }
    for root in moved_aside {
        if let Err(e) = move_path(&backup.join(root), &project_dir.join(root)) {
            tracing::warn!(root = %root.display(), error = %e, "failed to restore previous artifact");
        }
    }
}

fn write_file(path: &Path, artifact: &Artifact) -> Result<(), WriteError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| WriteError::Create {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    std::fs::write(path, &artifact.content).map_err(|e| WriteError::Write {
        path: path.to_path_buf(),
        source: e,
    })?;
    set_mode(path, artifact.mode)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: FileMode) -> Result<(), WriteError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode.bits())).map_err(|e| {
        WriteError::Write {
            path: path.to_path_buf(),
            source: e,
        }
    })
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: FileMode) -> Result<(), WriteError> {
    Ok(())
}

fn move_path(from: &Path, to: &Path) -> Result<(), WriteError> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent).map_err(|e| WriteError::Create {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    std::fs::rename(from, to).map_err(|e| WriteError::Move {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source: e,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("failed to create directory {path}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {path}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to move {from} to {to}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to remove {path}")]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },
}
