//! Storage mount resolution.
//!
//! Every logical mount gets a backing directory under `/hard/volume` or
//! `/hard/image`, and its configured `dst_path` becomes a symlink to that
//! directory. Keeping the user-facing path stable while the backing changes
//! lets a stage swap a volume for a bind mount without touching scripts.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use stagewright_core::diagnostics::{Diagnostics, Location, ResolutionWarning, ValidationError};
use stagewright_core::{MountKind, MountSpec, StageConfig, StageId, StorageLink, layout};

#[allow(clippy::expect_used)]
static MOUNT_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("constant regex pattern is valid"));

/// What the container engine has to mount for one logical mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineMount {
    /// Volume owned by the compose project.
    Volume {
        key: String,
        name: String,
        target: String,
    },
    /// Pre-existing volume, declared `external` in compose.
    ExternalVolume { name: String, target: String },
    Bind { source: String, target: String },
}

impl EngineMount {
    /// Short-syntax compose volume entry.
    pub fn compose_entry(&self) -> String {
        match self {
            Self::Volume { key, target, .. } => format!("{key}:{target}"),
            Self::ExternalVolume { name, target } => format!("{name}:{target}"),
            Self::Bind { source, target } => format!("{source}:{target}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMount {
    pub name: String,
    pub kind: MountKind,
    pub link: StorageLink,
    pub engine: Option<EngineMount>,
}

/// Resolved mounts of one stage, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountPlan {
    pub mounts: Vec<ResolvedMount>,
}

impl MountPlan {
    pub fn links(&self) -> Vec<StorageLink> {
        self.mounts.iter().map(|m| m.link.clone()).collect()
    }

    pub fn engine_mounts(&self) -> impl Iterator<Item = &EngineMount> {
        self.mounts.iter().filter_map(|m| m.engine.as_ref())
    }

    /// Mounts whose backing directory lives in the image layer.
    pub fn image_storage(&self) -> impl Iterator<Item = &ResolvedMount> {
        self.mounts
            .iter()
            .filter(|m| m.kind == MountKind::ImageStorage)
    }
}

/// Validate and resolve the mounts of one stage. Problems are reported in
/// `diags`; the returned plan only holds mounts that resolved cleanly.
pub fn resolve(
    project: &str,
    stage: StageId,
    config: &StageConfig,
    diags: &mut Diagnostics,
) -> MountPlan {
    let mut by_dst: HashMap<&str, &str> = HashMap::new();
    let mut plan = MountPlan::default();

    for (name, spec) in &config.mounts {
        let loc = Location::stage(stage).section(format!("mounts.{name}"));
        let errors_before = diags.errors().count();

        if !MOUNT_NAME_RE.is_match(name) {
            diags.error(
                loc.clone(),
                ValidationError::InvalidMountName { name: name.clone() },
            );
        }
        if !spec.dst_path.starts_with('/') {
            diags.error(
                loc.clone(),
                ValidationError::InvalidMountPath {
                    name: name.clone(),
                    dst_path: spec.dst_path.clone(),
                },
            );
        }
        let dst = normalize_dst(&spec.dst_path);
        if let Some(first) = by_dst.insert(dst, name) {
            diags.error(
                loc.clone(),
                ValidationError::MountConflict {
                    dst_path: dst.to_owned(),
                    first: first.to_owned(),
                    second: name.clone(),
                },
            );
        }
        check_source(name, spec, &loc, diags);

        if diags.errors().count() > errors_before {
            continue;
        }
        plan.mounts.push(resolve_one(project, stage, name, spec));
    }

    tracing::debug!(stage = %stage, mounts = plan.mounts.len(), "resolved mounts");
    plan
}

/// stage_2 replaces stage_1's mount set outright. Report every stage_1 mount
/// that stage_2 drops.
pub fn check_shadowed(stage_1: &StageConfig, stage_2: &StageConfig, diags: &mut Diagnostics) {
    for name in stage_1.mounts.keys() {
        if !stage_2.mounts.contains_key(name) {
            diags.warn(
                Location::stage(StageId::Two).section("mounts"),
                ResolutionWarning::MountShadowed { name: name.clone() },
            );
        }
    }
}

fn normalize_dst(dst: &str) -> &str {
    match dst.trim_end_matches('/') {
        "" => dst,
        trimmed => trimmed,
    }
}

fn check_source(name: &str, spec: &MountSpec, loc: &Location, diags: &mut Diagnostics) {
    let has_src = spec.src.as_deref().is_some_and(|s| !s.trim().is_empty());
    let reason = match (spec.kind, has_src) {
        (MountKind::ManualVolume, false) => Some("manual-volume needs `src` (the volume name)"),
        (MountKind::HostDir, false) => Some("host-dir needs `src` (the host directory)"),
        (MountKind::AutoVolume, true) => Some("auto-volume does not take `src`"),
        (MountKind::ImageStorage, true) => Some("image-storage does not take `src`"),
        _ => None,
    };
    if let Some(reason) = reason {
        diags.error(
            loc.clone(),
            ValidationError::MountSource {
                name: name.to_owned(),
                reason,
            },
        );
    }
}

fn resolve_one(project: &str, stage: StageId, name: &str, spec: &MountSpec) -> ResolvedMount {
    let volume_path = format!("{}/{name}", layout::HARD_VOLUME_ROOT);
    let src = spec.src.clone().unwrap_or_default();

    let (target, engine) = match spec.kind {
        MountKind::AutoVolume => {
            let key = format!("{}-{name}", stage.dir_name());
            let engine = EngineMount::Volume {
                name: format!("{project}-{key}"),
                key,
                target: volume_path.clone(),
            };
            (volume_path, Some(engine))
        }
        MountKind::ManualVolume => {
            let engine = EngineMount::ExternalVolume {
                name: src,
                target: volume_path.clone(),
            };
            (volume_path, Some(engine))
        }
        MountKind::HostDir => {
            let engine = EngineMount::Bind {
                source: src,
                target: volume_path.clone(),
            };
            (volume_path, Some(engine))
        }
        MountKind::ImageStorage => (format!("{}/{name}", layout::HARD_IMAGE_ROOT), None),
    };

    ResolvedMount {
        name: name.to_owned(),
        kind: spec.kind,
        link: StorageLink {
            name: name.to_owned(),
            link: normalize_dst(&spec.dst_path).to_owned(),
            target,
        },
        engine,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn mount(kind: MountKind, dst: &str, src: Option<&str>) -> MountSpec {
        MountSpec {
            kind,
            dst_path: dst.to_owned(),
            src: src.map(str::to_owned),
        }
    }

    fn stage_with(mounts: Vec<(&str, MountSpec)>) -> StageConfig {
        StageConfig {
            mounts: mounts
                .into_iter()
                .map(|(n, m)| (n.to_owned(), m))
                .collect::<IndexMap<_, _>>(),
            ..StageConfig::default()
        }
    }

    #[test]
    fn resolves_each_kind() {
        let config = stage_with(vec![
            ("data", mount(MountKind::AutoVolume, "/data", None)),
            ("models", mount(MountKind::ManualVolume, "/models", Some("shared-models"))),
            ("src", mount(MountKind::HostDir, "/workspace/", Some("./code"))),
            ("tools", mount(MountKind::ImageStorage, "/opt/tools", None)),
        ]);
        let mut diags = Diagnostics::new();
        let plan = resolve("demo", StageId::One, &config, &mut diags);

        assert!(diags.is_empty(), "{diags}");
        let links = plan.links();
        assert_eq!(links.len(), 4);
        assert_eq!(links[0].target, "/hard/volume/data");
        assert_eq!(links[2].link, "/workspace");
        assert_eq!(links[3].target, "/hard/image/tools");

        let entries: Vec<String> = plan.engine_mounts().map(EngineMount::compose_entry).collect();
        assert_eq!(
            entries,
            [
                "stage-1-data:/hard/volume/data",
                "shared-models:/hard/volume/models",
                "./code:/hard/volume/src",
            ]
        );
        assert!(matches!(
            &plan.mounts[0].engine,
            Some(EngineMount::Volume { name, .. }) if name == "demo-stage-1-data"
        ));
    }

    #[test]
    fn shared_destination_names_both_mounts() {
        let config = stage_with(vec![
            ("a", mount(MountKind::AutoVolume, "/data", None)),
            ("b", mount(MountKind::ImageStorage, "/data/", None)),
        ]);
        let mut diags = Diagnostics::new();
        let plan = resolve("demo", StageId::Two, &config, &mut diags);

        let errors: Vec<_> = diags.errors().map(|(_, e)| e.clone()).collect();
        assert_eq!(
            errors,
            [ValidationError::MountConflict {
                dst_path: "/data".into(),
                first: "a".into(),
                second: "b".into(),
            }]
        );
        assert_eq!(plan.mounts.len(), 1);
    }

    #[test]
    fn source_rules_per_kind() {
        let config = stage_with(vec![
            ("a", mount(MountKind::HostDir, "/a", None)),
            ("b", mount(MountKind::AutoVolume, "/b", Some("vol"))),
            ("c", mount(MountKind::ManualVolume, "relative", Some("vol"))),
            ("bad name", mount(MountKind::AutoVolume, "/d", None)),
        ]);
        let mut diags = Diagnostics::new();
        let plan = resolve("demo", StageId::One, &config, &mut diags);

        assert!(plan.mounts.is_empty());
        let errors: Vec<_> = diags.errors().map(|(_, e)| e.clone()).collect();
        assert!(matches!(errors[0], ValidationError::MountSource { ref name, .. } if name == "a"));
        assert!(matches!(errors[1], ValidationError::MountSource { ref name, .. } if name == "b"));
        assert!(matches!(errors[2], ValidationError::InvalidMountPath { .. }));
        assert!(matches!(errors[3], ValidationError::InvalidMountName { .. }));
    }

    #[test]
    fn unrestated_stage_1_mounts_are_reported() {
        let s1 = stage_with(vec![
            ("data", mount(MountKind::AutoVolume, "/data", None)),
            ("cache", mount(MountKind::AutoVolume, "/cache", None)),
        ]);
        let s2 = stage_with(vec![("data", mount(MountKind::HostDir, "/data", Some("/srv")))]);
        let mut diags = Diagnostics::new();
        check_shadowed(&s1, &s2, &mut diags);

        let warnings: Vec<_> = diags.warnings().map(|(_, w)| w.clone()).collect();
        assert_eq!(
            warnings,
            [ResolutionWarning::MountShadowed {
                name: "cache".into()
            }]
        );
    }
}
