//! Compile diagnostics.
//!
//! Validation problems are collected rather than returned one at a time so a
//! single compile reports everything that needs fixing. Each diagnostic is
//! pinned to a [`Location`] (stage, config section, hook, entry index).

use std::fmt;

use crate::stage::{Hook, StageId};

/// Where in the config document a diagnostic applies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub stage: Option<StageId>,
    pub section: Option<String>,
    pub hook: Option<Hook>,
    pub index: Option<usize>,
}

impl Location {
    pub fn document() -> Self {
        Self::default()
    }

    pub fn stage(stage: StageId) -> Self {
        Self {
            stage: Some(stage),
            ..Self::default()
        }
    }

    pub fn section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }

    pub fn hook(mut self, hook: Hook) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        if let Some(stage) = self.stage {
            parts.push(stage.config_key().to_owned());
        }
        if let Some(section) = &self.section {
            parts.push(section.clone());
        }
        if let Some(hook) = self.hook {
            parts.push(format!("custom.{}", hook.config_key()));
        }
        if parts.is_empty() {
            parts.push("(document)".to_owned());
        }
        f.write_str(&parts.join("."))?;
        if let Some(index) = self.index {
            write!(f, "[{index}]")?;
        }
        Ok(())
    }
}

/// Problems that block a compile.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{detail}")]
    Schema { detail: String },

    // ── Storage ──
    #[error("mounts '{first}' and '{second}' both target {dst_path}")]
    MountConflict {
        dst_path: String,
        first: String,
        second: String,
    },

    #[error("mount '{name}': dst_path {dst_path:?} must be absolute")]
    InvalidMountPath { name: String, dst_path: String },

    #[error("mount '{name}': {reason}")]
    MountSource { name: String, reason: &'static str },

    #[error("invalid mount name {name:?}: use letters, digits, '-' and '_'")]
    InvalidMountName { name: String },

    // ── Stage wiring ──
    #[error("stage_2 is configured but stage_1.image.output is not set; stage_2 needs it as its base image")]
    MissingDependency,

    // ── Scripts ──
    #[error("malformed script entry {entry:?}: {reason}")]
    MalformedScriptEntry { entry: String, reason: String },

    // ── Identity ──
    #[error("user '{user}': both {what}_text and {what}_file are set; pick one")]
    ConflictingKeySource { user: String, what: &'static str },

    #[error("user '{user}': privkey holds public key material; a private key cannot be derived from a public key")]
    PrivateKeyRequired { user: String },

    #[error("user '{user}': cannot read key file {path}: {reason}")]
    KeyFileUnreadable {
        user: String,
        path: String,
        reason: String,
    },

    #[error("user '{user}': failed to derive public key: {reason}")]
    KeyDerivation { user: String, reason: String },

    #[error("user '{user}': password must be non-empty and contain no spaces or commas")]
    InvalidPassword { user: String },

    #[error("invalid user name {user:?}: use lowercase letters, digits, '-' and '_' (max 32)")]
    InvalidUserName { user: String },

    #[error("user '{user}': {reason}")]
    IdentityConflict { user: String, reason: String },

    #[error("ssh is enabled but no users are configured")]
    SshUsersMissing,

    // ── Misc fields ──
    #[error("invalid port mapping {value:?}: expected HOST:CONTAINER[/tcp|/udp]")]
    InvalidPort { value: String },

    #[error("invalid environment entry {value:?}: expected KEY=VALUE")]
    InvalidEnvEntry { value: String },

    #[error("unknown apt mirror {value:?}: use default, tuna, aliyun, ustc, 163 or an http(s) URL")]
    InvalidAptMirror { value: String },
}

/// Problems that are reported but do not block a compile.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionWarning {
    #[error("script {path} does not exist yet; the wrapper will reference it anyway")]
    MissingScript { path: String },

    #[error("user '{user}': gid {gid} belongs to system group '{group}'; a system-assigned gid is used instead")]
    GidFallback { user: String, gid: u32, group: String },

    #[error("user '{user}': gid {gid} is held by group '{group}', which is moved to a free gid")]
    GroupDisplaced { user: String, gid: u32, group: String },

    #[error("stage_1 mount '{name}' is not restated in stage_2 and will not exist in stage_2 containers")]
    MountShadowed { name: String },

    #[error("stage_2.image.base {image:?} is ignored; stage_2 always builds on stage_1.image.output")]
    Stage2BaseIgnored { image: String },

    #[error("entrypoint binary {path} is missing; run `stagewright create` or copy it there before building")]
    MissingRuntimeBinary { path: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    Error(ValidationError),
    Warning(ResolutionWarning),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub location: Location,
    pub finding: Finding,
}

impl Diagnostic {
    pub fn is_error(&self) -> bool {
        matches!(self.finding, Finding::Error(_))
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.finding {
            Finding::Error(e) => write!(f, "error: {}: {e}", self.location),
            Finding::Warning(w) => write!(f, "warning: {}: {w}", self.location),
        }
    }
}

/// Ordered collection of diagnostics from one compile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, location: Location, error: ValidationError) {
        self.items.push(Diagnostic {
            location,
            finding: Finding::Error(error),
        });
    }

    pub fn warn(&mut self, location: Location, warning: ResolutionWarning) {
        self.items.push(Diagnostic {
            location,
            finding: Finding::Warning(warning),
        });
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(Diagnostic::is_error)
    }

    pub fn errors(&self) -> impl Iterator<Item = (&Location, &ValidationError)> {
        self.items.iter().filter_map(|d| match &d.finding {
            Finding::Error(e) => Some((&d.location, e)),
            Finding::Warning(_) => None,
        })
    }

    pub fn warnings(&self) -> impl Iterator<Item = (&Location, &ResolutionWarning)> {
        self.items.iter().filter_map(|d| match &d.finding {
            Finding::Warning(w) => Some((&d.location, w)),
            Finding::Error(_) => None,
        })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for d in &self.items {
            writeln!(f, "{d}")?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
