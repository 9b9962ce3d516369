//! Stage and lifecycle hook identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the two sequential build stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StageId {
    #[serde(rename = "stage_1")]
    One,
    #[serde(rename = "stage_2")]
    Two,
}

impl StageId {
    pub const ALL: [StageId; 2] = [StageId::One, StageId::Two];

    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Self::One),
            2 => Some(Self::Two),
            _ => None,
        }
    }

    pub fn number(self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
        }
    }

    /// Key used in the config document (`stage_1`).
    pub fn config_key(self) -> &'static str {
        match self {
            Self::One => "stage_1",
            Self::Two => "stage_2",
        }
    }

    /// Name used for directories, compose services and Dockerfiles (`stage-1`).
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::One => "stage-1",
            Self::Two => "stage-2",
        }
    }

    /// Stages whose lifecycle hooks run in a container built at this stage,
    /// in execution order. Hook lists are additive across stages.
    pub fn up_to(self) -> &'static [StageId] {
        match self {
            Self::One => &[StageId::One],
            Self::Two => &[StageId::One, StageId::Two],
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_key())
    }
}

/// How a wrapper invokes its entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invocation {
    /// Each entry runs as its own `bash` process.
    Spawn,
    /// Each entry is sourced into the calling shell.
    Source,
}

/// A named point in the container's life at which user scripts run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hook {
    OnBuild,
    OnFirstRun,
    OnEveryRun,
    OnUserLogin,
}

impl Hook {
    pub const ALL: [Hook; 4] = [
        Hook::OnBuild,
        Hook::OnFirstRun,
        Hook::OnEveryRun,
        Hook::OnUserLogin,
    ];

    pub fn config_key(self) -> &'static str {
        match self {
            Self::OnBuild => "on_build",
            Self::OnFirstRun => "on_first_run",
            Self::OnEveryRun => "on_every_run",
            Self::OnUserLogin => "on_user_login",
        }
    }

    pub fn wrapper_file_name(self) -> &'static str {
        match self {
            Self::OnBuild => "_custom-on-build.sh",
            Self::OnFirstRun => "_custom-on-first-run.sh",
            Self::OnEveryRun => "_custom-on-every-run.sh",
            Self::OnUserLogin => "_custom-on-user-login.sh",
        }
    }

    /// Login entries must run in the interactive shell so exported variables
    /// and functions survive; everything else gets its own process.
    pub fn invocation(self) -> Invocation {
        match self {
            Self::OnUserLogin => Invocation::Source,
            _ => Invocation::Spawn,
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_key())
    }
}
