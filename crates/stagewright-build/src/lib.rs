//! Config compiler for stagewright.
//!
//! # Compile pipeline
//!
//! ```text
//! stagewright compile
//!   1. Load       ── stagewright.yml → serde_yaml::Value
//!   2. Substitute ── ${VAR} / ${VAR:-default} from the env snapshot
//!   3. Schema     ── typed ProjectConfig (deny_unknown_fields)
//!   4. Resolve    ── identity, mounts, script entries (all diagnostics collected)
//!   5. Emit       ── Dockerfiles, docker-compose.yml, wrappers, setup script, entry plan
//!   6. Write      ── staged, then swapped into place all-or-nothing
//! ```
//!
//! # Generated layout
//!
//! ```text
//! stage-1.Dockerfile
//! stage-2.Dockerfile
//! docker-compose.yml
//! installation/stage-N/generated/
//!   _custom-on-{build,first-run,every-run,user-login}.sh
//!   _setup-users.sh
//!   entry-plan.json
//!   ssh_keys/<user>/{authorized_key.pub,id_key}
//! ```
//!
//! Everything outside these paths belongs to the user and is never touched.

pub mod compiler;
pub mod compose;
pub mod dockerfile;
pub mod identity;
pub mod keys;
pub mod lifecycle;
pub mod mounts;
mod text;
pub mod writer;

pub use compiler::{Compilation, CompileError, Compiler};
pub use dockerfile::DockerfileGenerator;
pub use identity::AccountDb;
pub use keys::{KeyDeriver, KeyError, SshKeygen};
pub use writer::{ArtifactSet, WriteError, remove_generated};
