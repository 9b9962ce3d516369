mod compile;
mod create;
mod entrypoint;
mod register_login;
mod remove;
mod schema;

pub use compile::compile;
pub use create::create;
pub use entrypoint::entrypoint;
pub use register_login::register_login;
pub use remove::remove;
pub use schema::schema;

use std::path::{Path, PathBuf};

/// Resolve an absolute in-image path below `root`.
fn under_root(root: &Path, path: &Path) -> PathBuf {
    root.join(path.strip_prefix("/").unwrap_or(path))
}
