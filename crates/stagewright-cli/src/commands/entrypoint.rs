use std::path::Path;

use stagewright_core::StageId;
use stagewright_runtime::{Entrypoint, Exit};

pub async fn entrypoint(stage: StageId, root: &Path) -> anyhow::Result<()> {
    match Entrypoint::new(stage).with_root(root).run().await? {
        Exit::Exec(command) => Err(stagewright_runtime::exec(&command).into()),
        Exit::Terminated(signal) => {
            tracing::info!(%signal, "container stopping");
            Ok(())
        }
    }
}
