use std::path::Path;

use stagewright_core::StageId;

pub fn register_login(stage: StageId, profile: &Path, root: &Path) -> anyhow::Result<()> {
    let path = super::under_root(root, profile);
    if stagewright_runtime::register_login(&path, stage)? {
        println!("Registered {stage} login hooks in {}", path.display());
    }
    Ok(())
}
