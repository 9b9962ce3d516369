use std::path::Path;

pub fn remove(project_dir: &Path) -> anyhow::Result<()> {
    let removed = stagewright_build::remove_generated(project_dir)?;
    if removed.is_empty() {
        println!("Nothing to remove in {}", project_dir.display());
        return Ok(());
    }
    for path in &removed {
        println!("Removed {}", path.display());
    }
    Ok(())
}
