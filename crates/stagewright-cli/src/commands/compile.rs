use std::path::Path;

use stagewright_build::{CompileError, Compiler};
use stagewright_core::{EnvSnapshot, layout};

pub fn compile(project_dir: &Path, config: Option<&Path>) -> anyhow::Result<()> {
    let config_path = config
        .map(Path::to_path_buf)
        .unwrap_or_else(|| project_dir.join(layout::DEFAULT_CONFIG_FILE));
    if !config_path.exists() {
        anyhow::bail!(
            "{} not found. Run 'stagewright create <dir>' to start a project.",
            config_path.display()
        );
    }

    let env = env_snapshot(project_dir)?;
    let compilation = match Compiler::new().compile_file(project_dir, &config_path, &env) {
        Ok(c) => c,
        Err(CompileError::Invalid(diagnostics)) => {
            for diagnostic in diagnostics.iter() {
                eprintln!("{diagnostic}");
            }
            let errors = diagnostics.errors().count();
            anyhow::bail!("{} has {errors} error(s)", config_path.display());
        }
        Err(e) => return Err(e.into()),
    };

    for diagnostic in compilation.diagnostics.iter() {
        eprintln!("{diagnostic}");
    }
    compilation.write(project_dir)?;

    println!(
        "Compiled {} stage(s) into {}",
        compilation.plans.len(),
        project_dir.display()
    );
    for (path, _) in compilation.artifacts.iter() {
        println!("  {}", path.display());
    }
    Ok(())
}

/// `.env` in the project directory, overlaid by the process environment.
fn env_snapshot(project_dir: &Path) -> anyhow::Result<EnvSnapshot> {
    let dotenv_path = project_dir.join(".env");
    let mut snapshot = EnvSnapshot::new();
    if dotenv_path.is_file() {
        for item in dotenvy::from_path_iter(&dotenv_path)? {
            let (key, value) = item?;
            snapshot.insert(key, value);
        }
        tracing::debug!(path = %dotenv_path.display(), vars = snapshot.len(), "loaded .env");
    }
    let process: EnvSnapshot = std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .collect();
    Ok(snapshot.overlay(process))
}
