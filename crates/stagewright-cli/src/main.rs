mod commands;

use std::io::IsTerminal;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use stagewright_core::StageId;

#[derive(Parser)]
#[command(
    name = "stagewright",
    about = "Compile a two-stage container project into Dockerfiles, compose and an entrypoint"
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile stagewright.yml into build artifacts
    Compile {
        /// Project directory
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
        /// Config file (defaults to <project-dir>/stagewright.yml)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Scaffold a new project directory
    Create {
        /// Directory to create
        dir: PathBuf,
        /// Overwrite an existing stagewright.yml
        #[arg(long)]
        force: bool,
    },
    /// Delete every generated artifact
    Remove {
        /// Project directory
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
    },
    /// Container entrypoint (runs inside the image)
    Entrypoint {
        /// Stage the image was built for
        #[arg(long, value_parser = parse_stage)]
        stage: StageId,
        /// Resolve in-image paths below this directory
        #[arg(long, default_value = "/")]
        root: PathBuf,
    },
    /// Source a stage's login hooks from a shell profile
    RegisterLogin {
        /// Stage whose login hooks (and those below it) are registered
        #[arg(long, value_parser = parse_stage)]
        stage: StageId,
        /// Shell profile to update, e.g. /root/.bashrc
        #[arg(long)]
        profile: PathBuf,
        /// Resolve the profile path below this directory
        #[arg(long, default_value = "/")]
        root: PathBuf,
    },
    /// Print the JSON Schema of stagewright.yml
    Schema,
}

fn parse_stage(value: &str) -> Result<StageId, String> {
    value
        .parse::<u8>()
        .ok()
        .and_then(StageId::from_number)
        .ok_or_else(|| format!("invalid stage '{value}': expected 1 or 2"))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Compile {
            project_dir,
            config,
        } => {
            commands::compile(&project_dir, config.as_deref())?;
        }
        Commands::Create { dir, force } => {
            commands::create(&dir, force)?;
        }
        Commands::Remove { project_dir } => {
            commands::remove(&project_dir)?;
        }
        Commands::Entrypoint { stage, root } => {
            commands::entrypoint(stage, &root).await?;
        }
        Commands::RegisterLogin {
            stage,
            profile,
            root,
        } => {
            commands::register_login(stage, &profile, &root)?;
        }
        Commands::Schema => {
            commands::schema()?;
        }
    }

    Ok(())
}
