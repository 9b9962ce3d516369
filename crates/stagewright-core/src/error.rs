use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse YAML config at {path}")]
    YamlParse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("failed to parse TOML config at {path}")]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("config at {path} does not match the schema: {source}")]
    Schema {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("unsupported config format {path:?}: expected .yml, .yaml or .toml")]
    UnsupportedFormat { path: PathBuf },

    // ── Entry plan (read inside the container) ──
    #[error("failed to read entry plan {path}")]
    PlanLoad {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse entry plan {path}")]
    PlanParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to serialize entry plan")]
    PlanSerialize { source: serde_json::Error },
}
