use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use schemars::JsonSchema;
use secrecy::SecretString;
use serde::Deserialize;

use crate::env::{self, EnvSnapshot};
use crate::stage::{Hook, StageId};

/// stagewright.yml configuration
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Project name, used to prefix generated volume names
    #[serde(default = "default_project_name")]
    pub project: String,
    pub stage_1: StageConfig,
    /// Builds on top of stage_1's output image
    #[serde(default)]
    pub stage_2: Option<StageConfig>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    #[serde(default)]
    pub image: ImageConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub apt: AptConfig,
    /// `HOST:CONTAINER` port mappings, in order
    #[serde(default)]
    pub ports: Vec<String>,
    /// `KEY=VALUE` entries, in order
    #[serde(default)]
    pub environment: Vec<String>,
    #[serde(default)]
    pub device: DeviceKind,
    /// Logical storage name → backing strategy. Order is kept for link creation.
    #[serde(default)]
    pub mounts: IndexMap<String, MountSpec>,
    #[serde(default)]
    pub custom: CustomScripts,
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ImageConfig {
    /// Image to build from (ignored for stage_2)
    pub base: Option<String>,
    /// Tag given to the built image
    pub output: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SshConfig {
    #[serde(default, deserialize_with = "lenient::parse")]
    pub enable: bool,
    /// Port sshd listens on inside the container
    #[serde(default = "default_ssh_port", deserialize_with = "lenient::parse")]
    pub port: u16,
    /// Host port mapped to `port`
    #[serde(default, deserialize_with = "lenient::parse_opt")]
    pub host_port: Option<u16>,
    #[serde(default)]
    pub users: IndexMap<String, SshUserSpec>,
}

/// One SSH login account. The map key is the user name.
#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SshUserSpec {
    /// Login password; no spaces or commas
    #[schemars(with = "Option<String>")]
    pub password: Option<SecretString>,
    #[serde(default, deserialize_with = "lenient::parse_opt")]
    pub uid: Option<u32>,
    /// Primary group id; defaults to `uid`
    #[serde(default, deserialize_with = "lenient::parse_opt")]
    pub gid: Option<u32>,
    pub pubkey_text: Option<String>,
    /// Relative to the project directory
    pub pubkey_file: Option<PathBuf>,
    #[schemars(with = "Option<String>")]
    pub privkey_text: Option<SecretString>,
    /// Relative to the project directory
    pub privkey_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    /// Proxy host; no proxy when unset
    pub address: Option<String>,
    #[serde(default, deserialize_with = "lenient::parse_opt")]
    pub port: Option<u16>,
    #[serde(default, deserialize_with = "lenient::parse")]
    pub use_https: bool,
    /// Keep the proxy in the running container, not only during the build
    #[serde(default, deserialize_with = "lenient::parse")]
    pub persist: bool,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct AptConfig {
    /// `default`, `tuna`, `aliyun`, `ustc`, `163`, or an http(s) URL
    #[serde(default = "default_apt_mirror")]
    pub mirror: String,
    /// Leave the mirror in place after the build finishes
    #[serde(default = "default_true", deserialize_with = "lenient::parse")]
    pub keep_after_build: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    #[default]
    Cpu,
    Gpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum MountKind {
    /// Named volume created and owned by the compose project
    AutoVolume,
    /// Pre-existing named volume given in `src`
    ManualVolume,
    /// Host directory given in `src`, bind-mounted
    HostDir,
    /// Directory baked into the image layer
    ImageStorage,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct MountSpec {
    pub kind: MountKind,
    /// Stable in-container path; becomes a symlink to the backing storage
    pub dst_path: String,
    /// Volume name or host path
    pub src: Option<String>,
}

/// User scripts per lifecycle hook. Entries are `path [args...]`, paths
/// relative to the project's `installation/` directory.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CustomScripts {
    #[serde(default)]
    pub on_build: Vec<String>,
    #[serde(default)]
    pub on_first_run: Vec<String>,
    #[serde(default)]
    pub on_every_run: Vec<String>,
    #[serde(default)]
    pub on_user_login: Vec<String>,
    /// Replaces the default startup sequence entirely
    pub on_entry: Option<String>,
}

impl CustomScripts {
    pub fn entries(&self, hook: Hook) -> &[String] {
        match hook {
            Hook::OnBuild => &self.on_build,
            Hook::OnFirstRun => &self.on_first_run,
            Hook::OnEveryRun => &self.on_every_run,
            Hook::OnUserLogin => &self.on_user_login,
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            enable: false,
            port: default_ssh_port(),
            host_port: None,
            users: IndexMap::new(),
        }
    }
}

impl Default for AptConfig {
    fn default() -> Self {
        Self {
            mirror: default_apt_mirror(),
            keep_after_build: true,
        }
    }
}

impl ProxyConfig {
    /// `http://host:port`, or `None` when no proxy is configured.
    pub fn url(&self) -> Option<String> {
        let address = self.address.as_deref()?;
        let scheme = if self.use_https { "https" } else { "http" };
        Some(match self.port {
            Some(port) => format!("{scheme}://{address}:{port}"),
            None => format!("{scheme}://{address}"),
        })
    }
}

impl ProjectConfig {
    /// Load the config file, substituting `${VAR}` tokens from `env` before
    /// the document is checked against the schema.
    pub fn load(path: &Path, env: &EnvSnapshot) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| crate::Error::ConfigLoad {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut document = match path.extension().and_then(|e| e.to_str()) {
            Some("yml" | "yaml") => parse_yaml(&content, path)?,
            Some("toml") => {
                let value: toml::Value =
                    toml::from_str(&content).map_err(|e| crate::Error::TomlParse {
                        path: path.to_path_buf(),
                        source: e,
                    })?;
                serde_yaml::to_value(value).map_err(|e| crate::Error::YamlParse {
                    path: path.to_path_buf(),
                    source: e,
                })?
            }
            _ => {
                return Err(crate::Error::UnsupportedFormat {
                    path: path.to_path_buf(),
                });
            }
        };

        tracing::debug!(path = %path.display(), vars = env.len(), "substituting environment");
        env::substitute_value(&mut document, env);

        Self::from_document(document, path)
    }

    /// Parse YAML text directly (used by tests and tools that already hold
    /// the document in memory).
    pub fn from_yaml_str(content: &str, env: &EnvSnapshot) -> crate::Result<Self> {
        let path = Path::new("<inline>");
        let mut document = parse_yaml(content, path)?;
        env::substitute_value(&mut document, env);
        Self::from_document(document, path)
    }

    fn from_document(document: serde_yaml::Value, path: &Path) -> crate::Result<Self> {
        serde_yaml::from_value(document).map_err(|e| crate::Error::Schema {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn stage(&self, stage: StageId) -> Option<&StageConfig> {
        match stage {
            StageId::One => Some(&self.stage_1),
            StageId::Two => self.stage_2.as_ref(),
        }
    }

    /// Configured stages in build order.
    pub fn stages(&self) -> impl Iterator<Item = (StageId, &StageConfig)> {
        StageId::ALL
            .into_iter()
            .filter_map(|id| self.stage(id).map(|s| (id, s)))
    }
}

fn parse_yaml(content: &str, path: &Path) -> crate::Result<serde_yaml::Value> {
    serde_yaml::from_str(content).map_err(|e| crate::Error::YamlParse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// JSON Schema of the config document, for editors and the config UI.
pub fn json_schema() -> schemars::Schema {
    schemars::schema_for!(ProjectConfig)
}

fn default_project_name() -> String {
    "stagewright".to_owned()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_apt_mirror() -> String {
    "default".to_owned()
}

fn default_true() -> bool {
    true
}

/// Scalar fields that also accept their value as a string, so a substituted
/// `${VAR}` (always a string) can fill a number or bool.
mod lenient {
    use std::fmt::Display;
    use std::str::FromStr;

    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw<T> {
        Typed(T),
        Text(String),
    }

    fn resolve<T, E>(raw: Raw<T>) -> Result<T, E>
    where
        T: FromStr,
        T::Err: Display,
        E: serde::de::Error,
    {
        match raw {
            Raw::Typed(v) => Ok(v),
            Raw::Text(s) => s
                .trim()
                .parse()
                .map_err(|e| E::custom(format!("invalid value {s:?}: {e}"))),
        }
    }

    pub fn parse<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de> + FromStr,
        T::Err: Display,
    {
        resolve(Raw::<T>::deserialize(deserializer)?)
    }

    pub fn parse_opt<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de> + FromStr,
        T::Err: Display,
    {
        Option::<Raw<T>>::deserialize(deserializer)?
            .map(resolve)
            .transpose()
    }
}
