//! `docker-compose.yml` generation.

use indexmap::IndexMap;
use serde::Serialize;
use stagewright_core::{DeviceKind, StageConfig, StageId, layout};

use crate::mounts::{EngineMount, MountPlan};

#[derive(Debug, Clone, Default, Serialize)]
pub struct ComposeFile {
    pub services: IndexMap<String, Service>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub volumes: IndexMap<String, VolumeDef>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Service {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub build: Build,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub environment: IndexMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deploy: Option<Deploy>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Build {
    pub context: String,
    pub dockerfile: String,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub args: IndexMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VolumeDef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub external: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Deploy {
    pub resources: Resources,
}

#[derive(Debug, Clone, Serialize)]
pub struct Resources {
    pub reservations: Reservations,
}

#[derive(Debug, Clone, Serialize)]
pub struct Reservations {
    pub devices: Vec<DeviceRequest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceRequest {
    pub driver: String,
    pub count: String,
    pub capabilities: Vec<String>,
}

impl Deploy {
    fn all_gpus() -> Self {
        Self {
            resources: Resources {
                reservations: Reservations {
                    devices: vec![DeviceRequest {
                        driver: "nvidia".to_owned(),
                        count: "all".to_owned(),
                        capabilities: vec!["gpu".to_owned()],
                    }],
                },
            },
        }
    }
}

impl ComposeFile {
    /// Add a stage's service and the volumes it declares.
    pub fn add_stage(
        &mut self,
        stage: StageId,
        config: &StageConfig,
        base_image: Option<&str>,
        mounts: &MountPlan,
    ) {
        let mut args = IndexMap::new();
        if stage == StageId::Two {
            if let Some(base) = base_image {
                args.insert("BASE_IMAGE".to_owned(), base.to_owned());
            }
        }
        let proxy = config.proxy.url();
        if let Some(url) = &proxy {
            args.insert("http_proxy".to_owned(), url.clone());
            args.insert("https_proxy".to_owned(), url.clone());
        }

        let mut environment = IndexMap::new();
        if config.proxy.persist {
            if let Some(url) = &proxy {
                environment.insert("http_proxy".to_owned(), url.clone());
                environment.insert("https_proxy".to_owned(), url.clone());
            }
        }

        let mut ports = Vec::new();
        if config.ssh.enable {
            if let Some(host_port) = config.ssh.host_port {
                ports.push(format!("{host_port}:{}", config.ssh.port));
            }
        }
        ports.extend(config.ports.iter().cloned());

        for mount in mounts.engine_mounts() {
            match mount {
                EngineMount::Volume { key, name, .. } => {
                    self.volumes.insert(
                        key.clone(),
                        VolumeDef {
                            name: Some(name.clone()),
                            external: false,
                        },
                    );
                }
                EngineMount::ExternalVolume { name, .. } => {
                    self.volumes.insert(
                        name.clone(),
                        VolumeDef {
                            name: None,
                            external: true,
                        },
                    );
                }
                EngineMount::Bind { .. } => {}
            }
        }

        let service = Service {
            image: config.image.output.clone(),
            build: Build {
                context: ".".to_owned(),
                dockerfile: layout::dockerfile_name(stage),
                args,
            },
            ports,
            environment,
            volumes: mounts.engine_mounts().map(EngineMount::compose_entry).collect(),
            deploy: (config.device == DeviceKind::Gpu).then(Deploy::all_gpus),
        };
        self.services.insert(stage.dir_name().to_owned(), service);
    }

    pub fn render(&self) -> Result<String, serde_yaml::Error> {
        let body = serde_yaml::to_string(self)?;
        Ok(format!(
            "# Generated by stagewright. Do not edit; rerun `stagewright compile`.\n{body}"
        ))
    }
}
