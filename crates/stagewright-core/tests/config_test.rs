use std::path::PathBuf;

use secrecy::ExposeSecret;
use stagewright_core::{DeviceKind, EnvSnapshot, Error, MountKind, ProjectConfig, StageId};
use tempfile::TempDir;

const FULL: &str = r#"
project: demo
stage_1:
  image:
    base: ubuntu:24.04
    output: demo:stage-1
  ssh:
    enable: true
    port: 22
    host_port: 2222
    users:
      alice:
        password: ${ALICE_PASSWORD:-secret}
        uid: ${ALICE_UID:-1100}
        pubkey_file: keys/alice.pub
  proxy:
    address: host.docker.internal
    port: 7890
    persist: true
  apt:
    mirror: tuna
    keep_after_build: false
  ports: ["8080:80"]
  environment: ["LANG=C.UTF-8"]
  device: gpu
  mounts:
    data:
      kind: auto-volume
      dst_path: /data
    models:
      kind: host-dir
      dst_path: /models
      src: /srv/models
  custom:
    on_build: ["stage-1/custom/install.sh --with-dev"]
    on_entry: stage-1/custom/entry.sh
stage_2:
  image:
    output: demo:stage-2
  custom:
    on_user_login: ["stage-2/custom/motd.sh"]
"#;

fn write_config(tmp: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = tmp.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn load_parses_full_config() {
    let tmp = TempDir::new().unwrap();
    let path = write_config(&tmp, "stagewright.yml", FULL);

    let config = ProjectConfig::load(&path, &EnvSnapshot::new()).unwrap();

    assert_eq!(config.project, "demo");
    let s1 = &config.stage_1;
    assert_eq!(s1.image.base.as_deref(), Some("ubuntu:24.04"));
    assert_eq!(s1.image.output.as_deref(), Some("demo:stage-1"));
    assert!(s1.ssh.enable);
    assert_eq!(s1.ssh.host_port, Some(2222));
    let alice = &s1.ssh.users["alice"];
    assert_eq!(alice.uid, Some(1100));
    assert_eq!(
        alice.password.as_ref().map(|p| p.expose_secret().to_owned()),
        Some("secret".to_owned())
    );
    assert_eq!(s1.proxy.url().as_deref(), Some("http://host.docker.internal:7890"));
    assert!(s1.proxy.persist);
    assert_eq!(s1.apt.mirror, "tuna");
    assert!(!s1.apt.keep_after_build);
    assert_eq!(s1.device, DeviceKind::Gpu);
    assert_eq!(s1.ports, vec!["8080:80"]);

    let names: Vec<&str> = s1.mounts.keys().map(String::as_str).collect();
    assert_eq!(names, ["data", "models"]);
    assert_eq!(s1.mounts["models"].kind, MountKind::HostDir);
    assert_eq!(s1.mounts["models"].src.as_deref(), Some("/srv/models"));
    assert_eq!(
        s1.custom.on_entry.as_deref(),
        Some("stage-1/custom/entry.sh")
    );

    let s2 = config.stage_2.as_ref().unwrap();
    assert_eq!(s2.custom.on_user_login, vec!["stage-2/custom/motd.sh"]);
    assert_eq!(config.stages().map(|(id, _)| id).collect::<Vec<_>>(), StageId::ALL);
}

#[test]
fn env_snapshot_overrides_defaults() {
    let tmp = TempDir::new().unwrap();
    let path = write_config(&tmp, "stagewright.yml", FULL);
    let env: EnvSnapshot = [("ALICE_UID", "2001"), ("ALICE_PASSWORD", "hunter2")]
        .into_iter()
        .collect();

    let config = ProjectConfig::load(&path, &env).unwrap();

    let alice = &config.stage_1.ssh.users["alice"];
    assert_eq!(alice.uid, Some(2001));
    assert_eq!(
        alice.password.as_ref().map(|p| p.expose_secret().to_owned()),
        Some("hunter2".to_owned())
    );
}

#[test]
fn numeric_looking_substitutions_keep_string_fields() {
    let yaml = r#"
stage_1:
  apt:
    mirror: ${MIRROR:-163}
  ssh:
    users:
      bob:
        password: ${PW}
"#;
    let env: EnvSnapshot = [("PW", "123456")].into_iter().collect();

    let config = ProjectConfig::from_yaml_str(yaml, &env).unwrap();

    assert_eq!(config.stage_1.apt.mirror, "163");
    assert_eq!(
        config.stage_1.ssh.users["bob"]
            .password
            .as_ref()
            .map(|p| p.expose_secret().to_owned()),
        Some("123456".to_owned())
    );
}

#[test]
fn substituted_scalars_fill_numeric_and_bool_fields() {
    let yaml = r#"
stage_1:
  ssh:
    enable: ${SSH:-true}
    port: ${SSH_PORT}
    host_port: "${HOST_PORT:-2222}"
    users:
      bob: { uid: "${UID:-1100}", gid: 1200 }
  proxy: { address: proxy, port: "${PROXY_PORT:-3128}", persist: "false" }
  apt: { keep_after_build: "${KEEP:-false}" }
"#;
    let env: EnvSnapshot = [("SSH_PORT", "2022")].into_iter().collect();

    let config = ProjectConfig::from_yaml_str(yaml, &env).unwrap();

    let ssh = &config.stage_1.ssh;
    assert!(ssh.enable);
    assert_eq!(ssh.port, 2022);
    assert_eq!(ssh.host_port, Some(2222));
    assert_eq!(ssh.users["bob"].uid, Some(1100));
    assert_eq!(ssh.users["bob"].gid, Some(1200));
    assert_eq!(config.stage_1.proxy.port, Some(3128));
    assert!(!config.stage_1.proxy.persist);
    assert!(!config.stage_1.apt.keep_after_build);
}

#[test]
fn non_numeric_value_for_numeric_field_is_a_schema_error() {
    let yaml = "stage_1:\n  ssh:\n    port: ${SSH_PORT:-twenty-two}\n";
    let err = ProjectConfig::from_yaml_str(yaml, &EnvSnapshot::new()).unwrap_err();
    assert!(matches!(err, Error::Schema { .. }));
    assert!(err.to_string().contains("twenty-two"));
}

#[test]
fn minimal_config_fills_defaults() {
    let config = ProjectConfig::from_yaml_str("stage_1: {}\n", &EnvSnapshot::new()).unwrap();

    assert_eq!(config.project, "stagewright");
    assert!(config.stage_2.is_none());
    assert!(!config.stage_1.ssh.enable);
    assert_eq!(config.stage_1.ssh.port, 22);
    assert_eq!(config.stage_1.apt.mirror, "default");
    assert!(config.stage_1.apt.keep_after_build);
    assert_eq!(config.stage_1.device, DeviceKind::Cpu);
    assert!(config.stage_1.proxy.url().is_none());
}

#[test]
fn unknown_field_is_a_schema_error() {
    let err = ProjectConfig::from_yaml_str("stage_1:\n  imagee: {}\n", &EnvSnapshot::new())
        .unwrap_err();
    assert!(matches!(err, Error::Schema { .. }));
    assert!(err.to_string().contains("imagee"));
}

#[test]
fn unknown_mount_kind_is_a_schema_error() {
    let yaml = "stage_1:\n  mounts:\n    x: {kind: nfs, dst_path: /x}\n";
    let err = ProjectConfig::from_yaml_str(yaml, &EnvSnapshot::new()).unwrap_err();
    assert!(matches!(err, Error::Schema { .. }));
}

#[test]
fn invalid_yaml_returns_parse_error() {
    let tmp = TempDir::new().unwrap();
    let path = write_config(&tmp, "stagewright.yml", "stage_1: [unclosed");

    let err = ProjectConfig::load(&path, &EnvSnapshot::new()).unwrap_err();
    assert!(matches!(err, Error::YamlParse { .. }));
    assert!(err.to_string().contains("parse"));
}

#[test]
fn missing_file_returns_load_error() {
    let tmp = TempDir::new().unwrap();
    let err = ProjectConfig::load(&tmp.path().join("nope.yml"), &EnvSnapshot::new()).unwrap_err();
    assert!(matches!(err, Error::ConfigLoad { .. }));
}

#[test]
fn toml_config_is_accepted() {
    let tmp = TempDir::new().unwrap();
    let toml = r#"
project = "from-toml"

[stage_1.image]
base = "debian:bookworm"
output = "t:1"

[stage_1.mounts.cache]
kind = "image-storage"
dst_path = "/cache"
"#;
    let path = write_config(&tmp, "stagewright.toml", toml);

    let config = ProjectConfig::load(&path, &EnvSnapshot::new()).unwrap();
    assert_eq!(config.project, "from-toml");
    assert_eq!(config.stage_1.mounts["cache"].kind, MountKind::ImageStorage);
}

#[test]
fn unsupported_extension_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let path = write_config(&tmp, "stagewright.json", "{}");
    let err = ProjectConfig::load(&path, &EnvSnapshot::new()).unwrap_err();
    assert!(matches!(err, Error::UnsupportedFormat { .. }));
}

#[test]
fn schema_lists_stage_fields() {
    let schema = serde_json::to_string(&stagewright_core::config::json_schema()).unwrap();
    assert!(schema.contains("stage_1"));
    assert!(schema.contains("on_user_login"));
    assert!(schema.contains("image-storage"));
}
