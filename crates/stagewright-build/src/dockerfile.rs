use stagewright_core::{DeviceKind, Hook, StageConfig, StageId, layout, shell};

use crate::mounts::MountPlan;
use crate::text::Text;

/// Base image for stage_1 when `image.base` is not set.
pub const DEFAULT_BASE_IMAGE: &str = "ubuntu:24.04";

const APT_SOURCES: &str =
    "/etc/apt/sources.list /etc/apt/sources.list.d/*.list /etc/apt/sources.list.d/*.sources";
const APT_BACKUP_SUFFIX: &str = ".stagewright-orig";

/// Where apt packages come from during the build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AptMirror {
    Default,
    Url(String),
}

impl AptMirror {
    /// Accepts a known mirror name or an http(s) URL. Returns `None` for
    /// anything else.
    pub fn parse(value: &str) -> Option<Self> {
        let url = match value {
            "default" | "" => return Some(Self::Default),
            "tuna" => "https://mirrors.tuna.tsinghua.edu.cn",
            "aliyun" => "https://mirrors.aliyun.com",
            "ustc" => "https://mirrors.ustc.edu.cn",
            "163" => "http://mirrors.163.com",
            other => {
                let is_http = other.starts_with("http://") || other.starts_with("https://");
                // The URL lands inside a sed expression and a double-quoted shell word.
                let is_clean = other
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || "-._~:/?&=%+".contains(c));
                if !(is_http && is_clean) {
                    return None;
                }
                other
            }
        };
        Some(Self::Url(url.trim_end_matches('/').to_owned()))
    }
}

/// Generates the Dockerfile of one stage.
pub struct DockerfileGenerator<'a> {
    stage: StageId,
    config: &'a StageConfig,
    base_image: &'a str,
    mounts: &'a MountPlan,
    setup_users: bool,
    login_users: Vec<String>,
}

impl<'a> DockerfileGenerator<'a> {
    /// `base_image` is stage_1's configured base, or stage_1's output image
    /// when generating stage_2.
    pub fn new(
        stage: StageId,
        config: &'a StageConfig,
        base_image: &'a str,
        mounts: &'a MountPlan,
    ) -> Self {
        Self {
            stage,
            config,
            base_image,
            mounts,
            setup_users: false,
            login_users: Vec::new(),
        }
    }

    /// Run the stage's generated account setup script during the build.
    pub fn with_user_setup(mut self, enabled: bool) -> Self {
        self.setup_users = enabled;
        self
    }

    /// Non-root accounts whose `.bashrc` gets the login hooks, in addition
    /// to root's.
    pub fn with_login_users(mut self, users: Vec<String>) -> Self {
        self.login_users = users;
        self
    }

    pub fn render(&self) -> String {
        let mut out = Text::new();
        out.line(format!(
            "# Generated by stagewright for {}. Do not edit; rerun `stagewright compile`.",
            self.stage
        ));
        self.write_base(&mut out);
        self.write_proxy(&mut out);
        self.write_environment(&mut out);
        let mirror = AptMirror::parse(&self.config.apt.mirror).unwrap_or(AptMirror::Default);
        if let AptMirror::Url(url) = &mirror {
            write_apt_mirror(&mut out, url);
        }
        self.write_install(&mut out);
        self.write_storage(&mut out);
        self.write_on_build(&mut out);
        self.write_login_hooks(&mut out);
        if mirror != AptMirror::Default && !self.config.apt.keep_after_build {
            write_apt_restore(&mut out);
        }
        self.write_runtime(&mut out);
        out.finish()
    }

    fn write_base(&self, out: &mut Text) {
        out.blank();
        out.line("# === Base ===");
        match self.stage {
            StageId::One => out.line(format!("FROM {}", self.base_image)),
            StageId::Two => {
                out.line(format!("ARG BASE_IMAGE={}", self.base_image));
                out.line("FROM ${BASE_IMAGE}");
            }
        }
        out.line(r#"SHELL ["/bin/bash", "-c"]"#);
    }

    fn write_proxy(&self, out: &mut Text) {
        let Some(url) = self.config.proxy.url() else {
            return;
        };
        out.blank();
        out.line("# === Proxy (build only) ===");
        out.line(format!("ARG http_proxy={url}"));
        out.line(format!("ARG https_proxy={url}"));
    }

    fn write_environment(&self, out: &mut Text) {
        let gpu = self.config.device == DeviceKind::Gpu;
        if self.config.environment.is_empty() && !gpu {
            return;
        }
        out.blank();
        out.line("# === Environment ===");
        for entry in &self.config.environment {
            if let Some((key, value)) = entry.split_once('=') {
                out.line(format!("ENV {key}=\"{}\"", escape_env_value(value)));
            }
        }
        if gpu {
            out.line("ENV NVIDIA_VISIBLE_DEVICES=all");
            out.line("ENV NVIDIA_DRIVER_CAPABILITIES=all");
        }
    }

    fn write_install(&self, out: &mut Text) {
        out.blank();
        out.line("# === stagewright ===");
        out.line(format!(
            "COPY {}/ {}/",
            layout::INSTALLATION_DIR,
            layout::IMAGE_INSTALL_DIR
        ));
        out.line(format!(
            "COPY {} {}",
            layout::HOST_BINARY_PATH,
            layout::IMAGE_BINARY_PATH
        ));
        out.line(format!("RUN chmod 755 {} \\", layout::IMAGE_BINARY_PATH));
        out.line(format!(
            "    && find {} -name '*.sh' -exec chmod +x {{}} + \\",
            layout::IMAGE_INSTALL_DIR
        ));
        out.line(format!("    && mkdir -p {}", layout::IMAGE_RUNTIME_DIR));

        if self.setup_users {
            out.blank();
            out.line("# === Users ===");
            out.line(format!(
                "RUN bash {}",
                layout::image_setup_users_path(self.stage)
            ));
        }
    }

    fn write_storage(&self, out: &mut Text) {
        let mut baked = self.mounts.image_storage().peekable();
        if baked.peek().is_none() {
            return;
        }
        out.blank();
        out.line("# === Image storage ===");
        for mount in baked {
            let target = shell::quote(&mount.link.target);
            let link = shell::quote(&mount.link.link);
            out.line(format!("RUN mkdir -p {target} \\"));
            out.line(format!("    && if [ -d {link} ] && [ ! -L {link} ]; then \\"));
            out.line(format!("        cp -a {link}/. {target}/ && rm -rf {link}; \\"));
            out.line("    fi \\");
            out.line(format!("    && mkdir -p \"$(dirname {link})\" \\"));
            out.line(format!("    && ln -sfn {target} {link}"));
        }
    }

    fn write_on_build(&self, out: &mut Text) {
        out.blank();
        out.line("# === on_build ===");
        out.line(format!(
            "RUN bash {}",
            layout::image_wrapper_path(self.stage, Hook::OnBuild)
        ));
    }

    fn write_login_hooks(&self, out: &mut Text) {
        let register = format!(
            "{} register-login --stage {}",
            layout::IMAGE_BINARY_PATH,
            self.stage.number()
        );
        out.blank();
        out.line("# === Login hooks ===");
        if self.login_users.is_empty() {
            out.line(format!("RUN {register} --profile /root/.bashrc"));
            return;
        }
        out.line(format!("RUN {register} --profile /root/.bashrc \\"));
        let last = self.login_users.len() - 1;
        for (i, user) in self.login_users.iter().enumerate() {
            let profile = format!("/home/{user}/.bashrc");
            let tail = if i == last { "" } else { " \\" };
            out.line(format!("    && {register} --profile {profile} \\"));
            out.line(format!("    && chown {user}:{user} {profile}{tail}"));
        }
    }

    fn write_runtime(&self, out: &mut Text) {
        out.blank();
        out.line("# === Runtime ===");
        if self.config.ssh.enable {
            out.line(format!("EXPOSE {}", self.config.ssh.port));
        }
        out.line(format!(
            r#"ENTRYPOINT ["{}", "entrypoint", "--stage", "{}"]"#,
            layout::IMAGE_BINARY_PATH,
            self.stage.number()
        ));
    }
}

fn write_apt_mirror(out: &mut Text, url: &str) {
    out.blank();
    out.line("# === Apt mirror ===");
    out.line(format!("RUN for f in {APT_SOURCES}; do \\"));
    out.line("        [ -f \"$f\" ] || continue; \\");
    out.line(format!(
        "        [ -f \"$f{APT_BACKUP_SUFFIX}\" ] || cp \"$f\" \"$f{APT_BACKUP_SUFFIX}\"; \\"
    ));
    out.line(format!(
        "        sed -i -E \"s#https?://(archive|security)\\.ubuntu\\.com#{url}#g; s#https?://(deb|security)\\.debian\\.org#{url}#g\" \"$f\"; \\"
    ));
    out.line("    done");
}

fn write_apt_restore(out: &mut Text) {
    out.blank();
    out.line("# === Restore apt sources ===");
    out.line(format!("RUN for f in {APT_SOURCES}; do \\"));
    out.line(format!(
        "        if [ -f \"$f{APT_BACKUP_SUFFIX}\" ]; then mv \"$f{APT_BACKUP_SUFFIX}\" \"$f\"; fi; \\"
    ));
    out.line("    done");
}

fn escape_env_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '"' | '$') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirror_names_and_urls() {
        assert_eq!(AptMirror::parse("default"), Some(AptMirror::Default));
        assert_eq!(
            AptMirror::parse("tuna"),
            Some(AptMirror::Url("https://mirrors.tuna.tsinghua.edu.cn".into()))
        );
        assert_eq!(
            AptMirror::parse("http://apt.internal:8080/"),
            Some(AptMirror::Url("http://apt.internal:8080".into()))
        );
        assert_eq!(AptMirror::parse("mirror.example.com"), None);
        assert_eq!(AptMirror::parse("http://bad#host"), None);
    }

    #[test]
    fn env_values_are_escaped() {
        assert_eq!(escape_env_value(r#"a "b" $c \d"#), r#"a \"b\" \$c \\d"#);
    }
}
