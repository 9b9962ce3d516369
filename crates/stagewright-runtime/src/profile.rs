//! Login hook registration in shell profiles.
//!
//! Each stage owns one line in a profile, tagged with a trailing marker
//! comment. Registering again replaces that line in place, so the step can run
//! on every image build without piling up duplicates.

use std::path::Path;

use stagewright_core::{Hook, StageId, layout};

use crate::RuntimeError;

const MARKER_PREFIX: &str = "# stagewright:on-user-login:";

fn marker(stage: StageId) -> String {
    format!("{MARKER_PREFIX}{stage}")
}

fn hook_line(stage: StageId) -> String {
    let wrapper = layout::image_wrapper_path(stage, Hook::OnUserLogin);
    format!(
        "if [ -f {wrapper} ]; then . {wrapper}; fi {}",
        marker(stage)
    )
}

/// Register the login wrappers of `stage` and every stage below it in
/// `profile`. Returns whether the file changed.
pub fn register_login(profile: &Path, stage: StageId) -> Result<bool, RuntimeError> {
    let existing = match std::fs::read_to_string(profile) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            return Err(RuntimeError::Profile {
                path: profile.to_path_buf(),
                source: e,
            });
        }
    };

    let updated = apply(&existing, stage.up_to());
    if updated == existing {
        tracing::debug!(profile = %profile.display(), %stage, "login hooks already registered");
        return Ok(false);
    }

    if let Some(parent) = profile.parent() {
        std::fs::create_dir_all(parent).map_err(|e| RuntimeError::Profile {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    std::fs::write(profile, updated).map_err(|e| RuntimeError::Profile {
        path: profile.to_path_buf(),
        source: e,
    })?;
    tracing::info!(profile = %profile.display(), %stage, "registered login hooks");
    Ok(true)
}

fn apply(existing: &str, stages: &[StageId]) -> String {
    let mut lines: Vec<String> = existing.lines().map(str::to_owned).collect();

    for &stage in stages {
        let tag = marker(stage);
        let wanted = hook_line(stage);
        let mut found = false;
        lines.retain_mut(|line| {
            if !line.trim_end().ends_with(&tag) {
                return true;
            }
            if found {
                return false;
            }
            found = true;
            *line = wanted.clone();
            true
        });
        if !found {
            lines.push(wanted);
        }
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_to_existing_profile() {
        let out = apply("export PS1='$ '\n", &[StageId::One]);
        assert_eq!(
            out,
            "export PS1='$ '\n\
             if [ -f /stagewright/installation/stage-1/generated/_custom-on-user-login.sh ]; \
             then . /stagewright/installation/stage-1/generated/_custom-on-user-login.sh; fi \
             # stagewright:on-user-login:stage_1\n"
        );
    }

    #[test]
    fn second_registration_is_a_no_op() {
        let once = apply("", StageId::Two.up_to());
        let twice = apply(&once, StageId::Two.up_to());
        assert_eq!(once, twice);
        assert_eq!(once.lines().count(), 2);
    }

    #[test]
    fn stale_and_duplicate_lines_are_replaced() {
        let existing = "a\n. /old/path # stagewright:on-user-login:stage_1\nb\n. /older # stagewright:on-user-login:stage_1\n";
        let out = apply(existing, &[StageId::One]);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "a");
        assert!(lines[1].starts_with("if [ -f /stagewright/installation/stage-1/"));
        assert_eq!(lines[2], "b");
    }

    #[test]
    fn writes_file_and_reports_change() {
        let tmp = tempfile::TempDir::new().unwrap();
        let profile = tmp.path().join("home/alice/.bashrc");

        assert!(register_login(&profile, StageId::One).unwrap());
        assert!(!register_login(&profile, StageId::One).unwrap());
        assert!(register_login(&profile, StageId::Two).unwrap());

        let content = std::fs::read_to_string(&profile).unwrap();
        assert!(content.contains("stage-2/generated/_custom-on-user-login.sh"));
        assert_eq!(content.matches(MARKER_PREFIX).count(), 2);
    }
}
