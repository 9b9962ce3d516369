//! Lifecycle wrapper generation.
//!
//! Each stage gets one wrapper per [`Hook`]. The wrapper runs the configured
//! entries in order with their parameters already escaped, so nothing in the
//! container ever re-parses the raw config strings.

use std::path::Path;

use stagewright_core::diagnostics::{Diagnostics, Location, ResolutionWarning, ValidationError};
use stagewright_core::script::ScriptEntry;
use stagewright_core::{CustomEntry, CustomScripts, Hook, Invocation, StageId, layout, shell};

use crate::text::{Text, comment_safe};

/// Script entries of one stage, parsed and grouped by hook.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageScripts {
    pub on_build: Vec<ScriptEntry>,
    pub on_first_run: Vec<ScriptEntry>,
    pub on_every_run: Vec<ScriptEntry>,
    pub on_user_login: Vec<ScriptEntry>,
    pub on_entry: Option<ScriptEntry>,
}

impl StageScripts {
    pub fn entries(&self, hook: Hook) -> &[ScriptEntry] {
        match hook {
            Hook::OnBuild => &self.on_build,
            Hook::OnFirstRun => &self.on_first_run,
            Hook::OnEveryRun => &self.on_every_run,
            Hook::OnUserLogin => &self.on_user_login,
        }
    }

    fn entries_mut(&mut self, hook: Hook) -> &mut Vec<ScriptEntry> {
        match hook {
            Hook::OnBuild => &mut self.on_build,
            Hook::OnFirstRun => &mut self.on_first_run,
            Hook::OnEveryRun => &mut self.on_every_run,
            Hook::OnUserLogin => &mut self.on_user_login,
        }
    }

    /// Custom entry point as recorded in the entry plan.
    pub fn custom_entry(&self) -> Option<CustomEntry> {
        self.on_entry.as_ref().map(|entry| CustomEntry {
            script: layout::image_script_path(&entry.script_path),
            args: entry.args.clone(),
        })
    }
}

/// Parse every configured entry of a stage. Malformed entries become
/// diagnostics; relative scripts missing under `installation/` are warnings.
pub fn parse_scripts(
    project_dir: &Path,
    stage: StageId,
    custom: &CustomScripts,
    diags: &mut Diagnostics,
) -> StageScripts {
    let mut scripts = StageScripts::default();

    for hook in Hook::ALL {
        for (index, raw) in custom.entries(hook).iter().enumerate() {
            let loc = Location::stage(stage).hook(hook).index(index);
            if let Some(entry) = parse_entry(project_dir, raw, loc, diags) {
                scripts.entries_mut(hook).push(entry);
            }
        }
    }

    if let Some(raw) = &custom.on_entry {
        let loc = Location::stage(stage).section("custom.on_entry");
        scripts.on_entry = parse_entry(project_dir, raw, loc, diags);
    }

    scripts
}

fn parse_entry(
    project_dir: &Path,
    raw: &str,
    loc: Location,
    diags: &mut Diagnostics,
) -> Option<ScriptEntry> {
    match ScriptEntry::parse(raw) {
        Ok(entry) => {
            if entry.is_project_relative() {
                let on_disk = project_dir
                    .join(layout::INSTALLATION_DIR)
                    .join(entry.script_path.trim_start_matches("./"));
                if !on_disk.is_file() {
                    diags.warn(
                        loc,
                        ResolutionWarning::MissingScript {
                            path: format!("{}/{}", layout::INSTALLATION_DIR, entry.script_path),
                        },
                    );
                }
            }
            Some(entry)
        }
        Err(e) => {
            diags.error(
                loc,
                ValidationError::MalformedScriptEntry {
                    entry: raw.to_owned(),
                    reason: e.to_string(),
                },
            );
            None
        }
    }
}

/// Render the wrapper script for one hook of one stage.
pub fn render_wrapper(stage: StageId, hook: Hook, entries: &[ScriptEntry]) -> String {
    let mut out = Text::new();
    match hook.invocation() {
        Invocation::Spawn => out.line("#!/usr/bin/env bash"),
        Invocation::Source => {
            out.line("# shellcheck shell=bash");
            out.line("# Sourced from the login shell profile; do not execute directly.");
        }
    }
    out.line(format!(
        "# Generated by stagewright for {stage} {hook}. Do not edit; rerun `stagewright compile`."
    ));

    match hook {
        Hook::OnBuild => out.line("set -uo pipefail"),
        Hook::OnFirstRun | Hook::OnEveryRun => {
            out.line("set -uo pipefail");
            out.line("sw_failed=0");
        }
        Hook::OnUserLogin => {}
    }

    for (index, entry) in entries.iter().enumerate() {
        let label = shell::quote(&format!("{stage} {hook}[{index}]")).into_owned();
        let command = command_line(hook, entry);
        out.blank();
        out.line(format!("# [{index}] {}", comment_safe(&entry.raw)));
        match hook {
            Hook::OnBuild => {
                out.line(format!("{command} || {{"));
                out.line("    sw_status=$?");
                out.line(format!(
                    "    printf 'stagewright: %s failed with exit status %s\\n' {label} \"$sw_status\" >&2"
                ));
                out.line("    exit \"$sw_status\"");
                out.line("}");
            }
            Hook::OnFirstRun | Hook::OnEveryRun => {
                out.line(format!("{command} || {{"));
                out.line("    sw_status=$?");
                out.line(format!(
                    "    printf 'stagewright: %s failed with exit status %s\\n' {label} \"$sw_status\" >&2"
                ));
                out.line("    sw_failed=1");
                out.line("}");
            }
            Hook::OnUserLogin => {
                out.line(format!(
                    "{command} || printf 'stagewright: %s returned %s\\n' {label} \"$?\" >&2"
                ));
            }
        }
    }

    match hook {
        Hook::OnBuild => {
            out.blank();
            out.line("exit 0");
        }
        Hook::OnFirstRun | Hook::OnEveryRun => {
            out.blank();
            out.line("exit \"$sw_failed\"");
        }
        Hook::OnUserLogin => {}
    }
    out.finish()
}

fn command_line(hook: Hook, entry: &ScriptEntry) -> String {
    let script = shell::quote(&layout::image_script_path(&entry.script_path)).into_owned();
    let params = entry.parameter_string();
    let program = match hook.invocation() {
        Invocation::Spawn => "bash",
        Invocation::Source => ".",
    };
    if params.is_empty() {
        format!("{program} {script}")
    } else {
        format!("{program} {script} {params}")
    }
}
