//! SSH account resolution.
//!
//! Turns the configured SSH users of a stage into concrete accounts: final
//! uid/gid, the group that has to be moved aside (if any), and the key
//! material to install. Conflicts are judged against an [`AccountDb`]
//! snapshot at compile time and re-checked by the generated setup script at
//! image build time, where the real `/etc/group` is known.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use stagewright_core::diagnostics::{Diagnostics, Location, ResolutionWarning, ValidationError};
use stagewright_core::{SshConfig, SshUserSpec, StageId, layout, shell};

use crate::keys::{self, KeyDeriver};
use crate::text::Text;

/// Supplementary group every SSH user joins.
pub const SSH_GROUP: &str = "ssh_users";

const SYSTEM_ID_LIMIT: u32 = 1000;
const NOGROUP_ID: u32 = 65534;

const PROTECTED_GROUPS: &[&str] = &[
    "root", "daemon", "bin", "sys", "adm", "tty", "disk", "lp", "mail", "news", "uucp", "man",
    "proxy", "kmem", "dialout", "fax", "voice", "cdrom", "floppy", "tape", "sudo", "audio", "dip",
    "www-data", "backup", "operator", "list", "irc", "src", "shadow", "utmp", "video", "sasl",
    "plugdev", "staff", "games", "users", "nogroup",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    pub name: String,
    pub gid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEntry {
    pub name: String,
    pub uid: u32,
}

impl GroupEntry {
    /// Groups that must never be renamed or renumbered.
    pub fn is_protected(&self) -> bool {
        self.gid < SYSTEM_ID_LIMIT
            || self.gid == NOGROUP_ID
            || PROTECTED_GROUPS.contains(&self.name.as_str())
    }
}

/// Known accounts of the base image.
#[derive(Debug, Clone, Default)]
pub struct AccountDb {
    groups: Vec<GroupEntry>,
    users: Vec<UserEntry>,
}

impl AccountDb {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Accounts present in stock Debian and Ubuntu base images.
    pub fn debian_base() -> Self {
        const GROUPS: &[(&str, u32)] = &[
            ("root", 0),
            ("daemon", 1),
            ("bin", 2),
            ("sys", 3),
            ("adm", 4),
            ("tty", 5),
            ("disk", 6),
            ("lp", 7),
            ("mail", 8),
            ("news", 9),
            ("uucp", 10),
            ("man", 12),
            ("proxy", 13),
            ("kmem", 15),
            ("dialout", 20),
            ("fax", 21),
            ("voice", 22),
            ("cdrom", 24),
            ("floppy", 25),
            ("tape", 26),
            ("sudo", 27),
            ("audio", 29),
            ("dip", 30),
            ("www-data", 33),
            ("backup", 34),
            ("operator", 37),
            ("list", 38),
            ("irc", 39),
            ("src", 40),
            ("shadow", 42),
            ("utmp", 43),
            ("video", 44),
            ("sasl", 45),
            ("plugdev", 46),
            ("staff", 50),
            ("games", 60),
            ("users", 100),
            ("nogroup", NOGROUP_ID),
        ];
        const USERS: &[(&str, u32)] = &[
            ("root", 0),
            ("daemon", 1),
            ("bin", 2),
            ("sys", 3),
            ("sync", 4),
            ("games", 5),
            ("man", 6),
            ("lp", 7),
            ("mail", 8),
            ("news", 9),
            ("uucp", 10),
            ("proxy", 13),
            ("www-data", 33),
            ("backup", 34),
            ("list", 38),
            ("irc", 39),
            ("_apt", 42),
            ("nobody", NOGROUP_ID),
        ];

        let mut db = Self::empty();
        for (name, gid) in GROUPS {
            db = db.with_group(name, *gid);
        }
        for (name, uid) in USERS {
            db = db.with_user(name, *uid);
        }
        db
    }

    /// [`debian_base`](Self::debian_base) plus the `ubuntu` user and group
    /// (uid/gid 1000) that Ubuntu images ship since 23.04.
    pub fn ubuntu_base() -> Self {
        Self::debian_base()
            .with_group("ubuntu", 1000)
            .with_user("ubuntu", 1000)
    }

    /// Best guess at the accounts of `image` from its name and tag.
    pub fn for_base_image(image: &str) -> Self {
        let without_digest = image.split('@').next().unwrap_or(image);
        let name = without_digest.rsplit('/').next().unwrap_or(without_digest);
        let (repo, tag) = name.split_once(':').unwrap_or((name, "latest"));
        if repo == "ubuntu" && ships_ubuntu_user(tag) {
            Self::ubuntu_base()
        } else {
            Self::debian_base()
        }
    }

    /// Parse `/etc/group` and `/etc/passwd` formatted text. Malformed lines
    /// are skipped.
    pub fn parse(group: &str, passwd: &str) -> Self {
        let mut db = Self::empty();
        for line in group.lines() {
            let fields: Vec<&str> = line.split(':').collect();
            if let [name, _, gid, ..] = fields.as_slice() {
                if let Ok(gid) = gid.parse() {
                    db = db.with_group(name, gid);
                }
            }
        }
        for line in passwd.lines() {
            let fields: Vec<&str> = line.split(':').collect();
            if let [name, _, uid, ..] = fields.as_slice() {
                if let Ok(uid) = uid.parse() {
                    db = db.with_user(name, uid);
                }
            }
        }
        db
    }

    pub fn with_group(mut self, name: &str, gid: u32) -> Self {
        self.groups.push(GroupEntry {
            name: name.to_owned(),
            gid,
        });
        self
    }

    pub fn with_user(mut self, name: &str, uid: u32) -> Self {
        self.users.push(UserEntry {
            name: name.to_owned(),
            uid,
        });
        self
    }

    pub fn group_by_gid(&self, gid: u32) -> Option<&GroupEntry> {
        self.groups.iter().find(|g| g.gid == gid)
    }

    pub fn user_by_uid(&self, uid: u32) -> Option<&UserEntry> {
        self.users.iter().find(|u| u.uid == uid)
    }
}

/// Ubuntu tags from before 23.04 have no default `ubuntu` account.
fn ships_ubuntu_user(tag: &str) -> bool {
    const OLD_CODENAMES: &[&str] = &["trusty", "xenial", "bionic", "focal", "jammy", "kinetic"];
    let release = tag.split('-').next().unwrap_or(tag);
    if OLD_CODENAMES.contains(&release) {
        return false;
    }
    let Some((year, month)) = release.split_once('.') else {
        return true;
    };
    match (year.parse::<u32>(), month.parse::<u32>()) {
        (Ok(year), Ok(month)) => (year, month) >= (23, 4),
        _ => true,
    }
}

/// A fully resolved SSH account.
#[derive(Debug)]
pub struct ResolvedUser {
    pub name: String,
    pub uid: Option<u32>,
    /// Primary group id; `None` lets `groupadd` choose.
    pub gid: Option<u32>,
    /// Non-system group currently holding `gid`, moved to a free gid first.
    pub displaces: Option<String>,
    pub password: Option<SecretString>,
    pub public_key: Option<String>,
    pub private_key: Option<SecretString>,
}

impl ResolvedUser {
    pub fn is_root(&self) -> bool {
        self.name == "root"
    }

    pub fn home(&self) -> String {
        if self.is_root() {
            "/root".to_owned()
        } else {
            format!("/home/{}", self.name)
        }
    }

    /// The primary group always carries the user's own name.
    pub fn primary_group(&self) -> &str {
        &self.name
    }

    fn owner(&self) -> String {
        format!("{}:{}", self.name, self.primary_group())
    }
}

/// A key file written under the stage's generated `ssh_keys/` directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFile {
    /// Relative to the project directory.
    pub path: PathBuf,
    pub content: String,
    pub private: bool,
}

const PUBLIC_KEY_FILE: &str = "authorized_key.pub";
const PRIVATE_KEY_FILE: &str = "id_key";

pub struct IdentityResolver<'a, K: KeyDeriver> {
    keys: &'a K,
    accounts: &'a AccountDb,
    project_dir: &'a Path,
}

impl<'a, K: KeyDeriver> IdentityResolver<'a, K> {
    pub fn new(keys: &'a K, accounts: &'a AccountDb, project_dir: &'a Path) -> Self {
        Self {
            keys,
            accounts,
            project_dir,
        }
    }

    /// Resolve every configured user of a stage. Users with errors are
    /// reported in `diags` and left out of the result.
    pub fn resolve(
        &self,
        stage: StageId,
        ssh: &SshConfig,
        diags: &mut Diagnostics,
    ) -> Vec<ResolvedUser> {
        if ssh.enable && ssh.users.is_empty() {
            diags.error(
                Location::stage(stage).section("ssh.users"),
                ValidationError::SshUsersMissing,
            );
        }

        let mut uids: HashMap<u32, &str> = HashMap::new();
        let mut gids: HashMap<u32, &str> = HashMap::new();
        let mut resolved = Vec::new();

        for (name, spec) in &ssh.users {
            let loc = Location::stage(stage).section(format!("ssh.users.{name}"));
            let errors_before = diags.errors().count();

            if !is_valid_user_name(name) {
                diags.error(
                    loc.clone(),
                    ValidationError::InvalidUserName { user: name.clone() },
                );
            }
            if let Some(password) = &spec.password {
                let p = password.expose_secret();
                if p.is_empty() || p.contains(' ') || p.contains(',') {
                    diags.error(
                        loc.clone(),
                        ValidationError::InvalidPassword { user: name.clone() },
                    );
                }
            }

            let (uid, gid, displaces) = if name == "root" {
                self.check_root(name, spec, &loc, diags);
                (None, None, None)
            } else {
                let uid = spec.uid;
                if let Some(uid) = uid {
                    self.check_uid(name, uid, &loc, diags);
                    if let Some(other) = uids.insert(uid, name) {
                        diags.error(
                            loc.clone(),
                            ValidationError::IdentityConflict {
                                user: name.clone(),
                                reason: format!("uid {uid} is also requested by '{other}'"),
                            },
                        );
                    }
                }
                let (gid, displaces) = self.resolve_gid(name, spec, &loc, diags);
                if let Some(g) = gid {
                    if let Some(other) = gids.insert(g, name) {
                        diags.error(
                            loc.clone(),
                            ValidationError::IdentityConflict {
                                user: name.clone(),
                                reason: format!("gid {g} is also requested by '{other}'"),
                            },
                        );
                    }
                }
                (uid, gid, displaces)
            };

            let keys = self.resolve_keys(name, spec, &loc, diags);

            if diags.errors().count() > errors_before {
                continue;
            }
            let (public_key, private_key) = keys.unwrap_or((None, None));
            tracing::debug!(
                stage = %stage,
                user = %name,
                uid = ?uid,
                gid = ?gid,
                displaces = ?displaces,
                "resolved ssh user"
            );
            resolved.push(ResolvedUser {
                name: name.clone(),
                uid,
                gid,
                displaces,
                password: spec.password.clone(),
                public_key,
                private_key,
            });
        }

        resolved
    }

    fn check_root(&self, name: &str, spec: &SshUserSpec, loc: &Location, diags: &mut Diagnostics) {
        if spec.uid.is_some_and(|u| u != 0) || spec.gid.is_some_and(|g| g != 0) {
            diags.error(
                loc.clone(),
                ValidationError::IdentityConflict {
                    user: name.to_owned(),
                    reason: "root always has uid and gid 0".to_owned(),
                },
            );
        }
    }

    fn check_uid(&self, name: &str, uid: u32, loc: &Location, diags: &mut Diagnostics) {
        let reason = if uid == 0 {
            Some("uid 0 is reserved for root".to_owned())
        } else {
            self.accounts
                .user_by_uid(uid)
                .filter(|holder| holder.name != name)
                .map(|holder| format!("uid {uid} already belongs to account '{}'", holder.name))
        };
        if let Some(reason) = reason {
            diags.error(
                loc.clone(),
                ValidationError::IdentityConflict {
                    user: name.to_owned(),
                    reason,
                },
            );
        }
    }

    /// Requested gid is the explicit gid, else the uid. A system group
    /// holding it forces a fallback; any other group is displaced so the
    /// user's primary group can keep the user's name.
    fn resolve_gid(
        &self,
        name: &str,
        spec: &SshUserSpec,
        loc: &Location,
        diags: &mut Diagnostics,
    ) -> (Option<u32>, Option<String>) {
        let Some(requested) = spec.gid.or(spec.uid) else {
            return (None, None);
        };
        let Some(holder) = self
            .accounts
            .group_by_gid(requested)
            .filter(|g| g.name != name)
        else {
            return (Some(requested), None);
        };

        if holder.is_protected() {
            diags.warn(
                loc.clone(),
                ResolutionWarning::GidFallback {
                    user: name.to_owned(),
                    gid: requested,
                    group: holder.name.clone(),
                },
            );
            (None, None)
        } else {
            diags.warn(
                loc.clone(),
                ResolutionWarning::GroupDisplaced {
                    user: name.to_owned(),
                    gid: requested,
                    group: holder.name.clone(),
                },
            );
            (Some(requested), Some(holder.name.clone()))
        }
    }

    fn resolve_keys(
        &self,
        name: &str,
        spec: &SshUserSpec,
        loc: &Location,
        diags: &mut Diagnostics,
    ) -> Option<(Option<String>, Option<SecretString>)> {
        let mut ok = true;

        let public = match (&spec.pubkey_text, &spec.pubkey_file) {
            (Some(_), Some(_)) => {
                diags.error(
                    loc.clone(),
                    ValidationError::ConflictingKeySource {
                        user: name.to_owned(),
                        what: "pubkey",
                    },
                );
                ok = false;
                None
            }
            (Some(text), None) => Some(text.trim().to_owned()),
            (None, Some(path)) => match self.read_key_file(name, path, loc, diags) {
                Some(text) => Some(text.trim().to_owned()),
                None => {
                    ok = false;
                    None
                }
            },
            (None, None) => None,
        };

        let private = match (&spec.privkey_text, &spec.privkey_file) {
            (Some(_), Some(_)) => {
                diags.error(
                    loc.clone(),
                    ValidationError::ConflictingKeySource {
                        user: name.to_owned(),
                        what: "privkey",
                    },
                );
                ok = false;
                None
            }
            (Some(text), None) => Some(text.expose_secret().to_owned()),
            (None, Some(path)) => match self.read_key_file(name, path, loc, diags) {
                Some(text) => Some(text),
                None => {
                    ok = false;
                    None
                }
            },
            (None, None) => None,
        };

        if private.as_deref().is_some_and(keys::is_public_key) {
            diags.error(
                loc.clone(),
                ValidationError::PrivateKeyRequired {
                    user: name.to_owned(),
                },
            );
            return None;
        }

        if !ok {
            return None;
        }

        let public = match (public, &private) {
            (Some(public), _) => Some(public),
            (None, Some(private)) => match self.keys.derive_public(private) {
                Ok(derived) => {
                    tracing::debug!(user = %name, "derived public key from private key");
                    Some(derived)
                }
                Err(e) => {
                    diags.error(
                        loc.clone(),
                        ValidationError::KeyDerivation {
                            user: name.to_owned(),
                            reason: e.to_string(),
                        },
                    );
                    return None;
                }
            },
            (None, None) => None,
        };

        Some((public, private.map(SecretString::from)))
    }

    fn read_key_file(
        &self,
        name: &str,
        path: &Path,
        loc: &Location,
        diags: &mut Diagnostics,
    ) -> Option<String> {
        let full = self.project_dir.join(path);
        match std::fs::read_to_string(&full) {
            Ok(text) => Some(text),
            Err(e) => {
                diags.error(
                    loc.clone(),
                    ValidationError::KeyFileUnreadable {
                        user: name.to_owned(),
                        path: path.display().to_string(),
                        reason: e.to_string(),
                    },
                );
                None
            }
        }
    }
}

fn is_valid_user_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= 32
        && (first.is_ascii_lowercase() || first == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

/// Key material to write next to the setup script.
pub fn key_files(stage: StageId, users: &[ResolvedUser]) -> Vec<KeyFile> {
    let base = PathBuf::from(layout::ssh_keys_rel(stage));
    let mut files = Vec::new();
    for user in users {
        if let Some(public) = &user.public_key {
            files.push(KeyFile {
                path: base.join(&user.name).join(PUBLIC_KEY_FILE),
                content: format!("{public}\n"),
                private: false,
            });
        }
        if let Some(private) = &user.private_key {
            let mut content = private.expose_secret().to_owned();
            if !content.ends_with('\n') {
                content.push('\n');
            }
            files.push(KeyFile {
                path: base.join(&user.name).join(PRIVATE_KEY_FILE),
                content,
                private: true,
            });
        }
    }
    files
}

const SETUP_PRELUDE: &str = r#"set -euo pipefail

sw_is_system_gid() {
    [ "$1" -lt 1000 ] || [ "$1" -eq 65534 ]
}

sw_free_gid() {
    local gid=60000
    while getent group "$gid" >/dev/null; do
        gid=$((gid - 1))
    done
    echo "$gid"
}

# sw_ensure_group NAME [GID]
sw_ensure_group() {
    local name=$1 gid=${2:-} holder
    if [ -n "$gid" ]; then
        holder=$(getent group "$gid" | cut -d: -f1 || true)
        if [ -n "$holder" ] && [ "$holder" != "$name" ]; then
            if sw_is_system_gid "$gid"; then
                echo "stagewright: gid $gid belongs to system group '$holder'; '$name' gets a system-assigned gid" >&2
                gid=""
            else
                local moved
                moved=$(sw_free_gid)
                echo "stagewright: moving group '$holder' from gid $gid to $moved" >&2
                groupmod -g "$moved" "$holder"
            fi
        fi
    fi
    if getent group "$name" >/dev/null; then
        if [ -n "$gid" ] && [ "$(getent group "$name" | cut -d: -f3)" != "$gid" ]; then
            groupmod -g "$gid" "$name"
        fi
        return 0
    fi
    if [ -n "$gid" ]; then
        groupadd -g "$gid" "$name"
    else
        groupadd "$name"
    fi
}

# sw_ensure_user NAME [UID]
sw_ensure_user() {
    local name=$1 uid=${2:-} holder
    if id -u "$name" >/dev/null 2>&1; then
        usermod -g "$name" "$name"
        return 0
    fi
    local args=(--create-home --shell /bin/bash --gid "$name")
    if [ -n "$uid" ]; then
        holder=$(getent passwd "$uid" | cut -d: -f1 || true)
        if [ -n "$holder" ]; then
            echo "stagewright: uid $uid is already used by '$holder'; cannot create '$name'" >&2
            return 1
        fi
        args+=(--uid "$uid")
    fi
    useradd "${args[@]}" "$name"
}
"#;

/// Render the build-time account setup script for a stage.
pub fn render_setup_script(stage: StageId, ssh: &SshConfig, users: &[ResolvedUser]) -> String {
    let mut out = Text::new();
    out.line("#!/usr/bin/env bash");
    out.line(format!(
        "# Generated by stagewright for {stage}. Do not edit; rerun `stagewright compile`."
    ));
    out.raw(SETUP_PRELUDE);
    out.blank();
    out.line(format!(
        "SW_KEYS={}",
        shell::quote(&layout::image_ssh_keys_dir(stage))
    ));

    if ssh.enable {
        write_sshd_setup(&mut out, ssh, users);
    }

    if users.is_empty() {
        return out.finish();
    }

    // Primary groups come before the shared ssh group so an automatic gid
    // pick for the shared group can never take a requested gid.
    for user in users {
        out.blank();
        out.line(format!("# === user {} ===", user.name));
        if !user.is_root() {
            if let (Some(displaced), Some(gid)) = (&user.displaces, user.gid) {
                out.line(format!("# gid {gid} was held by '{displaced}' in the base image"));
            }
            let gid = user.gid.map(|g| format!(" {g}")).unwrap_or_default();
            out.line(format!("sw_ensure_group {}{gid}", shell::quote(&user.name)));
            let uid = user.uid.map(|u| format!(" {u}")).unwrap_or_default();
            out.line(format!("sw_ensure_user {}{uid}", shell::quote(&user.name)));
        }
        if let Some(password) = &user.password {
            let pair = format!("{}:{}", user.name, password.expose_secret());
            out.line(format!("printf '%s\\n' {} | chpasswd", shell::quote(&pair)));
        }
        if user.public_key.is_some() || user.private_key.is_some() {
            write_key_install(&mut out, user);
        }
    }

    out.blank();
    out.line("# === ssh group ===");
    out.line(format!("sw_ensure_group {SSH_GROUP}"));
    for user in users.iter().filter(|u| !u.is_root()) {
        out.line(format!("usermod -aG {SSH_GROUP} {}", shell::quote(&user.name)));
    }
    out.finish()
}

fn write_sshd_setup(out: &mut Text, ssh: &SshConfig, users: &[ResolvedUser]) {
    let config = layout::SSHD_CONFIG;
    out.blank();
    out.line("# === sshd ===");
    out.line(format!("if [ ! -f {config} ]; then"));
    out.line("    apt-get update");
    out.line(
        "    DEBIAN_FRONTEND=noninteractive apt-get install -y --no-install-recommends openssh-server",
    );
    out.line("    rm -rf /var/lib/apt/lists/*");
    out.line("fi");
    out.line("mkdir -p /run/sshd");
    out.line(format!(
        "sed -i -E 's/^#?Port .*/Port {}/' {config}",
        ssh.port
    ));
    if users.iter().any(|u| u.password.is_some()) {
        out.line(format!(
            "sed -i -E 's/^#?PasswordAuthentication .*/PasswordAuthentication yes/' {config}"
        ));
    }
    if users.iter().any(ResolvedUser::is_root) {
        out.line(format!(
            "sed -i -E 's/^#?PermitRootLogin .*/PermitRootLogin yes/' {config}"
        ));
    }
}

fn write_key_install(out: &mut Text, user: &ResolvedUser) {
    let owner = user.owner();
    let ssh_dir = format!("{}/.ssh", user.home());
    let keys_dir = format!("\"$SW_KEYS\"/{}", shell::quote(&user.name));

    out.line(format!(
        "install -d -m 700 -o {0} -g {1} {ssh_dir}",
        user.name,
        user.primary_group()
    ));
    if user.public_key.is_some() {
        out.line(format!(
            "cat {keys_dir}/{PUBLIC_KEY_FILE} >> {ssh_dir}/authorized_keys"
        ));
        out.line(format!("chown {owner} {ssh_dir}/authorized_keys"));
        out.line(format!("chmod 600 {ssh_dir}/authorized_keys"));
    }
    if user.private_key.is_some() {
        let file_name = user
            .public_key
            .as_deref()
            .map(keys::private_key_file_name)
            .unwrap_or("id_key");
        out.line(format!(
            "install -m 600 -o {0} -g {1} {keys_dir}/{PRIVATE_KEY_FILE} {ssh_dir}/{file_name}",
            user.name,
            user.primary_group()
        ));
        if let Some(public) = &user.public_key {
            out.line(format!(
                "printf '%s\\n' {} > {ssh_dir}/{file_name}.pub",
                shell::quote(public)
            ));
            out.line(format!("chown {owner} {ssh_dir}/{file_name}.pub"));
        }
    }
}
