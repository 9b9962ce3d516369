//! `${VAR}` / `${VAR:-default}` substitution against an explicit snapshot.
//!
//! The snapshot is always passed in; nothing here reads the process
//! environment, so the same document and snapshot give the same result.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

// Allow expect here as the regex is compile-time verified to be valid
#[allow(clippy::expect_used)]
static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(:-([^}]*))?\}").expect("constant regex pattern is valid")
});

/// Name → value mapping used for substitution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    vars: BTreeMap<String, String>,
}

impl EnvSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Layer `other` on top of `self`; entries in `other` win.
    pub fn overlay(mut self, other: EnvSnapshot) -> Self {
        self.vars.extend(other.vars);
        self
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnvSnapshot {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Substitute every well-formed token in `input`.
///
/// A set variable wins even when empty; otherwise the default clause is used;
/// otherwise the token is kept verbatim. Partial tokens such as `${FOO` or
/// `$FOO` never match and pass through untouched.
pub fn substitute<'a>(input: &'a str, env: &EnvSnapshot) -> Cow<'a, str> {
    TOKEN.replace_all(input, |caps: &Captures| {
        let name = &caps[1];
        match (env.get(name), caps.get(3)) {
            (Some(value), _) => value.to_owned(),
            (None, Some(default)) => default.as_str().to_owned(),
            (None, None) => {
                tracing::debug!(var = name, "unresolved variable left in place");
                caps[0].to_owned()
            }
        }
    })
}

/// Apply [`substitute`] to every string leaf of a parsed document.
///
/// Mapping keys are left alone. Substituted leaves stay strings; numeric and
/// boolean config fields accept string values.
pub fn substitute_value(value: &mut serde_yaml::Value, env: &EnvSnapshot) {
    use serde_yaml::Value;

    match value {
        Value::String(s) => {
            let replaced = match substitute(s, env) {
                Cow::Borrowed(_) => return,
                Cow::Owned(r) => r,
            };
            *s = replaced;
        }
        Value::Sequence(items) => {
            for item in items {
                substitute_value(item, env);
            }
        }
        Value::Mapping(map) => {
            for (_, v) in map.iter_mut() {
                substitute_value(v, env);
            }
        }
        Value::Tagged(tagged) => substitute_value(&mut tagged.value, env),
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(pairs: &[(&str, &str)]) -> EnvSnapshot {
        pairs.iter().copied().collect()
    }

    #[test]
    fn default_used_when_unset() {
        assert_eq!(substitute("${PORT:-8080}", &EnvSnapshot::new()), "8080");
    }

    #[test]
    fn set_value_beats_default() {
        let env = snapshot(&[("PORT", "9090")]);
        assert_eq!(substitute("${PORT:-8080}", &env), "9090");
    }

    #[test]
    fn empty_value_still_counts_as_set() {
        let env = snapshot(&[("TAG", "")]);
        assert_eq!(substitute("img:${TAG:-latest}", &env), "img:");
    }

    #[test]
    fn unresolved_token_is_kept() {
        assert_eq!(
            substitute("a ${MISSING} b", &EnvSnapshot::new()),
            "a ${MISSING} b"
        );
    }

    #[test]
    fn partial_tokens_pass_through() {
        let env = snapshot(&[("FOO", "x")]);
        for input in ["${FOO", "$FOO", "${}", "${ FOO}", "${1ABC}", "$"] {
            assert_eq!(substitute(input, &env), input);
        }
    }

    #[test]
    fn empty_default_clause() {
        assert_eq!(substitute("[${X:-}]", &EnvSnapshot::new()), "[]");
    }

    #[test]
    fn substituted_leaf_stays_a_string() {
        let mut value: serde_yaml::Value =
            serde_yaml::from_str("uid: ${UID:-1100}\nmirror: ${M:-163}").unwrap();
        substitute_value(&mut value, &EnvSnapshot::new());
        assert_eq!(value["uid"].as_str(), Some("1100"));
        assert_eq!(value["mirror"].as_str(), Some("163"));
    }

    #[test]
    fn untouched_numeric_looking_strings_stay_strings() {
        let mut value: serde_yaml::Value = serde_yaml::from_str("port: '22'").unwrap();
        substitute_value(&mut value, &EnvSnapshot::new());
        assert_eq!(value["port"].as_str(), Some("22"));
    }

    #[test]
    fn keys_are_not_substituted() {
        let env = snapshot(&[("K", "v")]);
        let mut value: serde_yaml::Value = serde_yaml::from_str("'${K}': ${K}").unwrap();
        substitute_value(&mut value, &env);
        assert_eq!(value["${K}"].as_str(), Some("v"));
    }

    #[test]
    fn overlay_prefers_later_snapshot() {
        let base = snapshot(&[("A", "1"), ("B", "1")]);
        let merged = base.overlay(snapshot(&[("B", "2")]));
        assert_eq!(merged.get("A"), Some("1"));
        assert_eq!(merged.get("B"), Some("2"));
    }
}
