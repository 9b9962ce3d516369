use crate::shell::{self, SplitError};

/// A configured hook entry, split once at compile time into the script to
/// run and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptEntry {
    pub raw: String,
    pub script_path: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptEntryError {
    #[error("entry is empty")]
    Empty,
    #[error(transparent)]
    Split(#[from] SplitError),
}

impl ScriptEntry {
    /// Parse `path/to/script.sh --flag --opt="value with spaces"`.
    pub fn parse(raw: &str) -> Result<Self, ScriptEntryError> {
        let mut words = shell::split(raw)?.into_iter();
        let script_path = words.next().ok_or(ScriptEntryError::Empty)?;
        if script_path.is_empty() {
            return Err(ScriptEntryError::Empty);
        }
        Ok(Self {
            raw: raw.to_owned(),
            script_path,
            args: words.collect(),
        })
    }

    /// Arguments re-escaped as one shell-safe token sequence.
    pub fn parameter_string(&self) -> String {
        shell::join(&self.args)
    }

    /// Whether the script path is relative to the project's installation
    /// directory (and can therefore be checked on disk at compile time).
    pub fn is_project_relative(&self) -> bool {
        !self.script_path.starts_with('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_path_from_parameters() {
        let entry =
            ScriptEntry::parse(r#"stage-1/custom/setup.sh --flag --opt="value with spaces""#)
                .unwrap();
        assert_eq!(entry.script_path, "stage-1/custom/setup.sh");
        assert_eq!(entry.args, ["--flag", "--opt=value with spaces"]);
        assert_eq!(entry.parameter_string(), "--flag '--opt=value with spaces'");
    }

    #[test]
    fn no_parameters() {
        let entry = ScriptEntry::parse("b.sh").unwrap();
        assert_eq!(entry.parameter_string(), "");
    }

    #[test]
    fn empty_entry_is_rejected() {
        assert_eq!(ScriptEntry::parse("   "), Err(ScriptEntryError::Empty));
        assert_eq!(ScriptEntry::parse("'' --x"), Err(ScriptEntryError::Empty));
    }

    #[test]
    fn unbalanced_quote_is_rejected() {
        assert_eq!(
            ScriptEntry::parse("a.sh --name='bob"),
            Err(ScriptEntryError::Split(SplitError::UnterminatedSingleQuote))
        );
    }
}
