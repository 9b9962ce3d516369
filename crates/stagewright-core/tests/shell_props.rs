use proptest::prelude::*;
use stagewright_core::env::{EnvSnapshot, substitute};
use stagewright_core::{ScriptEntry, shell};

proptest! {
    // Quoting then splitting gives back the original argument boundaries.
    #[test]
    fn join_then_split_preserves_arguments(args in prop::collection::vec(".*", 0..6)) {
        let line = shell::join(&args);
        prop_assert_eq!(shell::split(&line).unwrap(), args);
    }

    #[test]
    fn entry_round_trips_through_parameter_string(
        script in "[a-z0-9_/.-]{1,20}",
        args in prop::collection::vec("[ -~]{0,12}", 0..5),
    ) {
        let raw = format!("{} {}", shell::quote(&script), shell::join(&args));
        let entry = ScriptEntry::parse(&raw).unwrap();
        prop_assert_eq!(&entry.script_path, &script);
        prop_assert_eq!(&entry.args, &args);

        let rerendered = format!("{} {}", shell::quote(&entry.script_path), entry.parameter_string());
        let reparsed = ScriptEntry::parse(&rerendered).unwrap();
        prop_assert_eq!(reparsed.args, args);
    }

    // Text without `${` is never altered.
    #[test]
    fn substitution_ignores_plain_text(text in "[^$]*") {
        let env: EnvSnapshot = [("A", "1")].into_iter().collect();
        prop_assert_eq!(substitute(&text, &env), text.as_str());
    }

    #[test]
    fn default_applies_only_when_unset(value in "[a-z0-9]{0,8}", default in "[a-z0-9]{0,8}") {
        let token = format!("${{VAR:-{default}}}");
        prop_assert_eq!(substitute(&token, &EnvSnapshot::new()), default.as_str());
        let env: EnvSnapshot = [("VAR", value.as_str())].into_iter().collect();
        prop_assert_eq!(substitute(&token, &env), value.as_str());
    }
}
