use crate::config::RunnerConfigOverrides;
use anyhow::{anyhow, bail, Result};
use std::env;
use std::path::PathBuf;

/// Flags accepted by the `command_harness` binary.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HarnessArgs {
    pub fixture: Option<PathBuf>,
    pub golden: Option<PathBuf>,
    pub write_output: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub help: bool,
    store: Option<String>,
    verbose: Option<bool>,
    show_hidden: Option<bool>,
}

impl HarnessArgs {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args())
    }

    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = HarnessArgs::default();
        let mut iter = args.into_iter();
        let _ = iter.next(); // skip program name if present
        while let Some(raw_flag) = iter.next() {
            let flag = raw_flag.as_ref();
            if flag == "--help" || flag == "-h" {
                parsed.help = true;
                continue;
            }
            if !flag.starts_with('-') {
                bail!("Unexpected argument '{flag}'. Run with --help for usage.");
            }
            let mut value = || -> Result<String> {
                Ok(iter.next().ok_or_else(|| anyhow!("Expected a value after '{flag}'"))?.as_ref().to_string())
            };
            match flag {
                "--fixture" | "-f" => parsed.fixture = Some(PathBuf::from(value()?)),
                "--golden" | "-g" => parsed.golden = Some(PathBuf::from(value()?)),
                "--write-output" | "-o" => parsed.write_output = Some(PathBuf::from(value()?)),
                "--config" | "-c" => parsed.config = Some(PathBuf::from(value()?)),
                "--store" => parsed.store = Some(value()?),
                "--verbose" => parsed.verbose = Some(parse_bool_flag("verbose", &value()?)?),
                "--show-hidden" => parsed.show_hidden = Some(parse_bool_flag("show-hidden", &value()?)?),
                _ => bail!(
                    "Unknown flag '{flag}'. Supported flags: --fixture, --golden, --write-output, --config, \
                     --store, --verbose, --show-hidden."
                ),
            }
        }
        Ok(parsed)
    }

    pub fn config_overrides(&self) -> RunnerConfigOverrides {
        RunnerConfigOverrides { store: self.store.clone(), show_hidden: self.show_hidden, verbose: self.verbose }
    }

    pub fn usage() -> &'static str {
        "Usage: command_harness --fixture <path> [--golden <path>] [--write-output <path>]\n\
         \x20 -f, --fixture        Path to a harness fixture JSON file\n\
         \x20 -g, --golden         Optional golden output file to compare against\n\
         \x20 -o, --write-output   Optional path to write the actual output JSON\n\
         \x20 -c, --config         Runner config JSON (defaults apply when absent)\n\
         \x20     --store          Store to run against instead of the configured default\n\
         \x20     --verbose        on/off, enables debug logging\n\
         \x20     --show-hidden    on/off, also discovers hidden commands"
    }
}

fn parse_bool_flag(flag: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => bail!("Invalid {flag} value '{other}'. Use on/off or true/false."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_paths_and_overrides() {
        let args = [
            "harness",
            "--fixture",
            "fixtures/adjust.json",
            "-g",
            "golden.json",
            "--store",
            "Editor",
            "--show-hidden",
            "yes",
        ];
        let parsed = HarnessArgs::parse(args).expect("parse args");
        assert_eq!(parsed.fixture, Some(PathBuf::from("fixtures/adjust.json")));
        assert_eq!(parsed.golden, Some(PathBuf::from("golden.json")));
        let overrides = parsed.config_overrides();
        assert_eq!(overrides.store.as_deref(), Some("Editor"));
        assert_eq!(overrides.show_hidden, Some(true));
        assert_eq!(overrides.applied_fields(), vec!["store", "show_hidden"]);
    }

    #[test]
    fn latest_flag_wins() {
        let args = ["harness", "--verbose", "on", "--verbose", "off", "--store", "A", "--store", "B"];
        let overrides = HarnessArgs::parse(args).expect("parse args").config_overrides();
        assert_eq!(overrides.verbose, Some(false));
        assert_eq!(overrides.store.as_deref(), Some("B"));
    }

    #[test]
    fn missing_value_errors() {
        let err = HarnessArgs::parse(["harness", "--fixture"]).unwrap_err();
        assert!(err.to_string().contains("Expected a value"), "error should mention missing value");
    }

    #[test]
    fn rejects_unknown_flags_and_bad_bools() {
        let err = HarnessArgs::parse(["harness", "--foo", "bar"]).unwrap_err();
        assert!(err.to_string().contains("Unknown flag"), "unknown flags should error");
        let err = HarnessArgs::parse(["harness", "--verbose", "maybe"]).unwrap_err();
        assert!(err.to_string().contains("Invalid verbose value"));
    }

    #[test]
    fn help_needs_no_value() {
        let parsed = HarnessArgs::parse(["harness", "--help"]).expect("parse args");
        assert!(parsed.help);
        assert!(parsed.config_overrides().is_empty());
    }
}
