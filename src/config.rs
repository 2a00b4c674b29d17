use crate::channel::DEFAULT_CAPACITY;
use crate::env::Variables;
use argh::FromArgs;
use std::path::PathBuf;

/// Variable overriding the interactive prompt.
pub const PROMPT_VAR: &str = "PIPESH_PROMPT";
/// Variable overriding the history file location.
pub const HISTORY_VAR: &str = "PIPESH_HISTORY";

pub const DEFAULT_PROMPT: &str = "pipesh> ";
const HISTORY_FILE: &str = ".pipesh_history";

#[derive(FromArgs, Debug, Default)]
/// A shell that runs command lines as concurrent record pipelines.
pub struct Options {
    #[argh(option, short = 'c')]
    /// run this command line and exit.
    pub command: Option<String>,

    #[argh(option)]
    /// tracing filter such as "pipesh=debug"; overrides RUST_LOG.
    pub log: Option<String>,

    #[argh(option)]
    /// number of records buffered between two pipeline stages.
    pub channel_capacity: Option<usize>,

    #[argh(switch)]
    /// neither load nor save the interactive history.
    pub no_history: bool,

    #[argh(positional)]
    /// script to run instead of reading commands interactively.
    pub script: Option<PathBuf>,
}

/// Everything the binary needs to know before it starts running commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub channel_capacity: usize,
    pub prompt: String,
    pub history: Option<PathBuf>,
}

impl Settings {
    /// Command-line flags win over shell variables, which win over defaults.
    pub fn new(options: &Options, variables: &Variables) -> Self {
        let history = if options.no_history {
            None
        } else {
            variables
                .get(HISTORY_VAR)
                .map(PathBuf::from)
                .or_else(|| variables.get("HOME").map(|home| PathBuf::from(home).join(HISTORY_FILE)))
        };
        Self {
            channel_capacity: options
                .channel_capacity
                .unwrap_or(DEFAULT_CAPACITY)
                .max(1),
            prompt: variables
                .get(PROMPT_VAR)
                .cloned()
                .unwrap_or_else(|| DEFAULT_PROMPT.to_string()),
            history,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variables(pairs: &[(&str, &str)]) -> Variables {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::new(&Options::default(), &variables(&[("HOME", "/home/me")]));
        assert_eq!(settings.channel_capacity, DEFAULT_CAPACITY);
        assert_eq!(settings.prompt, DEFAULT_PROMPT);
        assert_eq!(
            settings.history,
            Some(PathBuf::from("/home/me/.pipesh_history"))
        );
    }

    #[test]
    fn test_overrides() {
        let options = Options {
            command: Some("echo hi".to_string()),
            channel_capacity: Some(0),
            ..Options::default()
        };
        let settings = Settings::new(
            &options,
            &variables(&[
                (PROMPT_VAR, "$ "),
                (HISTORY_VAR, "/tmp/history"),
                ("HOME", "/home/me"),
            ]),
        );
        assert_eq!(settings.channel_capacity, 1);
        assert_eq!(settings.prompt, "$ ");
        assert_eq!(settings.history, Some(PathBuf::from("/tmp/history")));
    }

    #[test]
    fn test_no_history() {
        let options = Options {
            no_history: true,
            ..Options::default()
        };
        let settings = Settings::new(&options, &variables(&[("HOME", "/home/me")]));
        assert_eq!(settings.history, None);
    }

    #[test]
    fn test_parse_flags() {
        let options = Options::from_args(
            &["pipesh"],
            &["--channel-capacity", "4", "--no-history", "script.psh"],
        )
        .unwrap();
        assert_eq!(options.channel_capacity, Some(4));
        assert!(options.no_history);
        assert_eq!(options.script, Some(PathBuf::from("script.psh")));
    }
}
