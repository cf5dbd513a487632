use crate::dispatch::CommandInvocation;
use crate::types::ExecContext;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Separator between commands given to `run`
pub const COMMAND_SEPARATOR: &str = ";";

/// bootinit - boot command engine for a device init process
#[derive(Parser)]
#[command(name = "bootinit")]
#[command(about = "Runs init builtin commands against a simulated device")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List registered builtins with their argument bounds
    List,
    /// Validate a single invocation without running it
    Check {
        /// Check as if running in a restricted subcontext
        #[arg(long)]
        subcontext: bool,
        /// Command name followed by its arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        words: Vec<String>,
    },
    /// Validate a device profile
    Validate {
        /// Path to the JSON device profile
        profile: PathBuf,
    },
    /// Run commands through the boot sequencer on a simulated device
    Run {
        /// Path to the JSON device profile
        #[arg(short, long)]
        profile: Option<PathBuf>,
        /// Run every command in a restricted subcontext
        #[arg(long)]
        subcontext: bool,
        /// Commands separated by ';', e.g. `mount_all /fstab ; class_start main`
        #[arg(last = true)]
        commands: Vec<String>,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}

fn context(subcontext: bool) -> ExecContext {
    if subcontext {
        ExecContext::Subcontext
    } else {
        ExecContext::Init
    }
}

/// Split a word list on `;` into invocations. Empty segments are dropped.
pub fn split_commands(words: &[String], subcontext: bool) -> Vec<CommandInvocation> {
    words
        .split(|w| w == COMMAND_SEPARATOR)
        .filter(|segment| !segment.is_empty())
        .map(|segment| CommandInvocation::new(segment.to_vec(), context(subcontext)))
        .collect()
}

/// Build one invocation from `check` arguments
pub fn single_command(words: &[String], subcontext: bool) -> CommandInvocation {
    CommandInvocation::new(words.to_vec(), context(subcontext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_list() {
        let cli = Cli::try_parse_from(["bootinit", "list"]).unwrap();
        assert!(matches!(cli.command, Commands::List));
    }

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["bootinit"]).is_err());
    }

    #[test]
    fn test_cli_check_keeps_flag_like_arguments() {
        let cli =
            Cli::try_parse_from(["bootinit", "check", "mount_all", "/fstab", "--late"]).unwrap();
        match cli.command {
            Commands::Check { words, subcontext } => {
                assert!(!subcontext);
                assert_eq!(words, ["mount_all", "/fstab", "--late"]);
            }
            _ => panic!("Expected Check command"),
        }
    }

    #[test]
    fn test_cli_run_with_commands() {
        let cli = Cli::try_parse_from([
            "bootinit",
            "run",
            "--profile",
            "/tmp/device.json",
            "--subcontext",
            "--",
            "mount_all",
            "/fstab",
            "--early",
            ";",
            "trigger",
            "fs",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                profile,
                subcontext,
                commands,
            } => {
                assert_eq!(profile.unwrap().to_str().unwrap(), "/tmp/device.json");
                assert!(subcontext);
                let invocations = split_commands(&commands, subcontext);
                assert_eq!(invocations.len(), 2);
                assert_eq!(invocations[0].args, ["mount_all", "/fstab", "--early"]);
                assert_eq!(invocations[1].context, ExecContext::Subcontext);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_split_drops_empty_segments() {
        let words: Vec<String> = [";", "trigger", "boot", ";", ";"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let invocations = split_commands(&words, false);
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].name(), "trigger");
    }
}
