//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod failures;
mod init;
mod judge;
mod pipeline;
mod status;
mod submit;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{load_settings_with_options, LoadOptions};
use crate::stages::StageKind;

#[derive(Parser)]
#[command(name = "printrelay")]
#[command(about = "Print job relay: source capture, highlighting, typesetting and printing")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Resolve relative paths from current working directory instead of config file location
    #[arg(long, global = true)]
    cwd: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory, stage workdirs and source tables
    Init,

    /// Store a source file as a new print job
    Submit(submit::SubmitArgs),

    /// Record a judged submission so its result ticket is printed
    Judge(judge::JudgeArgs),

    /// Make an existing job eligible for publication again
    Reprint {
        /// Job id, or submission id with --ticket
        id: i64,
        /// Reprint the result ticket of a judged submission
        #[arg(long)]
        ticket: bool,
    },

    /// Show configuration and pending job counts
    Status,

    /// Check that the external tools and the broker are reachable
    Check,

    /// Publish eligible jobs and result tickets to their first queues
    Poll {
        /// Scan once and exit
        #[arg(long)]
        once: bool,
    },

    /// Run one pipeline stage as a relay
    Relay {
        #[arg(value_enum)]
        stage: StageKind,
    },

    /// Print failure reports from the failure queue, acknowledging each
    Failures {
        /// Exit once the queue is idle for this many seconds
        #[arg(long)]
        idle_exit: Option<u64>,
    },

    /// Run the poller and every stage relay in one process
    Run,
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
        use_cwd: cli.cwd,
    };
    let (settings, config) = load_settings_with_options(options).await;

    match cli.command {
        Commands::Init => init::cmd_init(&settings, &config).await,
        Commands::Submit(args) => submit::cmd_submit(&settings, args).await,
        Commands::Judge(args) => judge::cmd_judge(&settings, args).await,
        Commands::Reprint { id, ticket } => submit::cmd_reprint(&settings, id, ticket).await,
        Commands::Status => status::cmd_status(&settings, &config).await,
        Commands::Check => status::cmd_check(&settings).await,
        Commands::Poll { once } => pipeline::cmd_poll(&settings, once).await,
        Commands::Relay { stage } => pipeline::cmd_relay(&settings, stage).await,
        Commands::Failures { idle_exit } => failures::cmd_failures(&settings, idle_exit).await,
        Commands::Run => pipeline::cmd_run(&settings).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_relay_stage() {
        let cli = Cli::try_parse_from(["printrelay", "-v", "relay", "typeset"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Commands::Relay {
                stage: StageKind::Typeset
            }
        ));
        assert!(Cli::try_parse_from(["printrelay", "relay", "bind"]).is_err());
    }

    #[test]
    fn test_parse_submit() {
        let cli = Cli::try_parse_from([
            "printrelay",
            "submit",
            "sol.cpp",
            "--printer",
            "hall-a",
            "--team",
            "Ducks",
            "--team-num",
            "2",
        ])
        .unwrap();
        match cli.command {
            Commands::Submit(args) => {
                assert_eq!(args.file, PathBuf::from("sol.cpp"));
                assert_eq!(args.printer, "hall-a");
                assert_eq!(args.team, "Ducks");
                assert_eq!(args.team_num, Some(2));
            }
            _ => panic!("expected submit"),
        }
    }

    #[test]
    fn test_parse_judge() {
        let cli = Cli::try_parse_from([
            "printrelay",
            "judge",
            "17",
            "--printer",
            "hall-a",
            "--problem",
            "B",
            "--failed-result",
            "Wrong answer",
            "--failed-test",
            "4",
        ])
        .unwrap();
        match cli.command {
            Commands::Judge(args) => {
                assert_eq!(args.id, 17);
                assert_eq!(args.problem, "B");
                assert!(!args.compile_error);
                assert_eq!(args.failed_test, Some(4));
            }
            _ => panic!("expected judge"),
        }

        // a failing test needs both halves
        assert!(Cli::try_parse_from([
            "printrelay",
            "judge",
            "17",
            "--printer",
            "hall-a",
            "--problem",
            "B",
            "--failed-test",
            "4",
        ])
        .is_err());
    }

    #[test]
    fn test_parse_ticket_reprint() {
        let cli = Cli::try_parse_from(["printrelay", "reprint", "17", "--ticket"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Reprint {
                id: 17,
                ticket: true
            }
        ));
    }
}
