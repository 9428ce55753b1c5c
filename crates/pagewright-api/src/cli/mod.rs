//! CLI command definitions for the `pagewright` binary.
//!
//! Uses clap derive macros for argument parsing. Commands are grouped by
//! noun (`pagewright project create`, `pagewright build status`).

pub mod build;
pub mod project;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Build landing pages with an advisor-guided agent.
#[derive(Parser)]
#[command(name = "pagewright", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for info, -vv for debug, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the REST API server.
    Serve {
        /// Port to listen on.
        #[arg(long, short, default_value = "3000", env = "PAGEWRIGHT_PORT")]
        port: u16,

        /// Host to bind to.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },

    /// Manage projects.
    Project {
        #[command(subcommand)]
        action: ProjectCommand,
    },

    /// Inspect and drive build sessions.
    Build {
        #[command(subcommand)]
        action: BuildCommand,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum ProjectCommand {
    /// Create a new project (prompts for missing fields).
    Create {
        /// Product or page name.
        #[arg(long)]
        name: Option<String>,

        /// Short product description handed to the agent.
        #[arg(long)]
        description: Option<String>,
    },

    /// List projects.
    #[command(alias = "ls")]
    List {
        /// Sort by creation time: asc or desc.
        #[arg(long, default_value = "desc")]
        order: String,

        /// Maximum number of projects to show.
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Show a project and its build progress.
    Show {
        /// Project id.
        id: String,
    },
}

#[derive(Subcommand)]
pub enum BuildCommand {
    /// Show stage progress and the next signal.
    Status {
        /// Project id.
        id: String,
    },

    /// Print the persisted build conversation.
    History {
        /// Project id.
        id: String,
    },

    /// Delete the build session and its history.
    Reset {
        /// Project id.
        id: String,

        /// Skip the confirmation prompt.
        #[arg(long)]
        force: bool,
    },

    /// Run one build turn locally and print the streamed events.
    ///
    /// With `--mode`, selects the build mode. With a message, sends it as a
    /// user turn. Otherwise continues, optionally jumping to `--step`.
    Send {
        /// Project id.
        id: String,

        /// Free-form message to the agent.
        message: Option<String>,

        /// Select the build mode (interactive or autonomous).
        #[arg(long, conflicts_with = "message")]
        mode: Option<String>,

        /// Resume at an explicit stage.
        #[arg(long, conflicts_with_all = ["message", "mode"])]
        step: Option<usize>,

        /// Section within the copy stage (requires --step).
        #[arg(long, requires = "step")]
        substep: Option<usize>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        <Cli as clap::CommandFactory>::command().debug_assert();
    }

    #[test]
    fn test_send_flags_conflict() {
        let parsed = Cli::try_parse_from(["pagewright", "build", "send", "abc", "hi", "--mode", "autonomous"]);
        assert!(parsed.is_err());

        let parsed =
            Cli::try_parse_from(["pagewright", "build", "send", "abc", "--step", "6"]).unwrap();
        match parsed.command {
            Commands::Build {
                action: BuildCommand::Send { step, substep, .. },
            } => {
                assert_eq!(step, Some(6));
                assert_eq!(substep, None);
            }
            _ => panic!("expected build send"),
        }
    }
}
