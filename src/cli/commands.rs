//! CLI command definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{CliParams, TargetParams};

/// aci-deploy - Container instance deployment reconciler.
#[derive(Parser, Debug)]
#[command(name = "aci-deploy")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the environment file (defaults to `.env` when present).
    #[arg(short, long, global = true, env = "ACI_DEPLOY_ENV_FILE")]
    pub env_file: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Log format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build, push and (re)create the container instance.
    Deploy {
        /// Deployment parameters.
        #[command(flatten)]
        params: Box<CliParams>,
    },

    /// Show what `deploy` would do without changing anything.
    Plan {
        /// Deployment parameters.
        #[command(flatten)]
        params: Box<CliParams>,
    },

    /// Operate on the deployed instance.
    Manage {
        /// Resource names.
        #[command(flatten)]
        target: TargetParams,

        /// Management subcommand.
        #[command(subcommand)]
        command: ManageCommands,
    },

    /// Delete the instance, optionally the registry, then the group if empty.
    Cleanup {
        /// Resource names.
        #[command(flatten)]
        target: TargetParams,

        /// Also delete the container registry.
        #[arg(long)]
        include_registry: bool,

        /// Never delete the resource group.
        #[arg(long)]
        keep_group: bool,

        /// Skip the confirmation prompt.
        #[arg(short, long)]
        force: bool,
    },

    /// Fetch a bearer token for the deployed server.
    Token {
        /// Print the full token instead of a masked one.
        #[arg(long)]
        show: bool,
    },

    /// Probe the deployed server's endpoints.
    Verify {
        /// Resource names, used to find the server when `--url` is absent.
        #[command(flatten)]
        target: TargetParams,

        /// Base URL of the server.
        #[arg(long)]
        url: Option<String>,

        /// Do not fetch a token; only `/health` is checked.
        #[arg(long)]
        no_auth: bool,
    },
}

/// Instance management subcommands.
#[derive(Subcommand, Debug)]
pub enum ManageCommands {
    /// Show run state, image, address and exit code.
    Status,

    /// Show container logs.
    Logs {
        /// Follow log output until interrupted.
        #[arg(short, long)]
        follow: bool,

        /// Number of most recent lines to show.
        #[arg(long)]
        tail: Option<usize>,
    },

    /// Restart the instance.
    Restart,

    /// Stop the instance.
    Stop,

    /// Start a stopped instance.
    Start,

    /// Delete the instance.
    Delete {
        /// Skip the confirmation prompt.
        #[arg(short, long)]
        force: bool,

        /// Also delete the resource group if nothing else remains in it.
        #[arg(long)]
        delete_group: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// Log format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable log lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_deploy() {
        let cli = Cli::try_parse_from([
            "aci-deploy",
            "deploy",
            "-r",
            "myregistry",
            "-n",
            "svc1",
            "--port",
            "8000",
            "--skip-build",
            "--use-key-vault",
        ])
        .expect("valid arguments");

        let Commands::Deploy { params } = cli.command else {
            panic!("expected deploy");
        };
        assert_eq!(params.target.registry.as_deref(), Some("myregistry"));
        assert_eq!(params.target.instance.as_deref(), Some("svc1"));
        assert_eq!(params.ports, vec!["8000"]);
        assert!(params.skip_build);
        assert!(params.use_key_vault);
    }

    #[test]
    fn test_parse_manage_logs() {
        let cli = Cli::try_parse_from([
            "aci-deploy",
            "--output",
            "json",
            "manage",
            "-g",
            "rg1",
            "logs",
            "--follow",
            "--tail",
            "50",
        ])
        .expect("valid arguments");

        assert_eq!(cli.output, OutputFormat::Json);
        let Commands::Manage { target, command } = cli.command else {
            panic!("expected manage");
        };
        assert_eq!(target.resource_group.as_deref(), Some("rg1"));
        assert!(matches!(
            command,
            ManageCommands::Logs {
                follow: true,
                tail: Some(50)
            }
        ));
    }

    #[test]
    fn test_parse_cleanup_flags() {
        let cli = Cli::try_parse_from([
            "aci-deploy",
            "cleanup",
            "--include-registry",
            "--keep-group",
            "--force",
        ])
        .expect("valid arguments");

        assert!(matches!(
            cli.command,
            Commands::Cleanup {
                include_registry: true,
                keep_group: true,
                force: true,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["aci-deploy", "manage", "explode"]).is_err());
    }
}
