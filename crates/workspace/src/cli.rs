use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Log format options
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format
    Text,
    /// JSON structured format
    Json,
}

/// Workspace CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create a .workspace.yml in the current directory
    Init {
        /// Explicit workspace name (defaults to the directory name)
        name: Option<String>,
        /// Overwrite an existing .workspace.yml
        #[arg(short = 'f', long)]
        force: bool,
    },

    /// Build the shared workspace image
    Build {
        /// Build without using the docker cache
        #[arg(long)]
        no_cache: bool,
    },

    /// Provision and start a workspace container
    Start {
        /// Workspace name
        workspace: String,
        /// Rebuild the shared image before starting
        #[arg(long)]
        rebuild: bool,
        /// Rebuild without using the docker cache (implies --rebuild)
        #[arg(long)]
        no_cache: bool,
        /// Remove and recreate an existing container
        #[arg(long)]
        force_recreate: bool,
        /// Skip the in-container initialization step
        #[arg(long)]
        no_init: bool,
        /// Directory to resolve the project config from (defaults to CWD)
        #[arg(long, value_name = "PATH")]
        path: Option<PathBuf>,
    },

    /// Stop a running workspace container
    Stop {
        /// Workspace name
        workspace: String,
    },

    /// Remove workspace containers, volumes, and state
    Destroy {
        /// Workspace names
        #[arg(required = true)]
        workspaces: Vec<String>,
        /// Keep the named volumes (home, docker, cache)
        #[arg(long)]
        keep_volumes: bool,
        /// Skip the confirmation prompt
        #[arg(short = 'f', long)]
        force: bool,
    },

    /// Show container status, ports, and repository of a workspace
    Status {
        /// Workspace name
        workspace: String,
    },

    /// Show connection details for a workspace
    Info {
        /// Workspace name
        workspace: String,
    },

    /// Open a shell (or run a command) inside a workspace
    Shell {
        /// Workspace name
        workspace: String,
        /// Command to run instead of an interactive shell
        #[arg(short = 'c', value_name = "CMD")]
        command: Option<String>,
        /// User to run as
        #[arg(short = 'u', long, value_name = "USER")]
        user: Option<String>,
        /// Shorthand for --user root
        #[arg(long, conflicts_with = "user")]
        root: bool,
    },

    /// Forward the configured ports over SSH (blocks until interrupted)
    Proxy {
        /// Workspace name
        workspace: String,
    },

    /// Show container logs
    Logs {
        /// Workspace name
        workspace: String,
        /// Number of trailing lines
        #[arg(long, default_value_t = 200)]
        tail: u32,
        /// Follow the log stream
        #[arg(short = 'f', long)]
        follow: bool,
    },

    /// List known workspaces
    List {
        /// Only list workspaces whose project lives under PATH
        #[arg(long, value_name = "PATH")]
        path: Option<PathBuf>,
    },

    /// Print the resolved configuration of a workspace
    Config {
        /// Workspace name
        workspace: String,
    },

    /// Check the host environment for required tooling
    Doctor,

    /// Inspect or manage the shared BuildKit infrastructure
    Buildkit {
        /// Show the state of the network, volume, and daemon
        #[arg(long)]
        status: bool,
        /// Stop the buildkitd daemon
        #[arg(long)]
        stop: bool,
        /// Restart the buildkitd daemon
        #[arg(long)]
        restart: bool,
        /// Remove daemon, network, and cache volume
        #[arg(long)]
        clean: bool,
    },
}

#[derive(Parser, Debug)]
#[command(
    name = "workspace",
    version,
    about = "Containerized dev workspace orchestrator",
    long_about = "Containerized dev workspace orchestrator\n\n\
        Provisions per-project privileged containers running Docker-in-Docker\n\
        and an SSH daemon, with a prepared `workspace` user mirroring the host\n\
        invoker."
)]
pub struct Cli {
    /// Log format (text or json, also via WORKSPACE_LOG_FORMAT)
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Verbose logging (debug level)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Initialize logging and execute the selected subcommand.
    pub async fn dispatch(self) -> Result<()> {
        if self.verbose
            && std::env::var_os("WORKSPACE_LOG").is_none()
            && std::env::var_os("RUST_LOG").is_none()
        {
            std::env::set_var("RUST_LOG", "workspace=debug,workspace_core=debug");
        }
        let log_format = match self.log_format {
            Some(LogFormat::Text) => Some("text"),
            Some(LogFormat::Json) => Some("json"),
            None => None,
        };
        workspace_core::logging::init(log_format)?;

        match self.command {
            Some(Commands::Init { name, force }) => commands::init::execute(name, force).await,
            Some(Commands::Build { no_cache }) => commands::build::execute(no_cache).await,
            Some(Commands::Start {
                workspace,
                rebuild,
                no_cache,
                force_recreate,
                no_init,
                path,
            }) => {
                let args = commands::start::StartArgs {
                    workspace,
                    rebuild: rebuild || no_cache,
                    no_cache,
                    force_recreate,
                    no_init,
                    path,
                };
                commands::start::execute(args).await
            }
            Some(Commands::Stop { workspace }) => commands::stop::execute(&workspace).await,
            Some(Commands::Destroy {
                workspaces,
                keep_volumes,
                force,
            }) => commands::destroy::execute(&workspaces, keep_volumes, force).await,
            Some(Commands::Status { workspace }) => {
                commands::status::execute(&workspace, false).await
            }
            Some(Commands::Info { workspace }) => commands::status::execute(&workspace, true).await,
            Some(Commands::Shell {
                workspace,
                command,
                user,
                root,
            }) => {
                let user = if root { Some("root".to_string()) } else { user };
                commands::shell::execute(&workspace, command.as_deref(), user.as_deref()).await
            }
            Some(Commands::Proxy { workspace }) => commands::proxy::execute(&workspace).await,
            Some(Commands::Logs {
                workspace,
                tail,
                follow,
            }) => commands::logs::execute(&workspace, tail, follow).await,
            Some(Commands::List { path }) => commands::list::execute(path.as_deref()).await,
            Some(Commands::Config { workspace }) => commands::config::execute(&workspace).await,
            Some(Commands::Doctor) => commands::doctor::execute().await,
            Some(Commands::Buildkit {
                status,
                stop,
                restart,
                clean,
            }) => {
                let action = commands::buildkit::Action::from_flags(status, stop, restart, clean)?;
                commands::buildkit::execute(action).await
            }
            None => {
                println!("Containerized dev workspace orchestrator");
                println!("Run 'workspace --help' to see available commands.");
                Ok(())
            }
        }
    }
}

use crate::commands;

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parses_start_with_flags() {
        let cli = Cli::parse_from([
            "workspace",
            "start",
            "api",
            "--force-recreate",
            "--no-init",
            "--path",
            "/tmp/proj",
        ]);
        match cli.command {
            Some(Commands::Start {
                workspace,
                force_recreate,
                no_init,
                path,
                rebuild,
                no_cache,
            }) => {
                assert_eq!(workspace, "api");
                assert!(force_recreate);
                assert!(no_init);
                assert!(!rebuild);
                assert!(!no_cache);
                assert_eq!(path, Some(PathBuf::from("/tmp/proj")));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn destroy_requires_at_least_one_name() {
        assert!(Cli::try_parse_from(["workspace", "destroy"]).is_err());
        assert!(Cli::try_parse_from(["workspace", "destroy", "api", "web"]).is_ok());
    }

    #[test]
    fn logs_tail_defaults_to_200() {
        let cli = Cli::parse_from(["workspace", "logs", "api"]);
        match cli.command {
            Some(Commands::Logs { tail, follow, .. }) => {
                assert_eq!(tail, 200);
                assert!(!follow);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn shell_root_conflicts_with_user() {
        assert!(
            Cli::try_parse_from(["workspace", "shell", "api", "--root", "-u", "dev"]).is_err()
        );
        assert!(Cli::try_parse_from(["workspace", "shell", "api", "--root"]).is_ok());
    }

    #[test]
    fn verbose_is_global() {
        let cli = Cli::parse_from(["workspace", "-v", "status", "api"]);
        assert!(cli.verbose);
    }
}
