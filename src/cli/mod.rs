use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::{config::WorkerId, http::DEFAULT_CONTROL_URL};

mod handlers;

#[derive(Parser, Debug)]
#[command(
    name = "portvisor",
    version,
    about = "Supervisor for port-bound worker processes"
)]
pub struct Cli {
    /// Base URL of a running control plane (client commands only)
    #[arg(long, global = true, default_value = DEFAULT_CONTROL_URL)]
    pub url: String,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Command::Serve(args) => handlers::serve(args).await,
            Command::Status => handlers::status(&self.url).await,
            Command::Workers => handlers::workers(&self.url).await,
            Command::Toggle(args) => handlers::toggle(&self.url, args).await,
            Command::Restart(args) => handlers::restart(&self.url, args).await,
            Command::ToggleAll => handlers::toggle_all(&self.url).await,
            Command::StopAll => handlers::stop_all(&self.url).await,
            Command::Completions(args) => handlers::completions(args),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Supervise the configured workers and serve the dashboard (default)
    Serve(ServeArgs),
    /// Print the liveness of every worker
    Status,
    /// Print per-worker supervision details
    Workers,
    /// Start a stopped worker or stop a running one
    Toggle(WorkerArgs),
    /// Stop a worker and start it again
    Restart(WorkerArgs),
    /// Stop everything if anything runs, otherwise start everything
    ToggleAll,
    /// Stop every worker
    StopAll,
    /// Generate shell completions
    Completions(CompletionsArgs),
}

impl Command {
    pub const NAMES: &'static [&'static str] = &[
        "serve",
        "status",
        "workers",
        "toggle",
        "restart",
        "toggle-all",
        "stop-all",
        "completions",
        "help",
    ];
}

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Configuration file (defaults to ./portvisor.toml, then built-in workers)
    #[arg(long, short = 'c', value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct WorkerArgs {
    /// Worker id
    pub id: WorkerId,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn subcommand_names_match_known_list() {
        let cmd = Cli::command();
        for sub in cmd.get_subcommands() {
            assert!(
                Command::NAMES.contains(&sub.get_name()),
                "missing {}",
                sub.get_name()
            );
        }
    }

    #[test]
    fn parses_worker_commands_with_url() {
        let cli = Cli::parse_from(["portvisor", "--url", "http://10.0.0.5:6004", "toggle", "2"]);
        assert_eq!(cli.url, "http://10.0.0.5:6004");
        assert!(matches!(cli.command, Command::Toggle(WorkerArgs { id: 2 })));

        let cli = Cli::parse_from(["portvisor", "toggle-all"]);
        assert_eq!(cli.url, DEFAULT_CONTROL_URL);
        assert!(matches!(cli.command, Command::ToggleAll));
    }

    #[test]
    fn serve_accepts_config_path() {
        let cli = Cli::parse_from(["portvisor", "serve", "--config", "/etc/portvisor.toml"]);
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.config, Some(PathBuf::from("/etc/portvisor.toml")));
    }
}
