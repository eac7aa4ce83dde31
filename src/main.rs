mod cli;
mod config;
mod health;
mod http;
mod logging;
mod runner;
mod signals;
mod state;

use anyhow::Result;
use clap::Parser;
use std::env;
use std::ffi::OsString;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_tracing();
    let mut args = env::args_os().collect::<Vec<_>>();
    if should_default_to_serve(&args) {
        args.insert(1, OsString::from("serve"));
    }
    let cli = cli::Cli::parse_from(args);
    cli.execute().await
}

/// `portvisor` and `portvisor --config x.toml` both mean `serve`.
fn should_default_to_serve(args: &[OsString]) -> bool {
    let mut rest = args.iter().skip(1).filter_map(|arg| arg.to_str());
    !rest.any(|arg| {
        matches!(arg, "-h" | "--help" | "-V" | "--version") || cli::Command::NAMES.contains(&arg)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    #[test]
    fn bare_invocation_serves() {
        assert!(should_default_to_serve(&args(&["portvisor"])));
        assert!(should_default_to_serve(&args(&[
            "portvisor",
            "--config",
            "workers.toml"
        ])));
    }

    #[test]
    fn explicit_commands_and_help_are_respected() {
        assert!(!should_default_to_serve(&args(&["portvisor", "status"])));
        assert!(!should_default_to_serve(&args(&[
            "portvisor",
            "--url",
            "http://127.0.0.1:7000",
            "toggle-all"
        ])));
        assert!(!should_default_to_serve(&args(&["portvisor", "--help"])));
        assert!(!should_default_to_serve(&args(&["portvisor", "-V"])));
    }
}
