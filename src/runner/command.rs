use std::{collections::BTreeMap, path::PathBuf, process::Stdio};

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;

use crate::config::WorkerConfig;

/// Fully rendered program invocation for one worker slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LaunchSpec {
    pub(crate) program: String,
    pub(crate) args: Vec<String>,
    pub(crate) env: BTreeMap<String, String>,
    pub(crate) cwd: Option<PathBuf>,
}

impl LaunchSpec {
    pub(crate) fn for_worker(worker: &WorkerConfig) -> Self {
        let args = worker
            .args
            .iter()
            .map(|arg| interpolate_placeholders(arg, worker))
            .collect();

        let mut env = BTreeMap::new();
        for (key, value) in &worker.env {
            env.insert(key.clone(), interpolate_placeholders(value, worker));
        }
        env.insert("PORT".to_string(), worker.port.to_string());
        env.insert("WORKER_ID".to_string(), worker.id.to_string());
        env.insert("WORKER_PORT".to_string(), worker.port.to_string());

        Self {
            program: interpolate_placeholders(&worker.command, worker),
            args,
            env,
            cwd: worker.cwd.clone(),
        }
    }

    pub(crate) fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Output is piped for forwarding; stdin is closed.
    pub(crate) fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command.envs(&self.env);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command
    }
}

fn interpolate_placeholders(input: &str, worker: &WorkerConfig) -> String {
    static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"\$\{([A-Za-z_]+)\}|\{([A-Za-z_]+)\}").expect("valid placeholder regex")
    });

    PLACEHOLDER
        .replace_all(input, |captures: &regex::Captures<'_>| {
            let name = captures
                .get(1)
                .or_else(|| captures.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            match name {
                "id" => worker.id.to_string(),
                "port" => worker.port.to_string(),
                _ => captures[0].to_string(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker() -> WorkerConfig {
        WorkerConfig {
            id: 2,
            port: 6002,
            command: "node".to_string(),
            args: vec!["server{id}.js".to_string(), "--port=${port}".to_string()],
            env: BTreeMap::from([
                ("BANNER".to_string(), "worker {id} on {port}".to_string()),
                ("LITERAL".to_string(), "{unknown} stays".to_string()),
            ]),
            cwd: Some(PathBuf::from("/srv/workers")),
            autostart: true,
        }
    }

    #[test]
    fn renders_placeholders_in_args_and_env() {
        let spec = LaunchSpec::for_worker(&worker());

        assert_eq!(spec.program, "node");
        assert_eq!(spec.args, vec!["server2.js", "--port=6002"]);
        assert_eq!(
            spec.env.get("BANNER").map(String::as_str),
            Some("worker 2 on 6002")
        );
        assert_eq!(
            spec.env.get("LITERAL").map(String::as_str),
            Some("{unknown} stays")
        );
        assert_eq!(spec.cwd, Some(PathBuf::from("/srv/workers")));
    }

    #[test]
    fn injects_slot_environment() {
        let spec = LaunchSpec::for_worker(&worker());
        assert_eq!(spec.env.get("PORT").map(String::as_str), Some("6002"));
        assert_eq!(spec.env.get("WORKER_ID").map(String::as_str), Some("2"));
        assert_eq!(
            spec.env.get("WORKER_PORT").map(String::as_str),
            Some("6002")
        );
    }

    #[test]
    fn command_line_joins_program_and_args() {
        let spec = LaunchSpec::for_worker(&worker());
        assert_eq!(spec.command_line(), "node server2.js --port=6002");
    }
}
