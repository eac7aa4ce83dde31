use std::{collections::BTreeMap, path::PathBuf, time::Duration};

pub type WorkerId = u32;

pub const DEFAULT_CONFIG_FILE: &str = "portvisor.toml";

#[derive(Debug, Clone)]
pub struct Config {
    pub dashboard: DashboardConfig,
    pub supervisor: SupervisorConfig,
    pub health: HealthConfig,
    pub workers: BTreeMap<WorkerId, WorkerConfig>,
}

impl Default for Config {
    /// Three node workers on 6001-6003 with the dashboard on 6004.
    fn default() -> Self {
        let workers = (1..=3)
            .map(|id| {
                let worker = WorkerConfig {
                    id,
                    port: 6000 + id as u16,
                    command: "node".to_string(),
                    args: vec!["server{id}.js".to_string()],
                    env: BTreeMap::new(),
                    cwd: None,
                    autostart: true,
                };
                (id, worker)
            })
            .collect();

        Self {
            dashboard: DashboardConfig::default(),
            supervisor: SupervisorConfig::default(),
            health: HealthConfig::default(),
            workers,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 6004,
        }
    }
}

impl DashboardConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// Timings and limits for the supervision state machine.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Host used when probing whether a worker port is occupied.
    pub probe_host: String,
    pub probe_timeout: Duration,
    /// Time between SIGTERM and SIGKILL during `stop`.
    pub stop_grace: Duration,
    /// Upper bound on a single `stop`, measured from the SIGTERM.
    pub stop_ceiling: Duration,
    /// Pause between the stop and start halves of `restart`.
    pub restart_settle: Duration,
    pub restart: RestartConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            probe_host: "127.0.0.1".to_string(),
            probe_timeout: Duration::from_millis(300),
            stop_grace: Duration::from_millis(2000),
            stop_ceiling: Duration::from_millis(6000),
            restart_settle: Duration::from_millis(300),
            restart: RestartConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartConfig {
    /// Backoff grows linearly by this step per attempt.
    pub backoff_step: Duration,
    pub backoff_max: Duration,
    pub max_attempts: u32,
    /// Extra wait when the port is still held after the backoff delay.
    pub port_busy_retry: Duration,
    /// A run lasting at least this long counts as a successful start.
    pub stable_after: Duration,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            backoff_step: Duration::from_millis(2000),
            backoff_max: Duration::from_millis(15000),
            max_attempts: 10,
            port_busy_retry: Duration::from_millis(2000),
            stable_after: Duration::from_millis(30000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub timeout: Duration,
    pub path: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(1200),
            path: "/".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub id: WorkerId,
    pub port: u16,
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub autostart: bool,
}
