use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use super::{
    error::{ConfigError, ConfigResult},
    model::{
        Config, DEFAULT_CONFIG_FILE, DashboardConfig, HealthConfig, RestartConfig,
        SupervisorConfig, WorkerConfig, WorkerId,
    },
    raw::{RawConfig, RawDashboardConfig, RawHealthConfig, RawSupervisorConfig, RawWorker},
};

pub fn load_from_path<P: AsRef<Path>>(path: P) -> ConfigResult<Config> {
    let path_ref = path.as_ref();
    let raw_contents = fs::read_to_string(path_ref).map_err(|source| ConfigError::ReadFailure {
        path: path_ref.to_path_buf(),
        source,
    })?;
    load_from_str(path_ref, &raw_contents)
}

pub fn load_from_str(config_path: &Path, contents: &str) -> ConfigResult<Config> {
    let raw: RawConfig = toml::from_str(contents)?;
    convert_raw_config(config_path, raw)
}

/// Loads `explicit` when given. Otherwise loads `portvisor.toml` from the
/// working directory if present, falling back to the built-in layout.
pub fn load_or_default(explicit: Option<&Path>) -> ConfigResult<Config> {
    if let Some(path) = explicit {
        return load_from_path(path);
    }

    let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
    if default_path.exists() {
        return load_from_path(&default_path);
    }

    tracing::info!("no {DEFAULT_CONFIG_FILE} found; using built-in worker layout");
    Ok(Config::default())
}

fn convert_raw_config(config_path: &Path, raw: RawConfig) -> ConfigResult<Config> {
    let dashboard = convert_dashboard_config(raw.dashboard);
    let supervisor = convert_supervisor_config(raw.supervisor)?;
    let health = convert_health_config(raw.health)?;
    let workers = convert_workers(config_path, raw.workers)?;

    Ok(Config {
        dashboard,
        supervisor,
        health,
        workers,
    })
}

fn convert_dashboard_config(raw: RawDashboardConfig) -> DashboardConfig {
    let defaults = DashboardConfig::default();
    DashboardConfig {
        bind: raw.bind.unwrap_or(defaults.bind),
        port: raw.port.unwrap_or(defaults.port),
    }
}

fn convert_supervisor_config(raw: RawSupervisorConfig) -> ConfigResult<SupervisorConfig> {
    let defaults = SupervisorConfig::default();
    let restart_defaults = RestartConfig::default();

    let probe_timeout = positive_millis("probe_timeout_ms", raw.probe_timeout_ms)?
        .unwrap_or(defaults.probe_timeout);
    let stop_grace = raw
        .stop_grace_ms
        .map(Duration::from_millis)
        .unwrap_or(defaults.stop_grace);
    let stop_ceiling = positive_millis("stop_ceiling_ms", raw.stop_ceiling_ms)?
        .unwrap_or(defaults.stop_ceiling);
    if stop_ceiling < stop_grace {
        return Err(ConfigError::StopCeilingBelowGrace {
            grace_ms: stop_grace.as_millis() as u64,
            ceiling_ms: stop_ceiling.as_millis() as u64,
        });
    }

    let restart = RestartConfig {
        backoff_step: raw
            .backoff_step_ms
            .map(Duration::from_millis)
            .unwrap_or(restart_defaults.backoff_step),
        backoff_max: raw
            .backoff_max_ms
            .map(Duration::from_millis)
            .unwrap_or(restart_defaults.backoff_max),
        max_attempts: raw
            .max_restart_attempts
            .unwrap_or(restart_defaults.max_attempts),
        port_busy_retry: raw
            .port_busy_retry_ms
            .map(Duration::from_millis)
            .unwrap_or(restart_defaults.port_busy_retry),
        stable_after: raw
            .stable_after_ms
            .map(Duration::from_millis)
            .unwrap_or(restart_defaults.stable_after),
    };

    Ok(SupervisorConfig {
        probe_host: raw.probe_host.unwrap_or(defaults.probe_host),
        probe_timeout,
        stop_grace,
        stop_ceiling,
        restart_settle: raw
            .restart_settle_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.restart_settle),
        restart,
    })
}

fn convert_health_config(raw: RawHealthConfig) -> ConfigResult<HealthConfig> {
    let defaults = HealthConfig::default();
    let timeout = positive_millis("health.timeout_ms", raw.timeout_ms)?.unwrap_or(defaults.timeout);
    let path = match raw.path {
        Some(path) if path.starts_with('/') => path,
        Some(path) => format!("/{path}"),
        None => defaults.path,
    };
    Ok(HealthConfig { timeout, path })
}

fn positive_millis(field: &'static str, value: Option<u64>) -> ConfigResult<Option<Duration>> {
    match value {
        Some(0) => Err(ConfigError::ZeroDuration { field }),
        Some(ms) => Ok(Some(Duration::from_millis(ms))),
        None => Ok(None),
    }
}

fn convert_workers(
    config_path: &Path,
    raw_workers: Vec<RawWorker>,
) -> ConfigResult<BTreeMap<WorkerId, WorkerConfig>> {
    let mut workers = BTreeMap::new();
    let mut ports: HashMap<u16, WorkerId> = HashMap::new();

    for (index, raw) in raw_workers.into_iter().enumerate() {
        let worker = convert_worker(config_path, index, raw)?;
        if let Some(first) = ports.insert(worker.port, worker.id) {
            return Err(ConfigError::DuplicatePort {
                port: worker.port,
                first,
                second: worker.id,
            });
        }
        if workers.contains_key(&worker.id) {
            return Err(ConfigError::DuplicateWorker { id: worker.id });
        }
        workers.insert(worker.id, worker);
    }

    Ok(workers)
}

fn convert_worker(config_path: &Path, index: usize, raw: RawWorker) -> ConfigResult<WorkerConfig> {
    let RawWorker {
        id,
        port,
        command,
        args,
        env,
        cwd,
        autostart,
    } = raw;

    let id = id.ok_or(ConfigError::MissingField { index, field: "id" })?;
    let port = port.ok_or(ConfigError::MissingField {
        index,
        field: "port",
    })?;
    if port == 0 {
        return Err(ConfigError::InvalidPort { id });
    }
    let command = command.ok_or(ConfigError::MissingField {
        index,
        field: "command",
    })?;

    Ok(WorkerConfig {
        id,
        port,
        command,
        args,
        env: convert_env_values(id, env)?,
        cwd: cwd.map(|value| resolve_relative_path(config_path, value)),
        autostart: autostart.unwrap_or(true),
    })
}

fn convert_env_values(
    id: WorkerId,
    map: BTreeMap<String, toml::Value>,
) -> ConfigResult<BTreeMap<String, String>> {
    let mut result = BTreeMap::new();
    for (key, value) in map {
        let rendered = match value {
            toml::Value::String(s) => s,
            toml::Value::Integer(i) => i.to_string(),
            toml::Value::Float(f) => f.to_string(),
            toml::Value::Boolean(b) => b.to_string(),
            toml::Value::Datetime(dt) => dt.to_string(),
            toml::Value::Array(_) | toml::Value::Table(_) => {
                return Err(ConfigError::InvalidEnvValue { id, key });
            }
        };
        result.insert(key, rendered);
    }
    Ok(result)
}

fn resolve_relative_path(base: &Path, value: String) -> PathBuf {
    let path = PathBuf::from(value);
    if path.is_absolute() {
        return path;
    }

    let base_dir = if base.is_dir() {
        base.to_path_buf()
    } else {
        base.parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    };
    base_dir.join(path)
}
