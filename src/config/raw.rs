use std::collections::BTreeMap;

use serde::Deserialize;
use toml::Value;

#[derive(Debug, Default, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    pub dashboard: RawDashboardConfig,
    #[serde(default)]
    pub supervisor: RawSupervisorConfig,
    #[serde(default)]
    pub health: RawHealthConfig,
    #[serde(default, rename = "worker")]
    pub workers: Vec<RawWorker>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawDashboardConfig {
    pub bind: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawSupervisorConfig {
    pub probe_host: Option<String>,
    pub probe_timeout_ms: Option<u64>,
    pub stop_grace_ms: Option<u64>,
    pub stop_ceiling_ms: Option<u64>,
    pub restart_settle_ms: Option<u64>,
    pub backoff_step_ms: Option<u64>,
    pub backoff_max_ms: Option<u64>,
    pub max_restart_attempts: Option<u32>,
    pub port_busy_retry_ms: Option<u64>,
    pub stable_after_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawHealthConfig {
    pub timeout_ms: Option<u64>,
    pub path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawWorker {
    pub id: Option<u32>,
    pub port: Option<u16>,
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, Value>,
    pub cwd: Option<String>,
    pub autostart: Option<bool>,
}
