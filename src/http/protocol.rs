use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    config::WorkerId,
    health::Health,
    runner::ToggleAction,
    state::{ExitRecord, WorkerHandle},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

impl OkResponse {
    pub const OK: Self = Self { ok: true };
    pub const NOT_FOUND: Self = Self { ok: false };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleAllResponse {
    pub ok: bool,
    pub action: ToggleAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub id: WorkerId,
    pub port: u16,
    pub pid: Option<u32>,
    pub desired: bool,
    pub starting: bool,
    pub restart_attempts: u32,
    pub needs_manual_start: bool,
    pub generation: u64,
    pub last_exit: Option<ExitDetails>,
    pub health: String,
}

impl WorkerSummary {
    pub fn from_handle(handle: &WorkerHandle, health: Health, max_attempts: u32) -> Self {
        Self {
            id: handle.id,
            port: handle.port,
            pid: handle.pid,
            desired: handle.desired,
            starting: handle.starting,
            restart_attempts: handle.restart_attempts,
            needs_manual_start: handle.needs_manual_start(max_attempts),
            generation: handle.generation,
            last_exit: handle.last_exit.as_ref().map(ExitDetails::from),
            health: health.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitDetails {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    pub at: Option<String>,
}

impl From<&ExitRecord> for ExitDetails {
    fn from(exit: &ExitRecord) -> Self {
        let timestamp = DateTime::<Utc>::from(exit.when).to_rfc3339();
        Self {
            code: exit.code,
            signal: exit.signal,
            at: Some(timestamp),
        }
    }
}
