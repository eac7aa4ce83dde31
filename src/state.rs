//! In-memory bookkeeping for supervised workers.

use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{Instant, SystemTime},
};

use crate::{
    config::{WorkerConfig, WorkerId},
    runner::ProcessHandle,
};

#[derive(Debug, Default)]
pub struct SupervisorState {
    pub workers: BTreeMap<WorkerId, WorkerHandle>,
}

impl SupervisorState {
    pub fn from_workers<'a, I>(workers: I) -> Self
    where
        I: IntoIterator<Item = &'a WorkerConfig>,
    {
        let workers = workers
            .into_iter()
            .map(|config| (config.id, WorkerHandle::new(config.id, config.port)))
            .collect();
        Self { workers }
    }

    pub fn any_running(&self) -> bool {
        self.workers.values().any(WorkerHandle::is_running)
    }
}

/// Mutable record tracking one worker's desired and observed state.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    pub id: WorkerId,
    pub port: u16,
    /// Live process, owned exclusively by the supervisor.
    pub process: Option<Arc<ProcessHandle>>,
    /// Mirrors `process`; set and cleared together with it.
    pub pid: Option<u32>,
    /// Whether the supervisor should keep this worker alive.
    pub desired: bool,
    /// Guards against concurrent start attempts.
    pub starting: bool,
    pub last_exit: Option<ExitRecord>,
    /// Consecutive automatic restart attempts since the last successful start.
    pub restart_attempts: u32,
    /// Number of processes spawned for this slot so far.
    pub generation: u64,
    pub started_at: Option<Instant>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitRecord {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    pub when: SystemTime,
}

impl WorkerHandle {
    pub fn new(id: WorkerId, port: u16) -> Self {
        Self {
            id,
            port,
            process: None,
            pid: None,
            desired: false,
            starting: false,
            last_exit: None,
            restart_attempts: 0,
            generation: 0,
            started_at: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.pid.is_some()
    }

    /// True once automatic restarts have been exhausted.
    pub fn needs_manual_start(&self, max_attempts: u32) -> bool {
        !self.is_running() && self.restart_attempts > max_attempts
    }

    pub fn attach_process(&mut self, process: Arc<ProcessHandle>) {
        self.generation = process.generation();
        self.pid = Some(process.pid());
        self.process = Some(process);
        self.started_at = Some(Instant::now());
    }

    pub fn clear_process(&mut self) {
        self.process = None;
        self.pid = None;
        self.started_at = None;
    }

    /// Whether `generation` still names the live process of this slot.
    pub fn is_current(&self, generation: u64) -> bool {
        self.process
            .as_ref()
            .is_some_and(|process| process.generation() == generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_tracks_process_presence() {
        let mut handle = WorkerHandle::new(1, 6001);
        assert!(!handle.is_running());

        handle.attach_process(Arc::new(ProcessHandle::new(4242, 1)));
        assert_eq!(handle.pid, Some(4242));
        assert!(handle.process.is_some());
        assert!(handle.is_current(1));
        assert!(!handle.is_current(2));

        handle.clear_process();
        assert_eq!(handle.pid, None);
        assert!(handle.process.is_none());
        assert!(!handle.is_current(1));
    }

    #[test]
    fn manual_start_needed_only_past_ceiling() {
        let mut handle = WorkerHandle::new(3, 6003);
        handle.restart_attempts = 10;
        assert!(!handle.needs_manual_start(10));
        handle.restart_attempts = 11;
        assert!(handle.needs_manual_start(10));
    }

    #[test]
    fn state_reports_any_running() {
        let configs = crate::config::Config::default();
        let mut state = SupervisorState::from_workers(configs.workers.values());
        assert_eq!(state.workers.len(), 3);
        assert!(!state.any_running());

        if let Some(handle) = state.workers.get_mut(&2) {
            handle.attach_process(Arc::new(ProcessHandle::new(99, 1)));
        }
        assert!(state.any_running());
    }
}
