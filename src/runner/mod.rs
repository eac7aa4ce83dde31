//! Worker process launcher and supervisor.

mod command;
mod control;
mod error;
mod ports;
mod restart;

use std::{
    collections::BTreeMap,
    io,
    sync::Arc,
    sync::atomic::{AtomicBool, Ordering},
    time::SystemTime,
};

use nix::{
    errno::Errno,
    sys::signal::{Signal, kill as send_unix_signal},
    unistd::Pid,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Child,
    sync::{Mutex, Notify, RwLock, mpsc},
    task::JoinSet,
    time::{sleep, timeout},
};

use crate::{
    config::{Config, SupervisorConfig, WorkerConfig, WorkerId},
    logging::{EventLogger, LogEvent, LogStream},
    state::{ExitRecord, SupervisorState, WorkerHandle},
};

use command::LaunchSpec;
pub use control::{StartMode, StartOutcome, ToggleAction};
pub use error::{UnknownWorker, WorkerFault};
use ports::PortProbe;
#[cfg(test)]
pub(crate) use ports::ephemeral_port;
use restart::{ExitPlan, RestartCoordinator, RestartJob};

/// Owns every worker slot and drives its lifecycle.
#[derive(Debug)]
pub struct Supervisor {
    config: SupervisorConfig,
    workers: BTreeMap<WorkerId, WorkerConfig>,
    logger: EventLogger,
    probe: PortProbe,
    state: Arc<RwLock<SupervisorState>>,
    restart: Arc<RestartCoordinator>,
    restart_rx: Mutex<mpsc::Receiver<RestartJob>>,
}

impl Supervisor {
    pub fn new(config: &Config, logger: EventLogger) -> Self {
        let (restart_tx, restart_rx) = mpsc::channel(32);
        let supervisor = config.supervisor.clone();
        let probe = PortProbe::new(supervisor.probe_host.clone(), supervisor.probe_timeout);
        let restart = Arc::new(RestartCoordinator::new(supervisor.restart, restart_tx));
        Self {
            state: Arc::new(RwLock::new(SupervisorState::from_workers(
                config.workers.values(),
            ))),
            workers: config.workers.clone(),
            config: supervisor,
            logger,
            probe,
            restart,
            restart_rx: Mutex::new(restart_rx),
        }
    }

    pub fn spawn_background_tasks(self: &Arc<Self>) {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            supervisor.restart_worker_loop().await;
        });
    }

    pub fn worker_ids(&self) -> impl Iterator<Item = WorkerId> + '_ {
        self.workers.keys().copied()
    }

    pub fn contains(&self, id: WorkerId) -> bool {
        self.workers.contains_key(&id)
    }

    /// Ports of every worker, ordered by worker id.
    pub fn ports(&self) -> Vec<u16> {
        self.workers.values().map(|worker| worker.port).collect()
    }

    pub fn max_restart_attempts(&self) -> u32 {
        self.restart.config().max_attempts
    }

    pub async fn snapshot(&self) -> Vec<WorkerHandle> {
        let state = self.state.read().await;
        state.workers.values().cloned().collect()
    }

    pub async fn handle(&self, id: WorkerId) -> Option<WorkerHandle> {
        let state = self.state.read().await;
        state.workers.get(&id).cloned()
    }

    pub async fn any_running(&self) -> bool {
        self.state.read().await.any_running()
    }

    async fn is_desired(&self, id: WorkerId) -> bool {
        let state = self.state.read().await;
        state.workers.get(&id).is_some_and(|handle| handle.desired)
    }

    async fn restart_worker_loop(self: Arc<Self>) {
        let mut rx = self.restart_rx.lock().await;
        while let Some(job) = rx.recv().await {
            let supervisor = Arc::clone(&self);
            tokio::spawn(async move {
                supervisor.process_restart_job(job).await;
            });
        }
    }

    async fn process_restart_job(self: Arc<Self>, job: RestartJob) {
        sleep(job.delay).await;

        let Some(port) = self.workers.get(&job.worker).map(|worker| worker.port) else {
            return;
        };
        let free = self.probe.is_free(port).await;

        // Read the live flag: a stop issued during the backoff wait wins.
        if !self.is_desired(job.worker).await {
            tracing::info!(
                worker = job.worker,
                "worker no longer desired; dropping scheduled restart"
            );
            return;
        }

        if !free {
            let retry = self.restart.config().port_busy_retry;
            tracing::warn!(
                worker = job.worker,
                port,
                retry_ms = retry.as_millis() as u64,
                "port still in use after backoff; retrying once"
            );
            sleep(retry).await;
            if !self.is_desired(job.worker).await {
                return;
            }
        }

        match self.start(job.worker, StartMode::Automatic).await {
            Ok(outcome) => tracing::info!(
                worker = job.worker,
                attempt = job.attempt,
                %outcome,
                "automatic restart attempt finished"
            ),
            Err(error) => tracing::error!(%error, "restart job referenced unknown worker"),
        }
    }

    /// Starts the worker unless it is already running or starting.
    ///
    /// An occupied port aborts the start without scheduling a retry.
    pub async fn start(
        self: &Arc<Self>,
        id: WorkerId,
        mode: StartMode,
    ) -> Result<StartOutcome, UnknownWorker> {
        let worker = self.workers.get(&id).ok_or(UnknownWorker(id))?;

        {
            let mut state = self.state.write().await;
            let handle = state.workers.get_mut(&id).ok_or(UnknownWorker(id))?;
            if handle.process.is_some() {
                return Ok(StartOutcome::AlreadyRunning);
            }
            if handle.starting {
                return Ok(StartOutcome::AlreadyStarting);
            }
            if mode == StartMode::Automatic && !handle.desired {
                return Ok(StartOutcome::NotDesired);
            }
            handle.desired = true;
            handle.starting = true;
        }

        let free = self.probe.is_free(worker.port).await;

        let mut state = self.state.write().await;
        let handle = state.workers.get_mut(&id).ok_or(UnknownWorker(id))?;
        if !free {
            handle.starting = false;
            let fault = WorkerFault::PortOccupied {
                worker: id,
                port: worker.port,
            };
            tracing::warn!(worker = id, port = worker.port, "{fault}");
            return Ok(StartOutcome::PortOccupied);
        }
        if !handle.desired {
            handle.starting = false;
            tracing::info!(worker = id, "worker was stopped while starting; not spawning");
            return Ok(StartOutcome::NotDesired);
        }

        // Explicit starts clear the counter even if the spawn below fails.
        if mode == StartMode::Manual {
            handle.restart_attempts = 0;
        }

        let spec = LaunchSpec::for_worker(worker);
        let spawned = spawn_child(&spec);
        let (child, pid) = match spawned {
            Ok(spawned) => spawned,
            Err(source) => {
                handle.starting = false;
                let fault = WorkerFault::SpawnFailure { worker: id, source };
                tracing::error!(worker = id, command = %spec.command_line(), "{fault}");
                let plan = self.restart.plan(handle, None);
                drop(state);
                self.apply_exit_plan(id, plan).await;
                return Ok(StartOutcome::SpawnFailed);
            }
        };

        let generation = handle.generation.saturating_add(1);
        let process = Arc::new(ProcessHandle::new(pid, generation));
        handle.attach_process(Arc::clone(&process));
        handle.starting = false;
        drop(state);

        tracing::info!(
            worker = id,
            pid,
            port = worker.port,
            generation,
            command = %spec.command_line(),
            "started worker"
        );
        self.watch_child(id, child, process);

        Ok(StartOutcome::Started { pid })
    }

    fn watch_child(self: &Arc<Self>, id: WorkerId, mut child: Child, process: Arc<ProcessHandle>) {
        if let Some(stdout) = child.stdout.take() {
            self.spawn_stream_task(id, LogStream::Stdout, stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            self.spawn_stream_task(id, LogStream::Stderr, stderr);
        }

        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            let wait_result = child.wait().await;
            supervisor.on_worker_exit(id, &process, wait_result).await;
        });
    }

    fn spawn_stream_task<R>(&self, id: WorkerId, stream: LogStream, reader: R)
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
    {
        let logger = self.logger.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let text = String::from_utf8_lossy(&buf);
                        let line = text.trim_end_matches(['\n', '\r']);
                        if let Err(error) = logger.log(LogEvent::new(id, stream, line)) {
                            tracing::error!(%error, worker = id, "failed to forward output line");
                        }
                    }
                    Err(error) => {
                        tracing::debug!(%error, worker = id, "worker output stream closed");
                        break;
                    }
                }
            }
        });
    }

    async fn on_worker_exit(
        &self,
        id: WorkerId,
        process: &ProcessHandle,
        wait_result: io::Result<std::process::ExitStatus>,
    ) {
        let record = match &wait_result {
            Ok(status) => ExitRecord {
                code: status.code(),
                signal: exit_signal(status),
                when: SystemTime::now(),
            },
            Err(_) => ExitRecord {
                code: None,
                signal: None,
                when: SystemTime::now(),
            },
        };
        let message = match &wait_result {
            Ok(status) => exit_message(status),
            Err(error) => format!("wait failed: {error}"),
        };

        let plan = {
            let mut state = self.state.write().await;
            let Some(handle) = state.workers.get_mut(&id) else {
                process.signal_exit();
                return;
            };
            if !handle.is_current(process.generation()) {
                tracing::debug!(
                    worker = id,
                    pid = process.pid(),
                    "ignoring exit of a process no longer tracked"
                );
                process.signal_exit();
                return;
            }

            let uptime = handle.started_at.map(|started| started.elapsed());
            handle.clear_process();
            handle.last_exit = Some(record);
            tracing::info!(worker = id, pid = process.pid(), "worker {message}");

            if handle.desired {
                let fault = WorkerFault::UnexpectedExit {
                    worker: id,
                    status: message,
                };
                tracing::warn!(worker = id, "{fault}");
            }
            self.restart.plan(handle, uptime)
        };

        process.signal_exit();
        self.apply_exit_plan(id, plan).await;
    }

    async fn apply_exit_plan(&self, id: WorkerId, plan: ExitPlan) {
        match plan {
            ExitPlan::RemainStopped => {
                tracing::info!(worker = id, "worker will remain stopped (desired=false)");
            }
            ExitPlan::CeilingExceeded { attempts } => {
                let fault = WorkerFault::RestartCeilingExceeded {
                    worker: id,
                    max_attempts: self.restart.config().max_attempts,
                };
                tracing::warn!(worker = id, attempts, "{fault}");
            }
            ExitPlan::Restart { attempt, delay } => {
                let job = RestartJob {
                    worker: id,
                    attempt,
                    delay,
                };
                if !self.restart.enqueue(job).await {
                    tracing::warn!(worker = id, "restart queue closed; worker stays stopped");
                }
            }
        }
    }

    /// Stops the worker: SIGTERM, SIGKILL after the grace window, and
    /// unconditional cleanup once the ceiling elapses.
    pub async fn stop(&self, id: WorkerId) -> Result<(), UnknownWorker> {
        let process = {
            let mut state = self.state.write().await;
            let handle = state.workers.get_mut(&id).ok_or(UnknownWorker(id))?;
            handle.desired = false;
            match handle.process.clone() {
                Some(process) => process,
                None => {
                    handle.clear_process();
                    return Ok(());
                }
            }
        };

        let pid = process.pid();
        if let Err(fault) = signal_worker(id, pid, Signal::SIGTERM) {
            tracing::warn!(worker = id, pid, "{fault}");
        } else {
            tracing::info!(worker = id, pid, "sent SIGTERM to worker");
        }

        let grace = self.config.stop_grace;
        if timeout(grace, process.wait_for_exit()).await.is_err() {
            if !process.has_exited() {
                tracing::warn!(
                    worker = id,
                    pid,
                    "worker did not exit after SIGTERM; escalating to SIGKILL"
                );
                if let Err(fault) = signal_worker(id, pid, Signal::SIGKILL) {
                    tracing::warn!(worker = id, pid, "{fault}");
                }
            }

            let remaining = self.config.stop_ceiling.saturating_sub(grace);
            if timeout(remaining, process.wait_for_exit()).await.is_err() {
                tracing::warn!(
                    worker = id,
                    pid,
                    "worker exit not confirmed within stop ceiling; clearing handle"
                );
            }
        }

        let mut state = self.state.write().await;
        if let Some(handle) = state.workers.get_mut(&id) {
            if handle.is_current(process.generation()) {
                handle.clear_process();
            }
        }
        Ok(())
    }

    /// Stop, let the port settle, then start fresh with a reset counter.
    pub async fn restart(self: &Arc<Self>, id: WorkerId) -> Result<StartOutcome, UnknownWorker> {
        {
            let mut state = self.state.write().await;
            let handle = state.workers.get_mut(&id).ok_or(UnknownWorker(id))?;
            handle.desired = true;
        }
        self.stop(id).await?;
        sleep(self.config.restart_settle).await;
        self.start(id, StartMode::Manual).await
    }

    pub async fn toggle(self: &Arc<Self>, id: WorkerId) -> Result<ToggleAction, UnknownWorker> {
        let running = self
            .handle(id)
            .await
            .ok_or(UnknownWorker(id))?
            .is_running();
        if running {
            self.stop(id).await?;
            Ok(ToggleAction::Stopped)
        } else {
            self.start(id, StartMode::Manual).await?;
            Ok(ToggleAction::Started)
        }
    }

    pub async fn stop_all(self: &Arc<Self>) {
        let mut tasks = JoinSet::new();
        for id in self.worker_ids() {
            let supervisor = Arc::clone(self);
            tasks.spawn(async move { supervisor.stop(id).await });
        }
        while let Some(result) = tasks.join_next().await {
            if let Err(error) = result {
                tracing::error!(%error, "stop task failed");
            }
        }
    }

    /// Starts every given worker concurrently as an explicit request.
    pub async fn start_many<I>(self: &Arc<Self>, ids: I)
    where
        I: IntoIterator<Item = WorkerId>,
    {
        let mut tasks = JoinSet::new();
        for id in ids {
            let supervisor = Arc::clone(self);
            tasks.spawn(async move { supervisor.start(id, StartMode::Manual).await });
        }
        while let Some(result) = tasks.join_next().await {
            if let Err(error) = result {
                tracing::error!(%error, "start task failed");
            }
        }
    }

    pub async fn toggle_all(self: &Arc<Self>) -> ToggleAction {
        let action = ToggleAction::for_aggregate(self.any_running().await);
        match action {
            ToggleAction::Stopped => self.stop_all().await,
            ToggleAction::Started => {
                {
                    let mut state = self.state.write().await;
                    for handle in state.workers.values_mut() {
                        handle.desired = true;
                    }
                }
                let ids = self.worker_ids().collect::<Vec<_>>();
                self.start_many(ids).await;
            }
        }
        action
    }

    pub async fn start_autostart(self: &Arc<Self>) {
        let ids = self
            .workers
            .values()
            .filter(|worker| worker.autostart)
            .map(|worker| worker.id)
            .collect::<Vec<_>>();
        self.start_many(ids).await;
    }

    /// Marks every worker undesired before stopping so that no exit
    /// handler reschedules a restart during teardown.
    pub async fn shutdown(self: &Arc<Self>) {
        {
            let mut state = self.state.write().await;
            for handle in state.workers.values_mut() {
                handle.desired = false;
            }
        }
        self.stop_all().await;
    }
}

fn spawn_child(spec: &LaunchSpec) -> io::Result<(Child, u32)> {
    let mut child = spec.to_command().spawn()?;
    match child.id() {
        Some(pid) => Ok((child, pid)),
        None => Err(io::Error::other(
            "child exited before its pid could be observed",
        )),
    }
}

fn signal_worker(id: WorkerId, pid: u32, signal: Signal) -> Result<(), WorkerFault> {
    signal_process(pid, signal).map_err(|source| WorkerFault::SignalDeliveryFailure {
        worker: id,
        pid,
        signal: signal.as_str(),
        source,
    })
}

fn signal_process(pid: u32, signal: Signal) -> Result<(), Errno> {
    let Ok(raw) = i32::try_from(pid) else {
        return Err(Errno::EINVAL);
    };
    if raw <= 0 {
        return Err(Errno::EINVAL);
    }
    match send_unix_signal(Pid::from_raw(raw), signal) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => Ok(()),
        Err(err) => Err(err),
    }
}

/// Supervisor-side reference to one spawned process.
///
/// The `Child` itself lives in the exit-watcher task; this handle carries the
/// pid for signalling and lets `stop` await the exit.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    generation: u64,
    exit_notify: Notify,
    exited: AtomicBool,
}

impl ProcessHandle {
    pub fn new(pid: u32, generation: u64) -> Self {
        Self {
            pid,
            generation,
            exit_notify: Notify::new(),
            exited: AtomicBool::new(false),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    pub async fn wait_for_exit(&self) {
        let notified = self.exit_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.has_exited() {
            return;
        }
        notified.await;
    }

    fn signal_exit(&self) {
        if !self.exited.swap(true, Ordering::SeqCst) {
            self.exit_notify.notify_waiters();
        }
    }
}

fn exit_message(status: &std::process::ExitStatus) -> String {
    if let Some(code) = status.code() {
        format!("exited with code {code}")
    } else if let Some(signal) = exit_signal(status) {
        format!("terminated by signal {signal}")
    } else {
        "process exited".to_string()
    }
}

fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    }

    #[cfg(not(unix))]
    {
        let _ = status;
        None
    }
}
