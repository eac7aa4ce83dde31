use thiserror::Error;

use crate::config::WorkerId;

/// Worker-level faults. These are logged and reflected in handle state;
/// they never fail a control-plane request.
#[derive(Debug, Error)]
pub enum WorkerFault {
    #[error("port {port} is already in use; not starting worker {worker}")]
    PortOccupied { worker: WorkerId, port: u16 },
    #[error("failed to spawn worker {worker}: {source}")]
    SpawnFailure {
        worker: WorkerId,
        #[source]
        source: std::io::Error,
    },
    #[error("worker {worker} exited unexpectedly ({status})")]
    UnexpectedExit { worker: WorkerId, status: String },
    #[error(
        "worker {worker} exceeded {max_attempts} restart attempts; it stays stopped until started manually"
    )]
    RestartCeilingExceeded { worker: WorkerId, max_attempts: u32 },
    #[error("failed to send {signal} to worker {worker} (pid {pid}): {source}")]
    SignalDeliveryFailure {
        worker: WorkerId,
        pid: u32,
        signal: &'static str,
        #[source]
        source: nix::errno::Errno,
    },
}

/// A control request named a worker id outside the configured set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown worker {0}")]
pub struct UnknownWorker(pub WorkerId);
