//! Waits for the OS signals that end a `serve` session.
//!
//! On Unix this is SIGINT, SIGTERM or SIGQUIT; elsewhere only Ctrl-C.
//! Handlers are registered by [`ShutdownSignals::install`], so a signal that
//! arrives before anyone awaits [`ShutdownSignals::recv`] is still observed.

#[cfg(unix)]
pub struct ShutdownSignals {
    sigint: tokio::signal::unix::Signal,
    sigterm: tokio::signal::unix::Signal,
    sigquit: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl ShutdownSignals {
    pub fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
            sigquit: signal(SignalKind::quit())?,
        })
    }

    pub async fn recv(mut self) -> &'static str {
        tokio::select! {
            _ = self.sigint.recv() => "SIGINT",
            _ = self.sigterm.recv() => "SIGTERM",
            _ = self.sigquit.recv() => "SIGQUIT",
        }
    }
}

#[cfg(not(unix))]
pub struct ShutdownSignals {
    ctrl_c: tokio::signal::windows::CtrlC,
}

#[cfg(not(unix))]
impl ShutdownSignals {
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            ctrl_c: tokio::signal::windows::ctrl_c()?,
        })
    }

    pub async fn recv(mut self) -> &'static str {
        self.ctrl_c.recv().await;
        "ctrl-c"
    }
}

/// Resolves on the first shutdown signal received after `signals` was installed.
pub async fn shutdown_requested(signals: ShutdownSignals) {
    let name = signals.recv().await;
    tracing::info!(signal = name, "shutdown signal received");
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    use nix::sys::signal::{Signal, raise};

    #[tokio::test]
    async fn signal_before_waiting_is_not_lost() {
        let signals = ShutdownSignals::install().expect("handlers installed");
        raise(Signal::SIGQUIT).expect("raise");
        // Nothing is awaiting yet; the process must survive and remember it.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let name = tokio::time::timeout(Duration::from_secs(2), signals.recv())
            .await
            .expect("signal observed");
        assert_eq!(name, "SIGQUIT");
    }
}
