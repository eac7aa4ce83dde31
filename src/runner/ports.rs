use std::time::Duration;

use tokio::{net::TcpStream, time::timeout};

pub(crate) const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(300);

/// Advisory check used before spawning a worker on a fixed port.
///
/// A successful connect means something is already listening, so the port
/// is reported busy. Refusals, other connect errors and timeouts all count
/// as free. The answer can be stale by the time the caller acts on it.
#[derive(Debug, Clone)]
pub(crate) struct PortProbe {
    host: String,
    timeout: Duration,
}

impl PortProbe {
    pub(crate) fn new(host: impl Into<String>, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            timeout,
        }
    }

    pub(crate) async fn is_free(&self, port: u16) -> bool {
        is_port_free(port, &self.host, self.timeout).await
    }
}

impl Default for PortProbe {
    fn default() -> Self {
        Self::new("127.0.0.1", DEFAULT_PROBE_TIMEOUT)
    }
}

pub(crate) async fn is_port_free(port: u16, host: &str, limit: Duration) -> bool {
    // The stream (or the pending connect future) is dropped on every branch,
    // which closes the descriptor.
    match timeout(limit, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => {
            drop(stream);
            false
        }
        Ok(Err(error)) => {
            tracing::trace!(%error, port, host, "port probe connect failed; treating as free");
            true
        }
        Err(_) => {
            tracing::trace!(port, host, "port probe timed out; treating as free");
            true
        }
    }
}

#[cfg(test)]
pub(crate) fn ephemeral_port() -> u16 {
    let listener =
        std::net::TcpListener::bind(("127.0.0.1", 0)).expect("binding ephemeral port for tests");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    port
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn reports_listening_port_as_busy() {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
            .await
            .expect("bind");
        let port = listener.local_addr().expect("addr").port();

        assert!(!is_port_free(port, "127.0.0.1", DEFAULT_PROBE_TIMEOUT).await);
        drop(listener);
    }

    #[tokio::test]
    async fn reports_closed_port_as_free() {
        let port = ephemeral_port();
        let probe = PortProbe::default();
        assert!(probe.is_free(port).await);
    }

    #[tokio::test]
    async fn unreachable_host_resolves_within_timeout() {
        // TEST-NET-1 is never routed, so the connect either hangs or fails fast.
        let probe = PortProbe::new("192.0.2.1", Duration::from_millis(200));
        let started = Instant::now();
        assert!(probe.is_free(6001).await);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn repeated_probes_do_not_exhaust_the_listener() {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
            .await
            .expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let acceptor = tokio::spawn(async move {
            for _ in 0..20 {
                let (stream, _) = listener.accept().await.expect("accept");
                drop(stream);
            }
        });

        let probe = PortProbe::default();
        for _ in 0..20 {
            assert!(!probe.is_free(port).await);
        }
        acceptor.await.expect("acceptor finished");
    }
}
