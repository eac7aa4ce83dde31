//! Point-in-time HTTP liveness probe for worker ports.

use std::fmt;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde::{Serialize, Serializer};

use crate::config::HealthConfig;

/// Liveness classification of a worker, independent of pid bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Started,
    Stopped,
    Error(u16),
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Health::Started => f.write_str("Started"),
            Health::Stopped => f.write_str("Stopped"),
            Health::Error(code) => write!(f, "Error: {code}"),
        }
    }
}

impl Serialize for Health {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone)]
pub struct HealthChecker {
    client: reqwest::Client,
    host: String,
    path: String,
}

impl HealthChecker {
    pub fn new(config: &HealthConfig, host: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .no_proxy()
            .build()
            .context("building health probe client")?;
        Ok(Self {
            client,
            host: host.into(),
            path: config.path.clone(),
        })
    }

    pub async fn probe(&self, port: u16) -> Health {
        let url = format!("http://{}:{}{}", self.host, port, self.path);
        match self.client.get(&url).send().await {
            Ok(response) => classify(response.status()),
            Err(error) => {
                tracing::debug!(%error, port, "health probe failed");
                Health::Stopped
            }
        }
    }

    /// Probes every port concurrently; results keep the input order.
    pub async fn probe_all(&self, ports: &[u16]) -> Vec<Health> {
        let handles = ports
            .iter()
            .map(|&port| {
                let checker = self.clone();
                tokio::spawn(async move { checker.probe(port).await })
            })
            .collect::<Vec<_>>();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await.unwrap_or(Health::Stopped));
        }
        results
    }
}

fn classify(status: StatusCode) -> Health {
    if status == StatusCode::OK {
        Health::Started
    } else {
        Health::Error(status.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::{Router, http::StatusCode as AxumStatus, routing::get};

    use crate::runner::ephemeral_port;

    async fn serve(router: Router) -> u16 {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
            .await
            .expect("bind");
        let port = listener.local_addr().expect("addr").port();
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("serve");
        });
        port
    }

    fn checker(timeout: Duration) -> HealthChecker {
        let config = HealthConfig {
            timeout,
            path: "/".to_string(),
        };
        HealthChecker::new(&config, "127.0.0.1").expect("client")
    }

    #[tokio::test]
    async fn ok_response_is_started() {
        let port = serve(Router::new().route("/", get(|| async { "hello" }))).await;
        assert_eq!(
            checker(Duration::from_millis(1200)).probe(port).await,
            Health::Started
        );
    }

    #[tokio::test]
    async fn non_ok_response_reports_code() {
        let port = serve(Router::new().route(
            "/",
            get(|| async { (AxumStatus::SERVICE_UNAVAILABLE, "warming up") }),
        ))
        .await;
        let health = checker(Duration::from_millis(1200)).probe(port).await;
        assert_eq!(health, Health::Error(503));
        assert_eq!(health.to_string(), "Error: 503");
    }

    #[tokio::test]
    async fn refused_connection_is_stopped() {
        let port = ephemeral_port();
        assert_eq!(
            checker(Duration::from_millis(1200)).probe(port).await,
            Health::Stopped
        );
    }

    #[tokio::test]
    async fn slow_worker_times_out_as_stopped() {
        let port = serve(Router::new().route(
            "/",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        ))
        .await;
        let started = std::time::Instant::now();
        assert_eq!(
            checker(Duration::from_millis(200)).probe(port).await,
            Health::Stopped
        );
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn probe_all_preserves_order() {
        let up = serve(Router::new().route("/", get(|| async { "ok" }))).await;
        let down = ephemeral_port();
        let results = checker(Duration::from_millis(1200))
            .probe_all(&[down, up])
            .await;
        assert_eq!(results, vec![Health::Stopped, Health::Started]);
    }

    #[test]
    fn serializes_as_display_string() {
        let json = serde_json::to_string(&[Health::Started, Health::Stopped, Health::Error(500)])
            .expect("json");
        assert_eq!(json, r#"["Started","Stopped","Error: 500"]"#);
    }
}
