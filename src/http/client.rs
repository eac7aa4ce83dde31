use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;

use super::protocol::{OkResponse, ToggleAllResponse, WorkerSummary};
use crate::{config::WorkerId, runner::ToggleAction};

pub const DEFAULT_CONTROL_URL: &str = "http://127.0.0.1:6004";

/// Stop escalation plus restart settle can take several seconds per call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Thin client for a running control plane.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .no_proxy()
            .build()
            .context("building control plane client")?;
        Ok(Self {
            client,
            base: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub async fn status(&self) -> Result<Vec<String>> {
        let response = self.get("/status").await?;
        decode(response).await
    }

    pub async fn workers(&self) -> Result<Vec<WorkerSummary>> {
        let response = self.get("/workers").await?;
        decode(response).await
    }

    /// Returns `false` when the control plane does not know the worker.
    pub async fn toggle(&self, id: WorkerId) -> Result<bool> {
        self.post_worker("toggle", id).await
    }

    pub async fn restart(&self, id: WorkerId) -> Result<bool> {
        self.post_worker("restart", id).await
    }

    pub async fn toggle_all(&self) -> Result<ToggleAction> {
        let response = self.post("/toggleAll").await?;
        let body: ToggleAllResponse = decode(response).await?;
        Ok(body.action)
    }

    pub async fn stop_all(&self) -> Result<()> {
        let response = self.post("/stopAll").await?;
        let body: OkResponse = decode(response).await?;
        if !body.ok {
            bail!("control plane rejected stopAll");
        }
        Ok(())
    }

    async fn post_worker(&self, action: &str, id: WorkerId) -> Result<bool> {
        let response = self.post(&format!("/{action}/{id}")).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let body: OkResponse = decode(response).await?;
        Ok(body.ok)
    }

    async fn get(&self, path: &str) -> Result<Response> {
        let url = self.url(path);
        self.client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("requesting {url}"))
    }

    async fn post(&self, path: &str) -> Result<Response> {
        let url = self.url(path);
        self.client
            .post(&url)
            .send()
            .await
            .with_context(|| format!("requesting {url}"))
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let url = response.url().clone();
    let response = response
        .error_for_status()
        .with_context(|| format!("control plane returned an error for {url}"))?;
    response
        .json()
        .await
        .with_context(|| format!("decoding response from {url}"))
}
