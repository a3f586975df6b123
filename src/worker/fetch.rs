use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::{Fetcher, WorkerError, WorkerRequest, WorkerResponse};

/// [`Fetcher`] backed by a shared `reqwest` client.
#[derive(Clone, Debug)]
pub struct ReqwestFetcher {
    client: Client,
}

impl ReqwestFetcher {
    pub fn new(timeout: Duration) -> Result<Self, WorkerError> {
        let client = Client::builder()
            .user_agent(concat!("reelhouse-worker/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, request: &WorkerRequest) -> Result<WorkerResponse, WorkerError> {
        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .body(request.body.clone())
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok(WorkerResponse {
            status,
            headers,
            body,
        })
    }
}
