//! HTTP adapters for the headless runner batch API and its artifact store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::clients::{
    check_http_response, ArtifactStore, ClientError, ExecutionStatus, RunnerClient,
};

/// Execution submit request body.
#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    payload_path: &'a str,
}

/// Execution submit response body.
#[derive(Debug, Deserialize)]
struct SubmitResponse {
    execution_id: String,
}

/// HTTP runner client.
pub struct HttpRunnerClient {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpRunnerClient {
    /// Create a client for the given runner base URL.
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_owned(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl RunnerClient for HttpRunnerClient {
    async fn submit(&self, payload_path: &str) -> Result<String, ClientError> {
        let url = format!("{}/executions", self.endpoint);
        let response = self
            .client
            .post(&url)
            .json(&SubmitRequest { payload_path })
            .send()
            .await?;
        let raw = check_http_response(response).await?;
        let parsed: SubmitResponse = serde_json::from_str(&raw)
            .map_err(|e| ClientError::Parse(format!("submit body: {e}")))?;
        Ok(parsed.execution_id)
    }

    async fn status(&self, execution_id: &str) -> Result<ExecutionStatus, ClientError> {
        let url = format!("{}/executions/{execution_id}", self.endpoint);
        let response = self.client.get(&url).send().await?;
        let raw = check_http_response(response).await?;
        serde_json::from_str(&raw).map_err(|e| ClientError::Parse(format!("status body: {e}")))
    }
}

/// HTTP artifact store speaking plain PUT/GET against a bucket base URL.
pub struct HttpArtifactStore {
    bucket: String,
    client: reqwest::Client,
}

impl HttpArtifactStore {
    /// Create a store rooted at the given bucket URL.
    pub fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.trim_end_matches('/').to_owned(),
            client: reqwest::Client::new(),
        }
    }

    fn object_url(&self, path: &str) -> String {
        format!("{}/{}", self.bucket, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl ArtifactStore for HttpArtifactStore {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<(), ClientError> {
        let response = self
            .client
            .put(self.object_url(path))
            .body(bytes)
            .send()
            .await?;
        check_http_response(response).await?;
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, ClientError> {
        let response = self.client.get(self.object_url(path)).send().await?;
        if response.status().is_success() {
            return Ok(response.bytes().await?.to_vec());
        }
        // Shared checker so failed reads get the same body
        // sanitization as every other call; it always errors here.
        check_http_response(response).await.map(String::into_bytes)
    }
}
