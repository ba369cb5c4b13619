//! HTTP adapter for the parser/linter service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::clients::{
    check_http_response, ClientError, CliLintOptions, CommandCheck, LintIssue, LinterClient,
};

/// Topology lint request body.
#[derive(Debug, Serialize)]
struct TopologyRequest<'a> {
    topology: &'a str,
}

/// Topology lint response body.
#[derive(Debug, Deserialize)]
struct TopologyResponse {
    #[serde(default)]
    issues: Vec<LintIssue>,
}

/// CLI lint request body.
#[derive(Debug, Serialize)]
struct CliRequest<'a> {
    device_type: &'a str,
    commands: &'a [String],
    options: CliLintOptions,
}

/// CLI lint response body.
#[derive(Debug, Deserialize)]
struct CliResponse {
    #[serde(default)]
    results: Vec<CommandCheck>,
}

/// HTTP linter client.
pub struct HttpLinterClient {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpLinterClient {
    /// Create a client for the given linter base URL.
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_owned(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LinterClient for HttpLinterClient {
    async fn lint_topology(&self, topology: &str) -> Result<Vec<LintIssue>, ClientError> {
        let url = format!("{}/lint/topology", self.endpoint);
        let response = self
            .client
            .post(&url)
            .json(&TopologyRequest { topology })
            .send()
            .await?;
        let raw = check_http_response(response).await?;
        let parsed: TopologyResponse = serde_json::from_str(&raw)
            .map_err(|e| ClientError::Parse(format!("topology lint body: {e}")))?;
        Ok(parsed.issues)
    }

    async fn lint_cli(
        &self,
        device_type: &str,
        commands: &[String],
        options: CliLintOptions,
    ) -> Result<Vec<CommandCheck>, ClientError> {
        let url = format!("{}/lint/cli", self.endpoint);
        let response = self
            .client
            .post(&url)
            .json(&CliRequest {
                device_type,
                commands,
                options,
            })
            .send()
            .await?;
        let raw = check_http_response(response).await?;
        let parsed: CliResponse = serde_json::from_str(&raw)
            .map_err(|e| ClientError::Parse(format!("cli lint body: {e}")))?;
        Ok(parsed.results)
    }
}
