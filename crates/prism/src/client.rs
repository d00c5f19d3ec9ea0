use anyhow::Context;
use prism_core::query::{ErrorBody, StatusResponse, TraceResponse, TracesResponse};
use serde::de::DeserializeOwned;

/// Archive queries against a running `prism run`.
pub struct HubClient {
    http: reqwest::Client,
    base: String,
}

#[derive(Debug, Default)]
pub struct TracesQuery {
    pub limit: Option<usize>,
    pub service: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
}

impl HubClient {
    pub fn new(base: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub async fn get_trace(&self, trace_id: &str) -> anyhow::Result<TraceResponse> {
        self.get_json(&format!("/traces/{trace_id}"), &[]).await
    }

    pub async fn list_traces(&self, query: &TracesQuery) -> anyhow::Result<TracesResponse> {
        let mut params = Vec::new();
        if let Some(limit) = query.limit {
            params.push(("limit", limit.to_string()));
        }
        for (key, value) in [
            ("service", &query.service),
            ("since", &query.since),
            ("until", &query.until),
        ] {
            if let Some(value) = value {
                params.push((key, value.clone()));
            }
        }
        self.get_json("/traces", &params).await
    }

    pub async fn status(&self) -> anyhow::Result<StatusResponse> {
        self.get_json("/status", &[]).await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> anyhow::Result<T> {
        let url = format!("{}{path}", self.base);
        let response = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("request {url}"))?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<ErrorBody>().await {
                Ok(ErrorBody {
                    error,
                    details: Some(details),
                }) => format!("{error}: {details}"),
                Ok(ErrorBody { error, .. }) => error,
                Err(_) => status.to_string(),
            };
            anyhow::bail!("{url} failed ({status}): {message}");
        }

        response
            .json()
            .await
            .with_context(|| format!("decode response from {url}"))
    }
}
