use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, ClientBuilder};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{RetryPolicy, UpstreamError};
use crate::server::services::catalog::Catalog;
use crate::server::models::Table;

/// Executes named calls against the upstream financial-data service
/// (an AKTools-style HTTP front for the data library) and normalizes the
/// JSON payload into a [`Table`].
///
/// This client never consults the cache; the cache sits in front of it.
pub struct UpstreamClient {
    client: Client,
    base_url: String,
    catalog: Arc<Catalog>,
    retry: RetryPolicy,
    max_result_bytes: usize,
}

impl UpstreamClient {
    pub fn new(
        base_url: String,
        catalog: Arc<Catalog>,
        timeout: Duration,
        retry: RetryPolicy,
        max_result_bytes: usize,
    ) -> anyhow::Result<UpstreamClient> {
        let client = ClientBuilder::new()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to create HTTP client: {e}"))?;
        Ok(UpstreamClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            catalog,
            retry,
            max_result_bytes,
        })
    }

    /// Calls `interface` with the given parameters, retrying transient
    /// failures, and returns the normalized tabular result.
    pub async fn call(
        &self,
        interface: &str,
        params: &Map<String, Value>,
    ) -> Result<Table, UpstreamError> {
        if !self.catalog.has(interface) {
            return Err(UpstreamError::UnknownInterface(interface.to_string()));
        }

        let query: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| (k.clone(), scalar_text(v)))
            .collect();
        let url = format!("{}/api/public/{}", self.base_url, interface);

        let mut last_error = UpstreamError::Transport("no attempt made".to_string());
        for attempt in 1..=self.retry.attempts.max(1) {
            match self.attempt(&url, &query).await {
                Ok(records) => return self.normalize(interface, &records),
                Err(err) if err.is_transient() && attempt < self.retry.attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        interface,
                        attempt,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "upstream attempt failed, retrying"
                    );
                    last_error = err;
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_error)
    }

    async fn attempt(
        &self,
        url: &str,
        query: &[(String, String)],
    ) -> Result<Vec<Value>, UpstreamError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    UpstreamError::Timeout
                } else {
                    UpstreamError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.is_client_error() {
                // A structured rejection from upstream is final.
                return Err(UpstreamError::InvalidParameters(truncate(&body, 200)));
            }
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body: truncate(&body, 200),
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))?;
        match payload {
            Value::Array(records) => Ok(records),
            other => Err(UpstreamError::Decode(format!(
                "expected a JSON array of records, got {}",
                type_name(&other)
            ))),
        }
    }

    fn normalize(&self, interface: &str, records: &[Value]) -> Result<Table, UpstreamError> {
        let table = Table::from_records(records).unwrap_or_else(|| Table::new(Vec::new()));

        let size = serde_json::to_vec(&table)
            .map_err(|e| UpstreamError::Decode(e.to_string()))?
            .len();
        if size > self.max_result_bytes {
            return Err(UpstreamError::ResultTooLarge { size });
        }

        debug!(
            interface,
            records = table.record_count(),
            bytes = size,
            "normalized upstream payload"
        );
        Ok(table)
    }
}

/// String form of a parameter value, shared with key canonicalization so a
/// call and its cache key agree on coercion.
pub fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &text[..end])
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_text_coerces_like_the_cache_key() {
        assert_eq!(scalar_text(&json!("600519")), "600519");
        assert_eq!(scalar_text(&json!(600519)), "600519");
        assert_eq!(scalar_text(&json!(true)), "true");
        assert_eq!(scalar_text(&json!(null)), "");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let text = "风险".repeat(100);
        let out = truncate(&text, 10);
        assert!(out.len() <= 14);
        assert!(out.ends_with('…'));
    }
}
