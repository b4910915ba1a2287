//! PostgREST-style table store.
//!
//! Reads `GET {url}/rest/v1/{table}?select=*&status=in.(active,paused)`.
//! Rows that fail to parse are skipped with a warning; the rest load.

use std::time::Duration;

use mkr_core::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::store::{sanitize, ConfigStore, StoredAgent};

/// REST store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestStoreConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`.
    pub url: String,
    /// Table name. Default: "traders".
    #[serde(default = "default_table")]
    pub table: String,
    /// Service key given inline.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable holding the service key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Request timeout (ms). Default: 10000.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_table() -> String {
    "traders".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

pub struct RestConfigStore {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl RestConfigStore {
    pub fn new(config: &RestStoreConfig) -> StoreResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| {
                config
                    .api_key_env
                    .as_ref()
                    .and_then(|var| std::env::var(var).ok())
            })
            .ok_or_else(|| StoreError::Config("REST store requires api_key or api_key_env".to_string()))?;

        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| StoreError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        let endpoint = format!(
            "{}/rest/v1/{}?select=*&status=in.(active,paused)",
            config.url.trim_end_matches('/'),
            config.table
        );
        info!(endpoint = %endpoint, "REST config store configured");

        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }

    async fn load(&self) -> StoreResult<Vec<StoredAgent>> {
        let response = self
            .client
            .get(&self.endpoint)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| StoreError::HttpClient(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::HttpClient(format!("HTTP {status}: {body}")));
        }

        let rows: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| StoreError::Parse(format!("Failed to parse response: {e}")))?;

        Ok(parse_rows(rows))
    }
}

fn parse_rows(rows: Vec<serde_json::Value>) -> Vec<StoredAgent> {
    let total = rows.len();
    let parsed: Vec<StoredAgent> = rows
        .into_iter()
        .filter_map(|row| match serde_json::from_value::<StoredAgent>(row.clone()) {
            Ok(agent) => Some(agent),
            Err(e) => {
                warn!(error = %e, row = %row, "Skipping unparseable agent row");
                None
            }
        })
        .collect();

    let agents = sanitize(parsed, "rest");
    debug!(total, loaded = agents.len(), "Loaded agent rows");
    agents
}

impl ConfigStore for RestConfigStore {
    fn name(&self) -> &'static str {
        "rest"
    }

    fn load_all_agent_configs(&self) -> BoxFuture<'_, StoreResult<Vec<StoredAgent>>> {
        Box::pin(self.load())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> RestStoreConfig {
        RestStoreConfig {
            url: "http://127.0.0.1:9/".to_string(),
            table: default_table(),
            api_key: Some("key".to_string()),
            api_key_env: None,
            request_timeout_ms: 500,
        }
    }

    #[test]
    fn test_endpoint_filters_deleted_rows() {
        let store = RestConfigStore::new(&config()).unwrap();
        assert_eq!(
            store.endpoint,
            "http://127.0.0.1:9/rest/v1/traders?select=*&status=in.(active,paused)"
        );
    }

    #[test]
    fn test_missing_key_rejected() {
        let mut config = config();
        config.api_key = None;
        config.api_key_env = Some("MKR_TEST_STORE_KEY_NOT_SET".to_string());
        assert!(matches!(
            RestConfigStore::new(&config),
            Err(StoreError::Config(_))
        ));
    }

    #[test]
    fn test_parse_rows_skips_bad_rows() {
        let rows = vec![
            json!({
                "id": 1,
                "instrument": "rain",
                "max_inventory": 100,
                "spread_threshold": "0.02",
                "price_improvement": "0.01",
                "status": "active",
                "created_at": "2024-05-01T00:00:00Z"
            }),
            json!({ "id": 2, "instrument": "broken" }),
            json!({
                "instrument": "snow",
                "max_inventory": "20",
                "spread_threshold": "0.02",
                "price_improvement": "0.01",
                "status": "paused"
            }),
        ];

        let agents = parse_rows(rows);
        assert_eq!(agents.len(), 2);
        assert_eq!(agents[0].config.instrument.as_str(), "rain");
        assert!(agents[1].is_paused());
    }

    #[tokio::test]
    async fn test_unreachable_store_is_http_error() {
        let store = RestConfigStore::new(&config()).unwrap();
        assert!(matches!(
            store.load_all_agent_configs().await,
            Err(StoreError::HttpClient(_))
        ));
    }
}
