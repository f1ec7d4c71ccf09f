use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::{Value, json};

use crate::config::{WebSearchCfg, secret_from_env};
use crate::http_client::HttpClient;

pub const NOT_CONFIGURED: &str = "Web search is not available, api key not configured";

/// Outbound web search. Every outcome, including failures, comes back as a
/// JSON string so it can be handed to the assistant as a tool output.
#[derive(Debug, Clone)]
pub struct WebSearch {
    http: HttpClient,
    api_key: Option<SecretString>,
    cfg: WebSearchCfg,
}

#[derive(Serialize)]
struct SearchReq<'a> {
    query: &'a str,
    search_depth: &'a str,
    max_results: u32,
    include_answer: bool,
    include_raw_content: bool,
}

impl WebSearch {
    pub fn new(http: HttpClient, api_key: Option<SecretString>, cfg: WebSearchCfg) -> Self {
        Self { http, api_key, cfg }
    }

    /// Build from config; a missing key is not an error here, `search` reports it.
    pub fn from_config(cfg: &WebSearchCfg, http: HttpClient) -> Self {
        Self::new(http, secret_from_env(&cfg.api_key_env), cfg.clone())
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    pub async fn search(&self, query: &str) -> String {
        let Some(key) = &self.api_key else {
            return json!({ "error": NOT_CONFIGURED }).to_string();
        };

        tracing::info!(query, "performing web search");

        let body = SearchReq {
            query,
            search_depth: &self.cfg.search_depth,
            max_results: self.cfg.max_results,
            include_answer: self.cfg.include_answer,
            include_raw_content: self.cfg.include_raw_content,
        };
        let auth = format!("Bearer {}", key.expose_secret());
        let url = format!("{}/search", self.cfg.base);

        match self
            .http
            .post_json_raw(&url, &body, &[("Authorization", auth.as_str())])
            .await
        {
            Ok((status, text)) if !status.is_success() => {
                tracing::warn!(query, status = status.as_u16(), error = %text, "web search failed");
                json!({
                    "error": format!("Web search failed with status: {}", status.as_u16()),
                    "details": text,
                })
                .to_string()
            }
            Ok((_, text)) => match serde_json::from_str::<Value>(&text) {
                Ok(data) => {
                    tracing::info!(query, "web search succeeded");
                    data.to_string()
                }
                Err(e) => {
                    tracing::warn!(query, error = %e, "web search returned invalid json");
                    json!({ "error": "Web search failed", "details": e.to_string() }).to_string()
                }
            },
            Err(e) => {
                tracing::error!(query, error = %e, "web search request failed");
                json!({ "error": "Web search failed", "details": e.to_string() }).to_string()
            }
        }
    }
}
