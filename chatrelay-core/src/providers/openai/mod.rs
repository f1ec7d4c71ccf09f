pub mod sse;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::config::{AssistantCfg, secret_from_env};
use crate::error::{CoreResult, RelayError};
use crate::http_client::HttpClient;
use crate::model::{ThreadRef, ToolOutput};
use crate::provider::AssistantRuns;
use crate::stream::BoxStreamEv;

const ASSISTANTS_BETA: &str = "assistants=v2";

/// Client for the OpenAI assistants (threads/runs) API.
#[derive(Debug, Clone)]
pub struct OpenAiAssistants {
    http: HttpClient,
    base: String,
    name: String,
    api_key: SecretString,
}

impl OpenAiAssistants {
    pub fn new(http: HttpClient, api_key: SecretString, base: String) -> Self {
        Self {
            http,
            api_key,
            base,
            name: "openai".into(),
        }
    }

    /// Build from config, reading the key from the configured environment variable.
    pub fn from_config(cfg: &AssistantCfg, http: HttpClient) -> CoreResult<Self> {
        let api_key = secret_from_env(&cfg.api_key_env).ok_or_else(|| {
            RelayError::Validation(format!(
                "missing assistant api key: set {}",
                cfg.api_key_env
            ))
        })?;
        Ok(Self::new(http, api_key, cfg.base.clone()))
    }

    #[cfg(test)]
    pub fn new_for_tests(server_base: &str) -> Self {
        Self::new(
            HttpClient::new_default().unwrap(),
            SecretString::new("test-key".into()),
            server_base.to_string(),
        )
    }

    fn headers(&self) -> Vec<(String, String)> {
        vec![
            (
                "Authorization".to_string(),
                format!("Bearer {}", self.api_key.expose_secret()),
            ),
            ("OpenAI-Beta".to_string(), ASSISTANTS_BETA.to_string()),
        ]
    }

    async fn post<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &T,
    ) -> CoreResult<R> {
        let owned_headers = self.headers();
        let hdrs: Vec<(&str, &str)> = owned_headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let url = format!("{}{}", self.base, path);
        self.http.post_json(&url, body, &hdrs).await
    }

    async fn post_stream<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> CoreResult<BoxStreamEv> {
        let owned_headers = self.headers();
        let hdrs: Vec<(&str, &str)> = owned_headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let url = format!("{}{}", self.base, path);
        let lines = self.http.post_sse_lines(&url, body, &hdrs).await?;
        Ok(sse::decode_events(lines))
    }

    /// Create an assistant exposing the given function tool definitions.
    pub async fn create_assistant(
        &self,
        model: &str,
        instructions: Option<&str>,
        tools: Vec<Value>,
    ) -> CoreResult<String> {
        let req = OACreateAssistant {
            model,
            instructions,
            tools,
        };
        let resp: OAObject = self.post("/v1/assistants", &req).await?;
        Ok(resp.id)
    }

    pub async fn create_thread(&self) -> CoreResult<ThreadRef> {
        let resp: OAObject = self.post("/v1/threads", &serde_json::json!({})).await?;
        Ok(ThreadRef { id: resp.id })
    }

    /// Append a user message to the thread; returns the provider message id.
    pub async fn create_message(&self, thread: &ThreadRef, text: &str) -> CoreResult<String> {
        let req = OACreateMessage {
            role: "user",
            content: text,
        };
        let resp: OAObject = self
            .post(&format!("/v1/threads/{}/messages", thread.id), &req)
            .await?;
        Ok(resp.id)
    }

    /// Start a streamed run of `assistant_id` on the thread.
    pub async fn stream_run(
        &self,
        thread: &ThreadRef,
        assistant_id: &str,
    ) -> CoreResult<BoxStreamEv> {
        let req = OACreateRun {
            assistant_id,
            stream: true,
        };
        self.post_stream(&format!("/v1/threads/{}/runs", thread.id), &req)
            .await
    }
}

// ---- Wire structs (minimal) ----
#[derive(Serialize)]
struct OACreateAssistant<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<&'a str>,
    tools: Vec<Value>,
}

#[derive(Serialize)]
struct OACreateMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct OACreateRun<'a> {
    assistant_id: &'a str,
    stream: bool,
}

#[derive(Serialize)]
struct OASubmitToolOutputs<'a> {
    tool_outputs: &'a [ToolOutput],
    stream: bool,
}

#[derive(Deserialize)]
struct OAObject {
    id: String,
}

#[async_trait]
impl AssistantRuns for OpenAiAssistants {
    fn name(&self) -> &str {
        &self.name
    }

    async fn cancel_run(&self, thread: &ThreadRef, run_id: &str) -> CoreResult<()> {
        let _: Value = self
            .post(
                &format!("/v1/threads/{}/runs/{}/cancel", thread.id, run_id),
                &serde_json::json!({}),
            )
            .await?;
        Ok(())
    }

    async fn submit_tool_outputs(
        &self,
        thread: &ThreadRef,
        run_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> CoreResult<BoxStreamEv> {
        let req = OASubmitToolOutputs {
            tool_outputs: &outputs,
            stream: true,
        };
        self.post_stream(
            &format!("/v1/threads/{}/runs/{}/submit_tool_outputs", thread.id, run_id),
            &req,
        )
        .await
    }
}
