use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::model::{ToolCall, ToolOutput};
use crate::web_search::WebSearch;

/// A function the assistant may call mid-run.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Function definition advertised to the assistant.
    fn definition(&self) -> Value;

    /// Run with the model's raw JSON arguments. Failures are reported inside the
    /// returned string; this never errors.
    async fn call(&self, arguments: &str) -> String;
}

/// Tools available to a run, by function name.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions for every registered tool, sorted by name.
    pub fn definitions(&self) -> Vec<Value> {
        let mut names: Vec<&String> = self.tools.keys().collect();
        names.sort();
        names.into_iter().map(|n| self.tools[n].definition()).collect()
    }

    /// Execute calls in order. Unknown tools get an error output so the run can continue.
    pub async fn execute(&self, calls: &[ToolCall]) -> Vec<ToolOutput> {
        let mut outputs = Vec::with_capacity(calls.len());
        for call in calls {
            let output = match self.get(&call.name) {
                Some(tool) => tool.call(&call.arguments).await,
                None => {
                    tracing::warn!(tool = %call.name, "assistant requested unknown tool");
                    json!({ "error": format!("Unknown tool: {}", call.name) }).to_string()
                }
            };
            outputs.push(ToolOutput {
                tool_call_id: call.id.clone(),
                output,
            });
        }
        outputs
    }
}

pub const WEB_SEARCH_TOOL: &str = "web_search";

#[derive(Deserialize)]
struct WebSearchArgs {
    query: String,
}

/// Exposes [`WebSearch`] as the `web_search` function.
pub struct WebSearchTool {
    search: WebSearch,
}

impl WebSearchTool {
    pub fn new(search: WebSearch) -> Self {
        Self { search }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        WEB_SEARCH_TOOL
    }

    fn definition(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": WEB_SEARCH_TOOL,
                "description": "Search the web for current information, news, facts or recent events.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "The search query to find information about"
                        }
                    },
                    "required": ["query"]
                }
            }
        })
    }

    async fn call(&self, arguments: &str) -> String {
        match serde_json::from_str::<WebSearchArgs>(arguments) {
            Ok(args) => self.search.search(&args.query).await,
            Err(e) => json!({
                "error": "Invalid web_search arguments",
                "details": e.to_string(),
            })
            .to_string(),
        }
    }
}
