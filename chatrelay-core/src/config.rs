use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AssistantCfg {
    /// Name of the environment variable that contains the API key.
    #[serde(default = "default_assistant_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_assistant_base")]
    pub base: String,
    /// Existing assistant to run against. When absent the CLI creates one.
    #[serde(default)]
    pub assistant_id: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub instructions: Option<String>,
}

impl Default for AssistantCfg {
    fn default() -> Self {
        Self {
            api_key_env: default_assistant_key_env(),
            base: default_assistant_base(),
            assistant_id: None,
            model: default_model(),
            instructions: None,
        }
    }
}

fn default_assistant_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_assistant_base() -> String {
    "https://api.openai.com".into()
}
fn default_model() -> String {
    "gpt-4o".into()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct WebSearchCfg {
    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_search_base")]
    pub base: String,
    #[serde(default = "default_search_depth")]
    pub search_depth: String,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default = "default_true")]
    pub include_answer: bool,
    #[serde(default)]
    pub include_raw_content: bool,
}

impl Default for WebSearchCfg {
    fn default() -> Self {
        Self {
            api_key_env: default_search_key_env(),
            base: default_search_base(),
            search_depth: default_search_depth(),
            max_results: default_max_results(),
            include_answer: true,
            include_raw_content: false,
        }
    }
}

fn default_search_key_env() -> String {
    "TAVILY_API_KEY".into()
}
fn default_search_base() -> String {
    "https://api.tavily.com".into()
}
fn default_search_depth() -> String {
    "advanced".into()
}
fn default_max_results() -> u32 {
    5
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HandlerCfg {
    /// Minimum gap between two partial message updates (default 1000ms).
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

impl Default for HandlerCfg {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

impl HandlerCfg {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

fn default_flush_interval_ms() -> u64 {
    1_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Total request timeout in milliseconds (default 60000ms)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    60_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Config {
    #[serde(default)]
    pub assistant: AssistantCfg,
    #[serde(default)]
    pub web_search: WebSearchCfg,
    #[serde(default)]
    pub handler: HandlerCfg,
    #[serde(default)]
    pub http: HttpCfg,
}

impl Config {
    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> crate::error::CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(crate::error::RelayError::from)?;
        let s =
            std::str::from_utf8(&bytes).map_err(|e| crate::error::RelayError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::RelayError::Other(e.into()))?,
            Some("toml") => toml::from_str::<Self>(s)
                .map_err(|e| crate::error::RelayError::Other(e.into()))?,
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::RelayError::Other(e.into()))
                .or_else(|_| {
                    toml::from_str::<Self>(s)
                        .map_err(|e| crate::error::RelayError::Other(e.into()))
                })?,
        };
        Ok(cfg)
    }
}

/// Read a secret from the environment variable named by `env_name`.
/// Empty values count as missing.
pub fn secret_from_env(env_name: &str) -> Option<SecretString> {
    match std::env::var(env_name) {
        Ok(v) if !v.trim().is_empty() => Some(SecretString::new(v.into_boxed_str())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn load_from_json() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("relay.json");
        let json = r#"{
          "assistant": {"api_key_env":"MY_OPENAI_KEY","assistant_id":"asst_123"},
          "web_search": {"max_results": 3, "search_depth": "basic"},
          "handler": {"flush_interval_ms": 250}
        }"#;
        fs::write(&file, json).unwrap();
        let cfg = Config::from_path(&file).unwrap();
        assert_eq!(cfg.assistant.api_key_env, "MY_OPENAI_KEY");
        assert_eq!(cfg.assistant.assistant_id.as_deref(), Some("asst_123"));
        assert_eq!(cfg.assistant.base, "https://api.openai.com");
        assert_eq!(cfg.web_search.max_results, 3);
        assert_eq!(cfg.web_search.search_depth, "basic");
        assert!(cfg.web_search.include_answer);
        assert_eq!(cfg.handler.flush_interval(), Duration::from_millis(250));
        assert_eq!(cfg.http.connect_timeout_ms, 5_000);
        assert_eq!(cfg.http.request_timeout_ms, 60_000);
        assert_eq!(cfg.http.pool_max_idle_per_host, None);
    }

    #[test]
    fn empty_document_uses_defaults() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("empty.json");
        fs::write(&file, "{}").unwrap();
        let cfg = Config::from_path(&file).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.handler.flush_interval_ms, 1_000);
        assert_eq!(cfg.web_search.api_key_env, "TAVILY_API_KEY");
        assert_eq!(cfg.web_search.base, "https://api.tavily.com");
        assert!(!cfg.web_search.include_raw_content);
    }

    #[test]
    fn missing_file_returns_io_error() {
        let missing = std::path::PathBuf::from("/definitely/not/here/chatrelay-missing.json");
        let err = Config::from_path(&missing).unwrap_err();
        match err {
            crate::error::RelayError::Io(_) => {}
            other => panic!("expected Io error, got: {:?}", other),
        }
    }

    #[test]
    fn bad_utf8_returns_other_error() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("bad.bin");
        fs::write(&file, vec![0xff, 0xfe, 0xfd, 0x00, 0x80]).unwrap();
        let err = Config::from_path(&file).unwrap_err();
        match err {
            crate::error::RelayError::Other(_) => {}
            other => panic!("expected Other(utf8) error, got: {:?}", other),
        }
    }

    #[test]
    fn bad_json_returns_other_error() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("bad.json");
        let json = r#"{ "handler": { "flush_interval_ms": "soon" }"#;
        fs::write(&file, json).unwrap();
        let err = Config::from_path(&file).unwrap_err();
        match err {
            crate::error::RelayError::Other(_) => {}
            other => panic!("expected Other(json parse) error, got: {:?}", other),
        }
    }

    #[test]
    fn load_from_toml() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("relay.toml");
        let toml = r#"
[assistant]
model = "gpt-4o-mini"
instructions = "Be brief."

[web_search]
api_key_env = "SEARCH_KEY"
include_answer = false

[http]
connect_timeout_ms = 1000
"#;
        fs::write(&file, toml).unwrap();
        let cfg = Config::from_path(&file).unwrap();
        assert_eq!(cfg.assistant.model, "gpt-4o-mini");
        assert_eq!(cfg.assistant.instructions.as_deref(), Some("Be brief."));
        assert_eq!(cfg.web_search.api_key_env, "SEARCH_KEY");
        assert!(!cfg.web_search.include_answer);
        assert_eq!(cfg.http.connect_timeout_ms, 1_000);
        assert_eq!(cfg.http.request_timeout_ms, 60_000);
        assert_eq!(cfg.handler.flush_interval_ms, 1_000);
    }

    #[test]
    fn unknown_extension_falls_back_to_json_then_toml() {
        let dir = tempdir().unwrap();
        let json_path = dir.path().join("relay.conf");
        fs::write(&json_path, r#"{"handler":{"flush_interval_ms":10}}"#).unwrap();
        let cfg_json_first = Config::from_path(&json_path).unwrap();
        assert_eq!(cfg_json_first.handler.flush_interval_ms, 10);

        let toml_path = dir.path().join("relay2.conf");
        let toml = r#"
[handler]
flush_interval_ms = 20
"#;
        fs::write(&toml_path, toml).unwrap();
        let cfg_toml_fallback = Config::from_path(&toml_path).unwrap();
        assert_eq!(cfg_toml_fallback.handler.flush_interval_ms, 20);
        assert_eq!(cfg_toml_fallback.http.connect_timeout_ms, 5_000);
    }

    #[test]
    fn secret_from_env_treats_unset_as_missing() {
        assert!(secret_from_env("CHATRELAY_TEST_DEFINITELY_UNSET_VAR").is_none());
    }
}
