use serde::{Deserialize, Serialize};

/// How a handler ended, as seen at dispose time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    Cancelled,
    Errored,
    /// Disposed by its owner before reaching a terminal state.
    Abandoned,
}

/// One record per disposed response handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayLog {
    pub message_id: String,
    pub run_id: Option<String>,
    pub outcome: Outcome,
    pub chunk_count: u64,
    /// Length in bytes of the accumulated assistant text.
    pub text_len: usize,
    pub elapsed_ms: u64,
    pub error_kind: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn relay_log_serializes() {
        let log = RelayLog {
            message_id: "m1".into(),
            run_id: Some("run_1".into()),
            outcome: Outcome::Cancelled,
            chunk_count: 3,
            text_len: 12,
            elapsed_ms: 40,
            error_kind: None,
        };
        let v = serde_json::to_value(&log).unwrap();
        assert_eq!(v["outcome"], json!("cancelled"));
        assert_eq!(v["run_id"], json!("run_1"));
        assert_eq!(v["chunk_count"], json!(3));
        assert_eq!(v["error_kind"], json!(null));
    }
}
