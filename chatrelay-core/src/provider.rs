use async_trait::async_trait;

use crate::error::CoreResult;
use crate::model::{ThreadRef, ToolOutput};
use crate::stream::BoxStreamEv;

/// Run-level operations the response handler needs from the assistant provider.
#[async_trait]
pub trait AssistantRuns: Send + Sync {
    fn name(&self) -> &str;

    /// Ask the provider to stop a run. Callers treat this as best-effort.
    async fn cancel_run(&self, thread: &ThreadRef, run_id: &str) -> CoreResult<()>;

    /// Submit tool outputs for a paused run; the run resumes on the returned stream.
    async fn submit_tool_outputs(
        &self,
        thread: &ThreadRef,
        run_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> CoreResult<BoxStreamEv>;
}
