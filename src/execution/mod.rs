//! Tool dispatch
//!
//! Turns routed calls into results. Validation, decoding and the
//! per-invocation timeout live here so adapters only implement their
//! own semantics. Adapter failures are values; the only `Err` is a
//! routed tool with no registered adapter.

use crate::error::OrchestrationError;
use crate::models::{ToolCall, ToolErrorKind, ToolFailure, ToolResult};
use crate::tools::{ToolContext, ToolRegistry};
use crate::Result;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::{debug, error, warn};

pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// Validate, invoke under the timeout, and wrap the outcome
    pub async fn dispatch(&self, call: &ToolCall, ctx: &ToolContext) -> Result<ToolResult> {
        let tool = self
            .registry
            .get(call.tool)
            .ok_or(OrchestrationError::ToolNotRegistered(call.tool))?;

        let start = Instant::now();

        if let Err(failure) = tool.spec().validate(&call.arguments) {
            warn!(call_id = %call.call_id, tool = %call.tool, %failure, "Arguments rejected by schema");
            return Ok(ToolResult::failure(call, failure, 0));
        }

        debug!(call_id = %call.call_id, tool = %call.tool, "Invoking tool");

        // Adapters may block; they run on the blocking pool.
        let invocation = {
            let (call, ctx) = (call.clone(), ctx.clone());
            let runtime = Handle::current();
            tokio::task::spawn_blocking(move || runtime.block_on(tool.invoke(&call, &ctx)))
        };

        let outcome = tokio::time::timeout(self.timeout, invocation).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(Ok(Ok(payload))) => ToolResult::success(call, payload, elapsed_ms),
            Ok(Ok(Err(failure))) => {
                warn!(call_id = %call.call_id, tool = %call.tool, %failure, "Tool failed");
                ToolResult::failure(call, failure, elapsed_ms)
            }
            Ok(Err(join_error)) => {
                error!(call_id = %call.call_id, tool = %call.tool, %join_error, "Tool worker died");
                ToolResult::failure(
                    call,
                    ToolFailure::data(format!("{} stopped unexpectedly", call.tool)),
                    elapsed_ms,
                )
            }
            Err(_) => {
                warn!(call_id = %call.call_id, tool = %call.tool, elapsed_ms, "Tool timed out");
                ToolResult::failure(
                    call,
                    ToolFailure::new(
                        ToolErrorKind::TimeoutError,
                        format!(
                            "{} did not finish within {} ms",
                            call.tool,
                            self.timeout.as_millis()
                        ),
                    ),
                    elapsed_ms,
                )
            }
        };

        debug!(
            call_id = %call.call_id,
            status = ?result.status(),
            elapsed_ms,
            "Tool finished"
        );

        Ok(result)
    }

    /// Run independent calls concurrently; results keep the call order
    pub async fn dispatch_all(
        &self,
        calls: &[ToolCall],
        ctx: &ToolContext,
    ) -> Result<Vec<ToolResult>> {
        if let Some(call) = calls.iter().find(|c| self.registry.get(c.tool).is_none()) {
            return Err(OrchestrationError::ToolNotRegistered(call.tool));
        }

        join_all(calls.iter().map(|call| self.dispatch(call, ctx)))
            .await
            .into_iter()
            .collect()
    }
}
