//! Reasoning loop
//!
//! DECIDING → ACTING → OBSERVING → DECIDING … → ANSWERING | ABORTED
//!
//! Every turn ends in exactly one terminal state. ACTING runs at most
//! `max_cycles` times per turn (retries included); once the budget is
//! spent the loop is forced into ANSWERING with whatever it has.

use crate::config::{OrchestratorConfig, RagConfig};
use crate::error::OrchestrationError;
use crate::execution::Dispatcher;
use crate::models::{
    AnswerKind, FinalAnswer, ToolCall, ToolErrorKind, ToolName, ToolResult, Turn, Utterance,
};
use crate::router::{Reply, Router, RoutingDecision};
use crate::synthesis;
use crate::tools::ToolContext;
use crate::Result;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Deciding,
    Acting,
    Observing,
    Answering,
    Aborted,
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopState::Answering | LoopState::Aborted)
    }
}

/// Working memory of one turn; discarded if the turn is cancelled
#[derive(Default)]
struct Scratch {
    calls: Vec<ToolCall>,
    results: Vec<ToolResult>,
    pending: Vec<ToolCall>,
    fresh: Vec<ToolResult>,
    reply: Option<Reply>,
    failure: Option<OrchestrationError>,
    cycles: u32,
    budget_exhausted: bool,
    trace: Vec<String>,
}

pub struct Orchestrator {
    router: Arc<dyn Router>,
    dispatcher: Dispatcher,
    config: OrchestratorConfig,
    rag: RagConfig,
}

impl Orchestrator {
    pub fn new(
        router: Arc<dyn Router>,
        dispatcher: Dispatcher,
        config: OrchestratorConfig,
        rag: RagConfig,
    ) -> Self {
        Self {
            router,
            dispatcher,
            config,
            rag,
        }
    }

    /// Run one turn against a read-only view of the retained history.
    ///
    /// Returns `Err(Cancelled)` if `cancel` fires first; nothing of the
    /// turn survives in that case.
    pub async fn run_turn(
        &self,
        history: &[Turn],
        utterance: Utterance,
        cancel: &CancellationToken,
    ) -> Result<Turn> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(turn_index = utterance.turn_index, "Turn cancelled");
                Err(OrchestrationError::Cancelled)
            }
            turn = self.run_loop(history, &utterance) => Ok(turn),
        }
    }

    async fn run_loop(&self, history: &[Turn], utterance: &Utterance) -> Turn {
        let started = Instant::now();
        let mut scratch = Scratch::default();
        let mut state = LoopState::Deciding;

        info!(
            turn_index = utterance.turn_index,
            history = history.len(),
            "Turn started"
        );
        scratch.trace.push(format!("INPUT: {}", utterance.text));

        while !state.is_terminal() {
            let next = match state {
                LoopState::Deciding => self.decide(history, utterance, &mut scratch).await,
                LoopState::Acting => self.act(history, &mut scratch).await,
                LoopState::Observing => self.observe(&mut scratch),
                LoopState::Answering | LoopState::Aborted => state,
            };
            debug!(from = ?state, to = ?next, cycles = scratch.cycles, "Loop transition");
            state = next;
        }

        let answer = self.answer(state, &mut scratch);

        info!(
            turn_index = utterance.turn_index,
            kind = ?answer.kind,
            cycles = answer.cycles,
            tools = ?answer.tools_used,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Turn finished"
        );

        Turn {
            utterance: utterance.clone(),
            tool_calls: scratch.calls,
            tool_results: scratch.results,
            answer,
        }
    }

    async fn decide(
        &self,
        history: &[Turn],
        utterance: &Utterance,
        scratch: &mut Scratch,
    ) -> LoopState {
        let decision = self
            .router
            .route(utterance, history, &scratch.results)
            .await;

        let calls = match decision {
            Ok(RoutingDecision::Invoke(call)) => vec![call],
            Ok(RoutingDecision::InvokeMultiple(calls)) => calls,
            Ok(RoutingDecision::Respond(reply)) => {
                scratch.trace.push(format!("DECIDE: respond ({:?})", reply.kind));
                scratch.reply = Some(reply);
                return LoopState::Answering;
            }
            Ok(RoutingDecision::Finish) => {
                scratch.trace.push("DECIDE: finish".to_string());
                return LoopState::Answering;
            }
            Err(OrchestrationError::ArgumentExtraction { tool, missing }) => {
                scratch.reply = Some(Reply::clarification(tool, &missing));
                return LoopState::Answering;
            }
            Err(OrchestrationError::NoMatchingTool(_)) => {
                scratch.reply = Some(Reply::out_of_domain());
                return LoopState::Answering;
            }
            Err(e) => {
                error!(error = %e, "Routing failed");
                scratch.trace.push(format!("ABORT: {}", e));
                scratch.failure = Some(e);
                return LoopState::Aborted;
            }
        };

        if calls.is_empty() {
            return LoopState::Answering;
        }

        if scratch.cycles >= self.config.max_cycles {
            warn!(
                max_cycles = self.config.max_cycles,
                "Cycle budget exhausted, answering with gathered results"
            );
            scratch.trace.push("DECIDE: cycle budget exhausted".to_string());
            scratch.budget_exhausted = true;
            return LoopState::Answering;
        }

        scratch.trace.push(format!("DECIDE: invoke {}", tool_names(&calls)));
        scratch.pending = calls;
        LoopState::Acting
    }

    async fn act(&self, history: &[Turn], scratch: &mut Scratch) -> LoopState {
        scratch.cycles += 1;
        let calls = std::mem::take(&mut scratch.pending);

        // Current turn first so a fresh table shadows an older one
        let available = scratch
            .results
            .iter()
            .rev()
            .chain(history.iter().rev().flat_map(|t| t.tool_results.iter().rev()))
            .cloned()
            .collect();
        let ctx = ToolContext::new(available);

        scratch
            .trace
            .push(format!("ACT: cycle {} → {}", scratch.cycles, tool_names(&calls)));

        let outcome = self.dispatcher.dispatch_all(&calls, &ctx).await;
        scratch.calls.extend(calls);

        match outcome {
            Ok(results) => {
                scratch.fresh = results;
                LoopState::Observing
            }
            Err(e) => {
                error!(error = %e, "Dispatch failed");
                scratch.trace.push(format!("ABORT: {}", e));
                scratch.failure = Some(e);
                LoopState::Aborted
            }
        }
    }

    fn observe(&self, scratch: &mut Scratch) -> LoopState {
        let fresh = std::mem::take(&mut scratch.fresh);
        let mut retries = Vec::new();

        for result in &fresh {
            scratch.trace.push(format!(
                "OBSERVE: {} {:?} in {} ms",
                result.tool(),
                result.status(),
                result.elapsed_ms()
            ));

            let retry = scratch
                .calls
                .iter()
                .find(|c| c.call_id == result.call_id())
                .and_then(|call| self.retry_for(call, result));
            if let Some(retry) = retry {
                warn!(
                    call_id = %result.call_id(),
                    retry_id = %retry.call_id,
                    tool = %retry.tool,
                    "Retrying call"
                );
                retries.push(retry);
            }
        }

        scratch.results.extend(fresh);

        if retries.is_empty() {
            return LoopState::Deciding;
        }

        if scratch.cycles >= self.config.max_cycles {
            warn!(
                max_cycles = self.config.max_cycles,
                "Cycle budget exhausted before retry"
            );
            scratch.trace.push("OBSERVE: no budget left to retry".to_string());
            scratch.budget_exhausted = true;
            return LoopState::Answering;
        }

        scratch.trace.push(format!("OBSERVE: retry {}", tool_names(&retries)));
        scratch.pending = retries;
        LoopState::Acting
    }

    /// Retry once on timeout (unchanged) or on an empty policy search
    /// (broadened); everything else is surfaced as is.
    pub fn retry_for(&self, call: &ToolCall, result: &ToolResult) -> Option<ToolCall> {
        if call.retry_of.is_some() {
            return None;
        }

        if result.error().map(|e| e.kind) == Some(ToolErrorKind::TimeoutError) {
            return Some(call.retry_with(call.arguments.clone()));
        }

        if call.tool == ToolName::Rag && result.is_empty_search() {
            let top_k = call
                .arguments
                .get("top_k")
                .and_then(Value::as_u64)
                .unwrap_or(self.rag.top_k as u64);
            let min_score = call
                .arguments
                .get("min_score")
                .and_then(Value::as_f64)
                .unwrap_or(self.rag.min_score as f64);

            let mut args = call.arguments.clone();
            let broadened = top_k.saturating_mul(2).min(self.rag.max_top_k as u64);
            args.insert("top_k".into(), Value::from(broadened));
            args.insert(
                "min_score".into(),
                Value::from(min_score * self.rag.broaden_factor as f64),
            );
            return Some(call.retry_with(args));
        }

        None
    }

    fn answer(&self, state: LoopState, scratch: &mut Scratch) -> FinalAnswer {
        let (kind, text, chart) = match (state, scratch.failure.take(), scratch.reply.take()) {
            (LoopState::Aborted, Some(err), _) => {
                (AnswerKind::SystemError, synthesis::system_error(&err), None)
            }
            (_, _, Some(reply)) => (reply.kind, reply.text, None),
            _ => {
                let composed = synthesis::compose(
                    &scratch.calls,
                    &scratch.results,
                    scratch.budget_exhausted,
                );
                (composed.kind, composed.text, composed.chart)
            }
        };

        let mut tools_used: Vec<ToolName> = Vec::new();
        for call in &scratch.calls {
            if !tools_used.contains(&call.tool) {
                tools_used.push(call.tool);
            }
        }

        scratch.trace.push(format!("ANSWER: {:?}", kind));

        FinalAnswer {
            turn_id: Uuid::new_v4(),
            kind,
            text,
            chart,
            tools_used,
            cycles: scratch.cycles,
            budget_exhausted: scratch.budget_exhausted,
            reasoning_trace: std::mem::take(&mut scratch.trace),
            created_at: Utc::now(),
        }
    }
}

fn tool_names(calls: &[ToolCall]) -> String {
    calls
        .iter()
        .map(|c| c.tool.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
