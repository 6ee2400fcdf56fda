//! Intent router
//!
//! Maps an utterance (plus the retained history and whatever the current
//! turn has produced so far) to a [`RoutingDecision`]. The default
//! [`IntentRouter`] scores the utterance against each tool's keyword
//! vocabulary, extracts arguments with the rules in [`extract`], and only
//! consults a [`ReasoningEngine`] when no tool matches.

use crate::config::ToolPriority;
use crate::data::{DATE_FIELD, ITEM_FIELD, REGION_FIELD, STATUS_FIELD};
use crate::error::OrchestrationError;
use crate::models::{
    AnswerKind, ChartType, DataTable, ToolArguments, ToolCall, ToolName, ToolResult, Turn,
    Utterance,
};
use crate::tools::analytics::{AnalyticsArgs, Filter, FilterOp};
use crate::tools::{encode_args, ToolSpec};
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub mod engine;
pub mod extract;

pub use engine::{EnginePrompt, EngineReply, ReasoningEngine};
pub use extract::Lexicon;

use extract::{has_any, normalize};

const CHIT_CHAT: &[&str] = &[
    "hi", "hello", "hey", "thanks", "thank you", "good morning", "good afternoon",
    "good evening", "help", "what can you do", "who are you",
];

const CAPABILITIES: &str = "I'm BizNavi, your operations assistant. I can:\n\
- answer sales questions (\"total sales by Category\", \"how many orders in April\")\n\
- look up company policies and SOPs (\"what is the return policy?\")\n\
- forecast item demand (\"forecast demand for 'Set' next month\")\n\
- chart sales data (\"visualize total sales by Category\")";

const OUT_OF_DOMAIN: &str = "I can only help with operational questions about sales figures, \
company policies, demand forecasts and charts of sales data. Try asking, for example, \
\"What were total sales by Category?\"";

/// Text answer produced without invoking a tool
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub kind: AnswerKind,
    pub text: String,
}

impl Reply {
    pub fn new(kind: AnswerKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn out_of_domain() -> Self {
        Self::new(AnswerKind::OutOfDomain, OUT_OF_DOMAIN)
    }

    /// Question back to the user for arguments the text did not give
    pub fn clarification(tool: ToolName, missing: &[String]) -> Self {
        let has = |name: &str| missing.iter().any(|m| m == name);
        let text = match tool {
            ToolName::Forecast if has("item") && has("horizon_days") => {
                "Which item should I forecast, and how far ahead? For example: \
                 Forecast demand for 'Kurta' next month."
                    .to_string()
            }
            ToolName::Forecast if has("item") => {
                "Which item should I forecast? For example: Forecast demand for 'Kurta' next month."
                    .to_string()
            }
            ToolName::Forecast => "How far ahead should I forecast? For example 'next week', \
                                   'next month' or 'next 14 days'."
                .to_string(),
            ToolName::Visualize => "What should the chart be grouped by? For example: \
                                    Visualize total sales by Category."
                .to_string(),
            _ => format!(
                "I need a bit more detail to run {}: please specify {}.",
                tool,
                missing.join(", ")
            ),
        };
        Self::new(AnswerKind::Clarification, text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RoutingDecision {
    Invoke(ToolCall),
    InvokeMultiple(Vec<ToolCall>),
    Respond(Reply),
    /// Enough has been gathered this turn; synthesize now
    Finish,
}

#[async_trait]
pub trait Router: Send + Sync {
    /// `scratch` holds the results the current turn has produced so far
    async fn route(
        &self,
        utterance: &Utterance,
        history: &[Turn],
        scratch: &[ToolResult],
    ) -> Result<RoutingDecision>;
}

/// What the rules understood from the text
enum Intent {
    Call(ToolCall),
    Multiple(Vec<ToolCall>),
    /// Chart of an analytics aggregate, computed first if needed
    Chart {
        analytics: ToolArguments,
        chart_type: ChartType,
    },
    Reply(Reply),
}

pub struct IntentRouter {
    specs: Vec<ToolSpec>,
    lexicon: Lexicon,
    priority: ToolPriority,
    engine: Option<Arc<dyn ReasoningEngine>>,
    engine_timeout: Duration,
}

impl IntentRouter {
    pub fn new(specs: Vec<ToolSpec>, lexicon: Lexicon, priority: ToolPriority) -> Self {
        Self {
            specs,
            lexicon,
            priority,
            engine: None,
            engine_timeout: Duration::from_secs(20),
        }
    }

    pub fn with_engine(mut self, engine: Arc<dyn ReasoningEngine>, timeout: Duration) -> Self {
        self.engine = Some(engine);
        self.engine_timeout = timeout;
        self
    }

    fn spec(&self, tool: ToolName) -> Option<&ToolSpec> {
        self.specs.iter().find(|s| s.name == tool)
    }

    /// Highest keyword score wins, ties go to the configured priority.
    /// Chart requests absorb the analytics vocabulary they are built on.
    fn best_tool(&self, normalized: &str) -> Option<ToolName> {
        let score = |tool: ToolName| {
            self.spec(tool).map_or(0, |spec| {
                spec.keywords
                    .iter()
                    .filter(|k| extract::has_word(normalized, k))
                    .count()
            })
        };

        let analytics = score(ToolName::Analytics);
        let scores = ToolName::ALL.iter().map(|tool| {
            let mut s = score(*tool);
            if *tool == ToolName::Visualize && s > 0 {
                s += analytics;
            }
            (*tool, s)
        });

        scores
            .filter(|(_, s)| *s > 0)
            .max_by(|a, b| {
                a.1.cmp(&b.1)
                    .then_with(|| self.priority.rank(b.0).cmp(&self.priority.rank(a.0)))
            })
            .map(|(tool, _)| tool)
    }

    fn intent(&self, text: &str, history: &[Turn]) -> Result<Intent> {
        if let Some(calls) = self.multi_intent(text, history) {
            return Ok(Intent::Multiple(calls));
        }

        let normalized = normalize(text);
        if let Some(tool) = self.best_tool(&normalized) {
            return self.build(tool, text, &normalized, history);
        }

        if has_any(&normalized, CHIT_CHAT) {
            let text = if has_any(&normalized, &["thanks", "thank you"]) {
                format!("You're welcome! {}", CAPABILITIES)
            } else {
                CAPABILITIES.to_string()
            };
            return Ok(Intent::Reply(Reply::new(AnswerKind::Conversational, text)));
        }

        if let Some(intent) = self.follow_up(text, &normalized, history) {
            return Ok(intent);
        }

        Err(OrchestrationError::NoMatchingTool(text.to_string()))
    }

    /// Distinct clauses resolving to distinct tools with complete arguments
    fn multi_intent(&self, text: &str, history: &[Turn]) -> Option<Vec<ToolCall>> {
        let parts = extract::clauses(text);
        if parts.len() < 2 {
            return None;
        }

        let mut calls: Vec<ToolCall> = Vec::with_capacity(parts.len());
        for clause in &parts {
            let normalized = normalize(clause);
            let tool = self.best_tool(&normalized)?;
            if tool == ToolName::Visualize || calls.iter().any(|c| c.tool == tool) {
                return None;
            }
            match self.build(tool, clause, &normalized, history).ok()? {
                Intent::Call(call) => calls.push(call),
                _ => return None,
            }
        }

        Some(calls)
    }

    fn build(
        &self,
        tool: ToolName,
        text: &str,
        normalized: &str,
        history: &[Turn],
    ) -> Result<Intent> {
        match tool {
            ToolName::Analytics => Ok(Intent::Call(ToolCall::new(
                tool,
                encode_args(&self.analytics_args(text, normalized)),
            ))),
            ToolName::Rag => {
                let mut args = ToolArguments::new();
                args.insert("query".into(), Value::from(text.trim()));
                Ok(Intent::Call(ToolCall::new(tool, args)))
            }
            ToolName::Forecast => {
                let mut args = ToolArguments::new();
                if let Some(item) = self.lexicon.item(text, normalized) {
                    args.insert("item".into(), Value::from(item));
                }
                if let Some(days) = extract::horizon_days(text) {
                    args.insert("horizon_days".into(), Value::from(days));
                }
                self.complete(tool, args).map(Intent::Call)
            }
            ToolName::Visualize => {
                let analytics = self.analytics_args(text, normalized);
                if analytics.group_by.is_none() && latest_table(history).is_none() {
                    return Err(OrchestrationError::ArgumentExtraction {
                        tool,
                        missing: vec!["x".to_string()],
                    });
                }
                Ok(Intent::Chart {
                    analytics: encode_args(&analytics),
                    chart_type: extract::chart_type(normalized),
                })
            }
        }
    }

    /// Turn extracted arguments into a call, or report what is missing
    fn complete(&self, tool: ToolName, args: ToolArguments) -> Result<ToolCall> {
        let missing = self
            .spec(tool)
            .map(|spec| spec.missing_required(&args))
            .unwrap_or_default();
        if missing.is_empty() {
            Ok(ToolCall::new(tool, args))
        } else {
            Err(OrchestrationError::ArgumentExtraction { tool, missing })
        }
    }

    fn analytics_args(&self, text: &str, normalized: &str) -> AnalyticsArgs {
        let (metric, net) = extract::metric(normalized);
        let mut args = AnalyticsArgs {
            metric,
            group_by: self.lexicon.group_by(text),
            filter: Vec::new(),
        };

        if let Some(item) = self.lexicon.item(text, normalized) {
            self.set_eq_filter(&mut args, ITEM_FIELD, item);
        }
        if let Some(region) = self.lexicon.region(normalized) {
            self.set_eq_filter(&mut args, REGION_FIELD, region);
        }
        if let Some(month) = extract::month(text) {
            self.set_month_filter(&mut args, month);
        }

        let status_field = self.lexicon.field(STATUS_FIELD);
        if let Some(field) = status_field {
            if net {
                args.filter
                    .push(Filter::new(field, FilterOp::NotContains, "Cancelled"));
            } else if let Some(status) = extract::status(normalized) {
                args.filter.push(Filter::new(field, FilterOp::Contains, status));
            }
        }

        args
    }

    fn set_eq_filter(&self, args: &mut AnalyticsArgs, field: &str, value: String) {
        if let Some(field) = self.lexicon.field(field) {
            args.filter
                .retain(|f| !(f.op == FilterOp::Eq && f.field.eq_ignore_ascii_case(&field)));
            args.filter.push(Filter::new(field, FilterOp::Eq, value));
        }
    }

    fn set_month_filter(&self, args: &mut AnalyticsArgs, month: u32) {
        if let Some(field) = self.lexicon.field(DATE_FIELD) {
            args.filter.retain(|f| f.op != FilterOp::Month);
            args.filter
                .push(Filter::new(field, FilterOp::Month, month.to_string()));
        }
    }

    /// No tool vocabulary, but something to substitute into the last call
    fn follow_up(&self, text: &str, normalized: &str, history: &[Turn]) -> Option<Intent> {
        let item = self.lexicon.item(text, normalized);
        let region = self.lexicon.region(normalized);
        let group_by = self.lexicon.group_by(text);
        let horizon = extract::horizon_days(text);
        let month = extract::month(text);
        if item.is_none()
            && region.is_none()
            && group_by.is_none()
            && horizon.is_none()
            && month.is_none()
        {
            return None;
        }

        let mut calls = history
            .iter()
            .rev()
            .flat_map(|t| t.tool_calls.iter().rev());
        let previous = calls.next()?;

        let override_analytics = |base: &ToolCall| -> Option<AnalyticsArgs> {
            let mut args: AnalyticsArgs =
                serde_json::from_value(Value::Object(base.arguments.clone())).ok()?;
            if let Some(item) = item.clone() {
                self.set_eq_filter(&mut args, ITEM_FIELD, item);
            }
            if let Some(region) = region.clone() {
                self.set_eq_filter(&mut args, REGION_FIELD, region);
            }
            if let Some(month) = month {
                self.set_month_filter(&mut args, month);
            }
            if group_by.is_some() {
                args.group_by = group_by.clone();
            }
            Some(args)
        };

        debug!(tool = %previous.tool, "Follow-up reuses previous call");

        match previous.tool {
            ToolName::Forecast => {
                let mut args = previous.arguments.clone();
                if let Some(item) = item.clone() {
                    args.insert("item".into(), Value::from(item));
                }
                if let Some(days) = horizon {
                    args.insert("horizon_days".into(), Value::from(days));
                }
                Some(Intent::Call(ToolCall::new(ToolName::Forecast, args)))
            }
            ToolName::Analytics => {
                let args = override_analytics(previous)?;
                Some(Intent::Call(ToolCall::new(
                    ToolName::Analytics,
                    encode_args(&args),
                )))
            }
            ToolName::Rag => {
                let mut args = ToolArguments::new();
                args.insert("query".into(), Value::from(text.trim()));
                Some(Intent::Call(ToolCall::new(ToolName::Rag, args)))
            }
            ToolName::Visualize => {
                let base = calls.find(|c| c.tool == ToolName::Analytics)?;
                let args = override_analytics(base)?;
                let chart_type = previous
                    .arg_str("chart_type")
                    .and_then(|t| t.parse().ok())
                    .unwrap_or_else(|| extract::chart_type(normalized));
                Some(Intent::Chart {
                    analytics: encode_args(&args),
                    chart_type,
                })
            }
        }
    }

    /// First decision of a turn
    fn start(&self, intent: Intent, history: &[Turn]) -> RoutingDecision {
        match intent {
            Intent::Call(call) => RoutingDecision::Invoke(call),
            Intent::Multiple(calls) => RoutingDecision::InvokeMultiple(calls),
            Intent::Reply(reply) => RoutingDecision::Respond(reply),
            Intent::Chart {
                analytics,
                chart_type,
            } => match reusable_table(history, &analytics) {
                Some((result, table)) => {
                    RoutingDecision::Invoke(visualize_call(result, table, chart_type))
                }
                None => RoutingDecision::Invoke(ToolCall::new(
                    ToolName::Analytics,
                    with_latest_grouping(history, analytics),
                )),
            },
        }
    }

    /// Re-entry after Observing: chart the freshly computed table, or stop
    fn resume(&self, text: &str, history: &[Turn], scratch: &[ToolResult]) -> RoutingDecision {
        if scratch.iter().any(|r| r.tool() == ToolName::Visualize) {
            return RoutingDecision::Finish;
        }

        match self.intent(text, history) {
            Ok(Intent::Chart { chart_type, .. }) => scratch
                .iter()
                .rev()
                .find_map(|r| r.table().map(|t| (r, t)))
                .map(|(result, table)| {
                    RoutingDecision::Invoke(visualize_call(result, table, chart_type))
                })
                .unwrap_or(RoutingDecision::Finish),
            _ => RoutingDecision::Finish,
        }
    }

    async fn fallback(&self, text: &str, history: &[Turn]) -> Result<RoutingDecision> {
        let Some(engine) = &self.engine else {
            debug!("No tool matched and no reasoning engine configured");
            return Ok(RoutingDecision::Respond(Reply::out_of_domain()));
        };

        let prompt = EnginePrompt::new(
            self.specs.iter().map(ToolSpec::describe).collect(),
            history,
            text,
        );

        let raw = match tokio::time::timeout(self.engine_timeout, engine.complete(&prompt)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e @ OrchestrationError::ReasoningEngineUnavailable(_))) => return Err(e),
            Ok(Err(e)) => {
                return Err(OrchestrationError::ReasoningEngineUnavailable(e.to_string()));
            }
            Err(_) => {
                return Err(OrchestrationError::ReasoningEngineUnavailable(format!(
                    "no reply within {} ms",
                    self.engine_timeout.as_millis()
                )));
            }
        };

        match EngineReply::parse(&raw) {
            EngineReply::Text(text) if text.is_empty() => {
                Ok(RoutingDecision::Respond(Reply::out_of_domain()))
            }
            EngineReply::Text(text) => Ok(RoutingDecision::Respond(Reply::new(
                AnswerKind::Conversational,
                text,
            ))),
            EngineReply::ToolProposal { tool, arguments } => {
                let Ok(tool) = tool.parse::<ToolName>() else {
                    warn!(proposed = %tool, "Reasoning engine proposed an unknown tool");
                    return Ok(RoutingDecision::Respond(Reply::out_of_domain()));
                };
                info!(tool = %tool, "Reasoning engine proposed a tool");
                match self.complete(tool, arguments) {
                    Ok(call) => Ok(RoutingDecision::Invoke(call)),
                    Err(OrchestrationError::ArgumentExtraction { tool, missing }) => Ok(
                        RoutingDecision::Respond(Reply::clarification(tool, &missing)),
                    ),
                    Err(e) => Err(e),
                }
            }
        }
    }
}

#[async_trait]
impl Router for IntentRouter {
    async fn route(
        &self,
        utterance: &Utterance,
        history: &[Turn],
        scratch: &[ToolResult],
    ) -> Result<RoutingDecision> {
        let text = utterance.text.trim();

        if !scratch.is_empty() {
            return Ok(self.resume(text, history, scratch));
        }

        if text.is_empty() {
            return Ok(RoutingDecision::Respond(Reply::new(
                AnswerKind::Clarification,
                "Please type a question about sales, policies, forecasts or charts.",
            )));
        }

        match self.intent(text, history) {
            Ok(intent) => Ok(self.start(intent, history)),
            Err(OrchestrationError::ArgumentExtraction { tool, missing }) => {
                debug!(tool = %tool, ?missing, "Arguments unresolved, asking for clarification");
                Ok(RoutingDecision::Respond(Reply::clarification(tool, &missing)))
            }
            Err(OrchestrationError::NoMatchingTool(_)) => self.fallback(text, history).await,
            Err(e) => Err(e),
        }
    }
}

fn latest_table(history: &[Turn]) -> Option<(&ToolResult, &DataTable)> {
    history
        .iter()
        .rev()
        .flat_map(|t| t.tool_results.iter().rev())
        .find_map(|r| r.table().map(|table| (r, table)))
}

fn has_filters(analytics: &ToolArguments) -> bool {
    analytics
        .get("filter")
        .and_then(Value::as_array)
        .is_some_and(|filters| !filters.is_empty())
}

/// A retained table computed with exactly these arguments, or the latest
/// one when the request names neither grouping nor filters ("plot that as
/// a pie chart")
fn reusable_table<'a>(
    history: &'a [Turn],
    analytics: &ToolArguments,
) -> Option<(&'a ToolResult, &'a DataTable)> {
    if !analytics.contains_key("group_by") {
        return if has_filters(analytics) {
            None
        } else {
            latest_table(history)
        };
    }

    history.iter().rev().find_map(|turn| {
        turn.tool_results.iter().rev().find_map(|result| {
            let table = result.table()?;
            turn.tool_calls
                .iter()
                .any(|c| c.call_id == result.call_id() && &c.arguments == analytics)
                .then_some((result, table))
        })
    })
}

/// Ungrouped chart requests keep the grouping of the latest retained table
fn with_latest_grouping(history: &[Turn], mut analytics: ToolArguments) -> ToolArguments {
    if analytics.contains_key("group_by") {
        return analytics;
    }
    if let Some((_, table)) = latest_table(history) {
        analytics.insert("group_by".into(), Value::from(table.key_column.clone()));
    }
    analytics
}

fn visualize_call(result: &ToolResult, table: &DataTable, chart_type: ChartType) -> ToolCall {
    let mut args = ToolArguments::new();
    args.insert("chart_type".into(), Value::from(chart_type.to_string()));
    args.insert("x".into(), Value::from(table.key_column.clone()));
    args.insert("y".into(), Value::from(table.value_column.clone()));
    args.insert("data_ref".into(), Value::from(result.call_id().to_string()));
    ToolCall::new(ToolName::Visualize, args)
}
