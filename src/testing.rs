//! Shared fixtures for unit tests

use crate::agent::Orchestrator;
use crate::config::{OrchestratorConfig, RagConfig, Settings, ToolPriority};
use crate::data::SalesTable;
use crate::error::OrchestrationError;
use crate::execution::Dispatcher;
use crate::models::{
    AnswerKind, FinalAnswer, SessionId, ToolArguments, ToolCall, ToolFailure, ToolName,
    ToolPayload, ToolResult, Turn, Utterance,
};
use crate::router::{
    EnginePrompt, IntentRouter, Lexicon, ReasoningEngine, Reply, Router, RoutingDecision,
};
use crate::state::{ConversationState, InMemorySessionStore, SessionStore};
use crate::tools::{
    create_default_registry, DataSources, HashingEmbedder, InMemoryVectorIndex, Tool,
    ToolContext, ToolRegistry, ToolSpec, TrendSeasonalForecaster,
};
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Kurta leads on amount but has few distinct days; Set has two weeks of
/// daily history.
pub const SALES_CSV: &str = "\
Order ID,Date,Status,Fulfilment,Category,Size,ASIN,Qty,Amount,ship-city,ship-state
405-0001,04-01-22,Shipped,Amazon,Set,M,B09SET001,2,1398.00,MUMBAI,MAHARASHTRA
405-0002,04-02-22,Shipped,Amazon,Set,L,B09SET002,1,699.00,PUNE,MAHARASHTRA
405-0003,04-03-22,Shipped - Delivered to Buyer,Merchant,Set,S,B09SET003,2,1398.00,BENGALURU,KARNATAKA
405-0004,04-04-22,Shipped,Amazon,Set,M,B09SET001,1,699.00,MUMBAI,MAHARASHTRA
405-0005,04-05-22,Shipped,Amazon,Set,XL,B09SET004,3,2097.00,CHENNAI,TAMIL NADU
405-0006,04-06-22,Shipped,Amazon,Set,M,B09SET001,1,699.00,KOCHI,KERALA
405-0007,04-07-22,Shipped,Merchant,Set,L,B09SET002,2,1398.00,MUMBAI,MAHARASHTRA
405-0008,04-08-22,Shipped,Amazon,Set,S,B09SET003,2,1398.00,BENGALURU,KARNATAKA
405-0009,04-09-22,Shipped - Delivered to Buyer,Amazon,Set,M,B09SET001,3,2097.00,PUNE,MAHARASHTRA
405-0010,04-10-22,Shipped,Amazon,Set,M,B09SET001,2,1398.00,MUMBAI,MAHARASHTRA
405-0011,04-11-22,Shipped,Amazon,Set,L,B09SET002,3,2097.00,CHENNAI,TAMIL NADU
405-0012,04-12-22,Shipped,Merchant,Set,XL,B09SET004,2,1398.00,KOCHI,KERALA
405-0013,04-13-22,Shipped,Amazon,Set,M,B09SET001,4,2796.00,MUMBAI,MAHARASHTRA
405-0014,04-14-22,Shipped,Amazon,Set,S,B09SET003,3,2097.00,BENGALURU,KARNATAKA
406-0001,04-03-22,Shipped,Amazon,Kurta,M,B08KUR001,5,4120.00,MUMBAI,MAHARASHTRA
406-0002,04-05-22,Shipped,Amazon,Kurta,L,B08KUR002,6,4944.00,PUNE,MAHARASHTRA
406-0003,04-07-22,Cancelled,Merchant,Kurta,S,B08KUR003,4,3296.00,BENGALURU,KARNATAKA
406-0004,04-09-22,Shipped - Delivered to Buyer,Amazon,Kurta,M,B08KUR001,5,4120.00,CHENNAI,TAMIL NADU
406-0005,04-11-22,Shipped,Amazon,Kurta,XL,B08KUR004,6,4944.00,KOCHI,KERALA
406-0006,04-11-22,Shipped,Amazon,Kurta,M,B08KUR001,3,2472.00,MUMBAI,MAHARASHTRA
407-0001,05-02-22,Shipped,Amazon,Western Dress,M,B07WD0001,1,1200.50,MUMBAI,MAHARASHTRA
407-0002,05-03-22,Cancelled,Merchant,Western Dress,S,B07WD0002,1,999.00,PUNE,MAHARASHTRA
408-0001,05-04-22,Shipped,Amazon,Blouse,L,B06BL0001,1,520.00,KOCHI,KERALA
";

const POLICY_DOCS: &[(&str, &str)] = &[
    (
        "returns_policy.md",
        "Return policy: customers may return items within 30 days of delivery. Refunds go to \
         the original payment method within 7 working days after the returned item passes \
         inspection. Damaged items must be reported within 10 days.",
    ),
    (
        "warehouse_sop.md",
        "Inbound shipments are checked and shelved within 24 hours of arrival. Shrinkage above \
         half a percent of monthly stock triggers a full inventory audit.",
    ),
    (
        "packaging_guidelines.md",
        "Fragile orders are packed in double-wall boxes with bubble wrap. Gift wrapping adds a \
         packaging charge of 15 rupees per order.",
    ),
    (
        "marketplace_fees.md",
        "The marketplace referral fee is 12 percent of the selling price. The on-time dispatch \
         KPI target is 98 percent of orders shipped within 48 hours.",
    ),
];

pub fn sales_table() -> Arc<SalesTable> {
    Arc::new(SalesTable::from_reader(SALES_CSV.as_bytes()).unwrap())
}

pub fn embedder() -> Arc<HashingEmbedder> {
    Arc::new(HashingEmbedder::default())
}

pub fn policy_index() -> Arc<InMemoryVectorIndex> {
    Arc::new(InMemoryVectorIndex::from_documents(
        POLICY_DOCS,
        &HashingEmbedder::default(),
    ))
}

pub fn registry() -> ToolRegistry {
    let sources = DataSources {
        sales: sales_table(),
        policy_index: policy_index(),
        embedder: embedder(),
        forecaster: Arc::new(TrendSeasonalForecaster),
    };
    create_default_registry(&sources, &Settings::default())
}

pub fn dispatcher() -> Dispatcher {
    Dispatcher::new(Arc::new(registry()), Duration::from_secs(5))
}

pub fn router() -> IntentRouter {
    IntentRouter::new(
        registry().specs().into_iter().cloned().collect(),
        Lexicon::new(sales_table()),
        ToolPriority::default(),
    )
}

pub fn orchestrator_with_router(router: Arc<dyn Router>) -> Orchestrator {
    Orchestrator::new(
        router,
        dispatcher(),
        OrchestratorConfig::default(),
        RagConfig::default(),
    )
}

pub fn orchestrator() -> Orchestrator {
    orchestrator_with_router(Arc::new(router()))
}

pub fn orchestrator_with_engine(engine: Arc<dyn ReasoningEngine>) -> Orchestrator {
    orchestrator_with_router(Arc::new(
        router().with_engine(engine, Duration::from_secs(1)),
    ))
}

/// A finished turn as it would sit in history
pub fn turn(text: &str, tool_calls: Vec<ToolCall>, tool_results: Vec<ToolResult>) -> Turn {
    let tools_used = tool_calls.iter().fold(Vec::new(), |mut acc, c| {
        if !acc.contains(&c.tool) {
            acc.push(c.tool);
        }
        acc
    });

    Turn {
        utterance: Utterance::new(text, 0),
        answer: FinalAnswer {
            turn_id: Uuid::new_v4(),
            kind: AnswerKind::Answer,
            text: format!("answer to {}", text),
            chart: None,
            tools_used,
            cycles: tool_calls.len() as u32,
            budget_exhausted: false,
            reasoning_trace: Vec::new(),
            created_at: Utc::now(),
        },
        tool_calls,
        tool_results,
    }
}

/// Engine that replays canned completions in order
pub struct ScriptedEngine {
    replies: Mutex<VecDeque<String>>,
    fail: bool,
}

impl ScriptedEngine {
    pub fn replies(replies: Vec<&str>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(str::to_string).collect()),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fail: true,
        }
    }
}

#[async_trait]
impl ReasoningEngine for ScriptedEngine {
    async fn complete(&self, _prompt: &EnginePrompt) -> Result<String> {
        if self.fail {
            return Err(OrchestrationError::ReasoningEngineUnavailable(
                "connection refused".to_string(),
            ));
        }
        self.replies.lock().unwrap().pop_front().ok_or_else(|| {
            OrchestrationError::ReasoningEngineUnavailable("script exhausted".to_string())
        })
    }
}

/// Tool with a real schema that blocks its thread for `delay`, the way
/// the built-in adapters compute
pub struct SlowTool {
    spec: ToolSpec,
    delay: Duration,
}

impl SlowTool {
    pub fn new(tool: ToolName, delay: Duration) -> Self {
        Self {
            spec: registry().spec(tool).cloned().unwrap(),
            delay,
        }
    }
}

#[async_trait]
impl Tool for SlowTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn invoke(
        &self,
        call: &ToolCall,
        _ctx: &ToolContext,
    ) -> std::result::Result<ToolPayload, ToolFailure> {
        std::thread::sleep(self.delay);
        Ok(ToolPayload::Snippets {
            query: call.arg_str("query").unwrap_or_default().to_string(),
            hits: Vec::new(),
        })
    }
}

/// Proposes another analytics call no matter what it has seen
pub struct LoopingRouter;

#[async_trait]
impl Router for LoopingRouter {
    async fn route(
        &self,
        _utterance: &Utterance,
        _history: &[Turn],
        _scratch: &[ToolResult],
    ) -> Result<RoutingDecision> {
        let args = json!({ "metric": "count" }).as_object().cloned().unwrap();
        Ok(RoutingDecision::Invoke(ToolCall::new(ToolName::Analytics, args)))
    }
}

/// One call, then finish
pub struct OnceRouter {
    tool: ToolName,
    arguments: ToolArguments,
}

impl OnceRouter {
    pub fn new(tool: ToolName, arguments: ToolArguments) -> Self {
        Self { tool, arguments }
    }
}

#[async_trait]
impl Router for OnceRouter {
    async fn route(
        &self,
        _utterance: &Utterance,
        _history: &[Turn],
        scratch: &[ToolResult],
    ) -> Result<RoutingDecision> {
        if scratch.is_empty() {
            Ok(RoutingDecision::Invoke(ToolCall::new(
                self.tool,
                self.arguments.clone(),
            )))
        } else {
            Ok(RoutingDecision::Finish)
        }
    }
}

/// Takes `delay` before every decision
pub struct StallingRouter {
    delay: Duration,
}

impl StallingRouter {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Router for StallingRouter {
    async fn route(
        &self,
        _utterance: &Utterance,
        _history: &[Turn],
        _scratch: &[ToolResult],
    ) -> Result<RoutingDecision> {
        tokio::time::sleep(self.delay).await;
        Ok(RoutingDecision::Respond(Reply::out_of_domain()))
    }
}

/// In-memory store whose commits take `delay`
pub struct SlowAppendStore {
    inner: InMemorySessionStore,
    delay: Duration,
}

impl SlowAppendStore {
    pub fn new(max_turns: usize, delay: Duration) -> Self {
        Self {
            inner: InMemorySessionStore::new(max_turns),
            delay,
        }
    }
}

#[async_trait]
impl SessionStore for SlowAppendStore {
    async fn load(&self, session_id: SessionId) -> Result<ConversationState> {
        self.inner.load(session_id).await
    }

    async fn append(&self, session_id: SessionId, turn: Turn) -> Result<ConversationState> {
        tokio::time::sleep(self.delay).await;
        self.inner.append(session_id, turn).await
    }

    async fn clear(&self, session_id: SessionId) -> Result<()> {
        self.inner.clear(session_id).await
    }

    fn backend(&self) -> &'static str {
        "slow-in-memory"
    }
}
