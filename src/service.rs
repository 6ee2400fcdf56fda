//! Turn service: the entry point outer surfaces call
//!
//! Loads the session window, runs one orchestrated turn under a fresh
//! cancellation token, then commits and audits the finished turn. A new
//! utterance for a session cancels that session's in-flight turn.

use crate::agent::Orchestrator;
use crate::audit::{AuditLog, TurnRecord};
use crate::config::Settings;
use crate::data::SalesTable;
use crate::error::OrchestrationError;
use crate::execution::Dispatcher;
use crate::gemini::GeminiEngine;
use crate::models::{FinalAnswer, SessionId, Turn, Utterance};
use crate::router::{IntentRouter, Lexicon, Router};
use crate::state::{self, SessionStore};
use crate::tools::{
    create_default_registry, DataSources, HashingEmbedder, InMemoryVectorIndex,
    TrendSeasonalForecaster, VectorIndex,
};
use crate::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// In-flight turn of one session
struct InFlight {
    ticket: Uuid,
    cancel: CancellationToken,
}

pub struct TurnService {
    orchestrator: Orchestrator,
    store: Arc<dyn SessionStore>,
    audit: Arc<AuditLog>,
    in_flight: Mutex<HashMap<SessionId, InFlight>>,
    lanes: Mutex<HashMap<SessionId, Arc<AsyncMutex<()>>>>,
}

impl TurnService {
    pub fn new(
        orchestrator: Orchestrator,
        store: Arc<dyn SessionStore>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            orchestrator,
            store,
            audit,
            in_flight: Mutex::new(HashMap::new()),
            lanes: Mutex::new(HashMap::new()),
        }
    }

    /// Wire data sources, tools, router and store from settings
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let sales = Arc::new(SalesTable::from_path(settings.sales_source())?);

        let embedder = Arc::new(HashingEmbedder::default());
        let policy_index = if settings.policy_index.exists() {
            InMemoryVectorIndex::load(&settings.policy_index)?
        } else {
            warn!(
                path = %settings.policy_index.display(),
                "Policy index not found, policy search will return no results"
            );
            InMemoryVectorIndex::new(Vec::new())?
        };
        info!(chunks = policy_index.len(), "Policy index loaded");

        let sources = DataSources {
            sales: sales.clone(),
            policy_index: Arc::new(policy_index),
            embedder,
            forecaster: Arc::new(TrendSeasonalForecaster),
        };
        let registry = Arc::new(create_default_registry(&sources, settings));

        let mut router = IntentRouter::new(
            registry.specs().into_iter().cloned().collect(),
            Lexicon::new(sales),
            settings.priority.clone(),
        );
        match &settings.gemini_api_key {
            Some(key) => {
                let engine = GeminiEngine::new(key.clone(), settings.orchestrator.engine_timeout)?;
                router = router.with_engine(Arc::new(engine), settings.orchestrator.engine_timeout);
                info!("Reasoning engine: gemini");
            }
            None => info!("Reasoning engine: none (GEMINI_API_KEY not set)"),
        }

        let orchestrator = Orchestrator::new(
            Arc::new(router) as Arc<dyn Router>,
            Dispatcher::new(registry, settings.orchestrator.tool_timeout),
            settings.orchestrator.clone(),
            settings.rag.clone(),
        );

        Ok(Self::new(
            orchestrator,
            state::build_store(settings),
            Arc::new(AuditLog::new()),
        ))
    }

    /// Run one turn for a session and commit it.
    ///
    /// Turns of one session are serialized from load through commit.
    /// Returns `Err(Cancelled)` when a newer utterance for the same
    /// session superseded this one before it was committed; nothing is
    /// committed in that case.
    pub async fn submit_turn(&self, session_id: SessionId, text: &str) -> Result<FinalAnswer> {
        let ticket = Uuid::new_v4();
        let cancel = self.begin(session_id, ticket);

        let outcome = self.run_and_commit(session_id, text, &cancel).await;
        self.finish(session_id, ticket);

        outcome
    }

    async fn run_and_commit(
        &self,
        session_id: SessionId,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<FinalAnswer> {
        let lane = self.lane(session_id);
        let _serial = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(OrchestrationError::Cancelled),
            guard = lane.lock() => guard,
        };

        let mut state = self.store.load(session_id).await?;
        let utterance = Utterance::new(text, state.next_turn_index());
        let turn = self
            .orchestrator
            .run_turn(state.window(), utterance, cancel)
            .await?;

        if cancel.is_cancelled() {
            info!(%session_id, "Discarding turn superseded before commit");
            return Err(OrchestrationError::Cancelled);
        }

        let answer = turn.answer.clone();
        let record = TurnRecord::new(session_id, &turn);
        let state = self.store.append(session_id, turn).await?;
        self.audit.record(record).await?;

        info!(
            %session_id,
            turn_index = state.total_turns().saturating_sub(1),
            retained = state.len(),
            "Turn committed"
        );

        Ok(answer)
    }

    /// Per-session lock shared by every turn of that session
    fn lane(&self, session_id: SessionId) -> Arc<AsyncMutex<()>> {
        let mut lanes = self
            .lanes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        lanes.entry(session_id).or_default().clone()
    }

    /// Register a new in-flight turn, cancelling the previous one
    fn begin(&self, session_id: SessionId, ticket: Uuid) -> CancellationToken {
        let cancel = CancellationToken::new();
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(previous) = in_flight.insert(
            session_id,
            InFlight {
                ticket,
                cancel: cancel.clone(),
            },
        ) {
            info!(%session_id, "Cancelling superseded turn");
            previous.cancel.cancel();
        }

        cancel
    }

    fn finish(&self, session_id: SessionId, ticket: Uuid) {
        {
            let mut in_flight = self
                .in_flight
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if in_flight.get(&session_id).map(|f| f.ticket) == Some(ticket) {
                in_flight.remove(&session_id);
            }
        }

        let mut lanes = self
            .lanes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if lanes
            .get(&session_id)
            .is_some_and(|lane| Arc::strong_count(lane) == 1)
        {
            lanes.remove(&session_id);
        }
    }

    /// Cancel whatever the session is running right now
    pub fn cancel(&self, session_id: SessionId) -> bool {
        let in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match in_flight.get(&session_id) {
            Some(flight) => {
                flight.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Retained window of a session, oldest first
    pub async fn history(&self, session_id: SessionId) -> Result<Vec<Turn>> {
        let state = self.store.load(session_id).await?;
        Ok(state.turns().cloned().collect())
    }

    pub async fn clear(&self, session_id: SessionId) -> Result<()> {
        self.cancel(session_id);
        let lane = self.lane(session_id);
        let _serial = lane.lock().await;
        self.store.clear(session_id).await
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn store_backend(&self) -> &'static str {
        self.store.backend()
    }
}
