//! Audit trail of committed turns
//!
//! Every committed turn is recorded with a fingerprint of its tool
//! payloads. Replaying a record re-dispatches its calls against the
//! current data; an unchanged fingerprint shows the tools are idempotent.

use crate::execution::Dispatcher;
use crate::models::{AnswerKind, SessionId, ToolCall, ToolName, ToolPayload, ToolResult, Turn};
use crate::tools::ToolContext;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub audit_id: Uuid,
    pub session_id: SessionId,
    pub turn_index: u64,
    pub utterance: String,
    pub calls: Vec<ToolCall>,
    pub results: Vec<ToolResult>,
    pub answer_kind: AnswerKind,
    pub cycles: u32,
    pub payload_fingerprint: String,
    pub created_at: DateTime<Utc>,
}

impl TurnRecord {
    pub fn new(session_id: SessionId, turn: &Turn) -> Self {
        Self {
            audit_id: turn.answer.turn_id,
            session_id,
            turn_index: turn.utterance.turn_index,
            utterance: turn.utterance.text.clone(),
            calls: turn.tool_calls.clone(),
            results: turn.tool_results.clone(),
            answer_kind: turn.answer.kind,
            cycles: turn.answer.cycles,
            payload_fingerprint: payload_fingerprint(&turn.tool_results),
            created_at: turn.answer.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplayOutcome {
    pub audit_id: Uuid,
    pub recorded: String,
    pub replayed: String,
}

impl ReplayOutcome {
    pub fn matches(&self) -> bool {
        self.recorded == self.replayed
    }
}

pub struct AuditLog {
    records: Arc<RwLock<HashMap<Uuid, TurnRecord>>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn record(&self, record: TurnRecord) -> Result<Uuid> {
        let audit_id = record.audit_id;
        let mut records = self.records.write().await;
        records.insert(audit_id, record);
        Ok(audit_id)
    }

    pub async fn get(&self, audit_id: Uuid) -> Result<Option<TurnRecord>> {
        let records = self.records.read().await;
        Ok(records.get(&audit_id).cloned())
    }

    /// Audit IDs of a session, oldest first
    pub async fn list_for_session(&self, session_id: SessionId) -> Result<Vec<Uuid>> {
        let records = self.records.read().await;

        let mut items: Vec<_> = records
            .values()
            .filter(|r| r.session_id == session_id)
            .map(|r| (r.turn_index, r.created_at, r.audit_id))
            .collect();
        items.sort();

        Ok(items.into_iter().map(|(_, _, id)| id).collect())
    }

    /// Recompute a record's fingerprint from its stored results
    pub async fn verify_integrity(&self, audit_id: Uuid) -> Result<bool> {
        let records = self.records.read().await;

        Ok(records
            .get(&audit_id)
            .map(|r| payload_fingerprint(&r.results) == r.payload_fingerprint)
            .unwrap_or(false))
    }

    /// Re-dispatch a record's calls in order and fingerprint the outcome
    pub async fn replay(
        &self,
        audit_id: Uuid,
        dispatcher: &Dispatcher,
    ) -> Result<Option<ReplayOutcome>> {
        let Some(record) = self.get(audit_id).await? else {
            return Ok(None);
        };

        // Recorded results stay visible so chart calls resolve their data_ref
        let ctx = ToolContext::new(record.results.iter().rev().cloned().collect());

        let mut replayed = Vec::with_capacity(record.calls.len());
        for call in record
            .calls
            .iter()
            .filter(|c| record.results.iter().any(|r| r.call_id() == c.call_id))
        {
            replayed.push(dispatcher.dispatch(call, &ctx).await?);
        }

        let outcome = ReplayOutcome {
            audit_id,
            recorded: record.payload_fingerprint,
            replayed: payload_fingerprint(&replayed),
        };

        if outcome.matches() {
            info!(%audit_id, "Replay matches recorded payloads");
        } else {
            warn!(%audit_id, "Replay diverged from recorded payloads");
        }

        Ok(Some(outcome))
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

/// SHA-256 over the (tool, payload) sequence of a turn, hex encoded.
/// Call ids and timings are excluded so identical work hashes equally.
pub fn payload_fingerprint(results: &[ToolResult]) -> String {
    let payloads: Vec<(ToolName, Option<&ToolPayload>)> =
        results.iter().map(|r| (r.tool(), r.payload())).collect();

    let mut hasher = Sha256::new();
    if serde_json::to_writer(&mut HashWriter(&mut hasher), &payloads).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
