//! Tool adapters and registry
//!
//! Every adapter publishes a [`ToolSpec`] (name, when-to-use description,
//! keyword vocabulary, argument schema) and an `invoke` that turns a
//! validated [`ToolCall`] into a payload or a typed [`ToolFailure`].
//! Adapters only read their data sources; they never see or mutate
//! conversation state beyond the read-only [`ToolContext`].

use crate::config::Settings;
use crate::data::SalesTable;
use crate::models::{ToolArguments, ToolCall, ToolFailure, ToolName, ToolPayload, ToolResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

pub mod analytics;
pub mod forecast;
pub mod rag;
pub mod visualization;

pub use analytics::{AnalyticsTool, Filter, FilterOp, Metric};
pub use forecast::{ForecastEngine, ForecastTool, TrendSeasonalForecaster};
pub use rag::{Embedder, HashingEmbedder, InMemoryVectorIndex, RagTool, VectorIndex};
pub use visualization::VisualizationTool;

//
// ================= Schema =================
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgKind {
    String,
    Integer,
    Number,
    Array,
}

impl ArgKind {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            ArgKind::String => value.is_string(),
            ArgKind::Integer => value.is_u64() || value.is_i64(),
            ArgKind::Number => value.is_number(),
            ArgKind::Array => value.is_array(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ArgSpec {
    pub name: &'static str,
    pub kind: ArgKind,
    pub required: bool,
    pub description: &'static str,
}

/// Capability description of one tool
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: ToolName,
    pub description: &'static str,
    /// Vocabulary the router scores utterances against
    #[serde(skip)]
    pub keywords: &'static [&'static str],
    pub arguments: &'static [ArgSpec],
}

impl ToolSpec {
    pub fn missing_required(&self, args: &ToolArguments) -> Vec<String> {
        self.arguments
            .iter()
            .filter(|a| a.required && args.get(a.name).map_or(true, Value::is_null))
            .map(|a| a.name.to_string())
            .collect()
    }

    /// Checks required arguments, value kinds, and unknown names
    pub fn validate(&self, args: &ToolArguments) -> std::result::Result<(), ToolFailure> {
        let missing = self.missing_required(args);
        if !missing.is_empty() {
            return Err(ToolFailure::invalid_arguments(format!(
                "{} is missing required argument(s): {}",
                self.name,
                missing.join(", ")
            )));
        }

        for (key, value) in args {
            let Some(spec) = self.arguments.iter().find(|a| a.name == key) else {
                return Err(ToolFailure::invalid_arguments(format!(
                    "{} does not accept argument '{}'",
                    self.name, key
                )));
            };

            if !value.is_null() && !spec.kind.accepts(value) {
                return Err(ToolFailure::invalid_arguments(format!(
                    "argument '{}' of {} must be {:?}",
                    key, self.name, spec.kind
                )));
            }
        }

        Ok(())
    }

    /// One-line description for reasoning engine prompts
    pub fn describe(&self) -> String {
        let args = self
            .arguments
            .iter()
            .map(|a| {
                format!(
                    "{} ({:?}{}): {}",
                    a.name,
                    a.kind,
                    if a.required { ", required" } else { "" },
                    a.description
                )
            })
            .collect::<Vec<_>>()
            .join("; ");

        format!("{} – {} Arguments: {}", self.name, self.description, args)
    }
}

/// Decode validated arguments into a tool's typed argument struct
pub fn decode_args<T: DeserializeOwned>(call: &ToolCall) -> std::result::Result<T, ToolFailure> {
    serde_json::from_value(Value::Object(call.arguments.clone())).map_err(|e| {
        ToolFailure::invalid_arguments(format!("invalid arguments for {}: {}", call.tool, e))
    })
}

/// Encode typed arguments back into a call's argument map
pub fn encode_args<T: Serialize>(args: &T) -> ToolArguments {
    match serde_json::to_value(args) {
        Ok(Value::Object(map)) => map,
        _ => ToolArguments::new(),
    }
}

//
// ================= Context =================
//

/// Read-only view of results a call may reference (current turn first,
/// then the retained history window)
#[derive(Clone, Default)]
pub struct ToolContext {
    available: Arc<Vec<ToolResult>>,
}

impl ToolContext {
    pub fn new(available: Vec<ToolResult>) -> Self {
        Self {
            available: Arc::new(available),
        }
    }

    pub fn find(&self, call_id: Uuid) -> Option<&ToolResult> {
        self.available.iter().find(|r| r.call_id() == call_id)
    }
}

//
// ================= Tool Trait =================
//

#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> &ToolSpec;

    async fn invoke(
        &self,
        call: &ToolCall,
        ctx: &ToolContext,
    ) -> std::result::Result<ToolPayload, ToolFailure>;
}

/// Tool registry keyed by the closed tool enum
pub struct ToolRegistry {
    tools: HashMap<ToolName, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.spec().name, tool);
    }

    pub fn get(&self, name: ToolName) -> Option<Arc<dyn Tool>> {
        self.tools.get(&name).cloned()
    }

    pub fn spec(&self, name: ToolName) -> Option<&ToolSpec> {
        self.tools.get(&name).map(|t| t.spec())
    }

    /// Specs in a stable order
    pub fn specs(&self) -> Vec<&ToolSpec> {
        ToolName::ALL
            .iter()
            .filter_map(|name| self.spec(*name))
            .collect()
    }

    pub fn list(&self) -> Vec<ToolName> {
        ToolName::ALL
            .iter()
            .copied()
            .filter(|name| self.tools.contains_key(name))
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only collaborators shared by the adapters
#[derive(Clone)]
pub struct DataSources {
    pub sales: Arc<SalesTable>,
    pub policy_index: Arc<dyn VectorIndex>,
    pub embedder: Arc<dyn Embedder>,
    pub forecaster: Arc<dyn ForecastEngine>,
}

/// Registry with all four adapters wired to the given sources
pub fn create_default_registry(sources: &DataSources, settings: &Settings) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(Arc::new(AnalyticsTool::new(sources.sales.clone())));
    registry.register(Arc::new(RagTool::new(
        sources.policy_index.clone(),
        sources.embedder.clone(),
        settings.rag.clone(),
    )));
    registry.register(Arc::new(ForecastTool::new(
        sources.sales.clone(),
        sources.forecaster.clone(),
        settings.forecast.clone(),
    )));
    registry.register(Arc::new(VisualizationTool::new(settings.chart.clone())));

    registry
}
