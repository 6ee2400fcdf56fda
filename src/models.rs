//! Core data models for the orchestrator

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type SessionId = Uuid;

/// Argument map of a tool call
pub type ToolArguments = serde_json::Map<String, Value>;

//
// ================= Tools =================
//

/// Closed set of tool variants the router can select
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ToolName {
    Analytics,
    Rag,
    Forecast,
    Visualize,
}

impl ToolName {
    pub const ALL: [ToolName; 4] = [
        ToolName::Analytics,
        ToolName::Rag,
        ToolName::Forecast,
        ToolName::Visualize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::Analytics => "analytics",
            ToolName::Rag => "rag",
            ToolName::Forecast => "forecast",
            ToolName::Visualize => "visualize",
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "analytics" | "sales" | "sales_tool" => Ok(ToolName::Analytics),
            "rag" | "policy" | "policy_tool" | "rag_search" => Ok(ToolName::Rag),
            "forecast" | "forecasting" | "forecasting_tool" => Ok(ToolName::Forecast),
            "visualize" | "visualization" | "chart" | "visualization_tool" => {
                Ok(ToolName::Visualize)
            }
            other => Err(format!("unknown tool '{}'", other)),
        }
    }
}

//
// ================= Utterance =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub turn_index: u64,
    pub timestamp: DateTime<Utc>,
}

impl Utterance {
    pub fn new(text: impl Into<String>, turn_index: u64) -> Self {
        Self {
            text: text.into(),
            turn_index,
            timestamp: Utc::now(),
        }
    }
}

//
// ================= Tool Calls =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub call_id: Uuid,
    pub tool: ToolName,
    pub arguments: ToolArguments,
    /// Set when this call retries an earlier one
    #[serde(default)]
    pub retry_of: Option<Uuid>,
}

impl ToolCall {
    pub fn new(tool: ToolName, arguments: ToolArguments) -> Self {
        Self {
            call_id: Uuid::new_v4(),
            tool,
            arguments,
            retry_of: None,
        }
    }

    /// Build a fresh call for the same tool that retries this one
    pub fn retry_with(&self, arguments: ToolArguments) -> Self {
        Self {
            call_id: Uuid::new_v4(),
            tool: self.tool,
            arguments,
            retry_of: Some(self.call_id),
        }
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Failure,
}

/// Adapter-level failure kinds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ToolErrorKind {
    DataError,
    InsufficientHistoryError,
    SchemaError,
    TimeoutError,
    InvalidArguments,
}

impl fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ToolErrorKind::DataError => "DataError",
            ToolErrorKind::InsufficientHistoryError => "InsufficientHistoryError",
            ToolErrorKind::SchemaError => "SchemaError",
            ToolErrorKind::TimeoutError => "TimeoutError",
            ToolErrorKind::InvalidArguments => "InvalidArguments",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolFailure {
    pub kind: ToolErrorKind,
    pub detail: String,
}

impl ToolFailure {
    pub fn new(kind: ToolErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn data(detail: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::DataError, detail)
    }

    pub fn schema(detail: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::SchemaError, detail)
    }

    pub fn invalid_arguments(detail: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::InvalidArguments, detail)
    }
}

impl fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

//
// ================= Payloads =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableRow {
    pub key: String,
    pub value: f64,
}

/// Two-column aggregate table: one group key column, one value column
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataTable {
    pub key_column: String,
    pub value_column: String,
    pub rows: Vec<TableRow>,
    /// Source records that contributed to the aggregate
    pub matched_records: usize,
}

impl DataTable {
    pub fn has_column(&self, name: &str) -> bool {
        self.key_column.eq_ignore_ascii_case(name) || self.value_column.eq_ignore_ascii_case(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snippet {
    pub text: String,
    pub source: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForecastSeries {
    pub item: String,
    pub horizon_days: u32,
    pub history_days: usize,
    pub points: Vec<ForecastPoint>,
}

impl ForecastSeries {
    pub fn total(&self) -> f64 {
        self.points.iter().map(|p| p.value).sum()
    }

    pub fn average(&self) -> f64 {
        if self.points.is_empty() {
            0.0
        } else {
            self.total() / self.points.len() as f64
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Bar,
    Line,
    Pie,
}

impl fmt::Display for ChartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChartType::Bar => "bar",
            ChartType::Line => "line",
            ChartType::Pie => "pie",
        };
        f.write_str(s)
    }
}

impl FromStr for ChartType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bar" | "column" | "histogram" => Ok(ChartType::Bar),
            "line" | "trend" => Ok(ChartType::Line),
            "pie" | "donut" => Ok(ChartType::Pie),
            other => Err(format!("unsupported chart type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChartPoint {
    pub label: String,
    pub value: f64,
}

/// Renderable chart description handed to the front-end
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChartSpec {
    pub chart_type: ChartType,
    pub title: String,
    pub x: String,
    pub y: String,
    pub points: Vec<ChartPoint>,
    /// Call id of the result the chart was computed from
    pub data_ref: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolPayload {
    Table(DataTable),
    Scalar {
        label: String,
        value: f64,
        matched_records: usize,
    },
    Snippets {
        query: String,
        hits: Vec<Snippet>,
    },
    Forecast(ForecastSeries),
    Chart(ChartSpec),
}

//
// ================= Tool Results =================
//

/// Outcome of one tool call. A failed result never carries a payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    call_id: Uuid,
    tool: ToolName,
    status: ToolStatus,
    payload: Option<ToolPayload>,
    error: Option<ToolFailure>,
    elapsed_ms: u64,
}

impl ToolResult {
    pub fn success(call: &ToolCall, payload: ToolPayload, elapsed_ms: u64) -> Self {
        Self {
            call_id: call.call_id,
            tool: call.tool,
            status: ToolStatus::Success,
            payload: Some(payload),
            error: None,
            elapsed_ms,
        }
    }

    pub fn failure(call: &ToolCall, failure: ToolFailure, elapsed_ms: u64) -> Self {
        Self {
            call_id: call.call_id,
            tool: call.tool,
            status: ToolStatus::Failure,
            payload: None,
            error: Some(failure),
            elapsed_ms,
        }
    }

    pub fn call_id(&self) -> Uuid {
        self.call_id
    }

    pub fn tool(&self) -> ToolName {
        self.tool
    }

    pub fn status(&self) -> ToolStatus {
        self.status
    }

    pub fn payload(&self) -> Option<&ToolPayload> {
        self.payload.as_ref()
    }

    pub fn error(&self) -> Option<&ToolFailure> {
        self.error.as_ref()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    /// The aggregate table, if this is a successful analytics grouping
    pub fn table(&self) -> Option<&DataTable> {
        match self.payload() {
            Some(ToolPayload::Table(table)) => Some(table),
            _ => None,
        }
    }

    /// True for a successful RAG search that found nothing
    pub fn is_empty_search(&self) -> bool {
        matches!(self.payload(), Some(ToolPayload::Snippets { hits, .. }) if hits.is_empty())
    }
}

//
// ================= Answers =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnswerKind {
    Answer,
    Clarification,
    OutOfDomain,
    Conversational,
    SystemError,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChartRef {
    /// Visualization call that produced the chart
    pub call_id: Uuid,
    pub spec: ChartSpec,
}

/// Terminal artifact of one reasoning loop
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinalAnswer {
    pub turn_id: Uuid,
    pub kind: AnswerKind,
    pub text: String,
    pub chart: Option<ChartRef>,
    pub tools_used: Vec<ToolName>,
    pub cycles: u32,
    pub budget_exhausted: bool,
    pub reasoning_trace: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl FinalAnswer {
    pub fn is_system_error(&self) -> bool {
        self.kind == AnswerKind::SystemError
    }
}

/// One utterance with everything the loop did for it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Turn {
    pub utterance: Utterance,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
    pub answer: FinalAnswer,
}
