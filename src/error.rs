//! Error types for the BizNavi orchestrator

use crate::models::ToolName;
use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Routing Errors
    // =============================

    /// Required arguments could not be resolved from the utterance.
    /// Recovered locally by asking the user for clarification.
    #[error("Argument extraction error for {tool}: missing {missing:?}")]
    ArgumentExtraction {
        tool: ToolName,
        missing: Vec<String>,
    },

    /// No tool description plausibly matched the utterance.
    #[error("No matching tool: {0}")]
    NoMatchingTool(String),

    /// The reasoning engine could not be reached. Fatal for the turn.
    #[error("Reasoning engine unavailable: {0}")]
    ReasoningEngineUnavailable(String),

    // =============================
    // Loop Errors
    // =============================

    #[error("Tool not registered: {0}")]
    ToolNotRegistered(ToolName),

    #[error("Turn cancelled")]
    Cancelled,

    // =============================
    // Ambient Errors
    // =============================

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Data source error: {0}")]
    Data(String),

    #[error("State persistence error: {0}")]
    StateError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl OrchestrationError {
    /// Fatal errors end the turn in the `Aborted` state.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OrchestrationError::ReasoningEngineUnavailable(_)
                | OrchestrationError::ToolNotRegistered(_)
        )
    }
}
