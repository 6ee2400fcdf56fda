//! BizNavi Orchestrator
//!
//! An operations assistant for an e-commerce business that:
//! - Routes natural-language questions to sales analytics, policy search,
//!   demand forecasting and chart tools
//! - Runs a bounded reasoning loop per turn, chaining tools when one
//!   needs another's output
//! - Keeps a windowed, per-session conversation history for follow-ups
//! - Audits every committed turn
//!
//! LOOP:
//! DECIDE → ACT → OBSERVE → DECIDE? → ANSWER | ABORT

pub mod agent;
pub mod api;
pub mod audit;
pub mod config;
pub mod data;
pub mod error;
pub mod execution;
pub mod gemini;
pub mod models;
pub mod router;
pub mod service;
pub mod state;
pub mod synthesis;
pub mod tools;

#[cfg(test)]
mod testing;

pub use error::{OrchestrationError, Result};

// Re-export common types
pub use models::*;
