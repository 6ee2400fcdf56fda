//! Reasoning engine seam used when the keyword rules find no tool

use crate::models::{ToolArguments, Turn};
use crate::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

const SYSTEM_INSTRUCTIONS: &str = r#"You are BizNavi, an operations assistant for an e-commerce business.

Decide how to answer the user's latest message.
- If one of the available tools can answer it, reply with ONLY a JSON object:
  {"tool": "<tool name>", "arguments": { ... }}
- Otherwise reply in plain text. Stay within sales, policies, forecasting and charts;
  politely decline anything else.
- Never invent argument values the user did not give."#;

/// Structured prompt handed to the engine
#[derive(Debug, Clone)]
pub struct EnginePrompt {
    pub system: String,
    pub tools: Vec<String>,
    /// (user text, answer text), oldest first
    pub history: Vec<(String, String)>,
    pub utterance: String,
}

impl EnginePrompt {
    pub fn new(tools: Vec<String>, history: &[Turn], utterance: &str) -> Self {
        Self {
            system: SYSTEM_INSTRUCTIONS.to_string(),
            tools,
            history: history
                .iter()
                .map(|t| (t.utterance.text.clone(), t.answer.text.clone()))
                .collect(),
            utterance: utterance.to_string(),
        }
    }

    /// Conversation part of the prompt (system text travels separately)
    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str("Available tools:\n");
        for tool in &self.tools {
            out.push_str("- ");
            out.push_str(tool);
            out.push('\n');
        }

        if !self.history.is_empty() {
            out.push_str("\nConversation so far:\n");
            for (user, answer) in &self.history {
                out.push_str(&format!("User: {}\nAssistant: {}\n", user, answer));
            }
        }

        out.push_str(&format!("\nUser: {}\n", self.utterance));
        out
    }
}

#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    /// Raw completion text; transport errors are returned as `Err`
    async fn complete(&self, prompt: &EnginePrompt) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineReply {
    ToolProposal { tool: String, arguments: ToolArguments },
    Text(String),
}

#[derive(Deserialize)]
struct RawProposal {
    tool: String,
    #[serde(default)]
    arguments: ToolArguments,
}

impl EngineReply {
    /// A fenced or bare JSON object with a `tool` key is a proposal;
    /// anything else is free text.
    pub fn parse(raw: &str) -> Self {
        let cleaned = raw
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();

        if cleaned.starts_with('{') {
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(cleaned) {
                if let Ok(proposal) = serde_json::from_value::<RawProposal>(Value::Object(map)) {
                    return EngineReply::ToolProposal {
                        tool: proposal.tool,
                        arguments: proposal.arguments,
                    };
                }
            }
        }

        EngineReply::Text(raw.trim().to_string())
    }
}
