//! Runtime settings
//!
//! Everything is read from environment variables (binaries call
//! `dotenv::dotenv()` first). Every field has a default so the
//! orchestrator runs with no configuration at all.

use crate::error::OrchestrationError;
use crate::models::ToolName;
use crate::Result;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Tie-break order among tools whose descriptions match equally well
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPriority(Vec<ToolName>);

impl ToolPriority {
    /// Builds an order from a preferred prefix; tools left out keep
    /// their default relative order after it.
    pub fn new(preferred: Vec<ToolName>) -> Self {
        let mut order = Vec::with_capacity(ToolName::ALL.len());
        for tool in preferred.into_iter().chain(Self::default().0) {
            if !order.contains(&tool) {
                order.push(tool);
            }
        }
        Self(order)
    }

    /// Lower rank wins a tie
    pub fn rank(&self, tool: ToolName) -> usize {
        self.0
            .iter()
            .position(|t| *t == tool)
            .unwrap_or(self.0.len())
    }

    pub fn order(&self) -> &[ToolName] {
        &self.0
    }
}

impl Default for ToolPriority {
    fn default() -> Self {
        Self(vec![
            ToolName::Forecast,
            ToolName::Rag,
            ToolName::Analytics,
            ToolName::Visualize,
        ])
    }
}

impl FromStr for ToolPriority {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let tools = s
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| t.parse::<ToolName>().map_err(OrchestrationError::Config))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(tools))
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum acting cycles per turn (retries included)
    pub max_cycles: u32,
    pub tool_timeout: Duration,
    pub engine_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_cycles: 4,
            tool_timeout: Duration::from_millis(10_000),
            engine_timeout: Duration::from_millis(20_000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RagConfig {
    pub top_k: usize,
    /// Upper bound on snippets per search, broadened retries included
    pub max_top_k: usize,
    pub min_score: f32,
    /// Multiplier applied to `min_score` on a broadened retry
    pub broaden_factor: f32,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            max_top_k: 20,
            min_score: 0.25,
            broaden_factor: 0.5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ForecastConfig {
    pub min_observations: usize,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            min_observations: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChartConfig {
    pub max_points: usize,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self { max_points: 10 }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub sales_csv: PathBuf,
    /// Preferred over `sales_csv` when it exists
    pub uploaded_csv: PathBuf,
    pub policy_index: PathBuf,
    pub history_turns: usize,
    pub priority: ToolPriority,
    pub orchestrator: OrchestratorConfig,
    pub rag: RagConfig,
    pub forecast: ForecastConfig,
    pub chart: ChartConfig,
    pub gemini_api_key: Option<String>,
    pub database_url: Option<String>,
    pub api_port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sales_csv: PathBuf::from("data/Amazon Sale Report.csv"),
            uploaded_csv: PathBuf::from("data/uploaded_data.csv"),
            policy_index: PathBuf::from("data/policy_index.json"),
            history_turns: 8,
            priority: ToolPriority::default(),
            orchestrator: OrchestratorConfig::default(),
            rag: RagConfig::default(),
            forecast: ForecastConfig::default(),
            chart: ChartConfig::default(),
            gemini_api_key: None,
            database_url: None,
            api_port: 8080,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let defaults = Settings::default();

        let orchestrator = OrchestratorConfig {
            max_cycles: parse_var("BIZNAVI_MAX_CYCLES", defaults.orchestrator.max_cycles)?,
            tool_timeout: Duration::from_millis(parse_var(
                "BIZNAVI_TOOL_TIMEOUT_MS",
                defaults.orchestrator.tool_timeout.as_millis() as u64,
            )?),
            engine_timeout: Duration::from_millis(parse_var(
                "BIZNAVI_ENGINE_TIMEOUT_MS",
                defaults.orchestrator.engine_timeout.as_millis() as u64,
            )?),
        };

        if orchestrator.max_cycles == 0 {
            return Err(OrchestrationError::Config(
                "BIZNAVI_MAX_CYCLES must be at least 1".to_string(),
            ));
        }

        let rag = RagConfig {
            top_k: parse_var("BIZNAVI_RAG_TOP_K", defaults.rag.top_k)?,
            max_top_k: parse_var("BIZNAVI_RAG_MAX_TOP_K", defaults.rag.max_top_k)?,
            min_score: parse_var("BIZNAVI_RAG_MIN_SCORE", defaults.rag.min_score)?,
            broaden_factor: parse_var("BIZNAVI_RAG_BROADEN_FACTOR", defaults.rag.broaden_factor)?,
        };

        let api_port = match env::var("PORT").or_else(|_| env::var("API_PORT")) {
            Ok(raw) => raw
                .parse()
                .map_err(|_| OrchestrationError::Config(format!("invalid port '{}'", raw)))?,
            Err(_) => defaults.api_port,
        };

        Ok(Self {
            sales_csv: path_var("BIZNAVI_SALES_CSV", defaults.sales_csv),
            uploaded_csv: path_var("BIZNAVI_UPLOADED_CSV", defaults.uploaded_csv),
            policy_index: path_var("BIZNAVI_POLICY_INDEX", defaults.policy_index),
            history_turns: parse_var("BIZNAVI_HISTORY_TURNS", defaults.history_turns)?,
            priority: parse_var("BIZNAVI_TOOL_PRIORITY", defaults.priority)?,
            orchestrator,
            rag,
            forecast: ForecastConfig {
                min_observations: parse_var(
                    "BIZNAVI_FORECAST_MIN_OBS",
                    defaults.forecast.min_observations,
                )?,
            },
            chart: ChartConfig {
                max_points: parse_var("BIZNAVI_CHART_MAX_POINTS", defaults.chart.max_points)?,
            },
            gemini_api_key: non_empty_var("GEMINI_API_KEY"),
            database_url: non_empty_var("POSTGRES_URL").or_else(|| non_empty_var("DATABASE_URL")),
            api_port,
        })
    }

    /// Sales file to load: the uploaded one wins when present
    pub fn sales_source(&self) -> &PathBuf {
        if self.uploaded_csv.exists() {
            &self.uploaded_csv
        } else {
            &self.sales_csv
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn path_var(key: &str, default: PathBuf) -> PathBuf {
    non_empty_var(key).map(PathBuf::from).unwrap_or(default)
}

fn parse_var<T: FromStr>(key: &str, default: T) -> Result<T> {
    match non_empty_var(key) {
        Some(raw) => raw.parse::<T>().map_err(|_| {
            OrchestrationError::Config(format!("invalid value '{}' for {}", raw, key))
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_priority_order() {
        let priority = ToolPriority::default();
        assert!(priority.rank(ToolName::Forecast) < priority.rank(ToolName::Rag));
        assert!(priority.rank(ToolName::Rag) < priority.rank(ToolName::Analytics));
        assert!(priority.rank(ToolName::Analytics) < priority.rank(ToolName::Visualize));
    }

    #[test]
    fn test_partial_priority_is_completed() {
        let priority: ToolPriority = "visualize, analytics".parse().unwrap();
        assert_eq!(
            priority.order(),
            &[
                ToolName::Visualize,
                ToolName::Analytics,
                ToolName::Forecast,
                ToolName::Rag
            ]
        );
    }

    #[test]
    fn test_invalid_priority_rejected() {
        let result = "forecast,weather".parse::<ToolPriority>();
        assert!(matches!(result, Err(OrchestrationError::Config(_))));
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.orchestrator.max_cycles, 4);
        assert_eq!(settings.forecast.min_observations, 10);
        assert_eq!(settings.chart.max_points, 10);
        assert_eq!(settings.rag.top_k, 3);
        assert_eq!(settings.rag.max_top_k, 20);
    }
}
