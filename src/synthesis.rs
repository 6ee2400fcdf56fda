//! Final answer composition
//!
//! Builds the user-facing text from a turn's results. Failed results only
//! contribute a plain-language note about their error kind; results that a
//! retry superseded are skipped.

use crate::error::OrchestrationError;
use crate::models::{
    AnswerKind, ChartRef, DataTable, ForecastSeries, Snippet, ToolCall, ToolErrorKind,
    ToolFailure, ToolName, ToolPayload, ToolResult,
};
use std::collections::HashSet;
use uuid::Uuid;

/// Rows shown in a markdown table
const TABLE_ROWS: usize = 10;

const BUDGET_NOTE: &str = "_Note: I reached the step limit for this question, so this answer \
                           is based on the results gathered so far._";

pub struct Composition {
    pub kind: AnswerKind,
    pub text: String,
    pub chart: Option<ChartRef>,
}

/// Compose the answer for a turn that ended in `Answering`
pub fn compose(calls: &[ToolCall], results: &[ToolResult], budget_exhausted: bool) -> Composition {
    let superseded: HashSet<Uuid> = calls
        .iter()
        .filter(|c| results.iter().any(|r| r.call_id() == c.call_id))
        .filter_map(|c| c.retry_of)
        .collect();

    let mut sections = Vec::new();
    let mut chart = None;

    for result in results.iter().filter(|r| !superseded.contains(&r.call_id())) {
        let call = calls.iter().find(|c| c.call_id == result.call_id());

        match (result.payload(), result.error()) {
            (Some(payload), _) => {
                if let ToolPayload::Chart(spec) = payload {
                    chart = Some(ChartRef {
                        call_id: result.call_id(),
                        spec: spec.clone(),
                    });
                }
                sections.push(describe_payload(payload));
            }
            (None, Some(failure)) => sections.push(describe_failure(result.tool(), call, failure)),
            (None, None) => {}
        }
    }

    if sections.is_empty() {
        return Composition {
            kind: AnswerKind::OutOfDomain,
            text: "I couldn't find anything to answer that. I can help with sales figures, \
                   company policies, demand forecasts and charts."
                .to_string(),
            chart: None,
        };
    }

    if budget_exhausted {
        sections.push(BUDGET_NOTE.to_string());
    }

    Composition {
        kind: AnswerKind::Answer,
        text: sections.join("\n\n"),
        chart,
    }
}

/// Clearly labelled answer for an aborted turn
pub fn system_error(err: &OrchestrationError) -> String {
    match err {
        OrchestrationError::ReasoningEngineUnavailable(_) => format!(
            "System error: the reasoning service is unavailable, so this question could not be \
             processed. Please try again later. ({})",
            err
        ),
        OrchestrationError::ToolNotRegistered(tool) => format!(
            "System error: the {} tool is not available in this deployment. ({})",
            tool, err
        ),
        _ => format!("System error: {}", err),
    }
}

fn describe_payload(payload: &ToolPayload) -> String {
    match payload {
        ToolPayload::Scalar {
            label,
            value,
            matched_records,
        } => {
            let shown = if label.starts_with("count") {
                format_integer(*value)
            } else {
                format_number(*value)
            };
            format!(
                "{}: {} (from {} matching records)",
                label,
                shown,
                format_integer(*matched_records as f64)
            )
        }
        ToolPayload::Table(table) => describe_table(table),
        ToolPayload::Snippets { query, hits } => describe_snippets(query, hits),
        ToolPayload::Forecast(series) => describe_forecast(series),
        ToolPayload::Chart(spec) => format!(
            "Here is a {} chart of {} by {} with {} point(s), keyed to analytics result {}.",
            spec.chart_type,
            spec.y,
            spec.x,
            spec.points.len(),
            spec.data_ref
        ),
    }
}

fn describe_table(table: &DataTable) -> String {
    if table.rows.is_empty() {
        return format!(
            "No records matched for {} by {}.",
            table.value_column, table.key_column
        );
    }

    let mut out = format!("{} by {}:\n\n", table.value_column, table.key_column);
    out.push_str(&format!("| {} | {} |\n", table.key_column, table.value_column));
    out.push_str("|---|---:|\n");

    let integer = table.value_column.starts_with("count");
    for row in table.rows.iter().take(TABLE_ROWS) {
        let value = if integer {
            format_integer(row.value)
        } else {
            format_number(row.value)
        };
        out.push_str(&format!("| {} | {} |\n", row.key, value));
    }

    if table.rows.len() > TABLE_ROWS {
        out.push_str(&format!(
            "\n(showing the top {} of {} groups)",
            TABLE_ROWS,
            table.rows.len()
        ));
    }

    out.trim_end().to_string()
}

fn describe_snippets(query: &str, hits: &[Snippet]) -> String {
    if hits.is_empty() {
        return format!(
            "No relevant policy information was found for \"{}\".",
            query
        );
    }

    let bullets = hits
        .iter()
        .map(|s| format!("- {} (source: {}, score {:.2})", s.text, s.source, s.score))
        .collect::<Vec<_>>()
        .join("\n");
    format!("Found relevant policy info:\n{}", bullets)
}

fn describe_forecast(series: &ForecastSeries) -> String {
    let total = series.total().round();
    format!(
        "Forecast Report for '{}' (Next {} days):\n\
         - Predicted total quantity: {} units\n\
         - Average daily quantity: {:.1} units/day\n\
         - Inventory hint: based on historical trends, prepare inventory for approx. {} units.",
        series.item,
        series.horizon_days,
        format_integer(total),
        series.average(),
        format_integer(total)
    )
}

fn describe_failure(tool: ToolName, call: Option<&ToolCall>, failure: &ToolFailure) -> String {
    match failure.kind {
        ToolErrorKind::InsufficientHistoryError => {
            let item = call.and_then(|c| c.arg_str("item")).unwrap_or("that item");
            format!(
                "Forecasting is unavailable for '{}': there is not enough sales history for \
                 that item to make a reliable prediction.",
                item
            )
        }
        ToolErrorKind::TimeoutError => format!(
            "The {} tool took too long to respond, so I couldn't get that result.",
            tool
        ),
        ToolErrorKind::DataError => format!(
            "I couldn't compute that from the data: {}.",
            failure.detail
        ),
        ToolErrorKind::SchemaError if tool == ToolName::Visualize => {
            format!("I couldn't build the chart: {}.", failure.detail)
        }
        ToolErrorKind::SchemaError => format!(
            "The {} request didn't fit the available data: {}.",
            tool, failure.detail
        ),
        ToolErrorKind::InvalidArguments => format!(
            "I couldn't run the {} tool with the details given ({}).",
            tool, failure.detail
        ),
    }
}

/// `8017145.478` → `8,017,145.48`
pub fn format_number(value: f64) -> String {
    let fixed = format!("{:.2}", value.abs());
    let (whole, frac) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    let sign = if value < 0.0 && fixed != "0.00" { "-" } else { "" };
    format!("{}{}.{}", sign, group_thousands(whole), frac)
}

pub fn format_integer(value: f64) -> String {
    let fixed = format!("{:.0}", value.abs());
    let sign = if value < 0.0 && fixed != "0" { "-" } else { "" };
    format!("{}{}", sign, group_thousands(&fixed))
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
