//! Chart specs built from already computed analytics tables

use super::{decode_args, ArgKind, ArgSpec, Tool, ToolContext, ToolSpec};
use crate::config::ChartConfig;
use crate::models::{ChartPoint, ChartSpec, ChartType, ToolCall, ToolFailure, ToolName, ToolPayload};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

static SPEC: ToolSpec = ToolSpec {
    name: ToolName::Visualize,
    description: "Useful when the user asks to visualize, plot, chart or graph data. \
                  Works on a table already computed by analytics.",
    keywords: &[
        "visualize", "visualise", "visualization", "plot", "chart", "graph", "draw", "diagram",
        "pie", "bar chart", "line chart",
    ],
    arguments: &[
        ArgSpec {
            name: "chart_type",
            kind: ArgKind::String,
            required: true,
            description: "bar, line or pie",
        },
        ArgSpec {
            name: "x",
            kind: ArgKind::String,
            required: true,
            description: "category axis column",
        },
        ArgSpec {
            name: "y",
            kind: ArgKind::String,
            required: true,
            description: "value axis column",
        },
        ArgSpec {
            name: "data_ref",
            kind: ArgKind::String,
            required: true,
            description: "call id of the analytics result to plot",
        },
    ],
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualizationArgs {
    pub chart_type: String,
    pub x: String,
    pub y: String,
    /// Call id of an analytics result, as text
    pub data_ref: String,
}

pub struct VisualizationTool {
    config: ChartConfig,
}

impl VisualizationTool {
    pub fn new(config: ChartConfig) -> Self {
        Self { config }
    }

    pub fn render(
        &self,
        args: &VisualizationArgs,
        ctx: &ToolContext,
    ) -> std::result::Result<ToolPayload, ToolFailure> {
        let chart_type: ChartType = args
            .chart_type
            .parse()
            .map_err(ToolFailure::invalid_arguments)?;

        let data_ref = Uuid::parse_str(args.data_ref.trim()).map_err(|_| {
            ToolFailure::schema(format!("data_ref '{}' is not a result id", args.data_ref))
        })?;

        let table = ctx
            .find(data_ref)
            .and_then(|result| result.table())
            .ok_or_else(|| {
                ToolFailure::schema(format!("data_ref {} is not an available table", data_ref))
            })?;

        for axis in [&args.x, &args.y] {
            if !table.has_column(axis) {
                return Err(ToolFailure::schema(format!(
                    "axis '{}' is not in the data (columns: {}, {})",
                    axis, table.key_column, table.value_column
                )));
            }
        }
        if args.x.eq_ignore_ascii_case(&args.y) {
            return Err(ToolFailure::schema("x and y must be different columns"));
        }

        // Rows arrive sorted descending, so the head is the top N
        let points: Vec<ChartPoint> = table
            .rows
            .iter()
            .take(self.config.max_points)
            .map(|row| ChartPoint {
                label: row.key.clone(),
                value: row.value,
            })
            .collect();

        let title = if table.rows.len() > points.len() {
            format!(
                "{} by {} (Top {})",
                table.value_column,
                table.key_column,
                points.len()
            )
        } else {
            format!("{} by {}", table.value_column, table.key_column)
        };

        Ok(ToolPayload::Chart(ChartSpec {
            chart_type,
            title,
            x: table.key_column.clone(),
            y: table.value_column.clone(),
            points,
            data_ref,
        }))
    }
}

#[async_trait::async_trait]
impl Tool for VisualizationTool {
    fn spec(&self) -> &ToolSpec {
        &SPEC
    }

    async fn invoke(
        &self,
        call: &ToolCall,
        ctx: &ToolContext,
    ) -> std::result::Result<ToolPayload, ToolFailure> {
        let args: VisualizationArgs = decode_args(call)?;
        self.render(&args, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DataTable, TableRow, ToolArguments, ToolErrorKind, ToolResult};

    fn table_result(rows: usize) -> (Uuid, ToolContext) {
        let call = ToolCall::new(ToolName::Analytics, ToolArguments::new());
        let table = DataTable {
            key_column: "Category".into(),
            value_column: "sum(Amount)".into(),
            rows: (0..rows)
                .map(|i| TableRow {
                    key: format!("item-{}", i),
                    value: (rows - i) as f64 * 100.0,
                })
                .collect(),
            matched_records: rows,
        };
        let result = ToolResult::success(&call, ToolPayload::Table(table), 1);
        (call.call_id, ToolContext::new(vec![result]))
    }

    fn args(chart_type: &str, x: &str, y: &str, data_ref: Uuid) -> VisualizationArgs {
        VisualizationArgs {
            chart_type: chart_type.into(),
            x: x.into(),
            y: y.into(),
            data_ref: data_ref.to_string(),
        }
    }

    #[test]
    fn test_bar_chart_keeps_top_points() {
        let (data_ref, ctx) = table_result(15);
        let tool = VisualizationTool::new(ChartConfig::default());

        let payload = tool
            .render(&args("bar", "category", "sum(Amount)", data_ref), &ctx)
            .unwrap();

        let ToolPayload::Chart(spec) = payload else {
            panic!("expected chart");
        };
        assert_eq!(spec.chart_type, ChartType::Bar);
        assert_eq!(spec.points.len(), 10);
        assert_eq!(spec.points[0].label, "item-0");
        assert_eq!(spec.data_ref, data_ref);
        assert!(spec.title.contains("Top 10"));
    }

    #[test]
    fn test_unknown_data_ref_is_schema_error() {
        let (_, ctx) = table_result(3);
        let tool = VisualizationTool::new(ChartConfig::default());

        let err = tool
            .render(&args("bar", "Category", "sum(Amount)", Uuid::new_v4()), &ctx)
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::SchemaError);
    }

    #[tokio::test]
    async fn test_malformed_data_ref_is_schema_error() {
        let (_, ctx) = table_result(3);
        let tool = VisualizationTool::new(ChartConfig::default());

        let arguments = serde_json::json!({
            "chart_type": "bar",
            "x": "Category",
            "y": "sum(Amount)",
            "data_ref": "last-table",
        });
        let call = ToolCall::new(ToolName::Visualize, arguments.as_object().cloned().unwrap());

        let err = tool.invoke(&call, &ctx).await.unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::SchemaError);
        assert!(err.detail.contains("last-table"));
    }

    #[test]
    fn test_missing_axis_is_schema_error() {
        let (data_ref, ctx) = table_result(3);
        let tool = VisualizationTool::new(ChartConfig::default());

        let err = tool
            .render(&args("pie", "Region", "sum(Amount)", data_ref), &ctx)
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::SchemaError);
    }

    #[test]
    fn test_unsupported_chart_type() {
        let (data_ref, ctx) = table_result(3);
        let tool = VisualizationTool::new(ChartConfig::default());

        let err = tool
            .render(&args("radar", "Category", "sum(Amount)", data_ref), &ctx)
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::InvalidArguments);
    }
}
