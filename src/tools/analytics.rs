//! Sales analytics over the tabular data source
//!
//! Aggregates one metric, optionally grouped by a field and restricted by
//! filters. Gross figures include cancelled orders; "net" questions add a
//! `not_contains Cancelled` filter on Status.

use super::{decode_args, ArgKind, ArgSpec, Tool, ToolContext, ToolSpec};
use crate::data::{Record, SalesTable};
use crate::models::{DataTable, TableRow, ToolCall, ToolFailure, ToolName, ToolPayload};
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

static SPEC: ToolSpec = ToolSpec {
    name: ToolName::Analytics,
    description: "Useful for quantitative questions about past sales: revenue, order counts, \
                  quantities, categories, statuses or dates from the sales report.",
    keywords: &[
        "sales", "revenue", "amount", "total", "orders", "order", "count", "how many",
        "quantity", "units", "sold", "average", "net", "gross", "breakdown", "sum", "qty",
        "top", "highest", "lowest",
    ],
    arguments: &[
        ArgSpec {
            name: "metric",
            kind: ArgKind::String,
            required: true,
            description: "aggregation such as sum(Amount), avg(Qty) or count",
        },
        ArgSpec {
            name: "group_by",
            kind: ArgKind::String,
            required: false,
            description: "field to group by, e.g. Category or Status",
        },
        ArgSpec {
            name: "filter",
            kind: ArgKind::Array,
            required: false,
            description: "list of {field, op (eq|contains|not_contains|month), value}",
        },
    ],
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Sum,
    Avg,
    Count,
    Min,
    Max,
}

/// `sum(Amount)`, `avg(Qty)`, `count`, ...
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metric {
    pub aggregation: Aggregation,
    pub field: Option<String>,
}

impl Metric {
    pub fn sum(field: impl Into<String>) -> Self {
        Self {
            aggregation: Aggregation::Sum,
            field: Some(field.into()),
        }
    }

    pub fn count() -> Self {
        Self {
            aggregation: Aggregation::Count,
            field: None,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.aggregation {
            Aggregation::Sum => "sum",
            Aggregation::Avg => "avg",
            Aggregation::Count => "count",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
        };
        match &self.field {
            Some(field) => write!(f, "{}({})", name, field),
            None => f.write_str(name),
        }
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        let (func, field) = match s.find('(') {
            Some(open) if s.ends_with(')') => {
                let inner = s[open + 1..s.len() - 1].trim();
                let field = (!inner.is_empty() && inner != "*").then(|| inner.to_string());
                (s[..open].trim().to_lowercase(), field)
            }
            _ if s.eq_ignore_ascii_case("count") => ("count".to_string(), None),
            _ if !s.is_empty() => ("sum".to_string(), Some(s.to_string())),
            _ => return Err("metric is empty".to_string()),
        };

        let aggregation = match func.as_str() {
            "sum" | "total" => Aggregation::Sum,
            "avg" | "mean" | "average" => Aggregation::Avg,
            "count" => Aggregation::Count,
            "min" => Aggregation::Min,
            "max" => Aggregation::Max,
            other => return Err(format!("unknown aggregation '{}'", other)),
        };

        if aggregation != Aggregation::Count && field.is_none() {
            return Err(format!("{} needs a field", func));
        }

        Ok(Self { aggregation, field })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    #[default]
    Eq,
    Contains,
    NotContains,
    /// Calendar month of a date field, value 1-12
    Month,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    #[serde(default)]
    pub op: FilterOp,
    pub value: String,
}

impl Filter {
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsArgs {
    pub metric: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filter: Vec<Filter>,
}

struct ResolvedFilter {
    column: usize,
    op: FilterOp,
    value: String,
    month: u32,
}

impl ResolvedFilter {
    fn keep(&self, record: &Record<'_>) -> bool {
        let cell = record.get(self.column);
        match self.op {
            FilterOp::Eq => cell.eq_ignore_ascii_case(&self.value),
            FilterOp::Contains => cell.to_lowercase().contains(&self.value),
            FilterOp::NotContains => !cell.to_lowercase().contains(&self.value),
            FilterOp::Month => record
                .date(self.column)
                .map_or(false, |d| d.month() == self.month),
        }
    }
}

#[derive(Default)]
struct Accumulator {
    sum: f64,
    count: usize,
    min: Option<f64>,
    max: Option<f64>,
}

impl Accumulator {
    fn push(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    fn value(&self, aggregation: Aggregation) -> f64 {
        match aggregation {
            Aggregation::Sum => self.sum,
            Aggregation::Count => self.count as f64,
            Aggregation::Avg if self.count == 0 => 0.0,
            Aggregation::Avg => self.sum / self.count as f64,
            Aggregation::Min => self.min.unwrap_or(0.0),
            Aggregation::Max => self.max.unwrap_or(0.0),
        }
    }
}

pub struct AnalyticsTool {
    sales: Arc<SalesTable>,
}

impl AnalyticsTool {
    pub fn new(sales: Arc<SalesTable>) -> Self {
        Self { sales }
    }

    fn column(&self, field: &str) -> std::result::Result<usize, ToolFailure> {
        self.sales.resolve_column(field).ok_or_else(|| {
            ToolFailure::data(format!(
                "field '{}' does not exist in the sales data (available: {})",
                field,
                self.sales.columns().join(", ")
            ))
        })
    }

    fn resolve_filter(&self, filter: &Filter) -> std::result::Result<ResolvedFilter, ToolFailure> {
        let column = self.column(&filter.field)?;
        let month = if filter.op == FilterOp::Month {
            parse_month(&filter.value).ok_or_else(|| {
                ToolFailure::invalid_arguments(format!("'{}' is not a month", filter.value))
            })?
        } else {
            0
        };

        Ok(ResolvedFilter {
            column,
            op: filter.op,
            value: filter.value.to_lowercase(),
            month,
        })
    }

    pub fn run(&self, args: &AnalyticsArgs) -> std::result::Result<ToolPayload, ToolFailure> {
        let mut metric: Metric = args
            .metric
            .parse()
            .map_err(ToolFailure::invalid_arguments)?;

        let value_column = match &metric.field {
            Some(field) => {
                let idx = self.column(field)?;
                metric.field = Some(self.sales.column_name(idx).to_string());
                Some(idx)
            }
            None => None,
        };

        let group_column = args
            .group_by
            .as_deref()
            .map(|field| self.column(field))
            .transpose()?;

        let filters = args
            .filter
            .iter()
            .map(|f| self.resolve_filter(f))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut groups: BTreeMap<String, Accumulator> = BTreeMap::new();
        let mut matched = 0usize;

        for record in self.sales.records() {
            if !filters.iter().all(|f| f.keep(&record)) {
                continue;
            }
            matched += 1;

            let key = group_column
                .map(|idx| record.get(idx).to_string())
                .unwrap_or_default();
            let value = value_column.map_or(1.0, |idx| record.number(idx));
            groups.entry(key).or_default().push(value);
        }

        let label = metric.to_string();
        debug!(metric = %label, matched, groups = groups.len(), "Analytics aggregated");

        match group_column {
            None => Ok(ToolPayload::Scalar {
                value: groups
                    .values()
                    .next()
                    .map_or(0.0, |acc| acc.value(metric.aggregation)),
                label,
                matched_records: matched,
            }),
            Some(idx) => {
                let mut rows: Vec<TableRow> = groups
                    .iter()
                    .filter(|(key, _)| !key.is_empty())
                    .map(|(key, acc)| TableRow {
                        key: key.clone(),
                        value: acc.value(metric.aggregation),
                    })
                    .collect();

                // Descending by value; BTreeMap order breaks ties by key
                rows.sort_by(|a, b| b.value.total_cmp(&a.value));

                Ok(ToolPayload::Table(DataTable {
                    key_column: self.sales.column_name(idx).to_string(),
                    value_column: label,
                    rows,
                    matched_records: matched,
                }))
            }
        }
    }
}

#[async_trait::async_trait]
impl Tool for AnalyticsTool {
    fn spec(&self) -> &ToolSpec {
        &SPEC
    }

    async fn invoke(
        &self,
        call: &ToolCall,
        _ctx: &ToolContext,
    ) -> std::result::Result<ToolPayload, ToolFailure> {
        let args: AnalyticsArgs = decode_args(call)?;
        self.run(&args)
    }
}

const MONTHS: [&str; 12] = [
    "january", "february", "march", "april", "may", "june", "july", "august", "september",
    "october", "november", "december",
];

/// "4", "04", "april" and "apr" all mean April
pub fn parse_month(raw: &str) -> Option<u32> {
    let raw = raw.trim().to_lowercase();
    if let Ok(n) = raw.parse::<u32>() {
        return (1..=12).contains(&n).then_some(n);
    }
    if raw.len() < 3 {
        return None;
    }
    MONTHS
        .iter()
        .position(|m| m.starts_with(raw.as_str()))
        .map(|i| i as u32 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn tool() -> AnalyticsTool {
        AnalyticsTool::new(testing::sales_table())
    }

    fn args(metric: &str, group_by: Option<&str>, filter: Vec<Filter>) -> AnalyticsArgs {
        AnalyticsArgs {
            metric: metric.to_string(),
            group_by: group_by.map(str::to_string),
            filter,
        }
    }

    #[test]
    fn test_metric_parsing() {
        assert_eq!("sum(Amount)".parse::<Metric>().unwrap(), Metric::sum("Amount"));
        assert_eq!("count(*)".parse::<Metric>().unwrap(), Metric::count());
        assert_eq!("Qty".parse::<Metric>().unwrap(), Metric::sum("Qty"));
        assert!("median(Qty)".parse::<Metric>().is_err());
        assert!("avg()".parse::<Metric>().is_err());
    }

    #[test]
    fn test_grouped_sum_sorted_descending() {
        let payload = tool()
            .run(&args("sum(sales)", Some("category"), vec![]))
            .unwrap();

        let ToolPayload::Table(table) = payload else {
            panic!("expected table");
        };
        assert_eq!(table.key_column, "Category");
        assert_eq!(table.value_column, "sum(Amount)");
        assert!(table.rows.windows(2).all(|w| w[0].value >= w[1].value));
        assert_eq!(table.rows[0].key, "Kurta");
    }

    #[test]
    fn test_net_sales_excludes_cancelled() {
        let gross = tool()
            .run(&args(
                "sum(Amount)",
                None,
                vec![Filter::new("Category", FilterOp::Eq, "kurta")],
            ))
            .unwrap();
        let net = tool()
            .run(&args(
                "sum(Amount)",
                None,
                vec![
                    Filter::new("Category", FilterOp::Eq, "kurta"),
                    Filter::new("Status", FilterOp::NotContains, "Cancelled"),
                ],
            ))
            .unwrap();

        let (ToolPayload::Scalar { value: g, .. }, ToolPayload::Scalar { value: n, .. }) =
            (gross, net)
        else {
            panic!("expected scalars");
        };
        assert!(n < g);
    }

    #[test]
    fn test_month_filter_and_count() {
        let payload = tool()
            .run(&args(
                "count",
                None,
                vec![Filter::new("Date", FilterOp::Month, "April")],
            ))
            .unwrap();

        let ToolPayload::Scalar { value, matched_records, .. } = payload else {
            panic!("expected scalar");
        };
        assert_eq!(value, matched_records as f64);
        assert!(matched_records > 0);
    }

    #[test]
    fn test_unknown_field_is_data_error() {
        let err = tool()
            .run(&args("sum(Discount)", None, vec![]))
            .unwrap_err();
        assert_eq!(err.kind, crate::models::ToolErrorKind::DataError);

        let err = tool()
            .run(&args("sum(Amount)", Some("Warehouse"), vec![]))
            .unwrap_err();
        assert_eq!(err.kind, crate::models::ToolErrorKind::DataError);
    }

    #[test]
    fn test_parse_month() {
        assert_eq!(parse_month("April"), Some(4));
        assert_eq!(parse_month("apr"), Some(4));
        assert_eq!(parse_month("12"), Some(12));
        assert_eq!(parse_month("13"), None);
        assert_eq!(parse_month("ma"), None);
    }
}
