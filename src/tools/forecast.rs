//! Demand forecasting for a single item
//!
//! Builds the daily quantity series of an item from the sales data and
//! hands it to a [`ForecastEngine`]. The default engine fits a linear trend
//! plus day-of-week offsets, which keeps the output deterministic.

use super::{decode_args, ArgKind, ArgSpec, Tool, ToolContext, ToolSpec};
use crate::config::ForecastConfig;
use crate::data::{SalesTable, DATE_FIELD, ITEM_FIELD, QUANTITY_FIELD};
use crate::models::{
    ForecastPoint, ForecastSeries, ToolCall, ToolErrorKind, ToolFailure, ToolName, ToolPayload,
};
use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Longest horizon accepted, in days
pub const MAX_HORIZON_DAYS: u32 = 366;

static SPEC: ToolSpec = ToolSpec {
    name: ToolName::Forecast,
    description: "Useful for predicting future demand or sales quantity of a specific item \
                  over a horizon such as next week or next month.",
    keywords: &[
        "forecast", "forecasting", "predict", "prediction", "future", "demand", "next month",
        "next week", "next quarter", "next year", "projection", "project", "expected",
        "upcoming", "tomorrow",
    ],
    arguments: &[
        ArgSpec {
            name: "item",
            kind: ArgKind::String,
            required: true,
            description: "item or category name, e.g. Kurta",
        },
        ArgSpec {
            name: "horizon_days",
            kind: ArgKind::Integer,
            required: true,
            description: "number of days to forecast",
        },
    ],
};

/// History → predicted daily values
pub trait ForecastEngine: Send + Sync {
    /// `history` is sorted by date with one entry per observed day
    fn forecast(&self, history: &[(NaiveDate, f64)], horizon_days: u32) -> Vec<ForecastPoint>;
}

/// Least-squares linear trend plus mean weekday residuals, clamped at zero
#[derive(Debug, Default, Clone, Copy)]
pub struct TrendSeasonalForecaster;

impl ForecastEngine for TrendSeasonalForecaster {
    fn forecast(&self, history: &[(NaiveDate, f64)], horizon_days: u32) -> Vec<ForecastPoint> {
        let Some(&(first, _)) = history.first() else {
            return Vec::new();
        };
        let Some(&(last, _)) = history.last() else {
            return Vec::new();
        };

        let xs: Vec<f64> = history
            .iter()
            .map(|(d, _)| (*d - first).num_days() as f64)
            .collect();
        let ys: Vec<f64> = history.iter().map(|(_, v)| *v).collect();
        let n = xs.len() as f64;

        let mean_x = xs.iter().sum::<f64>() / n;
        let mean_y = ys.iter().sum::<f64>() / n;
        let var_x: f64 = xs.iter().map(|x| (x - mean_x).powi(2)).sum();
        let cov: f64 = xs
            .iter()
            .zip(&ys)
            .map(|(x, y)| (x - mean_x) * (y - mean_y))
            .sum();

        let slope = if var_x > 0.0 { cov / var_x } else { 0.0 };
        let intercept = mean_y - slope * mean_x;

        let mut weekday_sum = [0.0f64; 7];
        let mut weekday_n = [0usize; 7];
        for ((date, y), x) in history.iter().zip(&xs) {
            let wd = date.weekday().num_days_from_monday() as usize;
            weekday_sum[wd] += y - (intercept + slope * x);
            weekday_n[wd] += 1;
        }

        (1..=horizon_days as i64)
            .map(|ahead| {
                let date = last + Duration::days(ahead);
                let x = (date - first).num_days() as f64;
                let wd = date.weekday().num_days_from_monday() as usize;
                let seasonal = if weekday_n[wd] > 0 {
                    weekday_sum[wd] / weekday_n[wd] as f64
                } else {
                    0.0
                };

                ForecastPoint {
                    date,
                    value: (intercept + slope * x + seasonal).max(0.0),
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastArgs {
    pub item: String,
    pub horizon_days: u32,
}

pub struct ForecastTool {
    sales: Arc<SalesTable>,
    engine: Arc<dyn ForecastEngine>,
    config: ForecastConfig,
}

impl ForecastTool {
    pub fn new(
        sales: Arc<SalesTable>,
        engine: Arc<dyn ForecastEngine>,
        config: ForecastConfig,
    ) -> Self {
        Self {
            sales,
            engine,
            config,
        }
    }

    /// Daily quantity of `item`, summed per day and sorted by date
    pub fn daily_history(&self, item: &str) -> std::result::Result<Vec<(NaiveDate, f64)>, ToolFailure> {
        let column = |field: &str| {
            self.sales.resolve_column(field).ok_or_else(|| {
                ToolFailure::data(format!("sales data has no {} column", field))
            })
        };
        let item_idx = column(ITEM_FIELD)?;
        let date_idx = column(DATE_FIELD)?;
        let qty_idx = column(QUANTITY_FIELD)?;

        let mut daily: BTreeMap<NaiveDate, f64> = BTreeMap::new();
        for record in self.sales.records() {
            if !record.get(item_idx).eq_ignore_ascii_case(item) {
                continue;
            }
            if let Some(date) = record.date(date_idx) {
                *daily.entry(date).or_default() += record.number(qty_idx);
            }
        }

        Ok(daily.into_iter().collect())
    }

    pub fn run(&self, args: &ForecastArgs) -> std::result::Result<ToolPayload, ToolFailure> {
        let item = args.item.trim();
        if item.is_empty() {
            return Err(ToolFailure::invalid_arguments("item is empty"));
        }
        if args.horizon_days == 0 || args.horizon_days > MAX_HORIZON_DAYS {
            return Err(ToolFailure::invalid_arguments(format!(
                "horizon_days must be between 1 and {}",
                MAX_HORIZON_DAYS
            )));
        }

        let history = self.daily_history(item)?;
        if history.len() < self.config.min_observations {
            return Err(ToolFailure::new(
                ToolErrorKind::InsufficientHistoryError,
                format!(
                    "'{}' has {} day(s) of history, {} required",
                    item,
                    history.len(),
                    self.config.min_observations
                ),
            ));
        }

        let points = self.engine.forecast(&history, args.horizon_days);
        debug!(item, horizon = args.horizon_days, history = history.len(), "Forecast computed");

        Ok(ToolPayload::Forecast(ForecastSeries {
            item: item.to_string(),
            horizon_days: args.horizon_days,
            history_days: history.len(),
            points,
        }))
    }
}

#[async_trait::async_trait]
impl Tool for ForecastTool {
    fn spec(&self) -> &ToolSpec {
        &SPEC
    }

    async fn invoke(
        &self,
        call: &ToolCall,
        _ctx: &ToolContext,
    ) -> std::result::Result<ToolPayload, ToolFailure> {
        let args: ForecastArgs = decode_args(call)?;
        self.run(&args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn tool() -> ForecastTool {
        ForecastTool::new(
            testing::sales_table(),
            Arc::new(TrendSeasonalForecaster),
            ForecastConfig::default(),
        )
    }

    fn args(item: &str, horizon_days: u32) -> ForecastArgs {
        ForecastArgs {
            item: item.to_string(),
            horizon_days,
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2022, 4, d).unwrap()
    }

    #[test]
    fn test_linear_trend_is_extrapolated() {
        let history: Vec<_> = (1..=14).map(|d| (day(d), d as f64)).collect();
        let points = TrendSeasonalForecaster.forecast(&history, 3);

        assert_eq!(points.len(), 3);
        assert_eq!(points[0].date, day(15));
        assert!((points[0].value - 15.0).abs() < 1e-6);
        assert!((points[2].value - 17.0).abs() < 1e-6);
    }

    #[test]
    fn test_forecast_never_negative() {
        let history: Vec<_> = (1..=14).map(|d| (day(d), 30.0 - 2.0 * d as f64)).collect();
        let points = TrendSeasonalForecaster.forecast(&history, 30);
        assert!(points.iter().all(|p| p.value >= 0.0));
    }

    #[test]
    fn test_forecast_for_item_with_history() {
        let payload = tool().run(&args("set", 30)).unwrap();

        let ToolPayload::Forecast(series) = payload else {
            panic!("expected forecast");
        };
        assert_eq!(series.horizon_days, 30);
        assert_eq!(series.points.len(), 30);
        assert!(series.history_days >= 10);
    }

    #[test]
    fn test_short_history_is_insufficient() {
        let err = tool().run(&args("Kurta", 30)).unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::InsufficientHistoryError);
    }

    #[test]
    fn test_unknown_item_is_insufficient() {
        let err = tool().run(&args("Saree", 7)).unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::InsufficientHistoryError);
    }

    #[test]
    fn test_horizon_bounds() {
        assert_eq!(
            tool().run(&args("Set", 0)).unwrap_err().kind,
            ToolErrorKind::InvalidArguments
        );
        assert_eq!(
            tool().run(&args("Set", 400)).unwrap_err().kind,
            ToolErrorKind::InvalidArguments
        );
    }

    #[test]
    fn test_same_call_is_idempotent() {
        let a = tool().run(&args("Set", 14)).unwrap();
        let b = tool().run(&args("Set", 14)).unwrap();
        assert_eq!(a, b);
    }
}
