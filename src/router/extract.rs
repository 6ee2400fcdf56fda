//! Argument extraction from free text
//!
//! Pure functions over the utterance. Nothing here guesses: a value is
//! either found in the text (or the lexicon) or reported as absent.

use crate::data::SalesTable;
use crate::models::ChartType;
use crate::tools::analytics::parse_month;
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;

lazy_static! {
    static ref QUOTED: Regex =
        Regex::new(r#"(?:^|\s)['"‘“]([^'"‘’“”]{2,})['"’”]"#).expect("quoted pattern");
    static ref NEXT_N: Regex =
        Regex::new(r"(?i)\bnext\s+(\d{1,3})\s+(day|week|month)s?\b").expect("horizon pattern");
    static ref NEXT_UNIT: Regex =
        Regex::new(r"(?i)\b(?:next|coming)\s+(week|month|quarter|year)\b").expect("unit pattern");
    static ref TOMORROW: Regex = Regex::new(r"(?i)\btomorrow\b").expect("tomorrow pattern");
    static ref GROUP_BY: Regex =
        Regex::new(r"(?i)\b(?:by|per)\s+([a-z][a-z\-]*)(?:\s+([a-z][a-z\-]*))?").expect("group pattern");
    static ref MONTH: Regex = Regex::new(
        r"(?i)\b(january|february|march|april|june|july|august|september|october|november|december)\b|\b(?:in|for|during)\s+(may)\b"
    )
    .expect("month pattern");
    static ref CLAUSE_LEAD: Regex = Regex::new(
        r"(?i)\s+and\s+(?:also\s+|then\s+)?(what|how|which|show|forecast|predict|plot|visuali[sz]e|tell)\b"
    )
    .expect("clause pattern");
}

/// Lowercased text with punctuation folded to spaces and padded on both
/// sides so keywords can be matched as whole words with `contains`.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push(' ');
    let mut last_space = true;
    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            out.push(c);
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    if !last_space {
        out.push(' ');
    }
    out
}

/// Whole-word (or whole-phrase) match against normalized text
pub fn has_word(normalized: &str, keyword: &str) -> bool {
    normalized.contains(&format!(" {} ", keyword))
}

pub fn has_any(normalized: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| has_word(normalized, k))
}

/// Split a compound question into independent clauses
pub fn clauses(text: &str) -> Vec<String> {
    let marked = CLAUSE_LEAD.replace_all(text, "|$1");
    marked
        .split(|c| c == '|' || c == '?' || c == ';')
        .map(str::trim)
        .filter(|c| c.split_whitespace().count() >= 2)
        .map(str::to_string)
        .collect()
}

/// Forecast horizon in days
pub fn horizon_days(text: &str) -> Option<u32> {
    if let Some(caps) = NEXT_N.captures(text) {
        let n: u32 = caps[1].parse().ok()?;
        let unit = match caps[2].to_lowercase().as_str() {
            "week" => 7,
            "month" => 30,
            _ => 1,
        };
        return Some(n * unit);
    }

    if let Some(caps) = NEXT_UNIT.captures(text) {
        return Some(match caps[1].to_lowercase().as_str() {
            "week" => 7,
            "month" => 30,
            "quarter" => 90,
            _ => 365,
        });
    }

    TOMORROW.is_match(text).then_some(1)
}

pub fn quoted(text: &str) -> Option<String> {
    QUOTED
        .captures(text)
        .map(|caps| caps[1].trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn month(text: &str) -> Option<u32> {
    let caps = MONTH.captures(text)?;
    let name = caps.get(1).or_else(|| caps.get(2))?;
    parse_month(name.as_str())
}

pub fn chart_type(normalized: &str) -> ChartType {
    if has_any(normalized, &["pie", "donut", "share"]) {
        ChartType::Pie
    } else if has_any(normalized, &["line", "trend", "over time"]) {
        ChartType::Line
    } else {
        ChartType::Bar
    }
}

/// Aggregation requested by the text, plus whether it asked for net figures
pub fn metric(normalized: &str) -> (String, bool) {
    let field = if has_any(normalized, &["quantity", "units", "unit", "qty", "pieces"]) {
        Some("Qty")
    } else if has_any(
        normalized,
        &["orders", "order count", "count", "how many", "number of"],
    ) {
        None
    } else {
        Some("Amount")
    };

    let average = has_any(normalized, &["average", "avg", "mean"]);
    let metric = match (field, average) {
        (Some(f), true) => format!("avg({})", f),
        (Some(f), false) => format!("sum({})", f),
        (None, _) => "count".to_string(),
    };

    (metric, has_word(normalized, "net"))
}

/// Status word the question restricts to, if any
pub fn status(normalized: &str) -> Option<&'static str> {
    [
        ("cancelled", "Cancelled"),
        ("canceled", "Cancelled"),
        ("shipped", "Shipped"),
        ("delivered", "Delivered"),
        ("pending", "Pending"),
    ]
    .iter()
    .find(|(word, _)| has_word(normalized, word))
    .map(|(_, status)| *status)
}

/// (normalized, original) pairs of a column's values, longest first
fn vocabulary(table: &SalesTable, field: &str) -> Vec<(String, String)> {
    let mut words: Vec<(String, String)> = table
        .distinct_values(field)
        .into_iter()
        .map(|value| (normalize(&value).trim().to_string(), value))
        .filter(|(norm, _)| !norm.is_empty())
        .collect();
    words.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
    words
}

/// Read-only vocabulary drawn from the sales data
pub struct Lexicon {
    table: Arc<SalesTable>,
    items: Vec<(String, String)>,
    regions: Vec<(String, String)>,
}

impl Lexicon {
    pub fn new(table: Arc<SalesTable>) -> Self {
        let items = vocabulary(&table, crate::data::ITEM_FIELD);
        let regions = vocabulary(&table, crate::data::REGION_FIELD);
        Self {
            table,
            items,
            regions,
        }
    }

    /// Known item mentioned in the text (quoted names win)
    pub fn item(&self, text: &str, normalized: &str) -> Option<String> {
        if let Some(name) = quoted(text) {
            let norm = normalize(&name);
            return Some(
                self.items
                    .iter()
                    .find(|(known, _)| format!(" {} ", known) == norm)
                    .map(|(_, original)| original.clone())
                    .unwrap_or(name),
            );
        }

        self.items
            .iter()
            .find(|(known, _)| has_word(normalized, known))
            .map(|(_, original)| original.clone())
    }

    /// Known shipping region mentioned in the text
    pub fn region(&self, normalized: &str) -> Option<String> {
        self.regions
            .iter()
            .find(|(known, _)| has_word(normalized, known))
            .map(|(_, original)| original.clone())
    }

    /// Canonical header for a business field name
    pub fn field(&self, name: &str) -> Option<String> {
        self.table
            .resolve_column(name)
            .map(|idx| self.table.column_name(idx).to_string())
    }

    /// `by <Field>` / `per <Field>`, trying two words before one
    pub fn group_by(&self, text: &str) -> Option<String> {
        GROUP_BY.captures_iter(text).find_map(|caps| {
            let first = caps.get(1)?.as_str();
            caps.get(2)
                .and_then(|second| self.field(&format!("{} {}", first, second.as_str())))
                .or_else(|| self.field(first))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn test_normalize_pads_and_folds_punctuation() {
        assert_eq!(normalize("Sales, by Category?"), " sales by category ");
        assert!(has_word(&normalize("What's the KPI?"), "kpi"));
        assert!(!has_word(&normalize("returning customers"), "return"));
    }

    #[test]
    fn test_horizon_phrases() {
        assert_eq!(horizon_days("forecast Kurta next month"), Some(30));
        assert_eq!(horizon_days("demand next week"), Some(7));
        assert_eq!(horizon_days("for the next quarter"), Some(90));
        assert_eq!(horizon_days("next 14 days"), Some(14));
        assert_eq!(horizon_days("next 2 weeks"), Some(14));
        assert_eq!(horizon_days("next 3 months"), Some(90));
        assert_eq!(horizon_days("sales tomorrow"), Some(1));
        assert_eq!(horizon_days("forecast Kurta"), None);
    }

    #[test]
    fn test_quoted_names() {
        assert_eq!(quoted("Forecast demand for 'Kurta' next month"), Some("Kurta".into()));
        assert_eq!(quoted("sales of \"Western Dress\""), Some("Western Dress".into()));
        assert_eq!(quoted("no quotes here"), None);
    }

    #[test]
    fn test_metric_rules() {
        assert_eq!(metric(&normalize("total sales")), ("sum(Amount)".into(), false));
        assert_eq!(metric(&normalize("net revenue")), ("sum(Amount)".into(), true));
        assert_eq!(metric(&normalize("how many units sold")), ("sum(Qty)".into(), false));
        assert_eq!(metric(&normalize("how many orders")), ("count".into(), false));
        assert_eq!(metric(&normalize("average order value")), ("avg(Amount)".into(), false));
    }

    #[test]
    fn test_month_requires_context_for_may() {
        assert_eq!(month("sales in April"), Some(4));
        assert_eq!(month("orders during may"), Some(5));
        assert_eq!(month("may I see the policy"), None);
    }

    #[test]
    fn test_clause_splitting() {
        let parts = clauses("Forecast Kurta next month and what is the return policy?");
        assert_eq!(parts, vec!["Forecast Kurta next month", "what is the return policy"]);

        assert_eq!(clauses("total sales by Category").len(), 1);
    }

    #[test]
    fn test_lexicon_items_and_fields() {
        let lexicon = Lexicon::new(testing::sales_table());

        let text = "how did western dress sell";
        assert_eq!(lexicon.item(text, &normalize(text)), Some("Western Dress".into()));
        let text = "sales of 'kurta'";
        assert_eq!(lexicon.item(text, &normalize(text)), Some("Kurta".into()));

        assert_eq!(lexicon.group_by("total sales by category"), Some("Category".into()));
        assert_eq!(lexicon.group_by("orders per ship state"), Some("ship-state".into()));
        assert_eq!(lexicon.group_by("average per order"), None);

        assert_eq!(lexicon.region(&normalize("chart it for Kerala only")), Some("KERALA".into()));
        assert_eq!(lexicon.region(&normalize("orders from tamil nadu")), Some("TAMIL NADU".into()));
        assert_eq!(lexicon.region(&normalize("orders by category")), None);
    }

    #[test]
    fn test_chart_type_defaults_to_bar() {
        assert_eq!(chart_type(&normalize("plot sales by category")), ChartType::Bar);
        assert_eq!(chart_type(&normalize("pie chart of orders by status")), ChartType::Pie);
    }
}
