use serde::{Deserialize, Serialize};

use crate::error::Warning;
use crate::query::builder::Granularity;
use crate::query::period::DateRange;

/// Sales aggregates over one date range.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SalesTotals {
    /// Sum of non-negative line amounts.
    pub gross_sales: f64,
    /// Absolute sum of negative line amounts.
    pub returns: f64,
    pub net_sales: f64,
    pub orders: u64,
    pub return_orders: u64,
    /// Orders less return orders.
    pub net_orders: i64,
    pub customers: u64,
    pub units: f64,
    /// Net sales per net order; zero when there are none.
    pub avg_order_value: f64,
    pub line_count: u64,
}

/// Percent change against the previous period, one decimal. Zero when the
/// previous value is not positive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KpiChanges {
    pub gross_sales_pct: f64,
    pub returns_pct: f64,
    pub net_sales_pct: f64,
    pub orders_pct: f64,
    pub customers_pct: f64,
    pub units_pct: f64,
    pub avg_order_value_pct: f64,
}

/// Headline dashboard figures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiReport {
    pub range: DateRange,
    pub previous_range: DateRange,
    pub current: SalesTotals,
    pub previous: SalesTotals,
    pub change: KpiChanges,
    pub mtd_net_sales: f64,
    pub lmtd_net_sales: f64,
    pub mtd_change_pct: f64,
    pub ytd_net_sales: f64,
    pub currency: Option<String>,
    pub trend: Vec<TrendPoint>,
    pub top_salesmen: Vec<SalesmanPerformance>,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    /// Bucket start date, `YYYY-MM-DD`.
    pub period: String,
    pub net_sales: f64,
    pub orders: u64,
    pub customers: u64,
    pub units: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendReport {
    pub range: DateRange,
    pub granularity: Granularity,
    pub points: Vec<TrendPoint>,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPoint {
    pub day: String,
    pub net_sales: f64,
    pub orders: u64,
    /// Running total since the first of `day`'s month.
    pub mtd_net_sales: f64,
    /// Mean of this and the six preceding days that had sales.
    pub moving_avg_7d: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyReport {
    pub range: DateRange,
    pub days: Vec<DailyPoint>,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesmanPerformance {
    pub salesman_code: String,
    pub salesman_name: Option<String>,
    pub net_sales: f64,
    pub orders: u64,
    pub customers: u64,
    pub avg_order_value: f64,
}

/// One page of the salesman listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesmanPage {
    pub range: DateRange,
    pub page: u32,
    pub page_size: u32,
    /// Salesmen matching the filters, across all pages.
    pub total: u64,
    pub total_pages: u64,
    pub salesmen: Vec<SalesmanPerformance>,
    pub warnings: Vec<Warning>,
}
