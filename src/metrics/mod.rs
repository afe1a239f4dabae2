pub mod types;

pub use types::*;

use chrono::NaiveDate;

use crate::error::{Result, Warning};
use crate::query::builder::{AggregationQueryBuilder, Filters, Granularity};
use crate::query::period::{last_month_to_date, month_to_date, year_to_date, DateRange};
use crate::schema::ColumnMapping;
use crate::storage::Database;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 500;
const TOP_SALESMEN: u32 = 5;

/// Percent change from `previous` to `current`, one decimal. Zero unless
/// `previous` is positive.
pub fn pct_change(current: f64, previous: f64) -> f64 {
    if previous > 0.0 {
        ((current - previous) / previous * 1000.0).round() / 10.0
    } else {
        0.0
    }
}

/// Unwrap a secondary dataset. A failure is logged and recorded as a warning
/// and the dataset comes back empty.
fn secondary<T: Default>(section: &str, warnings: &mut Vec<Warning>, result: Result<T>) -> T {
    match result {
        Ok(v) => v,
        Err(e) => {
            log::warn!("{section} unavailable: {e}");
            warnings.push(Warning::SubQueryFailed {
                section: section.to_string(),
                message: e.to_string(),
            });
            T::default()
        }
    }
}

fn totals_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(SalesTotals, Option<String>)> {
    let orders = row.get::<_, i64>(3)?;
    let return_orders = row.get::<_, i64>(4)?;
    Ok((
        SalesTotals {
            gross_sales: row.get(0)?,
            returns: row.get(1)?,
            net_sales: row.get(2)?,
            orders: orders as u64,
            return_orders: return_orders as u64,
            net_orders: orders - return_orders,
            customers: row.get::<_, i64>(5)? as u64,
            units: row.get(6)?,
            avg_order_value: row.get(9)?,
            line_count: row.get::<_, i64>(8)? as u64,
        },
        row.get(7)?,
    ))
}

fn trend_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TrendPoint> {
    Ok(TrendPoint {
        period: row.get(0)?,
        net_sales: row.get(1)?,
        orders: row.get::<_, i64>(2)? as u64,
        customers: row.get::<_, i64>(3)? as u64,
        units: row.get(4)?,
    })
}

fn daily_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DailyPoint> {
    Ok(DailyPoint {
        day: row.get(0)?,
        net_sales: row.get(1)?,
        orders: row.get::<_, i64>(2)? as u64,
        mtd_net_sales: row.get(3)?,
        moving_avg_7d: row.get(4)?,
    })
}

fn salesman_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SalesmanPerformance> {
    Ok(SalesmanPerformance {
        salesman_code: row.get(0)?,
        salesman_name: row.get(1)?,
        net_sales: row.get(2)?,
        orders: row.get::<_, i64>(3)? as u64,
        customers: row.get::<_, i64>(4)? as u64,
        avg_order_value: row.get(5)?,
    })
}

/// Sales totals (and currency) for one builder.
pub async fn sales_totals(
    db: &Database,
    builder: &AggregationQueryBuilder,
) -> Result<(SalesTotals, Option<String>)> {
    builder.summary()?.fetch_one(db, totals_row).await
}

/// Dashboard KPIs for `range`, compared with the previous period of equal
/// length. `today` anchors the MTD, LMTD and YTD figures.
///
/// The current-period totals are required. Every other section degrades to
/// an empty value with a [`Warning::SubQueryFailed`].
pub async fn kpi_report(
    db: &Database,
    mapping: &ColumnMapping,
    range: &DateRange,
    filters: &Filters,
    today: NaiveDate,
) -> Result<KpiReport> {
    let base = AggregationQueryBuilder::new(mapping, range).filters(filters);
    let mut warnings = base.warnings();

    let (current, currency) = sales_totals(db, &base).await?;

    let previous_range = range.previous();
    let prev = base.clone().range(&previous_range);
    let mtd = base.clone().range(&month_to_date(today));
    let lmtd = base.clone().range(&last_month_to_date(today));
    let ytd = base.clone().range(&year_to_date(today));

    let (previous, mtd, lmtd, ytd, trend, top) = tokio::join!(
        sales_totals(db, &prev),
        sales_totals(db, &mtd),
        sales_totals(db, &lmtd),
        sales_totals(db, &ytd),
        async { base.trend(Granularity::for_range(range))?.fetch(db, trend_row).await },
        async {
            base.salesman_page(TOP_SALESMEN, 0)?
                .fetch(db, salesman_row)
                .await
        },
    );

    let previous = secondary("previous_period", &mut warnings, previous.map(|t| t.0));
    let mtd_net_sales = secondary("mtd", &mut warnings, mtd.map(|t| t.0.net_sales));
    let lmtd_net_sales = secondary("lmtd", &mut warnings, lmtd.map(|t| t.0.net_sales));
    let ytd_net_sales = secondary("ytd", &mut warnings, ytd.map(|t| t.0.net_sales));
    let trend = secondary("trend", &mut warnings, trend);
    let top_salesmen = secondary("top_salesmen", &mut warnings, top);

    let change = KpiChanges {
        gross_sales_pct: pct_change(current.gross_sales, previous.gross_sales),
        returns_pct: pct_change(current.returns, previous.returns),
        net_sales_pct: pct_change(current.net_sales, previous.net_sales),
        orders_pct: pct_change(current.orders as f64, previous.orders as f64),
        customers_pct: pct_change(current.customers as f64, previous.customers as f64),
        units_pct: pct_change(current.units, previous.units),
        avg_order_value_pct: pct_change(current.avg_order_value, previous.avg_order_value),
    };

    Ok(KpiReport {
        range: range.clone(),
        previous_range,
        current,
        previous,
        change,
        mtd_net_sales,
        lmtd_net_sales,
        mtd_change_pct: pct_change(mtd_net_sales, lmtd_net_sales),
        ytd_net_sales,
        currency,
        trend,
        top_salesmen,
        warnings,
    })
}

/// Net sales per bucket. Granularity follows the range span unless given.
pub async fn sales_trend(
    db: &Database,
    mapping: &ColumnMapping,
    range: &DateRange,
    filters: &Filters,
    granularity: Option<Granularity>,
) -> Result<TrendReport> {
    let builder = AggregationQueryBuilder::new(mapping, range).filters(filters);
    let warnings = builder.warnings();
    let granularity = granularity.unwrap_or_else(|| Granularity::for_range(range));
    let points = builder.trend(granularity)?.fetch(db, trend_row).await?;
    Ok(TrendReport {
        range: range.clone(),
        granularity,
        points,
        warnings,
    })
}

pub async fn daily_sales(
    db: &Database,
    mapping: &ColumnMapping,
    range: &DateRange,
    filters: &Filters,
) -> Result<DailyReport> {
    let builder = AggregationQueryBuilder::new(mapping, range).filters(filters);
    let warnings = builder.warnings();
    let days = builder.daily_running()?.fetch(db, daily_row).await?;
    Ok(DailyReport {
        range: range.clone(),
        days,
        warnings,
    })
}

/// One page of salesmen ranked by net sales. `page` is 1-based; the page size
/// is capped at [`MAX_PAGE_SIZE`].
pub async fn salesman_performance(
    db: &Database,
    mapping: &ColumnMapping,
    range: &DateRange,
    filters: &Filters,
    page: u32,
    page_size: u32,
) -> Result<SalesmanPage> {
    let page = page.max(1);
    let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
    let offset = (page - 1).saturating_mul(page_size);

    let builder = AggregationQueryBuilder::new(mapping, range).filters(filters);
    let warnings = builder.warnings();
    let (total, salesmen) = tokio::try_join!(
        builder
            .salesman_count()?
            .fetch_one(db, |row| row.get::<_, i64>(0)),
        builder
            .salesman_page(page_size, offset)?
            .fetch(db, salesman_row),
    )?;
    let total = total.max(0) as u64;

    Ok(SalesmanPage {
        range: range.clone(),
        page,
        page_size,
        total,
        total_pages: total.div_ceil(page_size as u64),
        salesmen,
        warnings,
    })
}
