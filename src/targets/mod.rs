pub mod types;

use std::collections::{BTreeMap, BTreeSet};

use chrono::Datelike;
use rusqlite::types::Value;
use rusqlite::Connection;

use crate::config::EngineConfig;
use crate::date_util::{months_spanned, quarter_of, quarter_start_month};
use crate::error::{Result, Warning};
use crate::query::builder::{AchievementGrouping, AggregationQueryBuilder, Filters};
use crate::query::period::{DateRange, RangeKeyword};
use crate::schema::{validate_identifier, ColumnMapping};
use crate::storage::Database;

pub use types::{
    AchievementRecord, AchievementReport, AchievementSummary, MonthlyAchievement, PeriodKey,
    TargetProvenance, TargetRecord, Timeframe,
};

/// Months whose targets apply to a request.
///
/// Month keywords map to their month, quarter keywords to the three months
/// of the quarter, year keywords to all twelve months. Custom and rolling
/// ranges use every month they touch.
pub fn target_periods(keyword: Option<&RangeKeyword>, range: &DateRange) -> Vec<PeriodKey> {
    let year = range.start.year();
    match keyword {
        Some(RangeKeyword::ThisMonth | RangeKeyword::LastMonth) => {
            vec![PeriodKey::new(year, range.start.month())]
        }
        Some(RangeKeyword::ThisQuarter | RangeKeyword::LastQuarter | RangeKeyword::Quarter(_)) => {
            let first = quarter_start_month(quarter_of(range.start));
            (first..first + 3).map(|m| PeriodKey::new(year, m)).collect()
        }
        Some(RangeKeyword::ThisYear | RangeKeyword::LastYear) => {
            (1..=12).map(|m| PeriodKey::new(year, m)).collect()
        }
        _ => months_spanned(range.start, range.end)
            .into_iter()
            .map(|(y, m)| PeriodKey::new(y, m))
            .collect(),
    }
}

/// Estimated target when none is recorded: achieved sales plus `ratio` uplift.
pub fn fallback_target(achieved: f64, ratio: f64) -> f64 {
    achieved * (1.0 + ratio)
}

/// `achieved / target * 100`, one decimal; zero when there is no target.
pub fn achievement_pct(achieved: f64, target: f64) -> f64 {
    if target > 0.0 && achieved.is_finite() {
        (achieved / target * 1000.0).round() / 10.0
    } else {
        0.0
    }
}

/// Active monthly target rows for the given months, optionally for one salesman.
pub fn load_targets(
    conn: &Connection,
    table: &str,
    periods: &[PeriodKey],
    salesman: Option<&str>,
) -> rusqlite::Result<Vec<TargetRecord>> {
    let mut params: Vec<Value> = Vec::new();
    let mut bind = |v: Value| {
        params.push(v);
        format!("?{}", params.len())
    };

    let period_preds: Vec<String> = periods
        .iter()
        .map(|p| {
            let y = bind(Value::Integer(p.year as i64));
            let m = bind(Value::Integer(p.month as i64));
            format!("(year = {y} AND month = {m})")
        })
        .collect();
    let timeframe = bind(Value::Text(Timeframe::Month.code().to_string()));
    let mut sql = format!(
        "SELECT salesmancode, year, month, amount, isactive
         FROM {table}
         WHERE isactive = 1 AND timeframe = {timeframe} AND salesmancode IS NOT NULL
           AND ({})",
        if period_preds.is_empty() {
            "1 = 0".to_string()
        } else {
            period_preds.join(" OR ")
        }
    );
    if let Some(code) = salesman {
        let ph = bind(Value::Text(code.to_string()));
        sql.push_str(&format!(" AND salesmancode = {ph}"));
    }
    sql.push_str(" ORDER BY salesmancode, year, month");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), |row| {
        Ok(TargetRecord {
            salesman_code: row.get(0)?,
            timeframe: Timeframe::Month,
            year: row.get(1)?,
            month: row.get(2)?,
            amount: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
            is_active: row.get::<_, i64>(4)? != 0,
        })
    })?;
    rows.collect()
}

fn key_amount(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, f64)> {
    Ok((row.get(0)?, row.get(1)?))
}

fn salesman_code(row: &rusqlite::Row<'_>) -> rusqlite::Result<String> {
    row.get(0)
}

/// Computes target achievement for one request.
///
/// Targets are recorded per salesman per month; a quarter or a year is the
/// union of its months. A salesman's sales in a month only count when they had
/// an active target for that same month, so monthly results sum to the
/// multi-month total. Dimension filters such as region or route
/// narrow the population to targeted salesmen who sold under them.
pub struct TargetReconciler<'a> {
    db: &'a Database,
    mapping: &'a ColumnMapping,
    config: &'a EngineConfig,
}

impl<'a> TargetReconciler<'a> {
    pub fn new(db: &'a Database, mapping: &'a ColumnMapping, config: &'a EngineConfig) -> Self {
        Self {
            db,
            mapping,
            config,
        }
    }

    /// `keyword` is `None` for explicit custom dates.
    pub async fn reconcile(
        &self,
        keyword: Option<&RangeKeyword>,
        range: &DateRange,
        filters: &Filters,
    ) -> Result<AchievementReport> {
        let periods = target_periods(keyword, range);
        let table = validate_identifier(&self.config.targets_table)?.to_string();
        let filtered = AggregationQueryBuilder::new(self.mapping, range).filters(filters);
        let mut warnings = filtered.warnings();

        let mut records = {
            let table = table.clone();
            let periods = periods.clone();
            let salesman = filters.salesman.clone();
            self.db
                .reader()
                .call(move |conn| load_targets(conn, &table, &periods, salesman.as_deref()))
                .await?
        };

        if filtered.has_dimension_filters() && !records.is_empty() {
            let targeted: Vec<String> = records
                .iter()
                .map(|r| r.salesman_code.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            let active: BTreeSet<String> = filtered
                .clone()
                .only_salesmen(&targeted)
                .active_salesmen()?
                .fetch(self.db, salesman_code)
                .await?
                .into_iter()
                .collect();
            log::debug!(
                "{} of {} targeted salesmen sold under the filters",
                active.len(),
                targeted.len()
            );
            records.retain(|r| active.contains(&r.salesman_code));
        }

        let eligible: BTreeSet<String> =
            records.iter().map(|r| r.salesman_code.clone()).collect();
        if eligible.is_empty() {
            log::info!("No targeted salesmen for {range}; skipping achievement");
            return Ok(AchievementReport::no_data(range, periods, warnings));
        }
        log::info!("{} targeted salesmen for {range}", eligible.len());

        // Monthly targets are spread over working days for single-day ranges.
        let factor = if range.days() == 1 {
            1.0 / self.config.working_days_per_month as f64
        } else {
            1.0
        };

        let mut target_by_salesman: BTreeMap<&str, f64> = BTreeMap::new();
        let mut target_by_month: BTreeMap<PeriodKey, (f64, BTreeSet<&str>)> = BTreeMap::new();
        for r in &records {
            let amount = r.amount * factor;
            *target_by_salesman.entry(&r.salesman_code).or_default() += amount;
            if let Some(month) = r.month {
                let slot = target_by_month
                    .entry(PeriodKey::new(r.year, month))
                    .or_default();
                slot.0 += amount;
                slot.1.insert(&r.salesman_code);
            }
        }
        let target_amount: f64 = target_by_salesman.values().sum();

        let codes: Vec<String> = eligible.iter().cloned().collect();
        let restricted = filtered
            .clone()
            .only_salesmen(&codes)
            .require_monthly_target(&table);
        let everyone = filtered;

        let (total, by_salesman, by_month, all_sales) = tokio::try_join!(
            restricted
                .achievement(AchievementGrouping::Total)?
                .fetch(self.db, key_amount),
            restricted
                .achievement(AchievementGrouping::Salesman)?
                .fetch(self.db, key_amount),
            restricted
                .achievement(AchievementGrouping::Month)?
                .fetch(self.db, key_amount),
            everyone
                .achievement(AchievementGrouping::Total)?
                .fetch(self.db, key_amount),
        )?;

        let achieved_amount = total.first().map_or(0.0, |(_, v)| *v);
        let all_sales_amount = all_sales.first().map_or(0.0, |(_, v)| *v);
        let achieved_by_salesman: BTreeMap<String, f64> = by_salesman.into_iter().collect();
        let achieved_by_month: BTreeMap<String, f64> = by_month.into_iter().collect();

        let mut salesmen = Vec::with_capacity(codes.len());
        for code in &codes {
            let achieved = achieved_by_salesman.get(code).copied().unwrap_or(0.0);
            let recorded = target_by_salesman.get(code.as_str()).copied().unwrap_or(0.0);
            let (target, provenance) = if recorded > 0.0 {
                (recorded, TargetProvenance::Recorded)
            } else {
                log::warn!("No individual target amount for {code}; estimating");
                warnings.push(Warning::TargetNotFound {
                    salesman_code: code.clone(),
                });
                (
                    fallback_target(achieved, self.config.fallback_target_ratio),
                    TargetProvenance::Estimated,
                )
            };
            salesmen.push(AchievementRecord {
                salesman_code: code.clone(),
                period_label: range.label.clone(),
                target_amount: target,
                achieved_amount: achieved,
                achievement_pct: achievement_pct(achieved, target),
                provenance,
            });
        }
        salesmen.sort_by(|a, b| {
            b.achieved_amount
                .total_cmp(&a.achieved_amount)
                .then_with(|| a.salesman_code.cmp(&b.salesman_code))
        });

        let recorded = salesmen
            .iter()
            .filter(|s| s.provenance == TargetProvenance::Recorded);
        let targets_met = recorded
            .clone()
            .filter(|s| s.achieved_amount >= s.target_amount)
            .count();
        let targets_missed = recorded.count() - targets_met;

        let monthly = periods
            .iter()
            .map(|p| {
                let (target, who) = target_by_month
                    .get(p)
                    .map(|(t, who)| (*t, who.len()))
                    .unwrap_or((0.0, 0));
                let achieved = achieved_by_month.get(&p.label()).copied().unwrap_or(0.0);
                MonthlyAchievement {
                    period: *p,
                    month_name: p.month_name().to_string(),
                    salesmen: who,
                    target_amount: target,
                    achieved_amount: achieved,
                    achievement_pct: achievement_pct(achieved, target),
                }
            })
            .collect();

        Ok(AchievementReport {
            range: range.clone(),
            periods,
            summary: AchievementSummary {
                salesmen: codes.len(),
                target_amount,
                achieved_amount,
                all_sales_amount,
                achievement_pct: achievement_pct(achieved_amount, target_amount),
                targets_met,
                targets_missed,
            },
            monthly,
            salesmen,
            warnings,
            has_data: true,
        })
    }
}
