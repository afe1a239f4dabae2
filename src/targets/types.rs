use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Warning;
use crate::query::period::DateRange;

/// Granularity a target was recorded at. Quarterly and yearly rows are not
/// read; longer periods are built from their months.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timeframe {
    Month,
}

impl Timeframe {
    /// Value of the targets table's `timeframe` column.
    pub fn code(self) -> &'static str {
        match self {
            Timeframe::Month => "M",
        }
    }
}

/// One row of the targets table. Maintained elsewhere; read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetRecord {
    pub salesman_code: String,
    pub timeframe: Timeframe,
    pub year: i32,
    pub month: Option<u32>,
    pub amount: f64,
    pub is_active: bool,
}

/// A calendar month targets are recorded against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeriodKey {
    pub year: i32,
    pub month: u32,
}

impl PeriodKey {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    /// `YYYY-MM`, matching `strftime('%Y-%m', ...)`.
    pub fn label(&self) -> String {
        format!("{}-{:02}", self.year, self.month)
    }

    pub fn month_name(&self) -> &'static str {
        const NAMES: [&str; 12] = [
            "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
        ];
        NAMES[(self.month.clamp(1, 12) - 1) as usize]
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Where a reported target amount came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetProvenance {
    /// Summed from the salesman's own target rows.
    Recorded,
    /// No individual amount was recorded; derived from achieved sales.
    Estimated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementRecord {
    pub salesman_code: String,
    pub period_label: String,
    pub target_amount: f64,
    pub achieved_amount: f64,
    pub achievement_pct: f64,
    pub provenance: TargetProvenance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyAchievement {
    pub period: PeriodKey,
    pub month_name: String,
    /// Salesmen with an active target in this month.
    pub salesmen: usize,
    pub target_amount: f64,
    pub achieved_amount: f64,
    pub achievement_pct: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AchievementSummary {
    /// Salesmen eligible for this period.
    pub salesmen: usize,
    pub target_amount: f64,
    /// Sales by eligible salesmen in the months they were targeted.
    pub achieved_amount: f64,
    /// Sales by everyone in the range, targeted or not.
    pub all_sales_amount: f64,
    pub achievement_pct: f64,
    /// Recorded-target salesmen at or above target.
    pub targets_met: usize,
    pub targets_missed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementReport {
    pub range: DateRange,
    pub periods: Vec<PeriodKey>,
    pub summary: AchievementSummary,
    pub monthly: Vec<MonthlyAchievement>,
    pub salesmen: Vec<AchievementRecord>,
    pub warnings: Vec<Warning>,
    /// False when no salesman had a target for the period.
    pub has_data: bool,
}

impl AchievementReport {
    /// The zero-eligible shape: zero totals, empty breakdowns.
    pub fn no_data(range: &DateRange, periods: Vec<PeriodKey>, warnings: Vec<Warning>) -> Self {
        Self {
            range: range.clone(),
            periods,
            summary: AchievementSummary::default(),
            monthly: Vec::new(),
            salesmen: Vec::new(),
            warnings,
            has_data: false,
        }
    }
}
