use rusqlite::Connection;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::schema::validate_identifier;
use crate::storage::repository;

pub const KEY_TRANSACTIONS_TABLES: &str = "transactions_tables";
pub const KEY_TARGETS_TABLE: &str = "targets_table";
pub const KEY_FALLBACK_TARGET_RATIO: &str = "fallback_target_ratio";
pub const KEY_QUARTER_YEAR: &str = "quarter_year";
pub const KEY_WORKING_DAYS_PER_MONTH: &str = "working_days_per_month";

/// Keys the engine understands. Anything else in `app_config` is ignored.
pub const KNOWN_KEYS: [&str; 5] = [
    KEY_TRANSACTIONS_TABLES,
    KEY_TARGETS_TABLE,
    KEY_FALLBACK_TARGET_RATIO,
    KEY_QUARTER_YEAR,
    KEY_WORKING_DAYS_PER_MONTH,
];

/// Engine settings stored as key/value rows in `app_config`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineConfig {
    /// Candidate transaction tables, highest priority first.
    pub transactions_tables: Vec<String>,
    pub targets_table: String,
    /// Uplift applied to achieved sales when a salesman has no recorded target.
    pub fallback_target_ratio: f64,
    /// Year the fixed quarter keywords resolve against; `None` means the current year.
    pub quarter_year: Option<i32>,
    pub working_days_per_month: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            transactions_tables: vec![
                "flat_sales_transactions".to_string(),
                "flat_transactions".to_string(),
            ],
            targets_table: "tblcommontarget".to_string(),
            fallback_target_ratio: 0.15,
            quarter_year: None,
            working_days_per_month: 26,
        }
    }
}

impl EngineConfig {
    /// Read every known key, falling back to defaults for unset ones.
    pub fn load(conn: &Connection) -> Result<Self> {
        let mut cfg = Self::default();
        for key in KNOWN_KEYS {
            if let Some(value) = repository::get_config(conn, key)? {
                cfg.apply(key, &value)?;
            }
        }
        Ok(cfg)
    }

    /// Parse and apply one key. Fails with `Error::Config` naming the key.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        let invalid = |why: &str| Error::Config(format!("{key}: {why} (got '{value}')"));
        match key {
            KEY_TRANSACTIONS_TABLES => {
                let tables: Vec<String> = value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                if tables.is_empty() {
                    return Err(invalid("at least one table name is required"));
                }
                for t in &tables {
                    validate_identifier(t).map_err(|_| invalid("not a valid table name"))?;
                }
                self.transactions_tables = tables;
            }
            KEY_TARGETS_TABLE => {
                validate_identifier(value).map_err(|_| invalid("not a valid table name"))?;
                self.targets_table = value.to_string();
            }
            KEY_FALLBACK_TARGET_RATIO => {
                let ratio: f64 = value.parse().map_err(|_| invalid("expected a number"))?;
                if !ratio.is_finite() || ratio < 0.0 {
                    return Err(invalid("must be a non-negative number"));
                }
                self.fallback_target_ratio = ratio;
            }
            KEY_QUARTER_YEAR => {
                if value.is_empty() {
                    self.quarter_year = None;
                } else {
                    let year: i32 = value.parse().map_err(|_| invalid("expected a year"))?;
                    if !(1900..=9999).contains(&year) {
                        return Err(invalid("year out of range"));
                    }
                    self.quarter_year = Some(year);
                }
            }
            KEY_WORKING_DAYS_PER_MONTH => {
                let days: u32 = value
                    .parse()
                    .map_err(|_| invalid("expected a whole number"))?;
                if !(1..=31).contains(&days) {
                    return Err(invalid("must be between 1 and 31"));
                }
                self.working_days_per_month = days;
            }
            _ => return Err(Error::Config(format!("unknown config key: {key}"))),
        }
        Ok(())
    }
}
