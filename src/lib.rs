pub mod cache;
pub mod config;
pub mod date_util;
pub mod error;
pub mod metrics;
pub mod query;
pub mod schema;
pub mod storage;
pub mod targets;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;

pub use cache::{CacheInfo, CacheStore, Cached, MemoryCache};
pub use config::EngineConfig;
pub use error::{ApiResponse, Error, Result, Warning};
pub use metrics::{DailyReport, KpiReport, SalesmanPage, TrendReport};
pub use query::builder::{Filters, Granularity};
pub use query::period::{DateRange, RangeKeyword};
pub use schema::{CanonicalField, ColumnMapping, SchemaResolver};
pub use storage::Database;
pub use targets::{AchievementReport, TargetReconciler};

use storage::repository;

/// Cache tag carried by every sales report.
pub const TAG_SALES: &str = "sales";
/// Additional tag on target reports, so target edits can be flushed alone.
pub const TAG_TARGETS: &str = "targets";

/// One analytics request: a symbolic range, optional explicit dates, and the
/// flat string parameter bag filters are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyticsRequest {
    pub range: RangeKeyword,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub params: BTreeMap<String, String>,
}

impl Default for AnalyticsRequest {
    fn default() -> Self {
        Self::new(query::period::DEFAULT_RANGE)
    }
}

impl AnalyticsRequest {
    pub fn new(range: &str) -> Self {
        Self {
            range: RangeKeyword::parse(range),
            start: None,
            end: None,
            params: BTreeMap::new(),
        }
    }

    /// Build from a raw parameter bag. `range`, `startDate`/`start` and
    /// `endDate`/`end` are lifted out; everything else stays as filter input.
    pub fn from_params(mut params: BTreeMap<String, String>) -> Result<Self> {
        let mut take = |keys: &[&str]| {
            let mut found = None;
            for k in keys {
                if let Some(v) = params.remove(*k) {
                    let v = v.trim().to_string();
                    if found.is_none() && !v.is_empty() {
                        found = Some(v);
                    }
                }
            }
            found
        };
        let range = take(&["range"]);
        let start = take(&["startDate", "start"]);
        let end = take(&["endDate", "end"]);

        Ok(Self {
            range: RangeKeyword::parse(range.as_deref().unwrap_or(query::period::DEFAULT_RANGE)),
            start: start.as_deref().map(date_util::parse_date).transpose()?,
            end: end.as_deref().map(date_util::parse_date).transpose()?,
            params,
        })
    }

    pub fn dates(mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn param(mut self, key: &str, value: &str) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }

    /// Explicit dates only count when both are present.
    pub fn has_custom_dates(&self) -> bool {
        self.start.is_some() && self.end.is_some()
    }

    pub fn filters(&self) -> Filters {
        Filters::from_params(&self.params)
    }

    /// Key over the parameters and the resolved dates, so relative keywords
    /// roll over with the calendar.
    fn cache_key(&self, namespace: &str, range: &DateRange, extra: &[(&str, String)]) -> String {
        let mut pairs: Vec<(String, String)> = self
            .params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        pairs.push(("range".into(), self.range.as_str().to_string()));
        pairs.push(("start".into(), range.start_key()));
        pairs.push(("end".into(), range.end_key()));
        pairs.extend(extra.iter().map(|(k, v)| (k.to_string(), v.clone())));
        cache::cache_key(namespace, pairs)
    }
}

/// Resolved table and how each canonical field maps onto it.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaInfo {
    pub table: String,
    pub candidates: Vec<String>,
    pub columns: usize,
    pub fields: Vec<FieldMapping>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldMapping {
    pub field: String,
    /// SQL expression backing the field, `None` when absent.
    pub column: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub table: String,
    pub transaction_rows: i64,
    pub targets_table: String,
    pub target_rows: i64,
    pub cache_entries: usize,
}

/// Main entry point for the sales analytics engine.
pub struct SalesDW {
    db: Database,
    config: EngineConfig,
    resolver: SchemaResolver,
    cache: Arc<dyn CacheStore>,
    memory: Option<Arc<MemoryCache>>,
    as_of: Option<NaiveDate>,
}

impl SalesDW {
    /// Load configuration from `app_config` and start with an empty in-memory cache.
    pub async fn new(db: Database) -> Result<Self> {
        let config = db
            .reader()
            .call(|conn| Ok::<_, rusqlite::Error>(EngineConfig::load(conn)))
            .await??;
        log::debug!("Engine config: {config:?}");
        let memory = Arc::new(MemoryCache::new());
        Ok(Self {
            resolver: SchemaResolver::new(config.transactions_tables.clone()),
            db,
            config,
            cache: memory.clone(),
            memory: Some(memory),
            as_of: None,
        })
    }

    /// Replace the result cache (for a shared or fake store).
    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = cache;
        self.memory = None;
        self
    }

    /// Pin "today" for relative ranges instead of reading the local clock.
    pub fn as_of(mut self, today: NaiveDate) -> Self {
        self.as_of = Some(today);
        self
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn today(&self) -> NaiveDate {
        self.as_of
            .unwrap_or_else(|| chrono::Local::now().date_naive())
    }

    /// The concrete date range a request covers.
    pub fn range_for(&self, req: &AnalyticsRequest) -> Result<DateRange> {
        query::period::resolve(
            &req.range,
            req.start,
            req.end,
            self.today(),
            self.config.quarter_year,
        )
    }

    async fn mapping(&self) -> Result<&ColumnMapping> {
        self.resolver.mapping(&self.db).await
    }

    fn policy(&self, req: &AnalyticsRequest) -> cache::CachePolicyDecision {
        cache::decide(&req.range, req.has_custom_dates())
    }

    // ── Reports ────────────────────────────────────────────────────

    pub async fn dashboard_kpis(&self, req: &AnalyticsRequest) -> Result<Cached<KpiReport>> {
        let range = self.range_for(req)?;
        let today = self.today();
        let key = req.cache_key("dashboard_kpis", &range, &[]);
        cache::memoize(
            self.cache.as_ref(),
            key,
            self.policy(req),
            &[TAG_SALES.to_string()],
            || async {
                let mapping = self.mapping().await?;
                metrics::kpi_report(&self.db, mapping, &range, &req.filters(), today).await
            },
        )
        .await
    }

    pub async fn sales_trend(
        &self,
        req: &AnalyticsRequest,
        granularity: Option<Granularity>,
    ) -> Result<Cached<TrendReport>> {
        let range = self.range_for(req)?;
        let extra = granularity
            .map(|g| vec![("granularity", format!("{g:?}"))])
            .unwrap_or_default();
        let key = req.cache_key("sales_trend", &range, &extra);
        cache::memoize(
            self.cache.as_ref(),
            key,
            self.policy(req),
            &[TAG_SALES.to_string()],
            || async {
                let mapping = self.mapping().await?;
                metrics::sales_trend(&self.db, mapping, &range, &req.filters(), granularity).await
            },
        )
        .await
    }

    pub async fn daily_sales(&self, req: &AnalyticsRequest) -> Result<Cached<DailyReport>> {
        let range = self.range_for(req)?;
        let key = req.cache_key("daily_sales", &range, &[]);
        cache::memoize(
            self.cache.as_ref(),
            key,
            self.policy(req),
            &[TAG_SALES.to_string()],
            || async {
                let mapping = self.mapping().await?;
                metrics::daily_sales(&self.db, mapping, &range, &req.filters()).await
            },
        )
        .await
    }

    pub async fn salesman_performance(
        &self,
        req: &AnalyticsRequest,
        page: u32,
        page_size: u32,
    ) -> Result<Cached<SalesmanPage>> {
        let range = self.range_for(req)?;
        let key = req.cache_key(
            "salesman_performance",
            &range,
            &[("page", page.to_string()), ("pageSize", page_size.to_string())],
        );
        cache::memoize(
            self.cache.as_ref(),
            key,
            self.policy(req),
            &[TAG_SALES.to_string()],
            || async {
                let mapping = self.mapping().await?;
                metrics::salesman_performance(
                    &self.db,
                    mapping,
                    &range,
                    &req.filters(),
                    page,
                    page_size,
                )
                .await
            },
        )
        .await
    }

    pub async fn target_achievement(
        &self,
        req: &AnalyticsRequest,
    ) -> Result<Cached<AchievementReport>> {
        let range = self.range_for(req)?;
        let keyword = (!req.has_custom_dates()).then_some(&req.range);
        let key = req.cache_key("target_achievement", &range, &[]);
        cache::memoize(
            self.cache.as_ref(),
            key,
            self.policy(req),
            &[TAG_SALES.to_string(), TAG_TARGETS.to_string()],
            || async {
                let mapping = self.mapping().await?;
                TargetReconciler::new(&self.db, mapping, &self.config)
                    .reconcile(keyword, &range, &req.filters())
                    .await
            },
        )
        .await
    }

    /// Drop cached reports carrying `tag`. Returns how many were dropped.
    pub fn invalidate_cache(&self, tag: &str) -> usize {
        let n = self.cache.invalidate_by_tag(tag);
        log::info!("Invalidated {n} cached reports tagged {tag}");
        n
    }

    // ── Inspection ─────────────────────────────────────────────────

    pub async fn schema_info(&self) -> Result<SchemaInfo> {
        let schema = self.resolver.resolve(&self.db).await?;
        let mapping = self.mapping().await?;
        Ok(SchemaInfo {
            table: schema.name.clone(),
            candidates: self.resolver.candidates().to_vec(),
            columns: schema.columns.len(),
            fields: mapping
                .iter()
                .map(|(field, col)| FieldMapping {
                    field: field.name().to_string(),
                    column: col.map(|c| c.sql("t")),
                })
                .collect(),
        })
    }

    pub async fn status(&self) -> Result<Status> {
        let table = self.resolver.resolve(&self.db).await?.name.clone();
        let targets_table = schema::validate_identifier(&self.config.targets_table)?.to_string();
        let (transaction_rows, target_rows) = self
            .db
            .reader()
            .call({
                let table = table.clone();
                let targets_table = targets_table.clone();
                move |conn| {
                    let rows = repository::count_rows(conn, &table)?;
                    let targets = if repository::table_exists(conn, &targets_table)? {
                        repository::count_rows(conn, &targets_table)?
                    } else {
                        0
                    };
                    Ok::<_, rusqlite::Error>((rows, targets))
                }
            })
            .await?;
        Ok(Status {
            table,
            transaction_rows,
            targets_table,
            target_rows,
            cache_entries: self.memory.as_ref().map_or(0, |m| m.len()),
        })
    }

    // ── Config commands ────────────────────────────────────────────

    pub async fn config_get(&self, key: &str) -> Result<Option<String>> {
        self.db
            .reader()
            .call({
                let key = key.to_string();
                move |conn| repository::get_config(conn, &key)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    /// Validate and store one setting. It applies to engines opened afterwards.
    pub async fn config_set(&self, key: &str, value: &str) -> Result<()> {
        if !config::KNOWN_KEYS.contains(&key) {
            return Err(Error::Config(format!(
                "unknown key '{key}' (expected one of: {})",
                config::KNOWN_KEYS.join(", ")
            )));
        }
        self.config.clone().apply(key, value)?;
        self.db
            .writer()
            .call({
                let key = key.to_string();
                let value = value.trim().to_string();
                move |conn| repository::set_config(conn, &key, &value)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    /// Remove a stored setting so its default applies again.
    pub async fn config_unset(&self, key: &str) -> Result<bool> {
        self.db
            .writer()
            .call({
                let key = key.to_string();
                move |conn| repository::delete_config(conn, &key)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn config_list(&self) -> Result<Vec<(String, String)>> {
        self.db
            .reader()
            .call(|conn| repository::list_config(conn))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }
}
