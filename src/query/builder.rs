use std::collections::BTreeMap;

use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

use crate::error::{Result, Warning};
use crate::query::period::DateRange;
use crate::schema::{validate_identifier, CanonicalField, ColumnMapping};
use crate::storage::Database;

/// Optional, AND-combined filter dimensions taken from a request's parameter bag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Filters {
    pub region: Option<String>,
    pub city: Option<String>,
    pub team_leader: Option<String>,
    pub salesman_type: Option<String>,
    pub salesman: Option<String>,
    pub chain: Option<String>,
    pub store: Option<String>,
    pub route: Option<String>,
    pub product_category: Option<String>,
    pub product_code: Option<String>,
}

impl Filters {
    /// Read the well-known filter keys. Empty values and `all` mean "no filter".
    pub fn from_params(params: &BTreeMap<String, String>) -> Self {
        let pick = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| params.get(*k))
                .map(|v| v.trim())
                .find(|v| !v.is_empty() && !v.eq_ignore_ascii_case("all"))
                .map(str::to_string)
        };
        Self {
            region: pick(&["regionCode", "region"]),
            city: pick(&["city", "cityCode"]),
            team_leader: pick(&["teamLeaderCode"]),
            salesman_type: pick(&["fieldUserRole"]),
            salesman: pick(&["userCode", "salesmanCode"]),
            chain: pick(&["chainName", "chain"]),
            store: pick(&["storeCode"]),
            route: pick(&["routeCode"]),
            product_category: pick(&["productCategory"]),
            product_code: pick(&["productCode"]),
        }
    }

    /// Set filters as `(request key, field, value)`.
    fn entries(&self) -> Vec<(&'static str, CanonicalField, &str)> {
        [
            ("regionCode", CanonicalField::Region, &self.region),
            ("cityCode", CanonicalField::City, &self.city),
            ("teamLeaderCode", CanonicalField::TeamLeader, &self.team_leader),
            ("fieldUserRole", CanonicalField::SalesmanType, &self.salesman_type),
            ("userCode", CanonicalField::SalesmanCode, &self.salesman),
            ("chainName", CanonicalField::Chain, &self.chain),
            ("storeCode", CanonicalField::StoreCode, &self.store),
            ("routeCode", CanonicalField::RouteCode, &self.route),
            ("productCategory", CanonicalField::ProductCategory, &self.product_category),
            ("productCode", CanonicalField::ProductCode, &self.product_code),
        ]
        .into_iter()
        .filter_map(|(key, field, value)| value.as_deref().map(|v| (key, field, v)))
        .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

/// Bound parameters in placeholder order.
#[derive(Debug, Clone, Default)]
pub struct SqlParams {
    values: Vec<Value>,
}

impl SqlParams {
    /// Bind a value and return its `?N` placeholder.
    pub fn bind(&mut self, value: impl Into<Value>) -> String {
        self.values.push(value.into());
        format!("?{}", self.values.len())
    }
}

/// Bucket size for a sales trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Daily,
    Weekly,
    Monthly,
}

impl Granularity {
    /// Up to two weeks daily, up to a quarter weekly, monthly beyond that.
    pub fn for_range(range: &DateRange) -> Self {
        let days = range.days();
        if days <= 14 {
            Granularity::Daily
        } else if days <= 92 {
            Granularity::Weekly
        } else {
            Granularity::Monthly
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "daily" | "day" => Some(Granularity::Daily),
            "weekly" | "week" => Some(Granularity::Weekly),
            "monthly" | "month" => Some(Granularity::Monthly),
            _ => None,
        }
    }

    fn bucket(self, date_expr: &str) -> String {
        match self {
            Granularity::Daily => date_expr.to_string(),
            // Monday of the ISO week.
            Granularity::Weekly => format!("date({date_expr}, 'weekday 0', '-6 days')"),
            Granularity::Monthly => format!("strftime('%Y-%m-01', {date_expr})"),
        }
    }
}

/// Grouping for the target-achievement aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AchievementGrouping {
    Total,
    Salesman,
    Month,
}

/// A finished statement and its parameters.
#[derive(Debug, Clone)]
pub struct BuiltQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

impl BuiltQuery {
    /// Execute against the reader and map every row.
    pub async fn fetch<T: Send + 'static>(
        self,
        db: &Database,
        map_row: fn(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Vec<T>> {
        log::debug!("SQL: {} -- {:?}", self.sql, self.params);
        let rows = db
            .reader()
            .call(move |conn| {
                let mut stmt = conn.prepare(&self.sql)?;
                let rows = stmt.query_map(rusqlite::params_from_iter(self.params.iter()), map_row)?;
                rows.collect::<std::result::Result<Vec<T>, _>>()
            })
            .await?;
        Ok(rows)
    }

    /// Execute a statement that yields exactly one row (plain aggregates).
    pub async fn fetch_one<T: Send + 'static>(
        self,
        db: &Database,
        map_row: fn(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<T> {
        log::debug!("SQL: {} -- {:?}", self.sql, self.params);
        let row = db
            .reader()
            .call(move |conn| {
                conn.query_row(&self.sql, rusqlite::params_from_iter(self.params.iter()), map_row)
            })
            .await?;
        Ok(row)
    }
}

/// Assembles aggregation SQL over the resolved transactions table.
///
/// Every dimension goes through the [`ColumnMapping`]; a filter on a dimension
/// the table lacks is dropped (and reported by [`warnings`](Self::warnings)),
/// and a projection on one becomes a literal. All values are bound.
#[derive(Debug, Clone)]
pub struct AggregationQueryBuilder {
    mapping: ColumnMapping,
    range: DateRange,
    filters: Filters,
    salesmen: Option<Vec<String>>,
    monthly_target_table: Option<String>,
}

impl AggregationQueryBuilder {
    pub fn new(mapping: &ColumnMapping, range: &DateRange) -> Self {
        Self {
            mapping: mapping.clone(),
            range: range.clone(),
            filters: Filters::default(),
            salesmen: None,
            monthly_target_table: None,
        }
    }

    pub fn filters(mut self, filters: &Filters) -> Self {
        self.filters = filters.clone();
        self
    }

    pub fn range(mut self, range: &DateRange) -> Self {
        self.range = range.clone();
        self
    }

    /// Restrict to these salesmen. An empty list matches nothing.
    pub fn only_salesmen(mut self, codes: &[String]) -> Self {
        self.salesmen = Some(codes.to_vec());
        self
    }

    /// Only count a transaction when its salesman has an active monthly target
    /// for the transaction's own month.
    pub fn require_monthly_target(mut self, targets_table: &str) -> Self {
        self.monthly_target_table = Some(targets_table.to_string());
        self
    }

    /// Requested filters the table cannot honour.
    pub fn warnings(&self) -> Vec<Warning> {
        self.filters
            .entries()
            .into_iter()
            .filter(|(_, field, _)| !self.mapping.has(*field))
            .map(|(key, field, _)| {
                log::warn!("Dropping filter {key}: {} has no column for {field}", self.mapping.table);
                Warning::ColumnAbsent {
                    filter: key.to_string(),
                }
            })
            .collect()
    }

    /// Whether an honoured filter narrows on something other than the salesman.
    pub fn has_dimension_filters(&self) -> bool {
        self.filters
            .entries()
            .into_iter()
            .any(|(_, field, _)| field != CanonicalField::SalesmanCode && self.mapping.has(field))
    }

    fn table(&self) -> Result<&str> {
        validate_identifier(&self.mapping.table)
    }

    fn date(&self) -> Result<String> {
        self.mapping.require(CanonicalField::TransactionDate)
    }

    /// Net amount with NULLs counted as zero.
    fn net(&self) -> String {
        match self.mapping.expr(CanonicalField::NetAmount) {
            Some(e) => format!("COALESCE({e}, 0)"),
            None => "0".to_string(),
        }
    }

    fn count_distinct(&self, field: CanonicalField) -> String {
        match self.mapping.expr(field) {
            Some(e) => format!("COUNT(DISTINCT {e})"),
            None => "0".to_string(),
        }
    }

    fn where_clause(&self, params: &mut SqlParams) -> Result<String> {
        let date = self.date()?;
        let mut preds = vec![
            format!("{date} >= {}", params.bind(self.range.start_key())),
            format!("{date} <= {}", params.bind(self.range.end_key())),
        ];

        for (_, field, value) in self.filters.entries() {
            if let Some(col) = self.mapping.expr(field) {
                preds.push(format!("{col} = {}", params.bind(value.to_string())));
            }
        }

        if let Some(codes) = &self.salesmen {
            let col = self.mapping.require(CanonicalField::SalesmanCode)?;
            if codes.is_empty() {
                preds.push("1 = 0".to_string());
            } else {
                let placeholders: Vec<String> =
                    codes.iter().map(|c| params.bind(c.clone())).collect();
                preds.push(format!("{col} IN ({})", placeholders.join(", ")));
            }
        }

        if let Some(targets) = &self.monthly_target_table {
            let targets = validate_identifier(targets)?;
            let col = self.mapping.require(CanonicalField::SalesmanCode)?;
            preds.push(format!(
                "EXISTS (SELECT 1 FROM {targets} tg \
                 WHERE tg.salesmancode = {col} AND tg.timeframe = 'M' AND tg.isactive = 1 \
                 AND tg.year = CAST(strftime('%Y', {date}) AS INTEGER) \
                 AND tg.month = CAST(strftime('%m', {date}) AS INTEGER))"
            ));
        }

        Ok(format!("WHERE {}", preds.join(" AND ")))
    }

    /// One-row KPI aggregate: gross, returns, net, orders, customers, units,
    /// average order value, currency.
    pub fn summary(&self) -> Result<BuiltQuery> {
        let mut params = SqlParams::default();
        let table = self.table()?;
        let wc = self.where_clause(&mut params)?;
        let net = self.net();
        let trx = self.mapping.require(CanonicalField::TransactionCode)?;
        let units = match self.mapping.expr(CanonicalField::Quantity) {
            Some(q) => format!("COALESCE(SUM(CASE WHEN {net} >= 0 THEN COALESCE({q}, 0) ELSE 0 END), 0)"),
            None => "0".to_string(),
        };
        let currency = match self.mapping.expr(CanonicalField::Currency) {
            Some(c) => format!("MAX({c})"),
            None => "NULL".to_string(),
        };
        let customers = self.count_distinct(CanonicalField::StoreCode);

        let sql = format!(
            "SELECT s.gross_sales, s.returns, s.net_sales, s.orders, s.return_orders,
                    s.customers, s.units, s.currency, s.line_count,
                    CASE WHEN (s.orders - s.return_orders) > 0
                         THEN s.net_sales * 1.0 / (s.orders - s.return_orders) ELSE 0 END AS avg_order_value
             FROM (
                SELECT
                    COALESCE(SUM(CASE WHEN {net} >= 0 THEN {net} ELSE 0 END), 0) AS gross_sales,
                    COALESCE(SUM(CASE WHEN {net} < 0 THEN ABS({net}) ELSE 0 END), 0) AS returns,
                    COALESCE(SUM({net}), 0) AS net_sales,
                    COUNT(DISTINCT CASE WHEN {net} >= 0 THEN {trx} END) AS orders,
                    COUNT(DISTINCT CASE WHEN {net} < 0 THEN {trx} END) AS return_orders,
                    {customers} AS customers,
                    {units} AS units,
                    {currency} AS currency,
                    COUNT(*) AS line_count
                FROM {table} t
                {wc}
             ) s"
        );
        Ok(BuiltQuery {
            sql,
            params: params.values,
        })
    }

    /// Net sales, orders, customers and units per time bucket.
    pub fn trend(&self, granularity: Granularity) -> Result<BuiltQuery> {
        let mut params = SqlParams::default();
        let table = self.table()?;
        let wc = self.where_clause(&mut params)?;
        let bucket = granularity.bucket(&self.date()?);
        let net = self.net();
        let orders = self.count_distinct(CanonicalField::TransactionCode);
        let customers = self.count_distinct(CanonicalField::StoreCode);
        let units = match self.mapping.expr(CanonicalField::Quantity) {
            Some(q) => format!("COALESCE(SUM({q}), 0)"),
            None => "0".to_string(),
        };

        let sql = format!(
            "SELECT {bucket} AS period,
                    COALESCE(SUM({net}), 0) AS net_sales,
                    {orders} AS orders,
                    {customers} AS customers,
                    {units} AS units
             FROM {table} t
             {wc}
             GROUP BY period
             ORDER BY period"
        );
        Ok(BuiltQuery {
            sql,
            params: params.values,
        })
    }

    /// Daily net sales with a month-to-date running total and a 7-row moving
    /// average, both windowed over the grouped daily rows.
    pub fn daily_running(&self) -> Result<BuiltQuery> {
        let mut params = SqlParams::default();
        let table = self.table()?;
        let wc = self.where_clause(&mut params)?;
        let date = self.date()?;
        let net = self.net();
        let orders = self.count_distinct(CanonicalField::TransactionCode);

        let sql = format!(
            "WITH daily AS (
                SELECT {date} AS day,
                       COALESCE(SUM({net}), 0) AS net_sales,
                       {orders} AS orders
                FROM {table} t
                {wc}
                GROUP BY day
             )
             SELECT day, net_sales, orders,
                    SUM(net_sales) OVER (
                        PARTITION BY strftime('%Y-%m', day) ORDER BY day
                        ROWS BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW
                    ) AS mtd_net_sales,
                    AVG(net_sales) OVER (
                        ORDER BY day ROWS BETWEEN 6 PRECEDING AND CURRENT ROW
                    ) AS moving_avg_7d
             FROM daily
             ORDER BY day"
        );
        Ok(BuiltQuery {
            sql,
            params: params.values,
        })
    }

    /// One page of per-salesman totals, best sellers first.
    pub fn salesman_page(&self, limit: u32, offset: u32) -> Result<BuiltQuery> {
        let mut params = SqlParams::default();
        let table = self.table()?;
        let wc = self.where_clause(&mut params)?;
        let code = self.mapping.require(CanonicalField::SalesmanCode)?;
        let name = match self.mapping.expr(CanonicalField::SalesmanName) {
            Some(n) => format!("MAX({n})"),
            None => "NULL".to_string(),
        };
        let net = self.net();
        let trx = self.mapping.require(CanonicalField::TransactionCode)?;
        let customers = self.count_distinct(CanonicalField::StoreCode);
        let limit_ph = params.bind(limit as i64);
        let offset_ph = params.bind(offset as i64);

        let sql = format!(
            "SELECT {code} AS salesman_code,
                    {name} AS salesman_name,
                    COALESCE(SUM({net}), 0) AS net_sales,
                    COUNT(DISTINCT {trx}) AS orders,
                    {customers} AS customers,
                    CASE WHEN COUNT(DISTINCT {trx}) > 0
                         THEN COALESCE(SUM({net}), 0) * 1.0 / COUNT(DISTINCT {trx}) ELSE 0 END AS avg_order_value
             FROM {table} t
             {wc} AND {code} IS NOT NULL
             GROUP BY {code}
             ORDER BY net_sales DESC, salesman_code
             LIMIT {limit_ph} OFFSET {offset_ph}"
        );
        Ok(BuiltQuery {
            sql,
            params: params.values,
        })
    }

    /// Number of distinct salesmen matching the filters.
    pub fn salesman_count(&self) -> Result<BuiltQuery> {
        let mut params = SqlParams::default();
        let table = self.table()?;
        let wc = self.where_clause(&mut params)?;
        let code = self.mapping.require(CanonicalField::SalesmanCode)?;
        Ok(BuiltQuery {
            sql: format!("SELECT COUNT(DISTINCT {code}) FROM {table} t {wc}"),
            params: params.values,
        })
    }

    /// Distinct salesmen with at least one matching transaction.
    pub fn active_salesmen(&self) -> Result<BuiltQuery> {
        let mut params = SqlParams::default();
        let table = self.table()?;
        let wc = self.where_clause(&mut params)?;
        let code = self.mapping.require(CanonicalField::SalesmanCode)?;
        Ok(BuiltQuery {
            sql: format!(
                "SELECT DISTINCT {code} FROM {table} t {wc} AND {code} IS NOT NULL ORDER BY 1"
            ),
            params: params.values,
        })
    }

    /// Achieved sales counted once per transaction: lines are first summed per
    /// (transaction, salesman, day) and only positive transactions are kept.
    ///
    /// Rows are `(key, achieved)`, where the key is empty for
    /// [`AchievementGrouping::Total`], the salesman code, or `YYYY-MM`.
    pub fn achievement(&self, grouping: AchievementGrouping) -> Result<BuiltQuery> {
        let mut params = SqlParams::default();
        let table = self.table()?;
        let wc = self.where_clause(&mut params)?;
        let date = self.date()?;
        let trx = self.mapping.require(CanonicalField::TransactionCode)?;
        let code = self.mapping.require(CanonicalField::SalesmanCode)?;
        let net = self.net();

        let (key, group_by) = match grouping {
            AchievementGrouping::Total => ("''", ""),
            AchievementGrouping::Salesman => ("salesman_code", "GROUP BY salesman_code"),
            AchievementGrouping::Month => ("strftime('%Y-%m', trx_day)", "GROUP BY 1"),
        };

        let sql = format!(
            "WITH trx AS (
                SELECT {trx} AS trx_code,
                       {code} AS salesman_code,
                       {date} AS trx_day,
                       SUM({net}) AS amount
                FROM {table} t
                {wc}
                GROUP BY {trx}, {code}, {date}
                HAVING SUM({net}) > 0
             )
             SELECT {key} AS group_key, COALESCE(SUM(amount), 0) AS achieved
             FROM trx
             {group_by}"
        );
        Ok(BuiltQuery {
            sql,
            params: params.values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use chrono::NaiveDate;

    use crate::schema::resolve_table;
    use crate::storage::fixtures::{
        create_current_schema, create_legacy_schema, insert_current, insert_legacy, Line,
        CURRENT_TABLE, LEGACY_TABLE,
    };

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn range(start: NaiveDate, end: NaiveDate) -> DateRange {
        DateRange::new(start, end, "custom").unwrap()
    }

    fn mapping(cols: &[&str]) -> ColumnMapping {
        let set: HashSet<String> = cols.iter().map(|s| s.to_string()).collect();
        ColumnMapping::map("sales", &set)
    }

    fn bag(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_filters_from_params() {
        let f = Filters::from_params(&bag(&[
            ("regionCode", "R1"),
            ("cityCode", "DXB"),
            ("userCode", "all"),
            ("storeCode", " "),
            ("routeCode", "RT9"),
        ]));
        assert_eq!(f.region.as_deref(), Some("R1"));
        assert_eq!(f.city.as_deref(), Some("DXB"));
        assert_eq!(f.salesman, None);
        assert_eq!(f.store, None);
        assert_eq!(f.route.as_deref(), Some("RT9"));
        assert!(Filters::default().is_empty());
    }

    #[test]
    fn test_filters_are_bound_not_interpolated() {
        let m = mapping(&["trx_code", "trx_date_only", "net_amount", "store_code"]);
        let f = Filters::from_params(&bag(&[("storeCode", "x' OR '1'='1")]));
        let q = AggregationQueryBuilder::new(&m, &range(d(2025, 1, 1), d(2025, 1, 31)))
            .filters(&f)
            .summary()
            .unwrap();
        assert!(q.sql.contains("t.store_code = ?3"));
        assert!(!q.sql.contains("OR '1'='1"));
        assert_eq!(q.params.len(), 3);
        assert_eq!(q.params[2], Value::Text("x' OR '1'='1".into()));
    }

    #[test]
    fn test_absent_column_drops_filter_and_projection() {
        // No route, no store, no quantity.
        let m = mapping(&["trx_code", "trx_date_only", "net_amount"]);
        let f = Filters::from_params(&bag(&[("routeCode", "RT1"), ("storeCode", "S1")]));
        let b = AggregationQueryBuilder::new(&m, &range(d(2025, 1, 1), d(2025, 1, 31))).filters(&f);

        let q = b.summary().unwrap();
        assert!(!q.sql.contains("route_code"));
        assert!(!q.sql.contains("store_code"));
        assert!(q.sql.contains("0 AS customers"));
        assert!(q.sql.contains("0 AS units"));
        assert_eq!(q.params.len(), 2);

        let warnings = b.warnings();
        assert_eq!(
            warnings,
            vec![
                Warning::ColumnAbsent {
                    filter: "storeCode".into()
                },
                Warning::ColumnAbsent {
                    filter: "routeCode".into()
                },
            ]
        );
    }

    #[test]
    fn test_missing_net_amount_becomes_literal() {
        let m = mapping(&["trx_code", "trx_date_only"]);
        let q = AggregationQueryBuilder::new(&m, &range(d(2025, 1, 1), d(2025, 1, 2)))
            .summary()
            .unwrap();
        assert!(q.sql.contains("COALESCE(SUM(0), 0) AS net_sales"));
    }

    #[test]
    fn test_missing_date_column_is_an_error() {
        let m = mapping(&["trx_code", "net_amount"]);
        let err = AggregationQueryBuilder::new(&m, &range(d(2025, 1, 1), d(2025, 1, 2)))
            .summary()
            .unwrap_err();
        assert!(err.to_string().contains("transaction_date"));
    }

    #[test]
    fn test_empty_salesman_list_matches_nothing() {
        let m = mapping(&["trx_code", "trx_date_only", "net_amount", "field_user_code"]);
        let q = AggregationQueryBuilder::new(&m, &range(d(2025, 1, 1), d(2025, 1, 2)))
            .only_salesmen(&[])
            .achievement(AchievementGrouping::Total)
            .unwrap();
        assert!(q.sql.contains("1 = 0"));

        let q = AggregationQueryBuilder::new(&m, &range(d(2025, 1, 1), d(2025, 1, 2)))
            .only_salesmen(&["A".into(), "B".into()])
            .achievement(AchievementGrouping::Salesman)
            .unwrap();
        assert!(q.sql.contains("t.field_user_code IN (?3, ?4)"));
    }

    #[test]
    fn test_dimension_filters_exclude_salesman_and_absent_columns() {
        let m = mapping(&["trx_code", "trx_date_only", "net_amount", "user_code", "region_code"]);
        let r = range(d(2025, 1, 1), d(2025, 1, 31));
        let only = |pairs: &[(&str, &str)]| {
            AggregationQueryBuilder::new(&m, &r).filters(&Filters::from_params(&bag(pairs)))
        };
        assert!(!only(&[]).has_dimension_filters());
        assert!(!only(&[("userCode", "A")]).has_dimension_filters());
        assert!(!only(&[("routeCode", "RT1")]).has_dimension_filters());
        assert!(only(&[("regionCode", "R1"), ("userCode", "A")]).has_dimension_filters());

        let q = only(&[("regionCode", "R1")])
            .only_salesmen(&["A".into()])
            .active_salesmen()
            .unwrap();
        assert!(q.sql.starts_with("SELECT DISTINCT t.user_code"));
        assert!(q.sql.contains("t.region_code = ?3"));
        assert!(q.sql.contains("t.user_code IN (?4)"));
        assert_eq!(q.params.len(), 4);
    }

    #[test]
    fn test_monthly_target_restriction_sql() {
        let m = mapping(&["trx_code", "trx_date", "net_amount", "user_code"]);
        let q = AggregationQueryBuilder::new(&m, &range(d(2025, 1, 1), d(2025, 3, 31)))
            .require_monthly_target("tblcommontarget")
            .achievement(AchievementGrouping::Month)
            .unwrap();
        assert!(q.sql.contains("FROM tblcommontarget tg"));
        assert!(q.sql.contains("tg.salesmancode = t.user_code"));
        assert!(q.sql.contains("strftime('%m', DATE(t.trx_date))"));
    }

    #[test]
    fn test_granularity_for_range() {
        assert_eq!(
            Granularity::for_range(&range(d(2025, 1, 1), d(2025, 1, 14))),
            Granularity::Daily
        );
        assert_eq!(
            Granularity::for_range(&range(d(2025, 1, 1), d(2025, 1, 15))),
            Granularity::Weekly
        );
        assert_eq!(
            Granularity::for_range(&range(d(2025, 1, 1), d(2025, 4, 2))),
            Granularity::Weekly
        );
        assert_eq!(
            Granularity::for_range(&range(d(2025, 1, 1), d(2025, 12, 31))),
            Granularity::Monthly
        );
    }

    #[tokio::test]
    async fn test_summary_against_current_schema() {
        let db = Database::open_memory().await.unwrap();
        create_current_schema(&db).await;
        insert_current(
            &db,
            vec![
                Line::new("T1", "2025-01-05", "A", 100.0).store("S1"),
                Line::new("T1", "2025-01-05", "A", 50.0).store("S1"),
                Line::new("T2", "2025-01-06", "B", 30.0).store("S2"),
                Line::new("R1", "2025-01-07", "B", -20.0).store("S2"),
                Line::new("T3", "2025-02-01", "A", 999.0),
            ],
        )
        .await;
        let schema = resolve_table(&db, &[CURRENT_TABLE.to_string()]).await.unwrap();

        let (gross, returns, net, orders, return_orders, customers, aov, currency) =
            AggregationQueryBuilder::new(&schema.mapping(), &range(d(2025, 1, 1), d(2025, 1, 31)))
                .summary()
                .unwrap()
                .fetch_one(&db, |row| {
                    Ok((
                        row.get::<_, f64>("gross_sales")?,
                        row.get::<_, f64>("returns")?,
                        row.get::<_, f64>("net_sales")?,
                        row.get::<_, i64>("orders")?,
                        row.get::<_, i64>("return_orders")?,
                        row.get::<_, i64>("customers")?,
                        row.get::<_, f64>("avg_order_value")?,
                        row.get::<_, Option<String>>("currency")?,
                    ))
                })
                .await
                .unwrap();

        assert_eq!(gross, 180.0);
        assert_eq!(returns, 20.0);
        assert_eq!(net, 160.0);
        assert_eq!(orders, 2);
        assert_eq!(return_orders, 1);
        assert_eq!(customers, 2);
        assert_eq!(aov, 160.0);
        assert_eq!(currency.as_deref(), Some("AED"));
    }

    #[tokio::test]
    async fn test_empty_range_divides_safely() {
        let db = Database::open_memory().await.unwrap();
        create_current_schema(&db).await;
        let schema = resolve_table(&db, &[CURRENT_TABLE.to_string()]).await.unwrap();

        let (net, aov) =
            AggregationQueryBuilder::new(&schema.mapping(), &range(d(2025, 1, 1), d(2025, 1, 31)))
                .summary()
                .unwrap()
                .fetch_one(&db, |row| Ok((row.get::<_, f64>(2)?, row.get::<_, f64>(9)?)))
                .await
                .unwrap();
        assert_eq!(net, 0.0);
        assert_eq!(aov, 0.0);
    }

    #[tokio::test]
    async fn test_legacy_schema_with_unbacked_filters_runs() {
        let db = Database::open_memory().await.unwrap();
        create_legacy_schema(&db).await;
        insert_legacy(
            &db,
            vec![
                Line::new("T1", "2025-01-05", "A", 40.0),
                Line::new("T2", "2025-01-06", "A", 60.0),
            ],
        )
        .await;
        let schema = resolve_table(&db, &[LEGACY_TABLE.to_string()]).await.unwrap();
        let f = Filters::from_params(&bag(&[("regionCode", "R1"), ("userCode", "A")]));

        let b = AggregationQueryBuilder::new(&schema.mapping(), &range(d(2025, 1, 1), d(2025, 1, 31)))
            .filters(&f);
        assert_eq!(b.warnings().len(), 1);
        let rows = b
            .trend(Granularity::Daily)
            .unwrap()
            .fetch(&db, |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)))
            .await
            .unwrap();
        assert_eq!(
            rows,
            vec![("2025-01-05".to_string(), 40.0), ("2025-01-06".to_string(), 60.0)]
        );
    }

    #[tokio::test]
    async fn test_daily_running_totals() {
        let db = Database::open_memory().await.unwrap();
        create_current_schema(&db).await;
        insert_current(
            &db,
            vec![
                Line::new("T1", "2025-01-30", "A", 10.0),
                Line::new("T2", "2025-01-31", "A", 20.0),
                Line::new("T3", "2025-01-31", "B", 5.0),
                Line::new("T4", "2025-02-01", "A", 30.0),
            ],
        )
        .await;
        let schema = resolve_table(&db, &[CURRENT_TABLE.to_string()]).await.unwrap();
        let rows = AggregationQueryBuilder::new(&schema.mapping(), &range(d(2025, 1, 1), d(2025, 2, 28)))
            .daily_running()
            .unwrap()
            .fetch(&db, |row| {
                Ok((
                    row.get::<_, String>("day")?,
                    row.get::<_, f64>("net_sales")?,
                    row.get::<_, f64>("mtd_net_sales")?,
                    row.get::<_, f64>("moving_avg_7d")?,
                ))
            })
            .await
            .unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1], ("2025-01-31".to_string(), 25.0, 35.0, 17.5));
        // Running total restarts with the month.
        assert_eq!(rows[2].2, 30.0);
        assert_eq!(rows[2].3, 65.0 / 3.0);
    }

    #[tokio::test]
    async fn test_weekly_and_monthly_buckets() {
        let db = Database::open_memory().await.unwrap();
        create_current_schema(&db).await;
        insert_current(
            &db,
            vec![
                Line::new("T1", "2025-01-06", "A", 10.0), // Monday
                Line::new("T2", "2025-01-12", "A", 10.0), // Sunday, same week
                Line::new("T3", "2025-01-13", "A", 10.0),
            ],
        )
        .await;
        let schema = resolve_table(&db, &[CURRENT_TABLE.to_string()]).await.unwrap();
        let b = AggregationQueryBuilder::new(&schema.mapping(), &range(d(2025, 1, 1), d(2025, 1, 31)));

        let weekly = b
            .trend(Granularity::Weekly)
            .unwrap()
            .fetch(&db, |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)))
            .await
            .unwrap();
        assert_eq!(
            weekly,
            vec![("2025-01-06".to_string(), 20.0), ("2025-01-13".to_string(), 10.0)]
        );

        let monthly = b
            .trend(Granularity::Monthly)
            .unwrap()
            .fetch(&db, |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)))
            .await
            .unwrap();
        assert_eq!(monthly, vec![("2025-01-01".to_string(), 30.0)]);
    }

    #[tokio::test]
    async fn test_achievement_counts_each_transaction_once() {
        let db = Database::open_memory().await.unwrap();
        create_current_schema(&db).await;
        insert_current(
            &db,
            vec![
                // Two detail lines of one order.
                Line::new("T1", "2025-01-05", "A", 60.0),
                Line::new("T1", "2025-01-05", "A", 40.0),
                // A return is not achievement.
                Line::new("R1", "2025-01-06", "A", -25.0),
                Line::new("T2", "2025-01-07", "B", 70.0),
            ],
        )
        .await;
        let schema = resolve_table(&db, &[CURRENT_TABLE.to_string()]).await.unwrap();
        let rows = AggregationQueryBuilder::new(&schema.mapping(), &range(d(2025, 1, 1), d(2025, 1, 31)))
            .only_salesmen(&["A".to_string()])
            .achievement(AchievementGrouping::Salesman)
            .unwrap()
            .fetch(&db, |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)))
            .await
            .unwrap();
        assert_eq!(rows, vec![("A".to_string(), 100.0)]);
    }
}
