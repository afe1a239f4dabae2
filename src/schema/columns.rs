use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::Serialize;

use crate::error::{Error, Result};

/// How a physical column is turned into a SQL expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    /// Used as-is.
    Plain,
    /// A timestamp column reduced to its calendar date.
    DateOf,
}

/// A resolved reference to a concrete column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnRef {
    pub column: String,
    pub kind: ColumnKind,
}

impl ColumnRef {
    /// Render against a table alias, e.g. `t.store_code` or `DATE(t.trx_date)`.
    pub fn sql(&self, alias: &str) -> String {
        match self.kind {
            ColumnKind::Plain => format!("{alias}.{}", self.column),
            ColumnKind::DateOf => format!("DATE({alias}.{})", self.column),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    TransactionCode,
    TransactionDate,
    NetAmount,
    Quantity,
    StoreCode,
    Region,
    City,
    Chain,
    TeamLeader,
    SalesmanCode,
    SalesmanName,
    SalesmanType,
    RouteCode,
    ProductCode,
    ProductCategory,
    Currency,
}

use ColumnKind::{DateOf, Plain};

impl CanonicalField {
    pub const ALL: [CanonicalField; 16] = [
        CanonicalField::TransactionCode,
        CanonicalField::TransactionDate,
        CanonicalField::NetAmount,
        CanonicalField::Quantity,
        CanonicalField::StoreCode,
        CanonicalField::Region,
        CanonicalField::City,
        CanonicalField::Chain,
        CanonicalField::TeamLeader,
        CanonicalField::SalesmanCode,
        CanonicalField::SalesmanName,
        CanonicalField::SalesmanType,
        CanonicalField::RouteCode,
        CanonicalField::ProductCode,
        CanonicalField::ProductCategory,
        CanonicalField::Currency,
    ];

    /// Acceptable concrete columns, newest schema first.
    pub fn candidates(self) -> &'static [(&'static str, ColumnKind)] {
        match self {
            CanonicalField::TransactionCode => &[("trx_code", Plain), ("transaction_code", Plain)],
            CanonicalField::TransactionDate => &[
                ("trx_date_only", Plain),
                ("trx_date", DateOf),
                ("transaction_date", DateOf),
            ],
            CanonicalField::NetAmount => &[("net_amount", Plain), ("line_amount", Plain)],
            CanonicalField::Quantity => &[("quantity_bu", Plain), ("quantity", Plain)],
            CanonicalField::StoreCode => &[("store_code", Plain), ("customer_code", Plain)],
            CanonicalField::Region => &[("store_region_code", Plain), ("region_code", Plain)],
            CanonicalField::City => &[("store_city_code", Plain), ("city_code", Plain)],
            CanonicalField::Chain => &[("chain_code", Plain), ("chain_name", Plain)],
            CanonicalField::TeamLeader => &[("tl_code", Plain), ("team_leader_code", Plain)],
            CanonicalField::SalesmanCode => &[
                ("field_user_code", Plain),
                ("user_code", Plain),
                ("salesman_code", Plain),
            ],
            CanonicalField::SalesmanName => &[
                ("field_user_name", Plain),
                ("user_name", Plain),
                ("salesman_name", Plain),
            ],
            CanonicalField::SalesmanType => &[("field_user_type", Plain), ("user_type", Plain)],
            CanonicalField::RouteCode => &[("route_code", Plain)],
            CanonicalField::ProductCode => &[("product_code", Plain)],
            CanonicalField::ProductCategory => {
                &[("product_group_level1", Plain), ("product_category", Plain)]
            }
            CanonicalField::Currency => &[("currency_code", Plain)],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CanonicalField::TransactionCode => "transaction_code",
            CanonicalField::TransactionDate => "transaction_date",
            CanonicalField::NetAmount => "net_amount",
            CanonicalField::Quantity => "quantity",
            CanonicalField::StoreCode => "store_code",
            CanonicalField::Region => "region",
            CanonicalField::City => "city",
            CanonicalField::Chain => "chain",
            CanonicalField::TeamLeader => "team_leader",
            CanonicalField::SalesmanCode => "salesman_code",
            CanonicalField::SalesmanName => "salesman_name",
            CanonicalField::SalesmanType => "salesman_type",
            CanonicalField::RouteCode => "route_code",
            CanonicalField::ProductCode => "product_code",
            CanonicalField::ProductCategory => "product_category",
            CanonicalField::Currency => "currency",
        }
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Canonical field -> concrete column (or `None` when the concept is absent).
///
/// Rebuilds of the flat transactions table renamed columns (`customer_code`
/// became `store_code`, `user_code` became `field_user_code`). [`Self::map`]
/// takes the first acceptable name present for every field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMapping {
    pub table: String,
    fields: BTreeMap<CanonicalField, Option<ColumnRef>>,
}

impl ColumnMapping {
    /// Map every canonical field against a column set. Pure; no I/O.
    pub fn map(table: &str, columns: &HashSet<String>) -> Self {
        let fields = CanonicalField::ALL
            .iter()
            .map(|&field| {
                let resolved = field
                    .candidates()
                    .iter()
                    .find(|(name, _)| columns.contains(*name))
                    .map(|(name, kind)| ColumnRef {
                        column: name.to_string(),
                        kind: *kind,
                    });
                (field, resolved)
            })
            .collect();
        Self {
            table: table.to_string(),
            fields,
        }
    }

    pub fn get(&self, field: CanonicalField) -> Option<&ColumnRef> {
        self.fields.get(&field).and_then(Option::as_ref)
    }

    pub fn has(&self, field: CanonicalField) -> bool {
        self.get(field).is_some()
    }

    /// SQL expression for a field against the `t` alias, if the field exists.
    pub fn expr(&self, field: CanonicalField) -> Option<String> {
        self.get(field).map(|c| c.sql("t"))
    }

    /// Like [`expr`](Self::expr) but for fields no aggregate can do without.
    pub fn require(&self, field: CanonicalField) -> Result<String> {
        self.expr(field).ok_or_else(|| Error::MissingColumn {
            table: self.table.clone(),
            field: field.to_string(),
        })
    }

    /// Fields that resolved to nothing.
    pub fn absent(&self) -> Vec<CanonicalField> {
        self.fields
            .iter()
            .filter(|(_, c)| c.is_none())
            .map(|(f, _)| *f)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CanonicalField, Option<&ColumnRef>)> {
        self.fields.iter().map(|(f, c)| (*f, c.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_current_schema_prefers_new_names() {
        let m = ColumnMapping::map(
            "flat_sales_transactions",
            &cols(&[
                "trx_code",
                "transaction_code",
                "trx_date_only",
                "store_code",
                "customer_code",
                "field_user_code",
                "user_code",
                "net_amount",
            ]),
        );
        assert_eq!(m.expr(CanonicalField::TransactionCode).unwrap(), "t.trx_code");
        assert_eq!(m.expr(CanonicalField::TransactionDate).unwrap(), "t.trx_date_only");
        assert_eq!(m.expr(CanonicalField::StoreCode).unwrap(), "t.store_code");
        assert_eq!(m.expr(CanonicalField::SalesmanCode).unwrap(), "t.field_user_code");
    }

    #[test]
    fn test_legacy_schema_falls_back() {
        let m = ColumnMapping::map(
            "flat_transactions",
            &cols(&[
                "transaction_code",
                "transaction_date",
                "customer_code",
                "user_code",
                "quantity",
                "net_amount",
            ]),
        );
        assert_eq!(
            m.expr(CanonicalField::TransactionDate).unwrap(),
            "DATE(t.transaction_date)"
        );
        assert_eq!(m.expr(CanonicalField::StoreCode).unwrap(), "t.customer_code");
        assert_eq!(m.expr(CanonicalField::SalesmanCode).unwrap(), "t.user_code");
        assert_eq!(m.expr(CanonicalField::Quantity).unwrap(), "t.quantity");
    }

    #[test]
    fn test_missing_concept_maps_to_none() {
        let m = ColumnMapping::map("t", &cols(&["trx_code", "trx_date_only", "net_amount"]));
        assert_eq!(m.get(CanonicalField::RouteCode), None);
        assert!(!m.has(CanonicalField::Region));
        assert!(m.absent().contains(&CanonicalField::RouteCode));
        assert!(!m.absent().contains(&CanonicalField::NetAmount));
    }

    #[test]
    fn test_require_reports_table_and_field() {
        let m = ColumnMapping::map("legacy_sales", &cols(&["net_amount"]));
        let err = m.require(CanonicalField::TransactionDate).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Required column for transaction_date missing from legacy_sales"
        );
    }

    #[test]
    fn test_every_field_is_mapped_exactly_once() {
        let m = ColumnMapping::map("t", &cols(&[]));
        assert_eq!(m.iter().count(), CanonicalField::ALL.len());
        assert_eq!(m.absent().len(), CanonicalField::ALL.len());
    }
}
