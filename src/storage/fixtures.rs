use rusqlite::params;

use super::Database;

/// Current flat-table layout, used by test warehouses.
pub(crate) const CURRENT_TABLE: &str = "flat_sales_transactions";
/// The legacy layout it replaced.
pub(crate) const LEGACY_TABLE: &str = "flat_transactions";

/// One transaction line.
#[derive(Debug, Clone)]
pub(crate) struct Line {
    pub trx_code: String,
    pub date: String,
    pub salesman: String,
    pub store: String,
    pub amount: f64,
    pub quantity: f64,
    pub region: String,
    pub route: String,
    pub category: String,
}

impl Line {
    pub fn new(trx_code: &str, date: &str, salesman: &str, amount: f64) -> Self {
        Self {
            trx_code: trx_code.to_string(),
            date: date.to_string(),
            salesman: salesman.to_string(),
            store: "S1".to_string(),
            amount,
            quantity: 1.0,
            region: "R1".to_string(),
            route: "RT1".to_string(),
            category: "Beverages".to_string(),
        }
    }

    pub fn store(mut self, store: &str) -> Self {
        self.store = store.to_string();
        self
    }

    pub fn region(mut self, region: &str) -> Self {
        self.region = region.to_string();
        self
    }
}

pub(crate) async fn create_current_schema(db: &Database) {
    db.writer()
        .call(|conn| {
            conn.execute_batch(
                "CREATE TABLE flat_sales_transactions (
                    trx_code TEXT NOT NULL,
                    trx_date TEXT NOT NULL,
                    trx_date_only TEXT NOT NULL,
                    store_code TEXT,
                    store_name TEXT,
                    store_region_code TEXT,
                    store_city_code TEXT,
                    tl_code TEXT,
                    field_user_code TEXT,
                    field_user_name TEXT,
                    field_user_type TEXT,
                    route_code TEXT,
                    product_code TEXT,
                    product_group_level1 TEXT,
                    quantity_bu REAL,
                    net_amount REAL,
                    line_amount REAL,
                    total_discount_amount REAL,
                    currency_code TEXT
                );",
            )
        })
        .await
        .unwrap();
}

/// The older layout: no region/route/category columns, `user_code` and
/// `customer_code` instead of the field-user/store names, timestamp only.
pub(crate) async fn create_legacy_schema(db: &Database) {
    db.writer()
        .call(|conn| {
            conn.execute_batch(
                "CREATE TABLE flat_transactions (
                    transaction_code TEXT NOT NULL,
                    transaction_date TEXT NOT NULL,
                    customer_code TEXT,
                    user_code TEXT,
                    product_code TEXT,
                    quantity REAL,
                    net_amount REAL
                );",
            )
        })
        .await
        .unwrap();
}

pub(crate) async fn insert_current(db: &Database, lines: Vec<Line>) {
    db.writer()
        .call(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO flat_sales_transactions (
                        trx_code, trx_date, trx_date_only, store_code, store_name,
                        store_region_code, store_city_code, tl_code, field_user_code,
                        field_user_name, field_user_type, route_code, product_code,
                        product_group_level1, quantity_bu, net_amount, line_amount,
                        total_discount_amount, currency_code
                    ) VALUES (?1, ?2 || ' 10:00:00', ?2, ?3, ?3 || ' Store', ?4, 'DXB', 'TL1', ?5,
                              'Salesman ' || ?5, 'Field User', ?6, 'P1', ?7, ?8, ?9, ?9, 0, 'AED')",
                )?;
                for l in &lines {
                    stmt.execute(params![
                        l.trx_code, l.date, l.store, l.region, l.salesman, l.route, l.category,
                        l.quantity, l.amount,
                    ])?;
                }
            }
            tx.commit()
        })
        .await
        .unwrap();
}

pub(crate) async fn insert_legacy(db: &Database, lines: Vec<Line>) {
    db.writer()
        .call(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO flat_transactions (
                        transaction_code, transaction_date, customer_code, user_code,
                        product_code, quantity, net_amount
                    ) VALUES (?1, ?2 || ' 10:00:00', ?3, ?4, 'P1', ?5, ?6)",
                )?;
                for l in &lines {
                    stmt.execute(params![
                        l.trx_code, l.date, l.store, l.salesman, l.quantity, l.amount,
                    ])?;
                }
            }
            tx.commit()
        })
        .await
        .unwrap();
}

pub(crate) async fn insert_target(
    db: &Database,
    salesman: &str,
    year: i32,
    month: u32,
    amount: f64,
    active: bool,
) {
    let salesman = salesman.to_string();
    db.writer()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO tblcommontarget (salesmancode, timeframe, year, month, quarter, amount, isactive)
                 VALUES (?1, 'M', ?2, ?3, (?3 - 1) / 3 + 1, ?4, ?5)",
                params![salesman, year, month, amount, active as i32],
            )?;
            Ok::<(), rusqlite::Error>(())
        })
        .await
        .unwrap();
}
