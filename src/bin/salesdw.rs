use std::collections::BTreeMap;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use salesdw::{AnalyticsRequest, ApiResponse, Cached, Granularity, SalesDW, Warning};

#[derive(Parser)]
#[command(name = "salesdw", about = "Sales analytics over a SQLite sales warehouse")]
struct Cli {
    /// Database path (default: ~/.salesdw/salesdw.db)
    #[arg(long)]
    db: Option<String>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Treat this date as today (YYYY-MM-DD)
    #[arg(long)]
    as_of: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RangeArgs {
    /// Range keyword: today, yesterday, thisWeek, lastWeek, last7Days, last30Days,
    /// thisMonth, lastMonth, thisQuarter, lastQuarter, thisYear, lastYear, Q1..Q4
    #[arg(long, default_value = "thisMonth")]
    range: String,
    /// Custom start date (YYYY-MM-DD); needs --end
    #[arg(long)]
    start: Option<String>,
    /// Custom end date (YYYY-MM-DD); needs --start
    #[arg(long)]
    end: Option<String>,
    /// Filter as key=value (regionCode, cityCode, teamLeaderCode, fieldUserRole,
    /// userCode, chainName, storeCode, routeCode, productCategory, productCode)
    #[arg(long = "filter", value_name = "KEY=VALUE", value_parser = parse_filter)]
    filters: Vec<(String, String)>,
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

impl RangeArgs {
    fn request(&self) -> anyhow::Result<AnalyticsRequest> {
        let mut params: BTreeMap<String, String> = self.filters.iter().cloned().collect();
        params.insert("range".into(), self.range.clone());
        if let Some(start) = &self.start {
            params.insert("startDate".into(), start.clone());
        }
        if let Some(end) = &self.end {
            params.insert("endDate".into(), end.clone());
        }
        Ok(AnalyticsRequest::from_params(params)?)
    }
}

fn parse_filter(s: &str) -> Result<(String, String), String> {
    let (k, v) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    if k.trim().is_empty() {
        return Err(format!("empty filter key in '{s}'"));
    }
    Ok((k.trim().to_string(), v.trim().to_string()))
}

#[derive(Subcommand)]
enum Commands {
    /// Show the resolved table and warehouse row counts
    Status,
    /// Show how canonical fields map onto the resolved table
    Schema {
        #[arg(long)]
        json: bool,
    },
    /// Dashboard KPIs with previous-period comparison
    Kpi {
        #[command(flatten)]
        range: RangeArgs,
    },
    /// Net sales over time
    Trend {
        #[command(flatten)]
        range: RangeArgs,
        /// daily, weekly or monthly (default: by range length)
        #[arg(long)]
        granularity: Option<String>,
    },
    /// Daily sales with month-to-date running total and 7-day average
    Daily {
        #[command(flatten)]
        range: RangeArgs,
    },
    /// Salesmen ranked by net sales
    Salesmen {
        #[command(flatten)]
        range: RangeArgs,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = salesdw::metrics::DEFAULT_PAGE_SIZE)]
        page_size: u32,
    },
    /// Target achievement per salesman and month
    Targets {
        #[command(flatten)]
        range: RangeArgs,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// Remove a config value, restoring its default
    Unset { key: String },
    /// List all config values
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let db = match &cli.db {
        Some(path) => salesdw::Database::open_at(path).await?,
        None => salesdw::Database::open().await?,
    };
    let mut dw = SalesDW::new(db).await?;
    if let Some(as_of) = &cli.as_of {
        dw = dw.as_of(salesdw::date_util::parse_date(as_of)?);
    }

    match cli.command {
        Commands::Status => print_status(&dw).await?,
        Commands::Schema { json } => {
            let info = dw.schema_info().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("Table: {} ({} columns)", info.table, info.columns);
                println!("Candidates: {}", info.candidates.join(", "));
                for f in &info.fields {
                    println!("  {:<18} {}", f.field, f.column.as_deref().unwrap_or("-"));
                }
            }
        }
        Commands::Kpi { range } => {
            let result = dw.dashboard_kpis(&range.request()?).await;
            emit(result, range.json, |r| {
                let k = &r.value;
                println!("KPIs: {} ({} .. {})", k.range.label, k.range.start, k.range.end);
                let cur = k.currency.as_deref().unwrap_or("");
                let c = &k.current;
                println!("  Gross sales:  {:>14.2} {cur} ({:+.1}%)", c.gross_sales, k.change.gross_sales_pct);
                println!("  Returns:      {:>14.2} {cur} ({:+.1}%)", c.returns, k.change.returns_pct);
                println!("  Net sales:    {:>14.2} {cur} ({:+.1}%)", c.net_sales, k.change.net_sales_pct);
                println!("  Orders:       {:>14} ({:+.1}%)", c.orders, k.change.orders_pct);
                println!("  Return orders:{:>14}", c.return_orders);
                println!("  Customers:    {:>14} ({:+.1}%)", c.customers, k.change.customers_pct);
                println!("  Units:        {:>14.2} ({:+.1}%)", c.units, k.change.units_pct);
                println!("  Avg order:    {:>14.2} ({:+.1}%)", c.avg_order_value, k.change.avg_order_value_pct);
                println!("  MTD:          {:>14.2} (LMTD {:.2}, {:+.1}%)", k.mtd_net_sales, k.lmtd_net_sales, k.mtd_change_pct);
                println!("  YTD:          {:>14.2}", k.ytd_net_sales);
                if !k.top_salesmen.is_empty() {
                    println!("  Top salesmen:");
                    for s in &k.top_salesmen {
                        println!("    {:<12} {:>14.2}", s.salesman_code, s.net_sales);
                    }
                }
                print_warnings(&k.warnings);
            })?;
        }
        Commands::Trend { range, granularity } => {
            let granularity = match granularity.as_deref() {
                Some(g) => Some(
                    Granularity::parse(g)
                        .ok_or_else(|| anyhow::anyhow!("unknown granularity '{g}'"))?,
                ),
                None => None,
            };
            let result = dw.sales_trend(&range.request()?, granularity).await;
            emit(result, range.json, |r| {
                let t = &r.value;
                println!("Trend: {} ({:?})", t.range, t.granularity);
                for p in &t.points {
                    println!("  {}  {:>14.2}  {:>6} orders  {:>6} customers", p.period, p.net_sales, p.orders, p.customers);
                }
                print_warnings(&t.warnings);
            })?;
        }
        Commands::Daily { range } => {
            let result = dw.daily_sales(&range.request()?).await;
            emit(result, range.json, |r| {
                let d = &r.value;
                println!("Daily: {}", d.range);
                println!("  {:<10}  {:>12}  {:>12}  {:>12}", "day", "net", "mtd", "avg7");
                for p in &d.days {
                    println!("  {:<10}  {:>12.2}  {:>12.2}  {:>12.2}", p.day, p.net_sales, p.mtd_net_sales, p.moving_avg_7d);
                }
                print_warnings(&d.warnings);
            })?;
        }
        Commands::Salesmen { range, page, page_size } => {
            let result = dw.salesman_performance(&range.request()?, page, page_size).await;
            emit(result, range.json, |r| {
                let p = &r.value;
                println!(
                    "Salesmen: {} (page {}/{}, {} total)",
                    p.range,
                    p.page,
                    p.total_pages.max(1),
                    p.total
                );
                for s in &p.salesmen {
                    println!(
                        "  {:<12} {:<24} {:>14.2}  {:>6} orders",
                        s.salesman_code,
                        s.salesman_name.as_deref().unwrap_or(""),
                        s.net_sales,
                        s.orders
                    );
                }
                print_warnings(&p.warnings);
            })?;
        }
        Commands::Targets { range } => {
            let result = dw.target_achievement(&range.request()?).await;
            emit(result, range.json, |r| {
                let t = &r.value;
                println!("Targets: {}", t.range);
                if !t.has_data {
                    println!("  No salesman has an active target in this period");
                    print_warnings(&t.warnings);
                    return;
                }
                let s = &t.summary;
                println!("  Salesmen:  {} ({} met, {} missed)", s.salesmen, s.targets_met, s.targets_missed);
                println!("  Target:    {:>14.2}", s.target_amount);
                println!("  Achieved:  {:>14.2} ({:.1}%)", s.achieved_amount, s.achievement_pct);
                println!("  All sales: {:>14.2}", s.all_sales_amount);
                println!("  By month:");
                for m in &t.monthly {
                    println!("    {} {}  {:>12.2} / {:>12.2}  {:>6.1}%", m.month_name, m.period.year, m.achieved_amount, m.target_amount, m.achievement_pct);
                }
                println!("  By salesman:");
                for a in &t.salesmen {
                    let mark = match a.provenance {
                        salesdw::targets::TargetProvenance::Recorded => "",
                        salesdw::targets::TargetProvenance::Estimated => " (estimated)",
                    };
                    println!("    {:<12} {:>12.2} / {:>12.2}{mark}  {:>6.1}%", a.salesman_code, a.achieved_amount, a.target_amount, a.achievement_pct);
                }
                print_warnings(&t.warnings);
            })?;
        }
        Commands::Config { action } => handle_config(&dw, action).await?,
    }

    Ok(())
}

/// Print a report as an `ApiResponse` envelope (`--json`) or as text.
fn emit<T: Serialize>(
    result: salesdw::Result<Cached<T>>,
    json: bool,
    text: impl FnOnce(&Cached<T>),
) -> anyhow::Result<()> {
    if json {
        let failed = result.as_ref().err().map(|e| e.to_string());
        println!("{}", serde_json::to_string_pretty(&ApiResponse::from_result(result))?);
        if let Some(message) = failed {
            anyhow::bail!(message);
        }
        return Ok(());
    }
    let cached = result?;
    text(&cached);
    log::info!(
        "cache {}: {} ({})",
        if cached.cache.hit { "hit" } else { "miss" },
        cached.cache.key,
        cached.cache.cache_control
    );
    Ok(())
}

fn print_warnings(warnings: &[Warning]) {
    for w in warnings {
        println!("  warning: {w}");
    }
}

async fn print_status(dw: &SalesDW) -> anyhow::Result<()> {
    let status = dw.status().await?;
    println!("Transactions: {} ({} rows)", status.table, status.transaction_rows);
    println!("Targets:      {} ({} rows)", status.targets_table, status.target_rows);
    let cfg = dw.config();
    println!("Fallback target ratio: {}", cfg.fallback_target_ratio);
    match cfg.quarter_year {
        Some(y) => println!("Quarter year: {y}"),
        None => println!("Quarter year: current"),
    }
    println!("Working days per month: {}", cfg.working_days_per_month);
    Ok(())
}

async fn handle_config(dw: &SalesDW, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => match dw.config_get(&key).await? {
            Some(value) => println!("{value}"),
            None => println!("{key} is not set"),
        },
        ConfigAction::Set { key, value } => {
            dw.config_set(&key, &value).await?;
            println!("Set {key} = {value}");
        }
        ConfigAction::Unset { key } => {
            if dw.config_unset(&key).await? {
                println!("Unset {key}");
            } else {
                println!("{key} was not set");
            }
        }
        ConfigAction::List => {
            let entries = dw.config_list().await?;
            if entries.is_empty() {
                println!("No configuration set.");
            } else {
                for (key, value) in entries {
                    println!("{key} = {value}");
                }
            }
        }
    }
    Ok(())
}
