pub mod columns;

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tokio::sync::OnceCell;

use crate::error::{Error, Result};
use crate::storage::{repository, Database};

pub use columns::{CanonicalField, ColumnKind, ColumnMapping, ColumnRef};

static RE_IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Table names end up in SQL text, so they must be plain identifiers.
pub fn validate_identifier(name: &str) -> Result<&str> {
    if RE_IDENT.is_match(name) {
        Ok(name)
    } else {
        Err(Error::Config(format!("invalid table identifier: '{name}'")))
    }
}

/// A resolved warehouse table and its column set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: HashSet<String>,
}

impl TableSchema {
    pub fn mapping(&self) -> ColumnMapping {
        ColumnMapping::map(&self.name, &self.columns)
    }
}

/// Look up the first existing table among `candidates`, in priority order.
pub async fn resolve_table(db: &Database, candidates: &[String]) -> Result<TableSchema> {
    for name in candidates {
        validate_identifier(name)?;
    }
    let owned = candidates.to_vec();
    let found = db
        .reader()
        .call(move |conn| {
            for name in owned {
                if repository::table_exists(conn, &name)? {
                    let columns = repository::table_columns(conn, &name)?;
                    return Ok::<_, rusqlite::Error>(Some((name, columns)));
                }
            }
            Ok(None)
        })
        .await?;

    match found {
        Some((name, columns)) => {
            log::info!("Resolved transactions table: {name} ({} columns)", columns.len());
            Ok(TableSchema {
                name,
                columns: columns.into_iter().collect(),
            })
        }
        None => Err(Error::SchemaResolution {
            candidates: candidates.to_vec(),
        }),
    }
}

/// Resolves a candidate list once and keeps the answer for the life of the
/// process. Warehouse tables only change through migrations, which restart
/// the service.
#[derive(Debug)]
pub struct SchemaResolver {
    candidates: Vec<String>,
    resolved: OnceCell<(TableSchema, ColumnMapping)>,
}

impl SchemaResolver {
    pub fn new(candidates: Vec<String>) -> Self {
        Self {
            candidates,
            resolved: OnceCell::new(),
        }
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// Resolve (or return the memoized) table schema. A failed resolution is
    /// not memoized, so a table created later is picked up on the next call.
    pub async fn resolve(&self, db: &Database) -> Result<&TableSchema> {
        self.resolve_with_mapping(db).await.map(|(schema, _)| schema)
    }

    pub async fn mapping(&self, db: &Database) -> Result<&ColumnMapping> {
        self.resolve_with_mapping(db).await.map(|(_, mapping)| mapping)
    }

    async fn resolve_with_mapping(&self, db: &Database) -> Result<&(TableSchema, ColumnMapping)> {
        self.resolved
            .get_or_try_init(|| async {
                let schema = resolve_table(db, &self.candidates).await?;
                let mapping = schema.mapping();
                for field in mapping.absent() {
                    log::debug!("{}: no column for {field}", schema.name);
                }
                Ok::<_, Error>((schema, mapping))
            })
            .await
    }
}
