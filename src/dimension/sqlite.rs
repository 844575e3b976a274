//! `SQLite{db, validate_query, list_query}` dimension. Collapses the two
//! near-identical SQLite-dimension XML parsers present in the original
//! (different source files) into this single implementation (§9).

use super::Dimension;
use crate::error::{Error, Result};
use crate::grid::{Extent, Grid};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct SqliteDimension {
    pub name: String,
    conn: Arc<Mutex<rusqlite::Connection>>,
    validate_query: String,
    list_query: String,
}

impl SqliteDimension {
    pub fn new(
        name: impl Into<String>,
        conn: rusqlite::Connection,
        validate_query: impl Into<String>,
        list_query: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            conn: Arc::new(Mutex::new(conn)),
            validate_query: validate_query.into(),
            list_query: list_query.into(),
        }
    }
}

#[async_trait]
impl Dimension for SqliteDimension {
    fn name(&self) -> &str {
        &self.name
    }

    async fn validate_and_expand(
        &self,
        value: &str,
        tileset: &str,
        _extent: Option<&Extent>,
        _grid: Option<&Grid>,
    ) -> Result<Vec<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&self.validate_query)?;
        let rows = stmt.query_map(rusqlite::named_params! { ":value": value, ":tileset": tileset }, |row| {
            row.get::<_, String>(0)
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        if out.is_empty() {
            return Err(Error::InvalidDimension { dimension: self.name.clone(), value: value.to_string() });
        }
        Ok(out)
    }

    async fn enumerate(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&self.list_query)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}
