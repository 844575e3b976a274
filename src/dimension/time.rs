//! Time dimension expansion (§3, scenario 4): ISO-8601 instants, intervals
//! (`start/end`), and comma-separated lists all expand into day-resolution
//! cache-key sub-values. Grounded on `original_source/lib/dimension_time.c`.

use super::Dimension;
use crate::error::{Error, Result};
use crate::grid::{Extent, Grid};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use std::sync::Arc;
use tokio::sync::Mutex;

const DATE_FMT: &str = "%Y-%m-%d";

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FMT)
        .map_err(|_| Error::InvalidDimension { dimension: "TIME".into(), value: s.to_string() })
}

/// Expand a client `TIME` value into the ordered list of day-resolution
/// cache-key sub-values: a bare instant expands to itself; `start/end`
/// expands to every day in the inclusive range; a comma-separated list
/// expands to each listed instant without further splitting.
pub fn expand_time_range(value: &str) -> Result<Vec<String>> {
    if value.contains(',') {
        let mut out = Vec::new();
        for part in value.split(',') {
            let date = parse_date(part)?;
            out.push(date.format(DATE_FMT).to_string());
        }
        return Ok(out);
    }
    if let Some((start, end)) = value.split_once('/') {
        let start = parse_date(start)?;
        let end = parse_date(end)?;
        if end < start {
            return Err(Error::InvalidDimension { dimension: "TIME".into(), value: value.to_string() });
        }
        let mut out = Vec::new();
        let mut current = start;
        while current <= end {
            out.push(current.format(DATE_FMT).to_string());
            current += Duration::days(1);
        }
        return Ok(out);
    }
    let date = parse_date(value)?;
    Ok(vec![date.format(DATE_FMT).to_string()])
}

/// A `TIME` dimension, optionally backed by a SQLite database naming which
/// days actually have rendered data (`validate_query`/`list_query`); when
/// no database is configured every expanded day is accepted as-is.
pub struct TimeDimension {
    pub name: String,
    db: Option<Arc<Mutex<rusqlite::Connection>>>,
    validate_query: Option<String>,
    list_query: Option<String>,
}

impl TimeDimension {
    pub fn without_backing_store(name: impl Into<String>) -> Self {
        Self { name: name.into(), db: None, validate_query: None, list_query: None }
    }

    pub fn with_sqlite(
        name: impl Into<String>,
        conn: rusqlite::Connection,
        validate_query: String,
        list_query: String,
    ) -> Self {
        Self {
            name: name.into(),
            db: Some(Arc::new(Mutex::new(conn))),
            validate_query: Some(validate_query),
            list_query: Some(list_query),
        }
    }

    async fn day_has_data(&self, day: &str) -> Result<bool> {
        let (db, query) = match (&self.db, &self.validate_query) {
            (Some(db), Some(q)) => (db, q),
            _ => return Ok(true),
        };
        let conn = db.lock().await;
        let mut stmt = conn.prepare(query)?;
        let count: i64 = stmt.query_row(rusqlite::params![day], |row| row.get(0))?;
        Ok(count > 0)
    }
}

#[async_trait]
impl Dimension for TimeDimension {
    fn name(&self) -> &str {
        &self.name
    }

    async fn validate_and_expand(
        &self,
        value: &str,
        _tileset: &str,
        _extent: Option<&Extent>,
        _grid: Option<&Grid>,
    ) -> Result<Vec<String>> {
        let days = expand_time_range(value)?;
        let mut out = Vec::with_capacity(days.len());
        for day in days {
            if self.day_has_data(&day).await? {
                out.push(day);
            }
        }
        Ok(out)
    }

    async fn enumerate(&self) -> Result<Vec<String>> {
        let (db, query) = match (&self.db, &self.list_query) {
            (Some(db), Some(q)) => (db, q),
            _ => return Ok(Vec::new()),
        };
        let conn = db.lock().await;
        let mut stmt = conn.prepare(query)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::runtime::Runtime;

    #[test]
    fn interval_expands_to_each_day() {
        let expanded = expand_time_range("2024-01-01/2024-01-03").unwrap();
        assert_eq!(expanded, vec!["2024-01-01", "2024-01-02", "2024-01-03"]);
    }

    #[test]
    fn instant_expands_to_itself() {
        assert_eq!(expand_time_range("2024-06-01").unwrap(), vec!["2024-06-01"]);
    }

    #[test]
    fn comma_list_does_not_fill_gaps() {
        assert_eq!(expand_time_range("2024-01-01,2024-03-01").unwrap(), vec!["2024-01-01", "2024-03-01"]);
    }

    #[test]
    fn without_backing_store_accepts_all_expanded_days() {
        let dim = TimeDimension::without_backing_store("TIME");
        let rt = Runtime::new().unwrap();
        let expanded = rt
            .block_on(dim.validate_and_expand("2024-01-01/2024-01-02", "t", None, None))
            .unwrap();
        assert_eq!(expanded, vec!["2024-01-01", "2024-01-02"]);
    }

    #[test]
    fn reversed_range_is_rejected() {
        assert!(expand_time_range("2024-01-03/2024-01-01").is_err());
    }
}
