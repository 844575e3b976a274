//! `PostgreSQL{connstr, validate_query, list_query}` dimension, mirroring
//! the SQLite variant's contract against an async Postgres pool.

use super::Dimension;
use crate::error::{Error, Result};
use crate::grid::{Extent, Grid};
use async_trait::async_trait;
use sqlx::PgPool;

pub struct PostgreSqlDimension {
    pub name: String,
    pool: PgPool,
    validate_query: String,
    list_query: String,
}

impl PostgreSqlDimension {
    pub async fn connect(
        name: impl Into<String>,
        connstr: &str,
        validate_query: impl Into<String>,
        list_query: impl Into<String>,
    ) -> Result<Self> {
        let pool = PgPool::connect(connstr).await?;
        Ok(Self { name: name.into(), pool, validate_query: validate_query.into(), list_query: list_query.into() })
    }
}

#[async_trait]
impl Dimension for PostgreSqlDimension {
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
        let rows: Vec<(String,)> = sqlx::query_as(&self.validate_query)
            .bind(value)
            .bind(tileset)
            .fetch_all(&self.pool)
            .await?;
        if rows.is_empty() {
            return Err(Error::InvalidDimension { dimension: self.name.clone(), value: value.to_string() });
        }
        Ok(rows.into_iter().map(|(v,)| v).collect())
    }

    async fn enumerate(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(&self.list_query).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(v,)| v).collect())
    }
}
