//! Dimension subsystem (§3, §4.6). Grounded on
//! `original_source/lib/dimension.c` and `lib/dimension_time.c`: a
//! [`Dimension`] validates and expands a client-supplied value into the
//! ordered list of cache-key sub-values used by the dimension-assembly
//! engine.

pub mod intervals;
pub mod postgresql;
pub mod regex;
pub mod sqlite;
pub mod time;
pub mod values;

pub use intervals::IntervalsDimension;
pub use postgresql::PostgreSqlDimension;
pub use regex::RegexDimension;
pub use sqlite::SqliteDimension;
pub use values::ValuesDimension;

use crate::error::Result;
use crate::grid::{Extent, Grid};
use async_trait::async_trait;

/// Capability trait implemented by every dimension kind. Two near-identical
/// SQLite-dimension XML parsers existed in the original in different
/// files; this crate collapses both into the single [`SqliteDimension`]
/// path (§9 Open Questions, resolved).
#[async_trait]
pub trait Dimension: Send + Sync {
    fn name(&self) -> &str;

    /// Validate a client-supplied value and expand it into the ordered
    /// list of cache-key sub-values. `extent`/`grid` are supplied when the
    /// dimension's expansion depends on the requested tile's location
    /// (time-range dimensions backed by a spatial index).
    async fn validate_and_expand(
        &self,
        value: &str,
        tileset: &str,
        extent: Option<&Extent>,
        grid: Option<&Grid>,
    ) -> Result<Vec<String>>;

    /// All possible cache-key values, for capabilities documents.
    async fn enumerate(&self) -> Result<Vec<String>>;
}

/// Pairs a [`Dimension`] with the client's `requested_value` and the
/// single resolved `cached_value` used to build a cache key.
#[derive(Debug, Clone)]
pub struct RequestedDimension {
    pub name: String,
    pub requested_value: String,
    pub cached_value: String,
}

impl RequestedDimension {
    pub fn new(name: impl Into<String>, requested_value: impl Into<String>, cached_value: impl Into<String>) -> Self {
        Self { name: name.into(), requested_value: requested_value.into(), cached_value: cached_value.into() }
    }
}

/// Sanitize a dimension value for inclusion in a cache key or resource
/// key: `/` and `.` become `#` (§4.2).
pub fn sanitize_for_key(value: &str) -> String {
    value.replace(['/', '.'], "#")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_slashes_and_dots() {
        assert_eq!(sanitize_for_key("2024-01-01/2024-01-03"), "2024-01-01#2024-01-03");
        assert_eq!(sanitize_for_key("a.b.c"), "a#b#c");
    }

    #[test]
    fn cache_key_stability_ignores_dimension_order() {
        let a = vec![
            RequestedDimension::new("TIME", "t", "t"),
            RequestedDimension::new("STYLE", "s", "s"),
        ];
        let mut b = a.clone();
        b.reverse();
        let key_a: Vec<_> = a.iter().map(|d| d.cached_value.clone()).collect();
        let mut key_b: Vec<_> = b.iter().map(|d| d.cached_value.clone()).collect();
        key_b.sort();
        let mut sorted_a = key_a.clone();
        sorted_a.sort();
        assert_eq!(sorted_a, key_b);
    }
}
