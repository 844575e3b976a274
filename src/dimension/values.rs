//! `Values{enum, case_sensitive?}` dimension: an explicit enumeration.

use super::Dimension;
use crate::error::{Error, Result};
use crate::grid::{Extent, Grid};
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct ValuesDimension {
    pub name: String,
    pub values: Vec<String>,
    pub case_sensitive: bool,
    pub default_value: Option<String>,
}

impl ValuesDimension {
    pub fn new(name: impl Into<String>, values: Vec<String>, case_sensitive: bool) -> Self {
        Self { name: name.into(), values, case_sensitive, default_value: None }
    }

    fn matches(&self, a: &str, b: &str) -> bool {
        if self.case_sensitive {
            a == b
        } else {
            a.eq_ignore_ascii_case(b)
        }
    }
}

#[async_trait]
impl Dimension for ValuesDimension {
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
        // A client value may list several comma-separated sub-values; each
        // must be individually valid against the enumeration.
        let mut out = Vec::new();
        for candidate in value.split(',') {
            let candidate = candidate.trim();
            match self.values.iter().find(|v| self.matches(v, candidate)) {
                Some(canonical) => out.push(canonical.clone()),
                None => {
                    return Err(Error::InvalidDimension {
                        dimension: self.name.clone(),
                        value: candidate.to_string(),
                    })
                }
            }
        }
        Ok(out)
    }

    async fn enumerate(&self) -> Result<Vec<String>> {
        Ok(self.values.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::runtime::Runtime;

    #[test]
    fn rejects_value_outside_enum() {
        let dim = ValuesDimension::new("STYLE", vec!["default".into(), "alt".into()], false);
        let rt = Runtime::new().unwrap();
        let err = rt
            .block_on(dim.validate_and_expand("bogus", "t", None, None))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDimension { .. }));
    }

    #[test]
    fn case_insensitive_matches_canonical_casing() {
        let dim = ValuesDimension::new("STYLE", vec!["Default".into()], false);
        let rt = Runtime::new().unwrap();
        let expanded = rt.block_on(dim.validate_and_expand("default", "t", None, None)).unwrap();
        assert_eq!(expanded, vec!["Default".to_string()]);
    }

    #[test]
    fn comma_separated_expands_to_multiple_values() {
        let dim = ValuesDimension::new("STYLE", vec!["a".into(), "b".into()], true);
        let rt = Runtime::new().unwrap();
        let expanded = rt.block_on(dim.validate_and_expand("a,b", "t", None, None)).unwrap();
        assert_eq!(expanded, vec!["a".to_string(), "b".to_string()]);
    }
}
