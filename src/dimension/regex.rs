//! `Regex{pattern}` dimension: any value matching a compiled pattern is
//! valid and expands to itself unchanged.

use super::Dimension;
use crate::error::{Error, Result};
use crate::grid::{Extent, Grid};
use async_trait::async_trait;

pub struct RegexDimension {
    pub name: String,
    pattern: regex::Regex,
}

impl RegexDimension {
    pub fn new(name: impl Into<String>, pattern: &str) -> Result<Self> {
        let compiled = regex::Regex::new(pattern)
            .map_err(|e| Error::config(format!("invalid dimension regex: {e}")))?;
        Ok(Self { name: name.into(), pattern: compiled })
    }
}

#[async_trait]
impl Dimension for RegexDimension {
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
        if self.pattern.is_match(value) {
            Ok(vec![value.to_string()])
        } else {
            Err(Error::InvalidDimension { dimension: self.name.clone(), value: value.to_string() })
        }
    }

    async fn enumerate(&self) -> Result<Vec<String>> {
        // A pattern has no finite enumeration; capabilities documents
        // report the pattern text itself rather than a value list.
        Ok(vec![self.pattern.as_str().to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::runtime::Runtime;

    #[test]
    fn matches_pattern() {
        let dim = RegexDimension::new("YEAR", r"^\d{4}$").unwrap();
        let rt = Runtime::new().unwrap();
        assert_eq!(rt.block_on(dim.validate_and_expand("2024", "t", None, None)).unwrap(), vec!["2024"]);
        assert!(rt.block_on(dim.validate_and_expand("abcd", "t", None, None)).is_err());
    }
}
