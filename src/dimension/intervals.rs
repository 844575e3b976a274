//! `Intervals{[start,end,resolution]...}` dimension: numeric ranges with a
//! step resolution, matching the original's interval dimension semantics.

use super::Dimension;
use crate::error::{Error, Result};
use crate::grid::{Extent, Grid};
use async_trait::async_trait;

#[derive(Debug, Clone, Copy)]
pub struct Interval {
    pub start: f64,
    pub end: f64,
    pub resolution: f64,
}

impl Interval {
    fn contains(&self, value: f64) -> bool {
        value >= self.start && value <= self.end
    }

    /// All grid-aligned values in `[start, value]`, step `resolution`,
    /// capped at `value` itself.
    fn steps_up_to(&self, value: f64) -> Vec<f64> {
        let mut out = Vec::new();
        if self.resolution <= 0.0 {
            return vec![value];
        }
        let mut current = self.start;
        while current < value - self.resolution / 2.0 {
            out.push(current);
            current += self.resolution;
        }
        out.push(value);
        out
    }
}

#[derive(Debug, Clone)]
pub struct IntervalsDimension {
    pub name: String,
    pub intervals: Vec<Interval>,
}

impl IntervalsDimension {
    pub fn new(name: impl Into<String>, intervals: Vec<Interval>) -> Self {
        Self { name: name.into(), intervals }
    }
}

#[async_trait]
impl Dimension for IntervalsDimension {
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
        let parsed: f64 = value
            .parse()
            .map_err(|_| Error::InvalidDimension { dimension: self.name.clone(), value: value.to_string() })?;
        let interval = self
            .intervals
            .iter()
            .find(|i| i.contains(parsed))
            .ok_or_else(|| Error::InvalidDimension { dimension: self.name.clone(), value: value.to_string() })?;
        Ok(interval.steps_up_to(parsed).into_iter().map(|v| format_value(v)).collect())
    }

    async fn enumerate(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for interval in &self.intervals {
            out.extend(interval.steps_up_to(interval.end).into_iter().map(format_value));
        }
        Ok(out)
    }
}

fn format_value(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::runtime::Runtime;

    #[test]
    fn rejects_value_outside_any_interval() {
        let dim = IntervalsDimension::new("ELEV", vec![Interval { start: 0.0, end: 10.0, resolution: 1.0 }]);
        let rt = Runtime::new().unwrap();
        assert!(rt.block_on(dim.validate_and_expand("50", "t", None, None)).is_err());
    }

    #[test]
    fn expands_into_covering_steps() {
        let dim = IntervalsDimension::new("ELEV", vec![Interval { start: 0.0, end: 10.0, resolution: 2.0 }]);
        let rt = Runtime::new().unwrap();
        let expanded = rt.block_on(dim.validate_and_expand("5", "t", None, None)).unwrap();
        assert_eq!(expanded, vec!["0", "2", "4", "5"]);
    }
}
