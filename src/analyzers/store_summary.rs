use std::collections::BTreeMap;

use crate::error::{ProcessingError, Result};
use crate::models::{LongFormRecord, VariableCatalog};

#[derive(Debug, Clone, PartialEq)]
pub struct VariableStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

#[derive(Debug)]
pub struct StoreSummary {
    pub total_records: usize,
    pub time_range: (String, String),
    pub variables: BTreeMap<String, VariableStats>,
}

pub struct StoreAnalyzer;

impl StoreAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, records: &[LongFormRecord]) -> Result<StoreSummary> {
        let first = records.first().ok_or_else(|| {
            ProcessingError::Storage("No records to analyze".to_string())
        })?;

        let mut first_ts = first.timestamp.as_str();
        let mut last_ts = first.timestamp.as_str();
        let mut sums: BTreeMap<String, (VariableStats, f64)> = BTreeMap::new();

        for record in records {
            // Export timestamps sort lexicographically
            if record.timestamp.as_str() < first_ts {
                first_ts = record.timestamp.as_str();
            }
            if record.timestamp.as_str() > last_ts {
                last_ts = record.timestamp.as_str();
            }

            let (stats, sum) = sums.entry(record.variable.clone()).or_insert((
                VariableStats {
                    count: 0,
                    min: f64::INFINITY,
                    max: f64::NEG_INFINITY,
                    mean: f64::NAN,
                },
                0.0,
            ));
            stats.count += 1;
            stats.min = stats.min.min(record.value);
            stats.max = stats.max.max(record.value);
            *sum += record.value;
        }

        let variables = sums
            .into_iter()
            .map(|(name, (mut stats, sum))| {
                stats.mean = sum / stats.count as f64;
                (name, stats)
            })
            .collect();

        Ok(StoreSummary {
            total_records: records.len(),
            time_range: (first_ts.to_string(), last_ts.to_string()),
            variables,
        })
    }
}

impl Default for StoreAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreSummary {
    pub fn summary(&self) -> String {
        format!(
            "Records: {} total\n\
            Variables: {}\n\
            Time Range: {} to {}",
            self.total_records,
            self.variables.len(),
            self.time_range.0,
            self.time_range.1
        )
    }

    /// Per-variable statistics, labelled with display aliases when a catalog is given
    pub fn detailed_summary(&self, catalog: Option<&VariableCatalog>) -> String {
        let mut summary = self.summary();
        summary.push_str("\n\nPer Variable:\n");

        for (name, stats) in &self.variables {
            let label = catalog.map_or(name.as_str(), |c| c.alias_for(name));
            summary.push_str(&format!(
                "- {}: {} values, min {:.2}, max {:.2}, mean {:.2}\n",
                label, stats.count, stats.min, stats.max, stats.mean
            ));
        }

        summary
    }
}
