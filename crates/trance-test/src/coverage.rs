//! Coverage collector
//!
//! The map is sharded (`DashMap`), so workers recording hits on different
//! regions rarely contend. Suite totals are authoritative. Per-run deltas
//! come from before/after snapshots and are advisory under parallel
//! execution.

use crate::source::RegionId;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Suite-level failure when coverage is below the configured minimum
#[derive(Debug, Clone, PartialEq, Error)]
#[error("coverage {actual:.1}% is below the required {required:.1}%")]
pub struct CoverageThresholdError {
    pub actual: f64,
    pub required: f64,
}

/// Hit counts per instrumentable region
#[derive(Debug, Default)]
pub struct CoverageMap {
    hits: DashMap<RegionId, u64>,
}

pub type CoverageSnapshot = BTreeMap<RegionId, u64>;

impl CoverageMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a region as instrumentable (idempotent)
    pub fn register(&self, region: RegionId) {
        self.hits.entry(region).or_insert(0);
    }

    /// Count an execution; hits on unregistered regions are ignored
    pub fn hit(&self, region: &RegionId) {
        if let Some(mut count) = self.hits.get_mut(region) {
            *count += 1;
        }
    }

    pub fn snapshot(&self) -> CoverageSnapshot {
        self.hits
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// Regions hit since `before`
    pub fn delta(&self, before: &CoverageSnapshot) -> Vec<RegionId> {
        let mut regions: Vec<RegionId> = self
            .hits
            .iter()
            .filter(|entry| *entry.value() > before.get(entry.key()).copied().unwrap_or(0))
            .map(|entry| entry.key().clone())
            .collect();
        regions.sort();
        regions
    }

    /// Forget every region and hit count
    pub fn reset(&self) {
        self.hits.clear();
    }

    pub fn summary(&self) -> CoverageSummary {
        CoverageSummary::from_snapshot(&self.snapshot())
    }
}

/// Per-file coverage figures
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileCoverage {
    pub file: String,
    pub covered: usize,
    pub total: usize,
    pub percent: f64,
    pub uncovered_lines: Vec<u32>,
}

/// Aggregate coverage of a suite run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageSummary {
    pub covered: usize,
    pub total: usize,
    /// Zero instrumentable regions count as fully covered
    pub percent: f64,
    pub files: Vec<FileCoverage>,
}

impl CoverageSummary {
    pub fn from_snapshot(snapshot: &CoverageSnapshot) -> Self {
        let mut by_file: BTreeMap<&str, (usize, usize, BTreeSet<u32>)> = BTreeMap::new();
        for (region, hits) in snapshot {
            let entry = by_file.entry(region.file.as_ref()).or_default();
            entry.1 += 1;
            if *hits > 0 {
                entry.0 += 1;
            } else {
                entry.2.insert(region.line);
            }
        }

        let files: Vec<FileCoverage> = by_file
            .into_iter()
            .map(|(file, (covered, total, uncovered))| FileCoverage {
                file: file.to_string(),
                covered,
                total,
                percent: percent(covered, total),
                uncovered_lines: uncovered.into_iter().collect(),
            })
            .collect();

        let covered = files.iter().map(|f| f.covered).sum();
        let total = files.iter().map(|f| f.total).sum();
        Self {
            covered,
            total,
            percent: percent(covered, total),
            files,
        }
    }

    pub fn check_threshold(&self, required: Option<f64>) -> Result<(), CoverageThresholdError> {
        match required {
            Some(required) if self.percent < required => Err(CoverageThresholdError {
                actual: self.percent,
                required,
            }),
            _ => Ok(()),
        }
    }
}

fn percent(covered: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        covered as f64 * 100.0 / total as f64
    }
}
