//! Tunable thresholds, loadable from JSON.
//!
//! Every field has a default, so a config file only needs the values it
//! changes:
//!
//! ```json
//! { "threads": 4, "matching": { "ir_overlap": 80.0 } }
//! ```

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Junction graph enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphOptions {
    /// Alternative sites closer than this (bp) are not reported as A3/A5.
    pub min_gap: u64,

    /// Junctions seen fewer times than this are dropped before enumeration.
    pub min_junction_count: u64,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            min_gap: 3,
            min_junction_count: 1,
        }
    }
}

/// Reconciliation of events with reference exons.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchOptions {
    /// Maximum distance (bp) between an A3/A5 site and a reference exon boundary.
    pub site_tolerance: u64,

    /// Minimum union overlap (percent) between an annotated intron and an
    /// observed exon for an intron retention call.
    pub ir_overlap: f64,

    /// Width (bp) of the exonic windows used as IR PSI denominator.
    pub flank: u64,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            site_tolerance: 3,
            ir_overlap: 90.0,
            flank: 20,
        }
    }
}

/// Read to transcript coupling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoupleOptions {
    /// Minimum overlap (percent of the shorter interval) between read and transcript.
    pub overlap_threshold: f64,

    /// Maximum distance (bp) between matching read and transcript exon boundaries.
    pub distance_tolerance: u64,
}

impl Default for CoupleOptions {
    fn default() -> Self {
        Self {
            overlap_threshold: 50.0,
            distance_tolerance: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Worker threads; 0 means one per logical core.
    pub threads: usize,
    pub graph: GraphOptions,
    pub matching: MatchOptions,
    pub coupling: CoupleOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threads: num_cpus::get(),
            graph: GraphOptions::default(),
            matching: MatchOptions::default(),
            coupling: CoupleOptions::default(),
        }
    }
}

impl Config {
    pub fn from_json_str(s: &str) -> anyhow::Result<Self> {
        serde_json::from_str(s).context("parse config JSON")
    }

    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("in {}", path.display()))
    }

    /// Thread count to hand to the pool builder.
    pub fn effective_threads(&self) -> usize {
        if self.threads == 0 {
            num_cpus::get()
        } else {
            self.threads
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = Config::from_json_str(r#"{ "threads": 2, "matching": { "ir_overlap": 80.0 } }"#)
            .unwrap();
        assert_eq!(cfg.threads, 2);
        assert_eq!(cfg.matching.ir_overlap, 80.0);
        assert_eq!(cfg.matching.site_tolerance, 3);
        assert_eq!(cfg.matching.flank, 20);
        assert_eq!(cfg.graph, GraphOptions::default());
    }

    #[test]
    fn empty_object_is_default() {
        let cfg = Config::from_json_str("{}").unwrap();
        assert_eq!(cfg.graph.min_gap, 3);
        assert!(cfg.effective_threads() >= 1);
    }

    #[test]
    fn zero_threads_means_all_cores() {
        let cfg = Config {
            threads: 0,
            ..Config::default()
        };
        assert_eq!(cfg.effective_threads(), num_cpus::get());
    }

    #[test]
    fn bad_json_is_an_error() {
        assert!(Config::from_json_str("{ threads: }").is_err());
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("cfg.json");
        std::fs::write(&p, r#"{ "coupling": { "distance_tolerance": 12 } }"#).unwrap();
        let cfg = Config::from_path(&p).unwrap();
        assert_eq!(cfg.coupling.distance_tolerance, 12);
        assert_eq!(cfg.coupling.overlap_threshold, 50.0);
    }
}
