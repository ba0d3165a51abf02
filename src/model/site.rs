use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpliceError};
use crate::model::types::Source;

/// One junction end point with the number of observations supporting it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub coordinate: u64,
    pub count: u64,
    pub source: Source,
}

impl Site {
    pub fn new(coordinate: u64) -> Self {
        Self {
            coordinate,
            count: 0,
            source: Source::default(),
        }
    }

    pub fn add_count(&mut self, count: u64) {
        self.count += count;
    }

    pub fn add_source(&mut self, gene_id: Option<&str>, transcript_id: Option<&str>) {
        self.source.add(gene_id, transcript_id);
    }
}

/// All partner coordinates observed for one fixed anchor.
///
/// Members are keyed by coordinate in a `BTreeMap`, so iteration is always
/// in ascending numeric order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteGroup {
    pub anchor: u64,
    members: BTreeMap<u64, Site>,
}

impl SiteGroup {
    pub fn new(anchor: u64) -> Self {
        Self {
            anchor,
            members: BTreeMap::new(),
        }
    }

    /// Add `count` observations of `target`, creating the site if needed.
    pub fn add(
        &mut self,
        target: u64,
        count: u64,
        gene_id: Option<&str>,
        transcript_id: Option<&str>,
    ) {
        let site = self
            .members
            .entry(target)
            .or_insert_with(|| Site::new(target));
        site.add_count(count);
        site.add_source(gene_id, transcript_id);
    }

    pub fn get(&self, target: u64) -> Option<&Site> {
        self.members.get(&target)
    }

    pub fn contains(&self, target: u64) -> bool {
        self.members.contains_key(&target)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Members in ascending coordinate order.
    pub fn sites(&self) -> impl Iterator<Item = &Site> + '_ {
        self.members.values()
    }

    /// Member coordinates in ascending order.
    pub fn coordinates(&self) -> Vec<u64> {
        self.members.keys().copied().collect()
    }

    pub fn total(&self) -> u64 {
        self.members.values().map(|s| s.count).sum()
    }

    /// Fraction of observations that use `target`.
    ///
    /// `None` when `target` is not a member or the group carries no counts.
    pub fn psi(&self, target: u64) -> Option<f64> {
        let site = self.members.get(&target)?;
        let total = self.total();
        if total == 0 {
            return None;
        }
        Some(site.count as f64 / total as f64)
    }

    /// Smallest and largest member coordinate.
    pub fn extreme_sites(&self) -> Option<(u64, u64)> {
        let lo = *self.members.keys().next()?;
        let hi = *self.members.keys().next_back()?;
        Some((lo, hi))
    }

    pub fn try_extreme_sites(&self) -> Result<(u64, u64)> {
        self.extreme_sites()
            .ok_or(SpliceError::EmptyGroup { anchor: self.anchor })
    }

    /// Drop members observed fewer than `min_count` times; returns the removed coordinates.
    pub fn filter(&mut self, min_count: u64) -> Vec<u64> {
        let removed: Vec<u64> = self
            .members
            .iter()
            .filter(|(_, s)| s.count < min_count)
            .map(|(&c, _)| c)
            .collect();
        for c in &removed {
            self.members.remove(c);
        }
        removed
    }

    pub(crate) fn remove(&mut self, target: u64) -> Option<Site> {
        self.members.remove(&target)
    }
}
