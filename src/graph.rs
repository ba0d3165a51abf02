//! Junction graph per (chromosome, strand) and candidate event enumeration.
//!
//! Every junction `(start, end)` is stored twice: under `starts[start]` with
//! `end` as a member, and under `ends[end]` with `start` as a member. Both
//! views are written by the same call, so they never disagree.
//!
//! ```text
//!   starts[100] = {300, 500}        ends[500] = {100, 400}
//!
//!   ----[   ]--------[ ]---------[   ]----
//!          100      300 400      500
//! ```

use std::collections::{BTreeMap, BTreeSet};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpliceError};
use crate::event::{Detection, EventKind, SpliceEvent};
use crate::junctions::Junction;
use crate::model::site::SiteGroup;
use crate::types::Strand;

/// Which view of the graph an anchor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Side {
    Start,
    End,
}

/// Key of a graph partition.
pub type GraphKey = (String, Strand);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JunctionGraph {
    pub chromosome: String,
    pub strand: Strand,
    starts: BTreeMap<u64, SiteGroup>,
    ends: BTreeMap<u64, SiteGroup>,
}

impl JunctionGraph {
    pub fn new(chromosome: impl Into<String>, strand: Strand) -> Self {
        Self {
            chromosome: chromosome.into(),
            strand,
            starts: BTreeMap::new(),
            ends: BTreeMap::new(),
        }
    }

    /// Insert or merge one junction observation in both views.
    pub fn add_edge(
        &mut self,
        start: u64,
        end: u64,
        count: u64,
        gene_id: Option<&str>,
        transcript_id: Option<&str>,
    ) -> Result<()> {
        if start == 0 || end < start {
            return Err(SpliceError::InvalidRange {
                chromosome: self.chromosome.clone(),
                start: start as i64,
                end: end as i64,
            });
        }
        self.starts
            .entry(start)
            .or_insert_with(|| SiteGroup::new(start))
            .add(end, count, gene_id, transcript_id);
        self.ends
            .entry(end)
            .or_insert_with(|| SiteGroup::new(end))
            .add(start, count, gene_id, transcript_id);
        Ok(())
    }

    pub fn starts(&self) -> &BTreeMap<u64, SiteGroup> {
        &self.starts
    }

    pub fn ends(&self) -> &BTreeMap<u64, SiteGroup> {
        &self.ends
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    /// Number of distinct junctions.
    pub fn edge_count(&self) -> usize {
        self.starts.values().map(SiteGroup::len).sum()
    }

    /// All junctions as `(start, end, count)`, sorted.
    pub fn edges(&self) -> Vec<(u64, u64, u64)> {
        self.starts
            .iter()
            .flat_map(|(&s, g)| g.sites().map(move |site| (s, site.coordinate, site.count)))
            .collect()
    }

    /// Observation count of junction `(start, end)`, 0 if never seen.
    pub fn count(&self, start: u64, end: u64) -> u64 {
        self.starts
            .get(&start)
            .and_then(|g| g.get(end))
            .map(|s| s.count)
            .unwrap_or(0)
    }

    /// Every start and end coordinate seen in the graph, ascending.
    pub fn all_coordinates(&self) -> Vec<u64> {
        let set: BTreeSet<u64> = self.starts.keys().chain(self.ends.keys()).copied().collect();
        set.into_iter().collect()
    }

    /// Remove junctions seen fewer than `min_count` times from both views.
    pub fn filter_low_abundance(&mut self, min_count: u64) -> usize {
        let mut removed = 0usize;
        for (&start, group) in self.starts.iter_mut() {
            for end in group.filter(min_count) {
                if let Some(eg) = self.ends.get_mut(&end) {
                    eg.remove(start);
                }
                removed += 1;
            }
        }
        self.starts.retain(|_, g| !g.is_empty());
        self.ends.retain(|_, g| !g.is_empty());
        removed
    }

    /// True if every junction is present in both views with the same count.
    pub fn is_consistent(&self) -> bool {
        let forward = self.starts.iter().all(|(&s, g)| {
            g.sites().all(|site| {
                self.ends
                    .get(&site.coordinate)
                    .and_then(|eg| eg.get(s))
                    .map(|back| back.count == site.count)
                    .unwrap_or(false)
            })
        });
        let backward = self.ends.iter().all(|(&e, g)| {
            g.sites()
                .all(|site| self.starts.get(&site.coordinate).is_some_and(|sg| sg.contains(e)))
        });
        forward && backward
    }

    /// Enumerate candidate SE, A3, A5 and MXE events.
    ///
    /// Alternative sites closer than `min_gap` are ignored. Output order
    /// follows the numeric order of anchors and members.
    pub fn identify_events(&self, min_gap: u64) -> Vec<SpliceEvent> {
        let mut events = Vec::new();
        let mut skipped: BTreeSet<(Side, u64, u64, u64)> = BTreeSet::new();

        self.skipped_exons(&mut events, &mut skipped);
        let (alt_starts, alt_ends) = self.alternative_sites(min_gap, &skipped, &mut events);
        self.mutually_exclusive(&alt_starts, &alt_ends, &mut events);

        debug!(
            "{}:{} -> {} candidate events from {} junctions",
            self.chromosome,
            self.strand,
            events.len(),
            self.edge_count()
        );
        events
    }

    fn event(&self, kind: EventKind, start: u64, end: u64, sites: Vec<u64>) -> Option<SpliceEvent> {
        SpliceEvent::new(
            kind,
            self.chromosome.clone(),
            start,
            end,
            self.strand,
            sites,
            Detection::Graph,
        )
        .ok()
    }

    fn skipped_exons(
        &self,
        events: &mut Vec<SpliceEvent>,
        skipped: &mut BTreeSet<(Side, u64, u64, u64)>,
    ) {
        for (&a, group) in &self.starts {
            if group.len() < 2 {
                continue;
            }
            let inner_starts = group.coordinates();
            for &target in &inner_starts {
                let Some(end_group) = self.ends.get(&target) else {
                    continue;
                };
                if end_group.len() < 2 {
                    continue;
                }
                for &i in &inner_starts {
                    for j in end_group.coordinates() {
                        if i >= j {
                            continue;
                        }
                        let psi = mean_psi(group.psi(i), end_group.psi(j));
                        let sites = vec![a, i, j, target];
                        if let Some(ev) = self.event(EventKind::SkippedExon, a, target, sites) {
                            events.push(ev.with_psi(psi));
                        }
                        skipped.insert((Side::Start, a, i, target));
                        skipped.insert((Side::End, target, a, j));
                    }
                }
            }
        }
    }

    fn alternative_sites(
        &self,
        min_gap: u64,
        skipped: &BTreeSet<(Side, u64, u64, u64)>,
        events: &mut Vec<SpliceEvent>,
    ) -> (BTreeSet<u64>, BTreeSet<u64>) {
        let mut alt_starts = BTreeSet::new();
        let mut alt_ends = BTreeSet::new();

        let start_kind = EventKind::for_shared_start(self.strand);
        for (&a, group) in &self.starts {
            let coords = group.coordinates();
            for (x, &lo) in coords.iter().enumerate() {
                for &hi in &coords[x + 1..] {
                    if hi - lo <= min_gap || skipped.contains(&(Side::Start, a, lo, hi)) {
                        continue;
                    }
                    // PSI of the site closest to the anchor.
                    if let Some(ev) = self.event(start_kind, a, hi, vec![a, a, lo, hi]) {
                        events.push(ev.with_psi(group.psi(lo)));
                        alt_starts.insert(a);
                    }
                }
            }
        }

        let end_kind = EventKind::for_shared_end(self.strand);
        for (&e, group) in &self.ends {
            let coords = group.coordinates();
            for (x, &lo) in coords.iter().enumerate() {
                for &hi in &coords[x + 1..] {
                    if hi - lo <= min_gap || skipped.contains(&(Side::End, e, lo, hi)) {
                        continue;
                    }
                    if let Some(ev) = self.event(end_kind, lo, e, vec![lo, hi, e, e]) {
                        events.push(ev.with_psi(group.psi(hi)));
                        alt_ends.insert(e);
                    }
                }
            }
        }

        (alt_starts, alt_ends)
    }

    fn mutually_exclusive(
        &self,
        alt_starts: &BTreeSet<u64>,
        alt_ends: &BTreeSet<u64>,
        events: &mut Vec<SpliceEvent>,
    ) {
        if alt_starts.is_empty() || alt_ends.is_empty() {
            return;
        }

        let coords = self.all_coordinates();
        let rank: BTreeMap<u64, usize> = coords.iter().enumerate().map(|(i, &c)| (c, i)).collect();
        let adjacent = |a: u64, b: u64| match (rank.get(&a), rank.get(&b)) {
            (Some(&ra), Some(&rb)) => rb == ra + 1,
            _ => false,
        };

        for &s in alt_starts {
            let start_group = &self.starts[&s];
            let Some((_, farthest)) = start_group.extreme_sites() else {
                continue;
            };
            let partners = start_group.coordinates();

            for &e in alt_ends.range(farthest + 1..) {
                let end_group = &self.ends[&e];
                let back_partners = end_group.coordinates();

                for (x, &p1) in partners.iter().enumerate() {
                    for &p2 in &partners[x + 1..] {
                        for (y, &q1) in back_partners.iter().enumerate() {
                            for &q2 in &back_partners[y + 1..] {
                                let sites = [s, p1, q1, p2, q2, e];
                                if !sites.windows(2).all(|w| w[0] <= w[1]) {
                                    continue;
                                }
                                if !adjacent(q1, p2) {
                                    continue;
                                }
                                let psi = mean_psi(end_group.psi(q1), start_group.psi(p2));
                                if let Some(ev) =
                                    self.event(EventKind::MutuallyExclusive, s, e, sites.to_vec())
                                {
                                    events.push(ev.with_psi(psi));
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    /// PSI this graph assigns to `event`, using the same rules as
    /// [`JunctionGraph::identify_events`]. Used to quantify an event found in
    /// pooled data against one sample.
    pub fn event_psi(&self, event: &SpliceEvent) -> Option<f64> {
        let s = event.splice_sites();
        let start_psi = |anchor: u64, target: u64| self.starts.get(&anchor)?.psi(target);
        let end_psi = |anchor: u64, target: u64| self.ends.get(&anchor)?.psi(target);

        match event.kind {
            EventKind::SkippedExon => mean_psi(start_psi(s[0], s[1]), end_psi(s[3], s[2])),
            EventKind::Alt3 | EventKind::Alt5 if s[0] == s[1] => start_psi(s[0], s[2]),
            EventKind::Alt3 | EventKind::Alt5 => end_psi(s[3], s[1]),
            EventKind::MutuallyExclusive => {
                mean_psi(end_psi(s[5], s[2]), start_psi(s[0], s[3]))
            }
            EventKind::IntronRetention => None,
        }
    }
}

/// Mean of the PSI values that are available.
pub(crate) fn mean_psi(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some((a + b) / 2.0),
        (Some(v), None) | (None, Some(v)) => Some(v),
        (None, None) => None,
    }
}

/// Build one graph per (chromosome, strand) from a stream of junctions.
pub fn build_graphs<'a, I>(junctions: I) -> Result<BTreeMap<GraphKey, JunctionGraph>>
where
    I: IntoIterator<Item = &'a Junction>,
{
    let mut graphs: BTreeMap<GraphKey, JunctionGraph> = BTreeMap::new();
    for j in junctions {
        graphs
            .entry((j.chromosome.clone(), j.strand))
            .or_insert_with(|| JunctionGraph::new(j.chromosome.clone(), j.strand))
            .add_edge(j.start, j.end, j.count, None, None)?;
    }
    Ok(graphs)
}
