//! Alternative-splicing events and their identity.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpliceError};
use crate::types::Strand;

/// The five kinds of alternative splicing reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    /// Skipped exon (cassette exon).
    SkippedExon,
    /// Alternative 3' (acceptor) splice site, in transcription orientation.
    Alt3,
    /// Alternative 5' (donor) splice site, in transcription orientation.
    Alt5,
    MutuallyExclusive,
    IntronRetention,
}

impl EventKind {
    pub fn code(self) -> &'static str {
        match self {
            EventKind::SkippedExon => "SE",
            EventKind::Alt3 => "A3",
            EventKind::Alt5 => "A5",
            EventKind::MutuallyExclusive => "MXE",
            EventKind::IntronRetention => "IR",
        }
    }

    /// Number of splice sites an event of this kind carries.
    pub fn site_count(self) -> usize {
        match self {
            EventKind::MutuallyExclusive => 6,
            _ => 4,
        }
    }

    /// Kind reported for two alternative partners of a shared junction start.
    ///
    /// On the minus strand the genomic start of an intron is its 3' end, so
    /// the alternative sites downstream of it are donors.
    pub fn for_shared_start(strand: Strand) -> EventKind {
        match strand {
            Strand::Minus => EventKind::Alt5,
            _ => EventKind::Alt3,
        }
    }

    /// Complement of [`EventKind::for_shared_start`].
    pub fn for_shared_end(strand: Strand) -> EventKind {
        match strand {
            Strand::Minus => EventKind::Alt3,
            _ => EventKind::Alt5,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "SE" => Ok(EventKind::SkippedExon),
            "A3" => Ok(EventKind::Alt3),
            "A5" => Ok(EventKind::Alt5),
            "MXE" => Ok(EventKind::MutuallyExclusive),
            "IR" => Ok(EventKind::IntronRetention),
            _ => Err(format!("unknown event kind: {s}")),
        }
    }
}

/// Which pass produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Detection {
    /// Enumerated from the junction graph.
    Graph,
    /// Derived by comparing junctions directly with annotated introns.
    Reference,
    /// Annotated intron covered by an observed exon.
    Retention,
}

impl Detection {
    pub fn label(self) -> &'static str {
        match self {
            Detection::Graph => "graph",
            Detection::Reference => "reference",
            Detection::Retention => "retention",
        }
    }
}

/// A candidate or confirmed splicing event.
///
/// Equality, hashing and ordering only look at
/// `(kind, chromosome, start, end, splice_sites)`: the same event found by
/// two passes or two samples is one event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpliceEvent {
    pub kind: EventKind,
    pub chromosome: String,
    pub start: u64,
    pub end: u64,
    pub strand: Strand,
    splice_sites: Vec<u64>,
    pub psi: Option<f64>,
    pub is_novel: bool,
    pub subtype: String,
    pub detection: BTreeSet<Detection>,
}

impl SpliceEvent {
    /// Build an event; `splice_sites` are sorted here.
    pub fn new(
        kind: EventKind,
        chromosome: impl Into<String>,
        start: u64,
        end: u64,
        strand: Strand,
        mut splice_sites: Vec<u64>,
        detection: Detection,
    ) -> Result<Self> {
        let chromosome = chromosome.into();
        if start == 0 || end < start {
            return Err(SpliceError::InvalidRange {
                chromosome,
                start: start as i64,
                end: end as i64,
            });
        }
        debug_assert_eq!(splice_sites.len(), kind.site_count());
        splice_sites.sort_unstable();

        let mut detection_set = BTreeSet::new();
        detection_set.insert(detection);

        Ok(Self {
            kind,
            chromosome,
            start,
            end,
            strand,
            splice_sites,
            psi: None,
            is_novel: true,
            subtype: detection.label().to_string(),
            detection: detection_set,
        })
    }

    pub fn with_psi(mut self, psi: Option<f64>) -> Self {
        self.psi = psi;
        self
    }

    pub fn splice_sites(&self) -> &[u64] {
        &self.splice_sites
    }

    /// `chrom:start-end<strand>`, the same shape as the junction table.
    pub fn range_string(&self) -> String {
        format!("{}:{}-{}{}", self.chromosome, self.start, self.end, self.strand)
    }

    /// Fold another observation of the same event into this one.
    ///
    /// The event stays novel only if neither side was confirmed; the first
    /// known PSI wins; detection tags are unioned.
    pub fn absorb(&mut self, other: &SpliceEvent) {
        debug_assert!(self == other);
        self.is_novel &= other.is_novel;
        if self.psi.is_none() {
            self.psi = other.psi;
        }
        self.detection.extend(other.detection.iter().copied());
        self.subtype = self
            .detection
            .iter()
            .map(|d| d.label())
            .collect::<Vec<_>>()
            .join("+");
    }

    fn identity(&self) -> (&str, u64, u64, EventKind, &[u64]) {
        (
            self.chromosome.as_str(),
            self.start,
            self.end,
            self.kind,
            self.splice_sites.as_slice(),
        )
    }
}

impl PartialEq for SpliceEvent {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for SpliceEvent {}

impl Hash for SpliceEvent {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl Ord for SpliceEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.identity().cmp(&other.identity())
    }
}

impl PartialOrd for SpliceEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::collections::HashSet;

    fn hash_of(e: &SpliceEvent) -> u64 {
        let mut h = DefaultHasher::new();
        e.hash(&mut h);
        h.finish()
    }

    #[test]
    fn identity_ignores_site_order_psi_and_origin() {
        let a = SpliceEvent::new(
            EventKind::SkippedExon,
            "1",
            100,
            500,
            Strand::Plus,
            vec![500, 100, 400, 300],
            Detection::Graph,
        )
        .unwrap()
        .with_psi(Some(0.5));
        let b = SpliceEvent::new(
            EventKind::SkippedExon,
            "1",
            100,
            500,
            Strand::Plus,
            vec![100, 300, 400, 500],
            Detection::Reference,
        )
        .unwrap();

        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_eq!(a.splice_sites(), &[100, 300, 400, 500]);

        let set: HashSet<SpliceEvent> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn different_kind_is_a_different_event() {
        let alt = |kind| {
            let sites = vec![100, 100, 200, 300];
            SpliceEvent::new(kind, "1", 100, 300, Strand::Plus, sites, Detection::Graph).unwrap()
        };
        assert_ne!(alt(EventKind::Alt3), alt(EventKind::Alt5));
    }

    #[test]
    fn absorb_merges_provenance() {
        let sites = vec![100, 100, 200, 300];
        let mut a =
            SpliceEvent::new(EventKind::Alt3, "1", 100, 300, Strand::Plus, sites, Detection::Graph)
                .unwrap()
                .with_psi(Some(0.25));
        let mut b = a.clone();
        b.psi = Some(0.9);
        b.is_novel = false;
        b.detection = [Detection::Reference].into_iter().collect();

        a.absorb(&b);
        assert!(!a.is_novel);
        assert_eq!(a.psi, Some(0.25));
        assert_eq!(a.subtype, "graph+reference");
    }

    #[test]
    fn strand_swaps_alternative_kind() {
        assert_eq!(EventKind::for_shared_start(Strand::Plus), EventKind::Alt3);
        assert_eq!(EventKind::for_shared_start(Strand::Unknown), EventKind::Alt3);
        assert_eq!(EventKind::for_shared_start(Strand::Minus), EventKind::Alt5);
        assert_eq!(EventKind::for_shared_end(Strand::Plus), EventKind::Alt5);
        assert_eq!(EventKind::for_shared_end(Strand::Minus), EventKind::Alt3);
        assert_eq!("MXE".parse::<EventKind>().unwrap(), EventKind::MutuallyExclusive);
    }

    #[test]
    fn zero_start_is_invalid() {
        let sites = vec![0, 0, 1, 3];
        let ev =
            SpliceEvent::new(EventKind::Alt3, "1", 0, 3, Strand::Plus, sites, Detection::Graph);
        assert!(ev.is_err());
    }
}
