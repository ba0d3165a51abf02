use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::types::Source;
use crate::types::{GenomicInterval, Strand};

/// An exon: a genomic interval plus identifiers and provenance.
///
/// Ordinals are 1-based and assigned by the owning transcript whenever it
/// hands out its exons in sorted order; 0 means "not assigned yet".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Exon {
    pub interval: GenomicInterval,
    pub exon_id: String,
    pub ordinal: usize,
    pub reverse_ordinal: usize,
    pub source: Source,
    /// Ids of other exons with identical coordinates folded into this one.
    #[serde(default)]
    pub aliases: BTreeSet<String>,
}

impl Exon {
    pub fn new(
        chromosome: impl Into<String>,
        start: i64,
        end: i64,
        strand: Strand,
        exon_id: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            interval: GenomicInterval::new(chromosome, start, end, strand)?,
            exon_id: exon_id.into(),
            ordinal: 0,
            reverse_ordinal: 0,
            source: Source::default(),
            aliases: BTreeSet::new(),
        })
    }

    pub fn with_source(mut self, gene_id: &str, transcript_id: &str) -> Self {
        self.source.add(Some(gene_id), Some(transcript_id));
        self
    }

    #[inline]
    pub fn start(&self) -> u64 {
        self.interval.start
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.interval.end
    }

    #[inline]
    pub fn chromosome(&self) -> &str {
        &self.interval.chromosome
    }

    #[inline]
    pub fn strand(&self) -> Strand {
        self.interval.strand
    }

    /// `exon_id` followed by every alias.
    pub fn ids(&self) -> impl Iterator<Item = &str> + '_ {
        std::iter::once(self.exon_id.as_str()).chain(self.aliases.iter().map(String::as_str))
    }

    /// Sort key used by every two-pointer pass in the crate.
    #[inline]
    pub fn sort_key(&self) -> (u64, u64) {
        (self.interval.start, self.interval.end)
    }

    /// Ordinal counted from the 5' end of the transcript.
    pub fn transcript_ordinal(&self) -> usize {
        match self.interval.strand {
            Strand::Minus => self.reverse_ordinal,
            _ => self.ordinal,
        }
    }

    /// Synthetic exon spanning `self` and `other`, reporting both ids.
    ///
    /// Used to report the pair of exons behind a mutually exclusive event.
    pub fn merged_with(&self, other: &Exon) -> Exon {
        let mut source = self.source.clone();
        source.merge(&other.source);
        Exon {
            interval: GenomicInterval {
                chromosome: self.interval.chromosome.clone(),
                start: self.start().min(other.start()),
                end: self.end().max(other.end()),
                strand: self.interval.strand,
            },
            exon_id: format!("{}+{}", self.exon_id, other.exon_id),
            ordinal: 0,
            reverse_ordinal: 0,
            source,
            aliases: BTreeSet::new(),
        }
    }
}

/// Sort exons by (start, end) and dedup those with identical coordinates,
/// merging their provenance. Ids of the dropped exons become aliases.
pub fn sort_and_merge_exons(mut exons: Vec<Exon>) -> Vec<Exon> {
    exons.sort_by(|a, b| {
        a.sort_key()
            .cmp(&b.sort_key())
            .then_with(|| a.exon_id.cmp(&b.exon_id))
    });

    let mut out: Vec<Exon> = Vec::with_capacity(exons.len());
    for exon in exons {
        match out.last_mut() {
            Some(last) if last.sort_key() == exon.sort_key() => {
                last.source.merge(&exon.source);
                if exon.exon_id != last.exon_id {
                    last.aliases.insert(exon.exon_id);
                }
                last.aliases.extend(exon.aliases);
            }
            _ => out.push(exon),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merged_exon_joins_ids_and_sources() {
        let a = Exon::new("1", 100, 150, Strand::Plus, "E1")
            .unwrap()
            .with_source("G1", "T1");
        let b = Exon::new("1", 200, 250, Strand::Plus, "E2")
            .unwrap()
            .with_source("G1", "T2");

        let m = a.merged_with(&b);
        assert_eq!(m.exon_id, "E1+E2");
        assert_eq!((m.start(), m.end()), (100, 250));
        assert_eq!(m.source.transcript_ids.len(), 2);
    }

    #[test]
    fn sort_and_merge_dedups_identical_coordinates() {
        let exons = vec![
            Exon::new("1", 200, 250, Strand::Plus, "E2").unwrap().with_source("G1", "T1"),
            Exon::new("1", 100, 150, Strand::Plus, "E1").unwrap().with_source("G1", "T1"),
            Exon::new("1", 100, 150, Strand::Plus, "E1b").unwrap().with_source("G1", "T2"),
        ];
        let merged = sort_and_merge_exons(exons);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].exon_id, "E1");
        assert_eq!(merged[0].ids().collect::<Vec<_>>(), vec!["E1", "E1b"]);
        assert_eq!(merged[0].source.transcript_ids.len(), 2);
        assert_eq!(merged[1].start(), 200);
    }

    #[test]
    fn invalid_exon_fails() {
        assert!(Exon::new("1", 10, 5, Strand::Plus, "bad").is_err());
    }
}
