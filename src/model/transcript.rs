use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::exon::Exon;
use crate::model::types::{GeneId, TranscriptId};
use crate::types::{exons_from_introns, introns_from_exons, GenomicInterval, Strand};

/// A gene-like record: a transcript of the reference annotation, or a read
/// described by its exon blocks.
///
/// The transcript owns its exons; exons refer back only through id strings
/// in their `source`. Exons are kept sorted by (start, end) and their
/// ordinals are renumbered on every insertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    pub interval: GenomicInterval,
    pub gene_id: GeneId,
    pub gene_name: Option<String>,
    pub transcript_id: TranscriptId,
    pub parent_gene_id: Option<GeneId>,
    exons: Vec<Exon>,
}

impl Transcript {
    /// Create a transcript without exons.
    ///
    /// When `transcript_id` is `None` (or blank) the id is derived from the
    /// coordinates as `chrom:start-end<strand>`.
    pub fn new(
        chromosome: impl Into<String>,
        start: i64,
        end: i64,
        strand: Strand,
        gene_id: impl Into<String>,
        transcript_id: Option<&str>,
    ) -> Result<Self> {
        let interval = GenomicInterval::new(chromosome, start, end, strand)?;
        let transcript_id = match transcript_id.map(str::trim).filter(|t| !t.is_empty()) {
            Some(t) => t.to_string(),
            None => interval.to_string(),
        };
        Ok(Self {
            interval,
            gene_id: gene_id.into(),
            gene_name: None,
            transcript_id,
            parent_gene_id: None,
            exons: Vec::new(),
        })
    }

    /// Rebuild a read from its span and intron list (e.g. from CIGAR `N` operations).
    ///
    /// Exon ids are `<transcript_id>:<ordinal>`.
    pub fn from_introns(
        chromosome: impl Into<String>,
        start: i64,
        end: i64,
        strand: Strand,
        introns: &[(u64, u64)],
        read_id: Option<&str>,
    ) -> Result<Self> {
        let mut tx = Transcript::new(chromosome, start, end, strand, "", read_id)?;
        let mut introns = introns.to_vec();
        introns.sort_unstable();
        for (i, (s, e)) in exons_from_introns(tx.interval.start, tx.interval.end, &introns)
            .into_iter()
            .enumerate()
        {
            let exon = Exon::new(
                tx.interval.chromosome.clone(),
                s as i64,
                e as i64,
                strand,
                format!("{}:{}", tx.transcript_id, i + 1),
            )?;
            tx.add_exon(exon);
        }
        Ok(tx)
    }

    pub fn with_gene_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !name.trim().is_empty() {
            self.gene_name = Some(name);
        }
        self
    }

    /// Add an exon, tagging it with this transcript's gene/transcript ids.
    ///
    /// The transcript span grows to cover the exon.
    pub fn add_exon(&mut self, mut exon: Exon) {
        exon.source
            .add(Some(self.gene_id.as_str()), Some(self.transcript_id.as_str()));
        self.interval.start = self.interval.start.min(exon.start());
        self.interval.end = self.interval.end.max(exon.end());

        let pos = self
            .exons
            .partition_point(|e| e.sort_key() <= exon.sort_key());
        self.exons.insert(pos, exon);
        self.renumber();
    }

    fn renumber(&mut self) {
        let n = self.exons.len();
        for (i, e) in self.exons.iter_mut().enumerate() {
            e.ordinal = i + 1;
            e.reverse_ordinal = n - i;
        }
    }

    /// Exons sorted by (start, end).
    pub fn exons(&self) -> &[Exon] {
        &self.exons
    }

    pub fn exon_count(&self) -> usize {
        self.exons.len()
    }

    /// Exon blocks as `(start, end)` pairs.
    pub fn blocks(&self) -> Vec<(u64, u64)> {
        self.exons.iter().map(|e| e.sort_key()).collect()
    }

    /// Introns implied by consecutive exons.
    pub fn introns(&self) -> Vec<(u64, u64)> {
        introns_from_exons(&self.blocks(), 0)
    }

    /// Shrinks the span to the exon boundaries and returns (start, end).
    pub fn finalize(&mut self) -> (u64, u64) {
        if let (Some(first), Some(last)) = (self.exons.first(), self.exons.last()) {
            self.interval.start = first.start();
            self.interval.end = self.exons.iter().map(Exon::end).max().unwrap_or(last.end());
        }
        (self.interval.start, self.interval.end)
    }

    /// Exons overlapping `[start, end]`, in order.
    pub fn exons_within(&self, start: u64, end: u64) -> Vec<Exon> {
        self.exons
            .iter()
            .filter(|e| e.start() <= end && start <= e.end())
            .cloned()
            .collect()
    }

    #[inline]
    pub fn chromosome(&self) -> &str {
        &self.interval.chromosome
    }

    #[inline]
    pub fn strand(&self) -> Strand {
        self.interval.strand
    }

    #[inline]
    pub fn start(&self) -> u64 {
        self.interval.start
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.interval.end
    }
}
