//! Couple reads (as transcript-like records) to reference transcripts.
//!
//! Both sides are sorted by position and swept together. For every
//! transcript the read window restarts at the first read that is not
//! entirely upstream of it, so overlapping transcripts each see every read
//! they overlap.

use std::collections::BTreeMap;

use log::debug;

use crate::config::CoupleOptions;
use crate::model::exon::Exon;
use crate::model::transcript::Transcript;
use crate::model::types::GeneId;
use crate::types::OverlapMode;

/// One reference transcript with the reads coupled to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub transcript: Transcript,
    pub reads: Vec<Transcript>,
    /// Transcript exons inside the span covered by `reads`.
    pub exons: Vec<Exon>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Coupling {
    pub templates: BTreeMap<GeneId, Vec<Template>>,
    /// Reads that matched no transcript.
    pub novel: Vec<Transcript>,
}

impl Coupling {
    pub fn coupled_read_count(&self) -> usize {
        self.templates
            .values()
            .flat_map(|ts| ts.iter().map(|t| t.reads.len()))
            .sum()
    }
}

/// Sweep `reads` against `transcripts`. Both are sorted here.
pub fn couple(
    mut reads: Vec<Transcript>,
    mut transcripts: Vec<Transcript>,
    opts: &CoupleOptions,
) -> Coupling {
    reads.sort_by(|a, b| a.interval.cmp(&b.interval));
    transcripts.sort_by(|a, b| {
        a.interval
            .cmp(&b.interval)
            .then_with(|| a.transcript_id.cmp(&b.transcript_id))
    });

    let mut matched = vec![false; reads.len()];
    let mut first = 0usize;
    let mut coupling = Coupling::default();

    for tx in transcripts {
        while first < reads.len() && reads[first].interval.is_upstream(&tx.interval) {
            first += 1;
        }

        let mut hits: Vec<usize> = Vec::new();
        for (i, read) in reads.iter().enumerate().skip(first) {
            if read.interval.is_downstream(&tx.interval) {
                break;
            }
            if accepts(&tx, read, opts) {
                hits.push(i);
            }
        }
        if hits.is_empty() {
            continue;
        }

        let span_start = hits.iter().map(|&i| reads[i].start()).min().unwrap_or(tx.start());
        let span_end = hits.iter().map(|&i| reads[i].end()).max().unwrap_or(tx.end());
        for &i in &hits {
            matched[i] = true;
        }

        let template = Template {
            exons: tx.exons_within(span_start, span_end),
            reads: hits.iter().map(|&i| reads[i].clone()).collect(),
            transcript: tx,
        };
        coupling
            .templates
            .entry(template.transcript.gene_id.clone())
            .or_default()
            .push(template);
    }

    coupling.novel = reads
        .into_iter()
        .zip(matched)
        .filter_map(|(read, hit)| (!hit).then_some(read))
        .collect();

    debug!(
        "coupled {} reads to {} genes, {} novel",
        coupling.coupled_read_count(),
        coupling.templates.len(),
        coupling.novel.len()
    );
    coupling
}

/// Acceptance test for one read/transcript pair.
///
/// Needs compatible strands, enough interval overlap, and at least two read
/// exons matching distinct transcript exons.
pub fn accepts(tx: &Transcript, read: &Transcript, opts: &CoupleOptions) -> bool {
    if !tx.strand().is_compatible_with(read.strand()) {
        return false;
    }
    if tx.interval.overlap_percent(&read.interval, OverlapMode::Narrower) < opts.overlap_threshold {
        return false;
    }
    shared_exons(tx, read, opts.distance_tolerance) >= 2
}

/// Number of read exons paired one-to-one with overlapping transcript exons
/// that share a boundary within `tolerance`.
fn shared_exons(tx: &Transcript, read: &Transcript, tolerance: u64) -> usize {
    let tx_exons = tx.exons();
    let mut used = vec![false; tx_exons.len()];
    let mut n = 0usize;

    for r in read.exons() {
        let hit = (0..tx_exons.len()).find(|&k| {
            let t = &tx_exons[k];
            !used[k]
                && r.interval.overlaps(&t.interval)
                && (r.start().abs_diff(t.start()) <= tolerance
                    || r.end().abs_diff(t.end()) <= tolerance)
        });
        if let Some(k) = hit {
            used[k] = true;
            n += 1;
        }
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Strand;

    fn transcript(id: &str, gene: &str, strand: Strand, exons: &[(i64, i64)]) -> Transcript {
        let mut t = Transcript::new("1", exons[0].0, exons[0].1, strand, gene, Some(id)).unwrap();
        for &(s, e) in exons {
            t.add_exon(Exon::new("1", s, e, strand, format!("{id}:{s}")).unwrap());
        }
        t
    }

    fn read(id: &str, strand: Strand, exons: &[(i64, i64)]) -> Transcript {
        transcript(id, id, strand, exons)
    }

    const TX: &[(i64, i64)] = &[(100, 200), (301, 400), (501, 600)];

    #[test]
    fn spliced_read_is_coupled() {
        let txs = vec![transcript("T1", "G1", Strand::Plus, TX)];
        let reads = vec![read("r1", Strand::Plus, &[(150, 200), (301, 400), (501, 550)])];

        let c = couple(reads, txs, &CoupleOptions::default());
        assert!(c.novel.is_empty());
        let t = &c.templates["G1"][0];
        assert_eq!(t.reads.len(), 1);
        assert_eq!(t.exons.len(), 3);
    }

    #[test]
    fn single_exon_overlap_is_rejected() {
        let txs = vec![transcript("T1", "G1", Strand::Plus, TX)];
        let reads = vec![read("r1", Strand::Plus, &[(120, 200)])];

        let c = couple(reads, txs, &CoupleOptions::default());
        assert!(c.templates.is_empty());
        assert_eq!(c.novel.len(), 1);
    }

    #[test]
    fn strand_mismatch_is_rejected() {
        let txs = vec![transcript("T1", "G1", Strand::Plus, TX)];
        let reads = vec![
            read("r1", Strand::Minus, &[(150, 200), (301, 400)]),
            read("r2", Strand::Unknown, &[(150, 200), (301, 400)]),
        ];
        let c = couple(reads, txs, &CoupleOptions::default());
        assert_eq!(c.novel.len(), 1);
        assert_eq!(c.novel[0].transcript_id, "r1");
        assert_eq!(c.templates["G1"][0].reads[0].transcript_id, "r2");
    }

    #[test]
    fn reads_outside_transcripts_are_novel() {
        let txs = vec![
            transcript("T1", "G1", Strand::Plus, TX),
            transcript("T2", "G2", Strand::Plus, &[(2000, 2100), (2201, 2300)]),
        ];
        let reads = vec![
            read("before", Strand::Plus, &[(10, 20), (31, 50)]),
            read("between", Strand::Plus, &[(1000, 1050), (1101, 1200)]),
            read("after", Strand::Plus, &[(5000, 5050), (5101, 5200)]),
            read("hit", Strand::Plus, &[(2050, 2100), (2201, 2250)]),
        ];

        let c = couple(reads, txs, &CoupleOptions::default());
        let mut novel: Vec<_> = c.novel.iter().map(|r| r.transcript_id.as_str()).collect();
        novel.sort_unstable();
        assert_eq!(novel, vec!["after", "before", "between"]);
        assert_eq!(c.templates.len(), 1);
        assert_eq!(c.templates["G2"][0].reads[0].transcript_id, "hit");
    }

    #[test]
    fn overlapping_transcripts_both_receive_reads() {
        let txs = vec![
            transcript("T1", "G1", Strand::Plus, TX),
            transcript("T2", "G1", Strand::Plus, &[(100, 200), (301, 400), (451, 600)]),
            transcript("T3", "G2", Strand::Plus, &[(150, 200), (301, 380)]),
        ];
        let reads = vec![read("r1", Strand::Plus, &[(120, 200), (301, 400)])];

        let c = couple(reads, txs, &CoupleOptions::default());
        assert!(c.novel.is_empty());
        assert_eq!(c.templates["G1"].len(), 2);
        assert_eq!(c.templates["G2"].len(), 1);
        // exons restricted to the span of the read
        assert_eq!(c.templates["G1"][0].exons.len(), 2);
        assert_eq!(c.coupled_read_count(), 3);
    }

    #[test]
    fn low_overlap_is_rejected() {
        let txs = vec![transcript("T1", "G1", Strand::Plus, &[(100, 200), (301, 400)])];
        let reads = vec![read("r1", Strand::Plus, &[(150, 200), (301, 400), (501, 2000)])];
        let opts = CoupleOptions {
            overlap_threshold: 95.0,
            ..CoupleOptions::default()
        };
        assert!(couple(reads.clone(), txs.clone(), &opts).templates.is_empty());
        assert_eq!(couple(reads, txs, &CoupleOptions::default()).templates.len(), 1);
    }
}
