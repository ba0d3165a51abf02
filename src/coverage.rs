//! Per-base read depth, the only alignment-level query the core needs.
//!
//! A [`CoverageSource`] is shared by all workers; each task opens its own
//! [`CoverageReader`] and drops it when the task ends.

use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;

use log::{debug, warn};

use crate::error::{Result, SpliceError};
use crate::input::open_bufread;
use crate::model::transcript::Transcript;
use crate::types::GenomicInterval;

const BEDGRAPH: &str = "chrom<TAB>start<TAB>end<TAB>value";

pub trait CoverageReader {
    /// Depth at every base of `region`, `region.len()` values.
    fn depth(&mut self, region: &GenomicInterval) -> Result<Vec<u32>>;
}

pub trait CoverageSource: Sync {
    fn open(&self) -> Result<Box<dyn CoverageReader + '_>>;
}

/// In-memory pileup of closed blocks `(start, end, depth)` per chromosome.
#[derive(Debug, Clone, Default)]
pub struct PileupCoverage {
    tracks: BTreeMap<String, Track>,
}

/// Blocks of one chromosome sorted by `(start, end)`, with the running
/// maximum of their ends so a query can skip everything upstream of it.
#[derive(Debug, Clone, Default)]
struct Track {
    blocks: Vec<(u64, u64, u32)>,
    max_end: Vec<u64>,
}

impl Track {
    fn insert(&mut self, block: (u64, u64, u32)) {
        let pos = self.blocks.partition_point(|b| (b.0, b.1) <= (block.0, block.1));
        self.blocks.insert(pos, block);
        // appends (sorted input) only touch the last slot
        self.max_end.truncate(pos);
        let mut running = pos.checked_sub(1).map_or(0, |i| self.max_end[i]);
        for b in &self.blocks[pos..] {
            running = running.max(b.1);
            self.max_end.push(running);
        }
    }

    /// Blocks that may overlap `[start, end]`.
    fn candidates(&self, start: u64, end: u64) -> &[(u64, u64, u32)] {
        let lo = self.max_end.partition_point(|&m| m < start);
        let hi = self.blocks.partition_point(|b| b.0 <= end).max(lo);
        &self.blocks[lo..hi]
    }
}

impl PileupCoverage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `depth` over `[start, end]`. Overlapping blocks add up.
    pub fn add_block(&mut self, chromosome: &str, start: u64, end: u64, depth: u32) {
        self.tracks
            .entry(chromosome.to_string())
            .or_default()
            .insert((start, end, depth));
    }

    /// One unit of depth for every exon of every read.
    pub fn from_transcripts<'a, I>(reads: I) -> Self
    where
        I: IntoIterator<Item = &'a Transcript>,
    {
        let mut blocks: Vec<(&str, u64, u64)> = reads
            .into_iter()
            .flat_map(|read| {
                read.exons()
                    .iter()
                    .map(move |exon| (read.chromosome(), exon.start(), exon.end()))
            })
            .collect();
        blocks.sort_unstable();

        let mut cov = Self::new();
        for (chrom, start, end) in blocks {
            cov.add_block(chrom, start, end, 1);
        }
        cov
    }

    /// Load a bedGraph (0-based, half-open) file.
    pub fn from_bedgraph_path(path: &Path) -> Result<Self> {
        let reader = open_bufread(path)?;
        Self::from_bedgraph(reader).map_err(|e| match e {
            SpliceError::Io { source, .. } => SpliceError::Io {
                path: path.display().to_string(),
                source,
            },
            other => other,
        })
    }

    /// Parse bedGraph lines; `track`/`browser` headers and comments are skipped.
    pub fn from_bedgraph<R: BufRead>(reader: R) -> Result<Self> {
        let mut cov = Self::new();
        let mut skipped = 0usize;
        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| SpliceError::Io {
                path: "<reader>".to_string(),
                source: e,
            })?;
            let s = line.trim_end();
            if s.is_empty()
                || s.starts_with('#')
                || s.starts_with("track")
                || s.starts_with("browser")
            {
                continue;
            }
            match parse_bedgraph_line(s, idx + 1) {
                Ok((chrom, start, end, depth)) => {
                    if depth > 0 {
                        cov.add_block(chrom, start, end, depth)
                    }
                }
                Err(e) => {
                    warn!("skipping bedGraph line: {e}");
                    skipped += 1;
                }
            }
        }
        debug!("bedGraph loaded, {} lines skipped", skipped);
        Ok(cov)
    }
}

fn parse_bedgraph_line(line: &str, line_no: usize) -> Result<(&str, u64, u64, u32)> {
    let unparsable = || SpliceError::UnparsablePattern {
        line_no,
        line: line.to_string(),
        expected: BEDGRAPH,
    };
    let cols: Vec<&str> = line.split('\t').collect();
    if cols.len() < 4 || cols[0].is_empty() {
        return Err(unparsable());
    }
    let start: i64 = cols[1].parse().map_err(|_| unparsable())?;
    let end: i64 = cols[2].parse().map_err(|_| unparsable())?;
    let value: f64 = cols[3].parse().map_err(|_| unparsable())?;
    if start < 0 || end <= start {
        return Err(SpliceError::InvalidRange {
            chromosome: cols[0].to_string(),
            start: start + 1,
            end,
        });
    }
    Ok((cols[0], start as u64 + 1, end as u64, value.max(0.0).round() as u32))
}

struct PileupReader<'a> {
    coverage: &'a PileupCoverage,
}

impl CoverageReader for PileupReader<'_> {
    fn depth(&mut self, region: &GenomicInterval) -> Result<Vec<u32>> {
        let mut out = vec![0u32; region.len() as usize];
        let Some(track) = self.coverage.tracks.get(&region.chromosome) else {
            return Ok(out);
        };
        for &(start, end, depth) in track.candidates(region.start, region.end) {
            if end < region.start {
                continue;
            }
            let from = start.max(region.start);
            let to = end.min(region.end);
            for pos in from..=to {
                out[(pos - region.start) as usize] += depth;
            }
        }
        Ok(out)
    }
}

impl CoverageSource for PileupCoverage {
    fn open(&self) -> Result<Box<dyn CoverageReader + '_>> {
        Ok(Box::new(PileupReader { coverage: self }))
    }
}

/// Arithmetic mean of a depth vector, `None` when empty.
pub fn mean_depth(depths: &[u32]) -> Option<f64> {
    if depths.is_empty() {
        return None;
    }
    let sum: u64 = depths.iter().map(|&d| d as u64).sum();
    Some(sum as f64 / depths.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Strand;
    use std::io::Cursor;

    fn region(start: i64, end: i64) -> GenomicInterval {
        GenomicInterval::new("1", start, end, Strand::Plus).unwrap()
    }

    #[test]
    fn overlapping_blocks_add_up() {
        let mut cov = PileupCoverage::new();
        cov.add_block("1", 10, 20, 1);
        cov.add_block("1", 15, 30, 2);

        let mut r = cov.open().unwrap();
        let d = r.depth(&region(13, 17)).unwrap();
        assert_eq!(d, vec![1, 1, 3, 3, 3]);
        assert_eq!(r.depth(&region(31, 32)).unwrap(), vec![0, 0]);
    }

    #[test]
    fn queries_skip_upstream_blocks() {
        let mut cov = PileupCoverage::new();
        for k in 0..10_000u64 {
            cov.add_block("1", k * 10 + 1, k * 10 + 5, 1);
        }
        // one long block out of order keeps its reach
        cov.add_block("1", 3, 50_000, 1);

        let track = &cov.tracks["1"];
        assert_eq!(track.candidates(99_991, 99_995).to_vec(), vec![(99_991, 99_995, 1)]);
        assert!(track.candidates(40_001, 40_005).contains(&(3, 50_000, 1)));

        let mut r = cov.open().unwrap();
        assert_eq!(r.depth(&region(40_004, 40_007)).unwrap(), vec![2, 2, 1, 1]);
        assert_eq!(r.depth(&region(99_994, 99_996)).unwrap(), vec![1, 1, 0]);
    }

    #[test]
    fn unknown_chromosome_is_zero_depth() {
        let cov = PileupCoverage::new();
        let mut r = cov.open().unwrap();
        assert_eq!(r.depth(&region(1, 3)).unwrap(), vec![0, 0, 0]);
    }

    #[test]
    fn reads_pile_up_per_exon() {
        let a = Transcript::from_introns("1", 100, 400, Strand::Plus, &[(151, 299)], Some("r1"))
            .unwrap();
        let b = Transcript::from_introns("1", 120, 400, Strand::Plus, &[], Some("r2")).unwrap();
        let cov = PileupCoverage::from_transcripts([&a, &b]);
        let mut r = cov.open().unwrap();
        assert_eq!(r.depth(&region(149, 152)).unwrap(), vec![2, 2, 1, 1]);
        assert_eq!(r.depth(&region(300, 300)).unwrap(), vec![2]);
    }

    #[test]
    fn bedgraph_is_converted_to_closed_coordinates() {
        let data = "\
track type=bedGraph
1\t99\t110\t4
1\t110\t120\t2.6
1\tx\t120\t2
";
        let cov = PileupCoverage::from_bedgraph(Cursor::new(data.as_bytes())).unwrap();
        let mut r = cov.open().unwrap();
        assert_eq!(r.depth(&region(99, 101)).unwrap(), vec![0, 4, 4]);
        assert_eq!(r.depth(&region(110, 111)).unwrap(), vec![4, 3]);
    }

    #[test]
    fn mean_of_empty_is_none() {
        assert_eq!(mean_depth(&[]), None);
        assert_eq!(mean_depth(&[1, 2, 3]), Some(2.0));
    }
}
