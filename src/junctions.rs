//! Junction ("SJ") tables.
//!
//! Accepted line shapes:
//! - `chrom:start-end[strand]\tcount` (strand optional, count defaults to 1)
//! - `chrom\tstart\tend\tstrand\tcount`
//!
//! Blank lines and `#` comments are skipped. Lines that do not parse are
//! skipped with a warning; only I/O failures abort reading.

use std::io::BufRead;
use std::path::Path;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpliceError};
use crate::input::open_bufread;
use crate::types::{GenomicInterval, Strand};

const EXPECTED: &str = "chrom:start-end[strand]<TAB>count";

/// One observed intron with its read support.
/// `start`/`end` are the first and last intronic bases (1-based, closed).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Junction {
    pub chromosome: String,
    pub start: u64,
    pub end: u64,
    pub strand: Strand,
    pub count: u64,
}

impl Junction {
    pub fn new(
        chromosome: impl Into<String>,
        start: i64,
        end: i64,
        strand: Strand,
        count: u64,
    ) -> Result<Self> {
        let iv = GenomicInterval::new(chromosome, start, end, strand)?;
        Ok(Self {
            chromosome: iv.chromosome,
            start: iv.start,
            end: iv.end,
            strand,
            count,
        })
    }

    pub fn interval(&self) -> GenomicInterval {
        GenomicInterval {
            chromosome: self.chromosome.clone(),
            start: self.start,
            end: self.end,
            strand: self.strand,
        }
    }
}

/// Parse one non-comment line.
pub fn parse_junction_line(line: &str, line_no: usize) -> Result<Junction> {
    let unparsable = || SpliceError::UnparsablePattern {
        line_no,
        line: line.to_string(),
        expected: EXPECTED,
    };

    let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
    match fields.len() {
        1 | 2 => {
            let count = match fields.get(1) {
                Some(c) => c.parse::<u64>().map_err(|_| unparsable())?,
                None => 1,
            };
            let (chrom, start, end, strand) = parse_location(fields[0]).ok_or_else(unparsable)?;
            Junction::new(chrom, start, end, strand, count)
        }
        5 => {
            let start = fields[1].parse::<i64>().map_err(|_| unparsable())?;
            let end = fields[2].parse::<i64>().map_err(|_| unparsable())?;
            let strand = fields[3].parse::<Strand>().map_err(|_| unparsable())?;
            let count = fields[4].parse::<u64>().map_err(|_| unparsable())?;
            if fields[0].is_empty() {
                return Err(unparsable());
            }
            Junction::new(fields[0], start, end, strand, count)
        }
        _ => Err(unparsable()),
    }
}

/// `chrom:start-end[strand]` -> parts. Chromosome names may contain ':'.
fn parse_location(s: &str) -> Option<(&str, i64, i64, Strand)> {
    let (chrom, range) = s.rsplit_once(':')?;
    if chrom.is_empty() {
        return None;
    }
    let (range, strand) = match range.chars().last().and_then(Strand::from_symbol) {
        // a trailing '-' is a strand only if the range still has its own '-'
        Some(strand) if range[..range.len() - 1].contains('-') => {
            (&range[..range.len() - 1], strand)
        }
        _ => (range, Strand::Unknown),
    };
    let (start, end) = range.split_once('-')?;
    Some((chrom, start.parse().ok()?, end.parse().ok()?, strand))
}

/// Read every junction from `reader`, skipping (and logging) malformed lines.
pub fn read_junctions<R: BufRead>(reader: R) -> Result<Vec<Junction>> {
    let mut out = Vec::new();
    let mut skipped = 0usize;

    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| SpliceError::Io {
            path: "<reader>".to_string(),
            source: e,
        })?;
        let s = line.trim_end();
        if s.is_empty() || s.starts_with('#') {
            continue;
        }
        match parse_junction_line(s, idx + 1) {
            Ok(j) => out.push(j),
            Err(e) => {
                warn!("skipping junction line: {e}");
                skipped += 1;
            }
        }
    }

    debug!("read {} junctions ({} lines skipped)", out.len(), skipped);
    Ok(out)
}

/// Read a junction table from a (possibly gzipped) file.
pub fn read_junctions_from_path(path: &Path) -> Result<Vec<Junction>> {
    let reader = open_bufread(path)?;
    read_junctions(reader).map_err(|e| match e {
        SpliceError::Io { source, .. } => SpliceError::Io {
            path: path.display().to_string(),
            source,
        },
        other => other,
    })
}
