use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpliceError};

/// Genomic strand/orientation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum Strand {
    Plus,
    Minus,
    #[default]
    Unknown,
}

impl Strand {
    #[inline]
    pub fn is_compatible_with(self, other: Strand) -> bool {
        // "Unknown" is treated as compatible with either.
        self == Strand::Unknown || other == Strand::Unknown || self == other
    }

    pub fn symbol(self) -> char {
        match self {
            Strand::Plus => '+',
            Strand::Minus => '-',
            Strand::Unknown => '.',
        }
    }

    pub fn from_symbol(c: char) -> Option<Strand> {
        match c {
            '+' => Some(Strand::Plus),
            '-' => Some(Strand::Minus),
            '.' | '?' => Some(Strand::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

impl FromStr for Strand {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut chars = s.chars();
        match (chars.next().and_then(Strand::from_symbol), chars.next()) {
            (Some(strand), None) => Ok(strand),
            _ => Err(format!("invalid strand: {s}")),
        }
    }
}

/// How the denominator of [`GenomicInterval::overlap_percent`] is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverlapMode {
    /// Span from the smallest start to the largest end.
    Union,
    /// Span of the intersection itself.
    Intersection,
    /// Span of the shorter of the two operands.
    Narrower,
}

/// A contiguous genomic interval.
/// Coordinates are 1-based, closed: [start, end]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GenomicInterval {
    pub chromosome: String,
    pub start: u64,
    pub end: u64,
    pub strand: Strand,
}

impl GenomicInterval {
    /// Create a new interval. Fails with `InvalidRange` if `end < start` or `start <= 0`.
    pub fn new(
        chromosome: impl Into<String>,
        start: i64,
        end: i64,
        strand: Strand,
    ) -> Result<Self> {
        let chromosome = chromosome.into();
        if start <= 0 || end < start {
            return Err(SpliceError::InvalidRange {
                chromosome,
                start,
                end,
            });
        }
        Ok(Self {
            chromosome,
            start: start as u64,
            end: end as u64,
            strand,
        })
    }

    /// Number of bases covered (closed interval).
    #[inline]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    #[inline]
    pub fn overlaps(&self, other: &GenomicInterval) -> bool {
        self.chromosome == other.chromosome && self.start <= other.end && other.start <= self.end
    }

    #[inline]
    pub fn contains(&self, other: &GenomicInterval) -> bool {
        self.chromosome == other.chromosome && self.start <= other.start && other.end <= self.end
    }

    /// True if `self` lies strictly before `other` (no shared base).
    pub fn is_upstream(&self, other: &GenomicInterval) -> bool {
        match self.chromosome.cmp(&other.chromosome) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => self.end < other.start,
        }
    }

    /// True if `self` lies strictly after `other` (no shared base).
    pub fn is_downstream(&self, other: &GenomicInterval) -> bool {
        other.is_upstream(self)
    }

    /// Number of bases between the two intervals, 0 when they overlap.
    /// `None` across chromosomes.
    pub fn distance(&self, other: &GenomicInterval) -> Option<u64> {
        if self.chromosome != other.chromosome {
            return None;
        }
        if self.end < other.start {
            Some(other.start - self.end)
        } else if other.end < self.start {
            Some(self.start - other.end)
        } else {
            Some(0)
        }
    }

    /// Overlap as a percentage of the span picked by `mode`.
    ///
    /// Spans are measured as `end - start`, the same way as the overlap itself.
    pub fn overlap_percent(&self, other: &GenomicInterval, mode: OverlapMode) -> f64 {
        if self.chromosome != other.chromosome {
            return 0.0;
        }
        overlap_percent(self.start, self.end, other.start, other.end, mode)
    }
}

impl fmt::Display for GenomicInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}{}", self.chromosome, self.start, self.end, self.strand)
    }
}

/// Coordinate-only version of [`GenomicInterval::overlap_percent`].
pub fn overlap_percent(a0: u64, a1: u64, b0: u64, b1: u64, mode: OverlapMode) -> f64 {
    let lo = a0.max(b0);
    let hi = a1.min(b1);
    if hi < lo {
        return 0.0;
    }
    let numerator = (hi - lo) as f64;
    let denom = match mode {
        OverlapMode::Union => a1.max(b1) - a0.min(b0),
        OverlapMode::Intersection => hi - lo,
        OverlapMode::Narrower => (a1 - a0).min(b1 - b0),
    };
    if denom == 0 {
        // Both collapse to single positions that touch.
        return 100.0;
    }
    numerator / denom as f64 * 100.0
}

/// Compute introns from an ordered list of exons.
///
/// Intron i is `(exons[i].end + 1, exons[i+1].start - 1)`,
/// except that gaps of at most `allowed_gap_size` bases are treated as
/// sequencing/alignment artifacts and do NOT produce introns.
pub fn introns_from_exons(exons: &[(u64, u64)], allowed_gap_size: u64) -> Vec<(u64, u64)> {
    let mut out = Vec::new();
    if exons.len() < 2 {
        return out;
    }

    for w in exons.windows(2) {
        let (_, a_end) = w[0];
        let (b_start, _) = w[1];

        // Overlapping or touching exons: not an intron
        if b_start <= a_end + 1 {
            continue;
        }

        let gap = b_start - a_end - 1;
        if gap <= allowed_gap_size {
            continue;
        }

        out.push((a_end + 1, b_start - 1));
    }

    out
}

/// Rebuild the exon blocks of a read that spans `[start, end]` with the
/// given (sorted) introns. Introns outside the span are ignored.
pub fn exons_from_introns(start: u64, end: u64, introns: &[(u64, u64)]) -> Vec<(u64, u64)> {
    let mut out = Vec::with_capacity(introns.len() + 1);
    let mut cur = start;
    for &(i0, i1) in introns {
        if i0 <= cur || i1 >= end {
            continue;
        }
        out.push((cur, i0 - 1));
        cur = i1 + 1;
    }
    if cur <= end {
        out.push((cur, end));
    }
    out
}
