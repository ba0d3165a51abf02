//! Tab-separated event table.
//!
//! ```text
//! spliceRange spliceType subtype spliceSites isNovel gene transcript exon PSI [PSI_<sample>...]
//! ```
//!
//! Rows are deduplicated and sorted lexicographically before writing.

use std::collections::BTreeSet;
use std::io::{self, Write};

use crate::event::SpliceEvent;
use crate::model::exon::Exon;

pub const HEADER: [&str; 9] = [
    "spliceRange",
    "spliceType",
    "subtype",
    "spliceSites",
    "isNovel",
    "gene",
    "transcript",
    "exon",
    "PSI",
];

/// One event with its supporting reference exons and per-sample PSI.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub event: SpliceEvent,
    pub exons: Vec<Exon>,
    /// One entry per sample, in sample order; empty for single-sample runs.
    pub sample_psi: Vec<Option<f64>>,
}

impl EventRecord {
    pub fn new(event: SpliceEvent, exons: Vec<Exon>) -> Self {
        Self {
            event,
            exons,
            sample_psi: Vec::new(),
        }
    }

    /// Render as one TSV row (no trailing newline).
    pub fn row(&self, per_sample: bool) -> String {
        let ev = &self.event;

        let mut genes = BTreeSet::new();
        let mut transcripts = BTreeSet::new();
        for exon in &self.exons {
            genes.extend(exon.source.gene_ids.iter().map(String::as_str));
            transcripts.extend(exon.source.transcript_ids.iter().map(String::as_str));
        }
        let exon_ids: BTreeSet<&str> = self.exons.iter().flat_map(|e| e.ids()).collect();

        let mut cols = vec![
            ev.range_string(),
            ev.kind.code().to_string(),
            ev.subtype.clone(),
            join(ev.splice_sites().iter()),
            ev.is_novel.to_string(),
            join(genes.iter()),
            join(transcripts.iter()),
            join(exon_ids.iter()),
            format_psi(ev.psi),
        ];
        if per_sample {
            cols.extend(self.sample_psi.iter().map(|&p| format_psi(p)));
        }
        cols.join("\t")
    }
}

fn join<T: ToString>(items: impl Iterator<Item = T>) -> String {
    items.map(|i| i.to_string()).collect::<Vec<_>>().join(",")
}

/// Four decimals, or `NA`.
pub fn format_psi(psi: Option<f64>) -> String {
    match psi {
        Some(p) if p.is_finite() => format!("{p:.4}"),
        _ => "NA".to_string(),
    }
}

/// Header line; per-sample columns only when there is more than one sample.
pub fn header(samples: &[String]) -> String {
    let mut cols: Vec<String> = HEADER.iter().map(|s| s.to_string()).collect();
    if samples.len() > 1 {
        cols.extend(samples.iter().map(|s| format!("PSI_{s}")));
    }
    cols.join("\t")
}

/// Sorted, deduplicated rows.
pub fn render_rows(records: &[EventRecord], samples: &[String]) -> BTreeSet<String> {
    let per_sample = samples.len() > 1;
    records.iter().map(|r| r.row(per_sample)).collect()
}

/// Write the header and every row. Returns the number of rows written.
pub fn write_events<W: Write>(
    mut out: W,
    records: &[EventRecord],
    samples: &[String],
) -> io::Result<usize> {
    writeln!(out, "{}", header(samples))?;
    let rows = render_rows(records, samples);
    for row in &rows {
        writeln!(out, "{row}")?;
    }
    out.flush()?;
    Ok(rows.len())
}
