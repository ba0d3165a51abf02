use serde::{Deserialize, Serialize};

use crate::model::exon::{sort_and_merge_exons, Exon};
use crate::model::transcript::Transcript;
use crate::model::types::GeneId;

/// Gene model: stores one or more names/aliases and its transcripts.
///
/// Notes:
/// - `names[0]` is treated as the primary name (if present).
/// - additional names are aliases (deduped).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gene {
    pub id: GeneId,
    pub names: Vec<String>,
    transcripts: Vec<Transcript>,
}

impl Gene {
    pub fn new(id: impl Into<GeneId>) -> Self {
        Self {
            id: id.into(),
            names: Vec::new(),
            transcripts: Vec::new(),
        }
    }

    /// Add an alias/alternative name (deduped).
    pub fn add_name(&mut self, name: &str) {
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        if !self.names.iter().any(|n| n == name) {
            self.names.push(name.to_string());
        }
    }

    /// Primary name (if any).
    pub fn primary_name(&self) -> Option<&str> {
        self.names.first().map(|s| s.as_str())
    }

    pub fn add_transcript(&mut self, tx: Transcript) {
        if let Some(name) = tx.gene_name.as_deref() {
            self.add_name(name);
        }
        self.transcripts.push(tx);
    }

    pub fn transcripts(&self) -> &[Transcript] {
        &self.transcripts
    }

    /// Sort transcripts by position and remove duplicate ids.
    pub fn finalize(&mut self) {
        self.transcripts.sort_by(|a, b| {
            a.interval
                .cmp(&b.interval)
                .then_with(|| a.transcript_id.cmp(&b.transcript_id))
        });
        self.transcripts.dedup_by(|a, b| a.transcript_id == b.transcript_id);
    }

    /// Span covering every transcript, `None` for an empty gene.
    pub fn span(&self) -> Option<(u64, u64)> {
        let start = self.transcripts.iter().map(Transcript::start).min()?;
        let end = self.transcripts.iter().map(Transcript::end).max()?;
        Some((start, end))
    }

    /// Union of all transcript exons, sorted and merged by coordinates.
    pub fn exons(&self) -> Vec<Exon> {
        sort_and_merge_exons(
            self.transcripts
                .iter()
                .flat_map(|t| t.exons().iter().cloned())
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Strand;

    fn tx(id: &str, start: i64, end: i64) -> Transcript {
        let mut t = Transcript::new("1", start, end, Strand::Plus, "G1", Some(id))
            .unwrap()
            .with_gene_name("Alpha");
        t.add_exon(Exon::new("1", start, end, Strand::Plus, format!("{id}.e1")).unwrap());
        t
    }

    #[test]
    fn names_are_deduped_and_primary_kept() {
        let mut g = Gene::new("G1");
        g.add_name("G1");
        g.add_name("GeneSymbol");
        g.add_name("GeneSymbol");
        assert_eq!(g.names, vec!["G1".to_string(), "GeneSymbol".to_string()]);
        assert_eq!(g.primary_name(), Some("G1"));
    }

    #[test]
    fn finalize_sorts_and_dedups_transcripts() {
        let mut g = Gene::new("G1");
        g.add_transcript(tx("T2", 300, 400));
        g.add_transcript(tx("T1", 100, 200));
        g.add_transcript(tx("T2", 300, 400));
        g.finalize();

        let ids: Vec<&str> = g.transcripts().iter().map(|t| t.transcript_id.as_str()).collect();
        assert_eq!(ids, vec!["T1", "T2"]);
        assert_eq!(g.span(), Some((100, 400)));
        assert_eq!(g.primary_name(), Some("Alpha"));
        assert_eq!(g.exons().len(), 2);
    }
}
