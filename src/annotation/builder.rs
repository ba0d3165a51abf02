use std::io::BufRead;
use std::path::Path;

use crate::error::Result;
use crate::index::{AnnotationIndex, IdNameKeys};

/// High-level builder for creating an `AnnotationIndex` from a GTF/GFF3 file.
///
/// - parses the whole file (optionally gzipped)
/// - configurable mapping of id/name keys for gene, transcript and exon
/// - malformed lines are logged and skipped
#[derive(Debug, Clone, Default)]
pub struct AnnotationBuilder {
    pub keys: IdNameKeys,
}

impl AnnotationBuilder {
    /// Start with defaults that work reasonably for many GTF/GFF3 files.
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience: set a single key (or first-preference key) for gene id.
    pub fn gene_id_key(mut self, key: &str) -> Self {
        self.keys.gene_id_keys = vec![key.to_string()];
        self
    }

    /// Convenience: set preferred keys for gene display names/aliases.
    pub fn gene_name_keys(mut self, keys: &[&str]) -> Self {
        self.keys.gene_name_keys = to_strings(keys);
        self
    }

    /// Convenience: set transcript id key(s).
    pub fn transcript_id_keys(mut self, keys: &[&str]) -> Self {
        self.keys.transcript_id_keys = to_strings(keys);
        self
    }

    /// Convenience: set parent keys for GFF3 exon->transcript linking (usually ["Parent"]).
    pub fn parent_keys(mut self, keys: &[&str]) -> Self {
        self.keys.parent_keys = to_strings(keys);
        self
    }

    pub fn exon_id_keys(mut self, keys: &[&str]) -> Self {
        self.keys.exon_id_keys = to_strings(keys);
        self
    }

    /// Convenience: define what feature types count as exon blocks.
    /// Typical:
    /// - GTF: ["exon"]
    /// - GFF3: ["exon"] (sometimes also "CDS" depending on what you want)
    pub fn exon_feature_types(mut self, types: &[&str]) -> Self {
        self.keys.exon_feature_types = to_strings(types);
        self
    }

    /// Build index from anything implementing `BufRead`.
    pub fn build_from_reader<R: BufRead>(&self, reader: R) -> Result<AnnotationIndex> {
        AnnotationIndex::from_reader(reader, self.keys.clone())
    }

    /// Build index from a file path; `.gz` files are decompressed on the fly.
    pub fn build_from_path<P: AsRef<Path>>(&self, path: P) -> Result<AnnotationIndex> {
        AnnotationIndex::from_path(path, self.keys.clone())
    }
}

fn to_strings(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|s| s.to_string()).collect()
}
