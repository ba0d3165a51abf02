use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use anyhow::{bail, Context};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::annotation::io::{AnnotationReader, AnnotationRecord};
use crate::error::{Result, SpliceError};
use crate::graph::GraphKey;
use crate::input::open_bufread;
use crate::model::exon::{sort_and_merge_exons, Exon};
use crate::model::gene::Gene;
use crate::model::transcript::Transcript;
use crate::model::types::GeneId;
use crate::types::Strand;

const MAGIC: &[u8; 4] = b"SEV1";
const VERSION_STR: &str = env!("CARGO_PKG_VERSION");

/// Configure which attribute keys are used to extract:
/// - gene stable identifier and display names
/// - transcript stable identifier
/// - (GFF3) exon -> transcript linking keys (usually Parent)
/// - exon identifier
///
/// Notes:
/// - We allow multiple keys per category; first present wins.
/// - For GFF3 Parent values, we split by ',' and treat each parent as a transcript ID.
#[derive(Debug, Clone)]
pub struct IdNameKeys {
    pub gene_id_keys: Vec<String>,
    pub gene_name_keys: Vec<String>,
    pub transcript_id_keys: Vec<String>,

    /// GFF3 exon->transcript linkage (most commonly: Parent)
    pub parent_keys: Vec<String>,

    pub exon_id_keys: Vec<String>,

    /// Feature types that count as exon blocks (default: ["exon"])
    pub exon_feature_types: Vec<String>,
}

impl Default for IdNameKeys {
    fn default() -> Self {
        Self {
            gene_id_keys: vec!["gene_id".into(), "gene".into(), "GeneID".into()],
            gene_name_keys: vec!["gene_name".into(), "Name".into(), "gene".into()],
            transcript_id_keys: vec!["transcript_id".into(), "transcript".into()],
            parent_keys: vec!["Parent".into()],
            exon_id_keys: vec!["exon_id".into(), "ID".into()],
            exon_feature_types: vec!["exon".into()],
        }
    }
}

/// Reference exons and transcripts of one (chromosome, strand).
#[derive(Debug, Clone, Default)]
pub struct ReferencePartition {
    /// Exons of every transcript, sorted by (start, end), identical coordinates merged.
    pub exons: Vec<Exon>,
    /// Transcripts sorted by position.
    pub transcripts: Vec<Transcript>,
}

/// The reference annotation:
/// - chromosome names in first-seen order
/// - genes with their transcripts and exons, sorted by gene id
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnnotationIndex {
    pub chr_names: Vec<String>,
    pub genes: Vec<Gene>,
}

/// Human-readable summary of the `AnnotationIndex`.
///
/// Prints the global gene/transcript/exon totals and one line per chromosome.
/// Meant for logging and diagnostics.
impl fmt::Display for AnnotationIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n_txs: usize = self.genes.iter().map(|g| g.transcripts().len()).sum();
        writeln!(
            f,
            "AnnotationIndex: {} genes, {} transcripts, {} chromosomes",
            self.genes.len(),
            n_txs,
            self.chr_names.len()
        )?;

        let mut per_chr: BTreeMap<&str, (BTreeSet<&str>, usize, usize)> = BTreeMap::new();
        for g in &self.genes {
            for t in g.transcripts() {
                let e = per_chr.entry(t.chromosome()).or_default();
                e.0.insert(g.id.as_str());
                e.1 += 1;
                e.2 += t.exon_count();
            }
        }

        for chr in &self.chr_names {
            match per_chr.get(chr.as_str()) {
                Some((genes, txs, exons)) => writeln!(
                    f,
                    "  - {}: genes={}, transcripts={}, exons={}",
                    chr,
                    genes.len(),
                    txs,
                    exons
                )?,
                None => writeln!(f, "  - {}: <no transcripts>", chr)?,
            }
        }
        Ok(())
    }
}

impl AnnotationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a (possibly gzipped) GTF/GFF3 path.
    pub fn from_path<P: AsRef<Path>>(path: P, keys: IdNameKeys) -> Result<Self> {
        let path = path.as_ref();
        let reader = open_bufread(path)?;
        let idx = Self::from_reader(reader, keys)?;
        info!(
            "loaded {} genes on {} chromosomes from {}",
            idx.genes.len(),
            idx.chr_names.len(),
            path.display()
        );
        Ok(idx)
    }

    /// Build an index directly from a GTF/GFF3 reader.
    ///
    /// Workflow:
    /// 1) parse records, skipping malformed lines with a warning
    /// 2) for exon features:
    ///    - extract gene key and transcript key(s)
    ///    - create the transcript on first sight, add the exon
    /// 3) group transcripts into genes, sorted by gene id
    ///
    /// A record without a gene id falls back to its transcript id as gene,
    /// which is how assembled read sets are usually written.
    ///
    /// # Example (minimal GTF via `BufRead`)
    /// ```
    /// use std::io::Cursor;
    /// use splice_events::index::{AnnotationIndex, IdNameKeys};
    ///
    /// let gtf = "\
    /// chr1\tsrc\texon\t101\t150\t.\t+\t.\tgene_id \"G1\"; transcript_id \"T1\";\n\
    /// chr1\tsrc\texon\t201\t250\t.\t+\t.\tgene_id \"G1\"; transcript_id \"T1\";\n";
    ///
    /// let idx = AnnotationIndex::from_reader(Cursor::new(gtf.as_bytes()), IdNameKeys::default())
    ///     .unwrap();
    ///
    /// assert_eq!(idx.genes.len(), 1);
    /// assert_eq!(idx.genes[0].transcripts()[0].exon_count(), 2);
    /// assert_eq!(idx.chr_names, vec!["chr1".to_string()]);
    /// ```
    pub fn from_reader<R: BufRead>(reader: R, keys: IdNameKeys) -> Result<Self> {
        let mut chr_names: Vec<String> = Vec::new();
        // transcript key -> transcript, in first-seen order
        let mut tx_order: Vec<String> = Vec::new();
        let mut txs: HashMap<String, Transcript> = HashMap::new();
        let mut skipped = 0usize;

        for rec in AnnotationReader::new(reader).records() {
            let rec = match rec {
                Ok(rec) => rec,
                Err(e @ SpliceError::Io { .. }) => return Err(e),
                Err(e) => {
                    warn!("skipping annotation line: {e}");
                    skipped += 1;
                    continue;
                }
            };

            if !rec.is_exon_feature(&keys.exon_feature_types) {
                continue;
            }

            let Some(tx_key_raw) = rec
                .pick_first_attr(&keys.transcript_id_keys)
                .or_else(|| rec.pick_first_attr(&keys.parent_keys))
            else {
                warn!(
                    "skipping annotation line {}: no transcript id (tried {:?} and {:?})",
                    rec.line_no, keys.transcript_id_keys, keys.parent_keys
                );
                skipped += 1;
                continue;
            };

            if !chr_names.iter().any(|c| c == &rec.seqname) {
                chr_names.push(rec.seqname.clone());
            }

            // Parent can be comma-separated in GFF3; support multi-parent exons.
            for tx_key in split_gff3_parent_list(tx_key_raw) {
                if !txs.contains_key(&tx_key) {
                    let tx = new_transcript(&rec, &keys, &tx_key)?;
                    tx_order.push(tx_key.clone());
                    txs.insert(tx_key.clone(), tx);
                }
                if let Some(tx) = txs.get_mut(&tx_key) {
                    let exon_id = rec
                        .pick_first_attr(&keys.exon_id_keys)
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("{}:{}-{}", tx_key, rec.start, rec.end));
                    let strand = tx.strand();
                    let exon = Exon::new(
                        rec.seqname.clone(),
                        rec.start as i64,
                        rec.end as i64,
                        strand,
                        exon_id,
                    )?;
                    tx.add_exon(exon);
                }
            }
        }

        if skipped > 0 {
            warn!("{} annotation lines skipped", skipped);
        }

        let mut genes: BTreeMap<GeneId, Gene> = BTreeMap::new();
        for key in tx_order {
            if let Some(mut tx) = txs.remove(&key) {
                tx.finalize();
                genes
                    .entry(tx.gene_id.clone())
                    .or_insert_with(|| Gene::new(tx.gene_id.clone()))
                    .add_transcript(tx);
            }
        }
        let genes = genes
            .into_values()
            .map(|mut g| {
                g.finalize();
                g
            })
            .collect();

        Ok(Self { chr_names, genes })
    }

    /// All transcripts of all genes.
    pub fn transcripts(&self) -> impl Iterator<Item = &Transcript> + '_ {
        self.genes.iter().flat_map(|g| g.transcripts().iter())
    }

    pub fn gene(&self, gene_id: &str) -> Option<&Gene> {
        self.genes
            .binary_search_by(|g| g.id.as_str().cmp(gene_id))
            .ok()
            .map(|i| &self.genes[i])
    }

    /// Reference exons and transcripts split by (chromosome, strand).
    ///
    /// The `Unknown` partition of a chromosome holds every transcript on it,
    /// so unstranded junctions are matched against both strands.
    pub fn partitions(&self) -> BTreeMap<GraphKey, ReferencePartition> {
        let mut raw: BTreeMap<GraphKey, (Vec<Exon>, Vec<Transcript>)> = BTreeMap::new();
        for tx in self.transcripts() {
            let chrom = tx.chromosome().to_string();
            let mut keys = vec![(chrom.clone(), tx.strand())];
            if tx.strand() != Strand::Unknown {
                keys.push((chrom, Strand::Unknown));
            }
            for key in keys {
                let entry = raw.entry(key).or_default();
                entry.0.extend(tx.exons().iter().cloned());
                entry.1.push(tx.clone());
            }
        }

        raw.into_iter()
            .map(|(key, (exons, mut transcripts))| {
                transcripts.sort_by(|a, b| {
                    a.interval
                        .cmp(&b.interval)
                        .then_with(|| a.transcript_id.cmp(&b.transcript_id))
                });
                let part = ReferencePartition {
                    exons: sort_and_merge_exons(exons),
                    transcripts,
                };
                (key, part)
            })
            .collect()
    }

    /// Serialize this index with a small header (magic + crate version) and a bincode payload.
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let mut f = BufWriter::new(
            File::create(path).with_context(|| format!("create {}", path.display()))?,
        );

        f.write_all(MAGIC)?;

        let v = VERSION_STR.as_bytes();
        f.write_all(&(v.len() as u16).to_le_bytes())?;
        f.write_all(v)?;

        bincode::serialize_into(&mut f, self)?;
        f.flush()?;
        Ok(())
    }

    /// Load an index written by `save()`. Rejects wrong file types and version mismatches.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let mut f =
            BufReader::new(File::open(path).with_context(|| format!("open {}", path.display()))?);

        let mut magic = [0u8; 4];
        f.read_exact(&mut magic)?;
        if &magic != MAGIC {
            bail!("Not an annotation index file (bad magic)");
        }

        let mut len_buf = [0u8; 2];
        f.read_exact(&mut len_buf)?;
        let mut ver_buf = vec![0u8; u16::from_le_bytes(len_buf) as usize];
        f.read_exact(&mut ver_buf)?;
        let file_version = std::str::from_utf8(&ver_buf)?;

        if file_version != VERSION_STR {
            bail!(
                "Index version mismatch: file={}, binary={}",
                file_version,
                VERSION_STR
            );
        }

        Ok(bincode::deserialize_from(&mut f)?)
    }
}

fn new_transcript(rec: &AnnotationRecord, keys: &IdNameKeys, tx_key: &str) -> Result<Transcript> {
    let gene_key = rec.pick_first_attr(&keys.gene_id_keys).unwrap_or(tx_key);
    let mut tx = Transcript::new(
        rec.seqname.clone(),
        rec.start as i64,
        rec.end as i64,
        rec.strand,
        gene_key,
        Some(tx_key),
    )?;
    if let Some(name) = rec.pick_first_attr(&keys.gene_name_keys) {
        tx = tx.with_gene_name(name);
    }
    tx.parent_gene_id = Some(gene_key.to_string());
    Ok(tx)
}

/// Split Parent= list (GFF3) by commas; also trim whitespace.
fn split_gff3_parent_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
