use std::collections::HashMap;
use std::io::BufRead;

use crate::error::{Result, SpliceError};
use crate::types::Strand;

const EXPECTED: &str = "9 tab-separated GTF/GFF3 columns";

/// File dialect detected from attribute syntax.
///
/// - GFF3 typically uses: key=value;key2=value2
/// - GTF typically uses: key "value"; key2 "value2";
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Gff3,
    Gtf,
    Unknown,
}

/// A single parsed record line from GTF/GFF3.
///
/// Coordinates are kept as in the file: 1-based, closed.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationRecord {
    pub line_no: usize,
    pub seqname: String,
    pub feature_type: String,
    pub start: u64,
    pub end: u64,
    pub strand: Strand,
    pub attrs: HashMap<String, String>,
    pub dialect: Dialect,
}

impl AnnotationRecord {
    /// Convenience: get an attribute value.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(|s| s.as_str())
    }

    pub fn is_exon_feature(&self, exon_types: &[String]) -> bool {
        exon_types.iter().any(|t| t == &self.feature_type)
    }

    /// First non-empty attribute among `keys`.
    pub fn pick_first_attr(&self, keys: &[String]) -> Option<&str> {
        keys.iter()
            .filter_map(|k| self.attr(k))
            .map(str::trim)
            .find(|v| !v.is_empty())
    }
}

/// Streaming parser for GTF/GFF3 files.
///
/// Most users should go through [`crate::annotation::AnnotationBuilder`]
/// instead, which skips malformed lines and builds the full index.
///
/// # Example
/// ```
/// use std::io::Cursor;
/// use splice_events::annotation::AnnotationReader;
///
/// let gtf = "chr1\tsrc\texon\t101\t150\t.\t+\t.\tgene_id \"G1\"; transcript_id \"T1\";\n";
/// let recs: Vec<_> = AnnotationReader::new(Cursor::new(gtf)).records().collect();
/// assert_eq!(recs.len(), 1);
/// assert_eq!(recs[0].as_ref().unwrap().start, 101);
/// ```
pub struct AnnotationReader<R: BufRead> {
    reader: R,
    buf: String,
    line_no: usize,
}

impl<R: BufRead> AnnotationReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: String::new(),
            line_no: 0,
        }
    }

    /// Returns an iterator over parsed records.
    ///
    /// - Skips blank lines
    /// - Skips comment lines starting with '#'
    /// - Yields `UnparsablePattern` for malformed lines and keeps going
    pub fn records(mut self) -> impl Iterator<Item = Result<AnnotationRecord>> {
        std::iter::from_fn(move || loop {
            self.buf.clear();
            self.line_no += 1;
            match self.reader.read_line(&mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => {
                    return Some(Err(SpliceError::Io {
                        path: "<reader>".to_string(),
                        source: e,
                    }))
                }
            }

            let line = self.buf.trim_end_matches(&['\n', '\r'][..]);
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }

            return Some(parse_record_line(line, self.line_no));
        })
    }
}

/// Parse a single non-comment line into an `AnnotationRecord`.
pub fn parse_record_line(line: &str, line_no: usize) -> Result<AnnotationRecord> {
    let unparsable = || SpliceError::UnparsablePattern {
        line_no,
        line: line.to_string(),
        expected: EXPECTED,
    };

    // seqname source feature start end score strand phase attributes
    let cols: Vec<&str> = line.split('\t').collect();
    if cols.len() != 9 || cols[0].is_empty() {
        return Err(unparsable());
    }

    let start: i64 = cols[3].parse().map_err(|_| unparsable())?;
    let end: i64 = cols[4].parse().map_err(|_| unparsable())?;
    if start <= 0 || end < start {
        return Err(SpliceError::InvalidRange {
            chromosome: cols[0].to_string(),
            start,
            end,
        });
    }

    let strand = cols[6].parse::<Strand>().map_err(|_| unparsable())?;
    let (dialect, attrs) = parse_attributes(cols[8]);

    Ok(AnnotationRecord {
        line_no,
        seqname: cols[0].to_string(),
        feature_type: cols[2].to_string(),
        start: start as u64,
        end: end as u64,
        strand,
        attrs,
        dialect,
    })
}

/// Parse the attributes field for either GFF3 or GTF.
///
/// Heuristics:
/// - If it contains '=' => treat as GFF3
/// - Else if it contains quotes => treat as GTF
/// - Else Unknown, parsed per field best-effort
pub fn parse_attributes(s: &str) -> (Dialect, HashMap<String, String>) {
    let s = s.trim();

    let dialect = if s.contains('=') {
        Dialect::Gff3
    } else if s.contains('"') {
        Dialect::Gtf
    } else {
        Dialect::Unknown
    };

    let mut map = HashMap::new();
    for part in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let pair = match dialect {
            Dialect::Gff3 => part.split_once('='),
            Dialect::Gtf => part.split_once(char::is_whitespace),
            Dialect::Unknown => part
                .split_once('=')
                .or_else(|| part.split_once(char::is_whitespace)),
        };
        let Some((key, value)) = pair else {
            continue;
        };
        let key = key.trim();
        let value = unquote(value);
        if !key.is_empty() && !value.is_empty() {
            map.insert(key.to_string(), value);
        }
    }

    (dialect, map)
}

fn unquote(v: &str) -> String {
    let v = v.trim();
    let v = v.strip_prefix('"').unwrap_or(v);
    let v = v.strip_suffix('"').unwrap_or(v);
    v.to_string()
}
