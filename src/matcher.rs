//! Reconcile candidate events with reference exons.
//!
//! Events and exons are both sorted by `(start, end)` and walked with two
//! pointers. The exon pointer only moves forward: exons that end before the
//! current event (minus the site tolerance) can never match a later event.
//! Every event rescans the window from that pointer, so events sharing
//! reference exons all see the same candidates.

use std::collections::BTreeMap;
use std::ops::Range;

use log::debug;

use crate::config::MatchOptions;
use crate::coverage::{mean_depth, CoverageReader};
use crate::error::{Result, SpliceError};
use crate::event::{Detection, EventKind, SpliceEvent};
use crate::graph::{GraphKey, JunctionGraph};
use crate::index::ReferencePartition;
use crate::model::exon::Exon;
use crate::model::transcript::Transcript;
use crate::types::{GenomicInterval, OverlapMode};

/// Events with the reference exons that support them.
pub type EventMatches = BTreeMap<SpliceEvent, Vec<Exon>>;

/// Match sorted-or-not `events` against `exons` (sorted by `(start, end)`).
///
/// Confirmed events get `is_novel = false` and their supporting exons;
/// the others stay novel with no exons.
pub fn match_events(
    mut events: Vec<SpliceEvent>,
    exons: &[Exon],
    opts: &MatchOptions,
) -> EventMatches {
    events.sort_by(|a, b| (a.start, a.end).cmp(&(b.start, b.end)).then_with(|| a.cmp(b)));

    let windows = exon_windows(&events, exons, opts.site_tolerance);
    let mut out = EventMatches::new();
    for (mut event, window) in events.into_iter().zip(windows) {
        let support = classify(event.kind, &event, &exons[window], opts).unwrap_or_default();
        if !support.is_empty() {
            event.is_novel = false;
        }
        insert_merged(&mut out, event, support);
    }
    out
}

/// Candidate exon range of every event in `events` (sorted by start).
///
/// The lower bound never moves back, so the scan is linear in
/// `events.len() + exons.len()` plus the size of the windows.
fn exon_windows(events: &[SpliceEvent], exons: &[Exon], tol: u64) -> Vec<Range<usize>> {
    let mut lo = 0usize;
    events
        .iter()
        .map(|event| {
            while lo < exons.len() && exons[lo].end() + tol < event.start {
                lo += 1;
            }
            let hi = lo + exons[lo..].partition_point(|e| e.start() <= event.end + tol);
            lo..hi
        })
        .collect()
}

/// Per-kind confirmation rule. `candidates` are the exons near the event.
///
/// Returns the exons that confirm the event, `None` if it is not confirmed.
pub fn classify(
    kind: EventKind,
    event: &SpliceEvent,
    candidates: &[Exon],
    opts: &MatchOptions,
) -> Option<Vec<Exon>> {
    let s = event.splice_sites();
    let tol = opts.site_tolerance;
    let near = |a: u64, b: u64| a.abs_diff(b) <= tol;

    let found: Vec<Exon> = match kind {
        EventKind::SkippedExon => candidates
            .iter()
            .filter(|e| e.start() >= s[1] && e.end() <= s[2])
            .cloned()
            .collect(),

        EventKind::Alt3 | EventKind::Alt5 => {
            let (alt1, alt2) = if s[0] == s[1] { (s[2], s[3]) } else { (s[0], s[1]) };
            candidates
                .iter()
                .filter(|e| {
                    [e.start(), e.end()]
                        .iter()
                        .any(|&b| near(b, alt1) || near(b, alt2))
                })
                .cloned()
                .collect()
        }

        EventKind::MutuallyExclusive => {
            let inside = |e: &&Exon, lo: u64, hi: u64| e.start() >= lo && e.end() <= hi;
            let first: Vec<&Exon> = candidates.iter().filter(|e| inside(e, s[1], s[2])).collect();
            let second: Vec<&Exon> = candidates.iter().filter(|e| inside(e, s[3], s[4])).collect();

            let mut merged = Vec::new();
            for a in &first {
                for b in &second {
                    if a.source.shares_gene(&b.source) {
                        merged.push(a.merged_with(b));
                    }
                }
            }
            merged
        }

        EventKind::IntronRetention => candidates
            .iter()
            .filter(|e| near(e.end(), s[1]) || near(e.start(), s[2]))
            .cloned()
            .collect(),
    };

    if found.is_empty() {
        None
    } else {
        Some(found)
    }
}

/// Every event as novel, without provenance.
pub fn unannotated(events: Vec<SpliceEvent>) -> EventMatches {
    let mut out = EventMatches::new();
    for event in events {
        insert_merged(&mut out, event, Vec::new());
    }
    out
}

/// Look up the reference of one partition.
pub fn reference_for<'a>(
    references: &'a BTreeMap<GraphKey, ReferencePartition>,
    key: &GraphKey,
) -> Result<&'a ReferencePartition> {
    references
        .get(key)
        .filter(|p| !p.exons.is_empty())
        .ok_or_else(|| SpliceError::MissingAnnotation {
            chromosome: key.0.clone(),
            strand: key.1,
        })
}

/// Match the events of one partition, or leave them novel when the
/// partition has no reference annotation.
pub fn annotate_partition(
    events: Vec<SpliceEvent>,
    reference: Result<&ReferencePartition>,
    opts: &MatchOptions,
) -> Result<EventMatches> {
    match reference {
        Ok(part) => Ok(match_events(events, &part.exons, opts)),
        Err(e @ SpliceError::MissingAnnotation { .. }) => {
            debug!("{e}; {} events stay novel", events.len());
            Ok(unannotated(events))
        }
        Err(e) => Err(e),
    }
}

/// Intron retention: an annotated intron covered by an observed exon.
///
/// Annotated introns come from consecutive exons of each transcript.
/// Observed exons lie between the end of one junction and the start of the
/// nearest junction after it. A union overlap of at least
/// `opts.ir_overlap` percent calls the retention.
///
/// PSI is the mean depth inside the intron over the mean depth of
/// `opts.flank` bases on both flanking exons, when coverage is available.
pub fn detect_intron_retention(
    graph: &JunctionGraph,
    transcripts: &[Transcript],
    mut coverage: Option<&mut (dyn CoverageReader + '_)>,
    opts: &MatchOptions,
) -> Result<EventMatches> {
    let observed = observed_exons(graph);
    let mut annotated: Vec<(u64, u64, &Exon, &Exon)> = transcripts
        .iter()
        .flat_map(|tx| {
            tx.exons()
                .windows(2)
                .filter(|w| w[1].start() > w[0].end() + 1)
                .map(|w| (w[0].end() + 1, w[1].start() - 1, &w[0], &w[1]))
        })
        .collect();
    annotated.sort_by_key(|a| (a.0, a.1));

    let mut out = EventMatches::new();
    let mut lo = 0usize;
    for (gap_start, gap_end, left, right) in annotated {
        while lo < observed.len() && observed[lo].1 < gap_start {
            lo += 1;
        }
        let retained = observed[lo..]
            .iter()
            .take_while(|o| o.0 <= gap_end)
            .any(|o| {
                crate::types::overlap_percent(gap_start, gap_end, o.0, o.1, OverlapMode::Union)
                    >= opts.ir_overlap
            });
        if !retained {
            continue;
        }

        let mut event = SpliceEvent::new(
            EventKind::IntronRetention,
            graph.chromosome.clone(),
            gap_start,
            gap_end,
            graph.strand,
            vec![left.start(), left.end(), right.start(), right.end()],
            Detection::Retention,
        )?;
        event.is_novel = !transcripts.iter().any(|tx| {
            tx.exons()
                .iter()
                .any(|e| e.start() <= gap_start && e.end() >= gap_end)
        });
        if let Some(reader) = coverage.as_deref_mut() {
            event.psi = retention_psi(reader, &event, left, right, opts.flank)?;
        }

        insert_merged(&mut out, event, vec![left.clone(), right.clone()]);
    }

    debug!(
        "{}:{} -> {} intron retention events",
        graph.chromosome,
        graph.strand,
        out.len()
    );
    Ok(out)
}

/// Observed exons `(start, end)`, sorted: from each junction end to the
/// nearest junction start after it.
fn observed_exons(graph: &JunctionGraph) -> Vec<(u64, u64)> {
    graph
        .ends()
        .keys()
        .filter_map(|&end| {
            let (&next, _) = graph.starts().range(end + 2..).next()?;
            Some((end + 1, next - 1))
        })
        .collect()
}

fn retention_psi(
    reader: &mut (dyn CoverageReader + '_),
    event: &SpliceEvent,
    left: &Exon,
    right: &Exon,
    flank: u64,
) -> Result<Option<f64>> {
    if flank == 0 {
        return Ok(None);
    }
    let chrom = event.chromosome.as_str();
    let region = |start: u64, end: u64| {
        GenomicInterval::new(chrom, start as i64, end as i64, event.strand)
    };

    let interior = reader.depth(&region(event.start, event.end)?)?;
    let mut flanks = reader.depth(&region(
        left.end().saturating_sub(flank - 1).max(left.start()),
        left.end(),
    )?)?;
    flanks.extend(reader.depth(&region(
        right.start(),
        (right.start() + flank - 1).min(right.end()),
    )?)?);

    Ok(match (mean_depth(&interior), mean_depth(&flanks)) {
        (Some(inner), Some(outer)) if outer > 0.0 => Some(inner / outer),
        _ => None,
    })
}

/// Insert or fold `event` into `map`, unioning supporting exons.
fn insert_merged(map: &mut EventMatches, event: SpliceEvent, exons: Vec<Exon>) {
    match map.remove_entry(&event) {
        Some((mut known, mut known_exons)) => {
            known.absorb(&event);
            known_exons.extend(exons);
            dedup_exons(&mut known_exons);
            map.insert(known, known_exons);
        }
        None => {
            let mut exons = exons;
            dedup_exons(&mut exons);
            map.insert(event, exons);
        }
    }
}

fn dedup_exons(exons: &mut Vec<Exon>) {
    exons.sort_by(|a, b| {
        a.sort_key()
            .cmp(&b.sort_key())
            .then_with(|| a.exon_id.cmp(&b.exon_id))
    });
    exons.dedup_by(|a, b| a.sort_key() == b.sort_key() && a.exon_id == b.exon_id);
}

/// Fold the results of another pass into `into`, merging by event identity.
pub fn merge_matches(into: &mut EventMatches, other: EventMatches) {
    for (event, exons) in other {
        insert_merged(into, event, exons);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::{CoverageSource, PileupCoverage};
    use crate::types::Strand;

    fn exon(start: i64, end: i64, id: &str, gene: &str) -> Exon {
        Exon::new("1", start, end, Strand::Plus, id)
            .unwrap()
            .with_source(gene, &format!("{gene}.t1"))
    }

    fn event(kind: EventKind, sites: Vec<u64>) -> SpliceEvent {
        let start = *sites.iter().min().unwrap();
        let end = *sites.iter().max().unwrap();
        SpliceEvent::new(kind, "1", start, end, Strand::Plus, sites, Detection::Graph).unwrap()
    }

    fn tx(id: &str, exons: &[(i64, i64)]) -> Transcript {
        let (start, end) = exons[0];
        let mut t = Transcript::new("1", start, end, Strand::Plus, "G1", Some(id)).unwrap();
        for (n, &(s, e)) in exons.iter().enumerate() {
            t.add_exon(Exon::new("1", s, e, Strand::Plus, format!("{id}.e{n}")).unwrap());
        }
        t
    }

    #[test]
    fn exon_windows_advance_monotonically() {
        let n = 500u64;
        let mut exons = Vec::new();
        let mut events = Vec::new();
        for k in 0..n {
            let b = k * 1000 + 1;
            for (s, e) in [(b, b + 49), (b + 251, b + 349), (b + 451, b + 550)] {
                exons.push(exon(s as i64, e as i64, &format!("E{k}.{s}"), "G1"));
            }
            events.push(event(EventKind::SkippedExon, vec![b + 50, b + 250, b + 350, b + 450]));
        }

        let windows = exon_windows(&events, &exons, 3);
        assert!(windows.windows(2).all(|w| w[0].start <= w[1].start));
        // every event only sees the three exons of its own locus
        assert!(windows.iter().all(|w| w.len() == 3));
        let scanned: usize = windows.iter().map(|w| w.len()).sum();
        assert!(scanned <= events.len() + exons.len());

        let m = match_events(events, &exons, &MatchOptions::default());
        assert_eq!(m.len(), n as usize);
        assert!(m.keys().all(|e| !e.is_novel));
    }

    #[test]
    fn skipped_exon_confirmed_by_inner_exon() {
        let exons = vec![
            exon(50, 99, "E1", "G1"),
            exon(301, 399, "E2", "G1"),
            exon(501, 600, "E3", "G1"),
        ];
        let se = event(EventKind::SkippedExon, vec![100, 300, 400, 500]);
        let novel_se = event(EventKind::SkippedExon, vec![100, 320, 380, 500]);

        let m = match_events(vec![se.clone(), novel_se.clone()], &exons, &MatchOptions::default());
        let (k, v) = m.get_key_value(&se).unwrap();
        assert!(!k.is_novel);
        assert_eq!(v.iter().map(|e| e.exon_id.as_str()).collect::<Vec<_>>(), vec!["E2"]);

        let (k, v) = m.get_key_value(&novel_se).unwrap();
        assert!(k.is_novel);
        assert!(v.is_empty());
    }

    #[test]
    fn alternative_site_confirmed_within_tolerance() {
        // exon starting just after the 300 acceptor
        let exons = vec![exon(50, 99, "E1", "G1"), exon(302, 350, "E2", "G1")];
        let a3 = event(EventKind::Alt3, vec![100, 100, 200, 300]);
        let opts = MatchOptions::default();

        let m = match_events(vec![a3.clone()], &exons, &opts);
        let (k, v) = m.get_key_value(&a3).unwrap();
        assert!(!k.is_novel);
        assert_eq!(v[0].exon_id, "E2");

        let strict = MatchOptions {
            site_tolerance: 1,
            ..opts
        };
        let m = match_events(vec![a3.clone()], &exons, &strict);
        assert!(m.keys().next().unwrap().is_novel);
    }

    #[test]
    fn events_sharing_exons_see_the_same_window() {
        let exons = vec![exon(201, 299, "E2", "G1")];
        let wide = event(EventKind::SkippedExon, vec![100, 200, 300, 900]);
        let narrow = event(EventKind::SkippedExon, vec![150, 200, 300, 400]);

        let m = match_events(vec![narrow, wide], &exons, &MatchOptions::default());
        assert_eq!(m.len(), 2);
        assert!(m.iter().all(|(k, v)| !k.is_novel && v.len() == 1));
    }

    #[test]
    fn mutually_exclusive_needs_one_gene() {
        let exons = vec![exon(201, 299, "E2", "G1"), exon(401, 499, "E3", "G1")];
        let mxe = event(EventKind::MutuallyExclusive, vec![100, 200, 300, 400, 500, 600]);

        let m = match_events(vec![mxe.clone()], &exons, &MatchOptions::default());
        let (k, v) = m.get_key_value(&mxe).unwrap();
        assert!(!k.is_novel);
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].exon_id, "E2+E3");
        assert_eq!((v[0].start(), v[0].end()), (201, 499));

        let split = vec![exon(201, 299, "E2", "G1"), exon(401, 499, "E3", "G2")];
        let m = match_events(vec![mxe], &split, &MatchOptions::default());
        assert!(m.keys().next().unwrap().is_novel);
    }

    #[test]
    fn missing_annotation_leaves_everything_novel() {
        let refs: BTreeMap<GraphKey, ReferencePartition> = BTreeMap::new();
        let key = ("5".to_string(), Strand::Plus);
        let on_chr5 = |kind, sites: Vec<u64>| {
            let (start, end) = (sites[0], sites[3]);
            SpliceEvent::new(kind, "5", start, end, Strand::Plus, sites, Detection::Graph).unwrap()
        };
        let events = vec![
            on_chr5(EventKind::Alt3, vec![100, 100, 200, 300]),
            on_chr5(EventKind::SkippedExon, vec![100, 300, 400, 500]),
        ];

        let reference = reference_for(&refs, &key);
        assert!(matches!(reference, Err(SpliceError::MissingAnnotation { .. })));

        let m = annotate_partition(events, reference, &MatchOptions::default()).unwrap();
        assert_eq!(m.len(), 2);
        assert!(m.iter().all(|(k, v)| k.is_novel && v.is_empty()));
    }

    #[test]
    fn merge_unions_provenance_and_confirmation() {
        let a3 = event(EventKind::Alt3, vec![100, 100, 200, 300]);
        let mut graph_pass = unannotated(vec![a3.clone().with_psi(Some(0.6))]);

        let mut confirmed = SpliceEvent::new(
            EventKind::Alt3,
            "1",
            100,
            300,
            Strand::Plus,
            vec![300, 200, 100, 100],
            Detection::Reference,
        )
        .unwrap();
        confirmed.is_novel = false;
        let mut reference_pass = EventMatches::new();
        reference_pass.insert(confirmed, vec![exon(201, 250, "E2", "G1")]);

        merge_matches(&mut graph_pass, reference_pass);
        assert_eq!(graph_pass.len(), 1);
        let (k, v) = graph_pass.iter().next().unwrap();
        assert!(!k.is_novel);
        assert_eq!(k.psi, Some(0.6));
        assert_eq!(k.subtype, "graph+reference");
        assert_eq!(v.len(), 1);
    }

    fn ir_graph(edges: &[(u64, u64)]) -> JunctionGraph {
        let mut g = JunctionGraph::new("1", Strand::Plus);
        for &(s, e) in edges {
            g.add_edge(s, e, 1, None, None).unwrap();
        }
        g
    }

    #[test]
    fn intron_retention_requires_close_overlap() {
        // annotated intron 300..310
        let txs = vec![tx("T1", &[(200, 299), (311, 400)])];
        let opts = MatchOptions::default();

        // observed exon 302..309: 70% union overlap
        let g = ir_graph(&[(100, 301), (310, 500)]);
        let m = detect_intron_retention(&g, &txs, None, &opts).unwrap();
        assert!(m.is_empty());

        // observed exon 300..310
        let g = ir_graph(&[(100, 299), (311, 500)]);
        let m = detect_intron_retention(&g, &txs, None, &opts).unwrap();
        assert_eq!(m.len(), 1);
        let (ev, exons) = m.iter().next().unwrap();
        assert_eq!(ev.kind, EventKind::IntronRetention);
        assert_eq!((ev.start, ev.end), (300, 310));
        assert_eq!(ev.splice_sites(), &[200, 299, 311, 400]);
        assert!(ev.is_novel);
        assert_eq!(ev.psi, None);
        assert_eq!(exons.len(), 2);
    }

    #[test]
    fn intron_retention_psi_from_coverage() {
        let txs = vec![tx("T1", &[(200, 299), (311, 400)])];
        let g = ir_graph(&[(100, 299), (311, 500)]);

        let mut cov = PileupCoverage::new();
        cov.add_block("1", 200, 400, 2);
        cov.add_block("1", 200, 299, 2);
        cov.add_block("1", 311, 400, 2);
        let mut reader = cov.open().unwrap();

        let m = detect_intron_retention(&g, &txs, Some(reader.as_mut()), &MatchOptions::default())
            .unwrap();
        let ev = m.keys().next().unwrap();
        // interior depth 2, flank depth 4
        assert!((ev.psi.unwrap() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn annotated_retention_is_not_novel() {
        let txs = vec![
            tx("T1", &[(200, 299), (311, 400)]),
            tx("T2", &[(290, 320)]),
        ];
        let g = ir_graph(&[(100, 299), (311, 500)]);
        let m = detect_intron_retention(&g, &txs, None, &MatchOptions::default()).unwrap();
        assert_eq!(m.len(), 1);
        assert!(!m.keys().next().unwrap().is_novel);
    }
}
