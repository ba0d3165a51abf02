//! Events read off the annotation directly: observed junctions compared
//! with annotated introns, without going through graph enumeration.
//!
//! The output uses the same site layout as [`JunctionGraph::identify_events`]
//! so both passes merge by identity.

use std::collections::{BTreeMap, BTreeSet};

use crate::event::{Detection, EventKind, SpliceEvent};
use crate::graph::{mean_psi, JunctionGraph};
use crate::model::transcript::Transcript;

/// Compare the junctions of `graph` with the introns of `transcripts`.
///
/// - A junction sharing its start (end) with an annotated intron whose
///   other end lies more than `min_gap` away is an alternative site.
/// - A junction `(s, e)` where one transcript has introns `(s, x)` and
///   `(y, e)` skips the exons between `x` and `y`.
pub fn compare_junctions(
    graph: &JunctionGraph,
    transcripts: &[Transcript],
    min_gap: u64,
) -> Vec<SpliceEvent> {
    let mut by_start: BTreeMap<u64, BTreeSet<u64>> = BTreeMap::new();
    let mut by_end: BTreeMap<u64, BTreeSet<u64>> = BTreeMap::new();
    for tx in transcripts {
        for (s, e) in tx.introns() {
            by_start.entry(s).or_default().insert(e);
            by_end.entry(e).or_default().insert(s);
        }
    }

    let mut events: BTreeSet<SpliceEvent> = BTreeSet::new();
    // alternative pairs already explained by a skipped exon, per anchor
    let mut skipped_starts: BTreeSet<(u64, u64, u64)> = BTreeSet::new();
    let mut skipped_ends: BTreeSet<(u64, u64, u64)> = BTreeSet::new();

    for tx in transcripts {
        let introns = tx.introns();
        for (i, &(s, x)) in introns.iter().enumerate() {
            for &(y, e) in &introns[i + 1..] {
                if graph.count(s, e) == 0 {
                    continue;
                }
                let psi = both_observed(graph, (s, x), (y, e))
                    .then(|| {
                        let starts = graph.starts().get(&s).and_then(|g| g.psi(x));
                        let ends = graph.ends().get(&e).and_then(|g| g.psi(y));
                        mean_psi(starts, ends)
                    })
                    .flatten();
                let sites = vec![s, x, y, e];
                if let Some(ev) = event(graph, EventKind::SkippedExon, s, e, sites, psi) {
                    events.insert(ev);
                    skipped_starts.insert((s, x, e));
                    skipped_ends.insert((e, s, y));
                }
            }
        }
    }

    for (start, end, _) in graph.edges() {
        if let Some(partners) = by_start.get(&start) {
            for &other in partners.iter().filter(|&&o| o.abs_diff(end) > min_gap) {
                let (lo, hi) = (other.min(end), other.max(end));
                if skipped_starts.contains(&(start, lo, hi)) {
                    continue;
                }
                let kind = EventKind::for_shared_start(graph.strand);
                let psi = both_observed(graph, (start, lo), (start, hi))
                    .then(|| graph.starts().get(&start).and_then(|g| g.psi(lo)))
                    .flatten();
                events.extend(event(graph, kind, start, hi, vec![start, start, lo, hi], psi));
            }
        }

        if let Some(partners) = by_end.get(&end) {
            for &other in partners.iter().filter(|&&o| o.abs_diff(start) > min_gap) {
                let (lo, hi) = (other.min(start), other.max(start));
                if skipped_ends.contains(&(end, lo, hi)) {
                    continue;
                }
                let kind = EventKind::for_shared_end(graph.strand);
                let psi = both_observed(graph, (lo, end), (hi, end))
                    .then(|| graph.ends().get(&end).and_then(|g| g.psi(hi)))
                    .flatten();
                events.extend(event(graph, kind, lo, end, vec![lo, hi, end, end], psi));
            }
        }
    }

    events.into_iter().collect()
}

fn both_observed(graph: &JunctionGraph, a: (u64, u64), b: (u64, u64)) -> bool {
    graph.count(a.0, a.1) > 0 && graph.count(b.0, b.1) > 0
}

fn event(
    graph: &JunctionGraph,
    kind: EventKind,
    start: u64,
    end: u64,
    sites: Vec<u64>,
    psi: Option<f64>,
) -> Option<SpliceEvent> {
    SpliceEvent::new(
        kind,
        graph.chromosome.clone(),
        start,
        end,
        graph.strand,
        sites,
        Detection::Reference,
    )
    .ok()
    .map(|ev| ev.with_psi(psi))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::exon::Exon;
    use crate::types::Strand;

    fn tx(id: &str, strand: Strand, exons: &[(i64, i64)]) -> Transcript {
        let mut t = Transcript::new("1", exons[0].0, exons[0].1, strand, "G1", Some(id)).unwrap();
        for &(s, e) in exons {
            t.add_exon(Exon::new("1", s, e, strand, format!("{id}:{s}")).unwrap());
        }
        t
    }

    fn graph(strand: Strand, edges: &[(u64, u64, u64)]) -> JunctionGraph {
        let mut g = JunctionGraph::new("1", strand);
        for &(s, e, c) in edges {
            g.add_edge(s, e, c, None, None).unwrap();
        }
        g
    }

    #[test]
    fn alternative_acceptor_against_annotated_intron() {
        // annotated intron 100..200, observed 100..300 only
        let txs = vec![tx("T1", Strand::Plus, &[(50, 99), (201, 400)])];
        let g = graph(Strand::Plus, &[(100, 300, 4)]);

        let events = compare_junctions(&g, &txs, 3);
        assert_eq!(events.len(), 1);
        let ev = &events[0];
        assert_eq!(ev.kind, EventKind::Alt3);
        assert_eq!(ev.splice_sites(), &[100, 100, 200, 300]);
        assert_eq!(ev.subtype, "reference");
        // the annotated branch was never observed
        assert_eq!(ev.psi, None);
    }

    #[test]
    fn psi_when_both_branches_observed_matches_graph_pass() {
        let txs = vec![tx("T1", Strand::Plus, &[(50, 99), (201, 400)])];
        let g = graph(Strand::Plus, &[(100, 200, 10), (100, 300, 5)]);

        let from_reference = compare_junctions(&g, &txs, 3);
        let from_graph = g.identify_events(3);
        assert_eq!(from_reference, from_graph);
        assert_eq!(from_reference[0].psi, from_graph[0].psi);
    }

    #[test]
    fn shared_end_on_minus_strand_is_alt3() {
        let txs = vec![tx("T1", Strand::Minus, &[(50, 99), (201, 400)])];
        let g = graph(Strand::Minus, &[(150, 200, 4)]);
        let events = compare_junctions(&g, &txs, 3);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Alt3);
        assert_eq!(events[0].splice_sites(), &[100, 150, 200, 200]);
    }

    #[test]
    fn skipping_junction_over_annotated_exon() {
        let txs = vec![tx("T1", Strand::Plus, &[(50, 99), (301, 399), (501, 600)])];
        let g = graph(Strand::Plus, &[(100, 500, 2), (100, 300, 6), (400, 500, 6)]);

        let events = compare_junctions(&g, &txs, 3);
        // the alternative pairs around the skipped exon are not reported again
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::SkippedExon);
        assert_eq!(events[0].splice_sites(), &[100, 300, 400, 500]);
        assert!((events[0].psi.unwrap() - 0.75).abs() < 1e-9);
        assert_eq!(events, g.identify_events(3));
    }

    #[test]
    fn nothing_without_shared_coordinates() {
        let txs = vec![tx("T1", Strand::Plus, &[(50, 99), (201, 400)])];
        let g = graph(Strand::Plus, &[(1000, 2000, 4)]);
        assert!(compare_junctions(&g, &txs, 3).is_empty());
    }
}
