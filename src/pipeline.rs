//! Partitioned, parallel event detection.
//!
//! Work is split by its natural independence boundary: one task per
//! (chromosome, strand) for junction tables, one task per gene for coupled
//! reads. Tasks own their input and return their result; nothing is shared
//! mutably. Results are merged by event identity afterwards, so the output
//! does not depend on the number of threads.
//!
//! The functions here run on the current rayon pool; callers pick the pool
//! size with `ThreadPoolBuilder` and `install`.

use std::collections::BTreeMap;

use log::{debug, info};
use rayon::prelude::*;

use crate::config::Config;
use crate::coupler::{couple, Template};
use crate::coverage::{CoverageSource, PileupCoverage};
use crate::error::{PartialFailure, Result, SpliceError};
use crate::event::SpliceEvent;
use crate::graph::{GraphKey, JunctionGraph};
use crate::index::{AnnotationIndex, ReferencePartition};
use crate::junctions::Junction;
use crate::matcher::{
    annotate_partition, detect_intron_retention, match_events, merge_matches, reference_for,
    EventMatches,
};
use crate::model::exon::sort_and_merge_exons;
use crate::model::transcript::Transcript;
use crate::output::EventRecord;
use crate::reference::compare_junctions;

/// Junctions of one input table.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub junctions: Vec<Junction>,
}

impl Sample {
    pub fn new(name: impl Into<String>, junctions: Vec<Junction>) -> Self {
        Self {
            name: name.into(),
            junctions,
        }
    }
}

pub type PipelineResult = std::result::Result<Vec<EventRecord>, PartialFailure<Vec<EventRecord>>>;

/// Run `task` on every partition in parallel and wait for all of them.
///
/// Results come back in partition order. If any task failed, the first
/// failure (in partition order) is returned together with every result that
/// did complete.
pub fn join_all<P, T, F>(
    partitions: Vec<(String, P)>,
    task: F,
) -> std::result::Result<Vec<T>, PartialFailure<T>>
where
    P: Send,
    T: Send,
    F: Fn(P) -> Result<T> + Sync,
{
    let results: Vec<(String, Result<T>)> = partitions
        .into_par_iter()
        .map(|(name, part)| {
            let res = task(part);
            (name, res)
        })
        .collect();

    let mut completed = Vec::with_capacity(results.len());
    let mut first_err: Option<(String, SpliceError)> = None;
    let mut failed = 0usize;
    for (name, res) in results {
        match res {
            Ok(v) => completed.push(v),
            Err(e) => {
                failed += 1;
                if first_err.is_none() {
                    first_err = Some((name, e));
                }
            }
        }
    }

    match first_err {
        None => Ok(completed),
        Some((partition, source)) => Err(PartialFailure {
            partition,
            source,
            failed,
            completed,
        }),
    }
}

/// Detect events in one or more junction tables.
///
/// Junctions of all samples are pooled for enumeration and PSI; with more
/// than one sample every event is also quantified against each sample.
pub fn detect_events(
    samples: &[Sample],
    annotation: Option<&AnnotationIndex>,
    coverage: Option<&dyn CoverageSource>,
    config: &Config,
) -> PipelineResult {
    let references: BTreeMap<GraphKey, ReferencePartition> =
        annotation.map(AnnotationIndex::partitions).unwrap_or_default();

    // (chromosome, strand) -> junctions per sample
    let mut partitions: BTreeMap<GraphKey, Vec<Vec<&Junction>>> = BTreeMap::new();
    for (n, sample) in samples.iter().enumerate() {
        for j in &sample.junctions {
            let slots = partitions
                .entry((j.chromosome.clone(), j.strand))
                .or_insert_with(|| vec![Vec::new(); samples.len()]);
            slots[n].push(j);
        }
    }
    info!(
        "{} samples, {} partitions, {} reference partitions",
        samples.len(),
        partitions.len(),
        references.len()
    );

    let tasks: Vec<(String, (GraphKey, Vec<Vec<&Junction>>))> = partitions
        .into_iter()
        .map(|(key, js)| (format!("{}:{}", key.0, key.1), (key, js)))
        .collect();

    let per_partition = join_all(tasks, |(key, per_sample)| {
        detect_partition(key, &per_sample, &references, coverage, config)
    })
    .map_err(|e| PartialFailure {
        completed: vec![merge_records(e.completed.into_iter().flatten())],
        ..e
    })?;

    Ok(merge_records(per_partition.into_iter().flatten()))
}

fn detect_partition(
    key: GraphKey,
    per_sample: &[Vec<&Junction>],
    references: &BTreeMap<GraphKey, ReferencePartition>,
    coverage: Option<&dyn CoverageSource>,
    config: &Config,
) -> Result<Vec<EventRecord>> {
    let min_gap = config.graph.min_gap;
    let min_count = config.graph.min_junction_count;

    let mut pooled = JunctionGraph::new(key.0.clone(), key.1);
    let mut sample_graphs = Vec::with_capacity(per_sample.len());
    for junctions in per_sample {
        let mut g = JunctionGraph::new(key.0.clone(), key.1);
        for j in junctions {
            g.add_edge(j.start, j.end, j.count, None, None)?;
            pooled.add_edge(j.start, j.end, j.count, None, None)?;
        }
        g.filter_low_abundance(min_count);
        sample_graphs.push(g);
    }
    let dropped = pooled.filter_low_abundance(min_count);
    if dropped > 0 {
        debug!("{}:{} dropped {} low-abundance junctions", key.0, key.1, dropped);
    }

    let reference = reference_for(references, &key);
    let part = reference.as_ref().ok().copied();

    let mut events = pooled.identify_events(min_gap);
    if let Some(part) = part {
        events.extend(compare_junctions(&pooled, &part.transcripts, min_gap));
    }
    let mut matches = annotate_partition(events, reference, &config.matching)?;

    if let Some(part) = part {
        let mut reader = coverage.map(|c| c.open()).transpose()?;
        let retained = detect_intron_retention(
            &pooled,
            &part.transcripts,
            reader.as_deref_mut(),
            &config.matching,
        )?;
        merge_matches(&mut matches, retained);
    }

    let multi = sample_graphs.len() > 1;
    Ok(matches
        .into_iter()
        .map(|(event, exons)| {
            let mut rec = EventRecord::new(event, exons);
            if multi {
                rec.sample_psi = sample_graphs.iter().map(|g| g.event_psi(&rec.event)).collect();
            }
            rec
        })
        .collect())
}

/// Merge records by event identity, sorted by identity.
pub fn merge_records<I>(records: I) -> Vec<EventRecord>
where
    I: IntoIterator<Item = EventRecord>,
{
    let mut merged: BTreeMap<SpliceEvent, EventRecord> = BTreeMap::new();
    for rec in records {
        match merged.remove_entry(&rec.event) {
            Some((_, mut known)) => {
                known.event.absorb(&rec.event);
                known.exons.extend(rec.exons);
                known.exons = sort_and_merge_exons(std::mem::take(&mut known.exons));
                if known.sample_psi.is_empty() {
                    known.sample_psi = rec.sample_psi;
                }
                merged.insert(known.event.clone(), known);
            }
            None => {
                merged.insert(rec.event.clone(), rec);
            }
        }
    }
    merged.into_values().collect()
}

/// Events of one gene from the reads coupled to its transcripts.
///
/// The junction graph is built from the introns of the reads; events are
/// matched against the transcript exons covered by the reads, and intron
/// retention uses the read pileup as coverage.
pub fn find_gene_events(templates: &[Template], config: &Config) -> Result<Vec<EventRecord>> {
    let Some(first) = templates.first() else {
        return Ok(Vec::new());
    };
    let gene_id = first.transcript.gene_id.as_str();
    let mut graph = JunctionGraph::new(first.transcript.chromosome(), first.transcript.strand());

    // a read coupled to several isoforms counts once
    let mut reads: BTreeMap<&str, &Transcript> = BTreeMap::new();
    for t in templates {
        for r in &t.reads {
            reads.insert(r.transcript_id.as_str(), r);
        }
    }
    for (id, read) in &reads {
        for (s, e) in read.introns() {
            graph.add_edge(s, e, 1, Some(gene_id), Some(*id))?;
        }
    }
    graph.filter_low_abundance(config.graph.min_junction_count);

    let transcripts: Vec<Transcript> = templates.iter().map(|t| t.transcript.clone()).collect();
    let exons = sort_and_merge_exons(
        templates
            .iter()
            .flat_map(|t| t.exons.iter().cloned())
            .collect(),
    );

    let min_gap = config.graph.min_gap;
    let mut events = graph.identify_events(min_gap);
    events.extend(compare_junctions(&graph, &transcripts, min_gap));
    let mut matches: EventMatches = match_events(events, &exons, &config.matching);

    let pileup = PileupCoverage::from_transcripts(reads.values().copied());
    let mut reader = pileup.open()?;
    let retained = detect_intron_retention(
        &graph,
        &transcripts,
        Some(reader.as_mut()),
        &config.matching,
    )?;
    merge_matches(&mut matches, retained);

    debug!(
        "gene {}: {} reads, {} events",
        gene_id,
        reads.len(),
        matches.len()
    );
    Ok(matches
        .into_iter()
        .map(|(event, exons)| EventRecord::new(event, exons))
        .collect())
}

/// Couple `reads` to the annotated transcripts and detect events per gene.
pub fn detect_read_events(
    reads: Vec<Transcript>,
    annotation: &AnnotationIndex,
    config: &Config,
) -> PipelineResult {
    let transcripts: Vec<Transcript> = annotation.transcripts().cloned().collect();
    let coupling = couple(reads, transcripts, &config.coupling);
    info!(
        "{} reads coupled to {} genes, {} reads matched no transcript",
        coupling.coupled_read_count(),
        coupling.templates.len(),
        coupling.novel.len()
    );

    let tasks: Vec<(String, Vec<Template>)> = coupling.templates.into_iter().collect();
    let per_gene = join_all(tasks, |templates| find_gene_events(&templates, config)).map_err(|e| {
        PartialFailure {
            completed: vec![merge_records(e.completed.into_iter().flatten())],
            ..e
        }
    })?;

    Ok(merge_records(per_gene.into_iter().flatten()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::model::exon::Exon;
    use crate::output::render_rows;
    use crate::types::Strand;
    use std::io::Cursor;

    fn config() -> Config {
        Config {
            threads: 2,
            ..Config::default()
        }
    }

    fn junctions(rows: &[(&str, u64, u64, Strand, u64)]) -> Vec<Junction> {
        rows.iter()
            .map(|&(c, s, e, st, n)| Junction::new(c, s as i64, e as i64, st, n).unwrap())
            .collect()
    }

    const GTF: &str = "\
1\tsrc\texon\t50\t99\t.\t+\t.\tgene_id \"G1\"; transcript_id \"T1\"; exon_id \"E1\";
1\tsrc\texon\t301\t399\t.\t+\t.\tgene_id \"G1\"; transcript_id \"T1\"; exon_id \"E2\";
1\tsrc\texon\t501\t600\t.\t+\t.\tgene_id \"G1\"; transcript_id \"T1\"; exon_id \"E3\";
";

    fn annotation() -> AnnotationIndex {
        AnnotationIndex::from_reader(Cursor::new(GTF.as_bytes()), Default::default()).unwrap()
    }

    #[test]
    fn join_all_keeps_order_and_partial_results() {
        let parts: Vec<(String, u64)> = (0..6).map(|i| (format!("p{i}"), i)).collect();
        let ok = join_all(parts.clone(), |i| Ok(i * 10)).unwrap();
        assert_eq!(ok, vec![0, 10, 20, 30, 40, 50]);

        let err = join_all(parts, |i| {
            if i % 2 == 1 {
                Err(SpliceError::EmptyGroup { anchor: i })
            } else {
                Ok(i)
            }
        })
        .unwrap_err();
        assert_eq!(err.partition, "p1");
        assert_eq!(err.failed, 3);
        assert_eq!(err.completed, vec![0, 2, 4]);
        assert!(matches!(err.source, SpliceError::EmptyGroup { anchor: 1 }));
    }

    #[test]
    fn skipped_exon_is_confirmed_by_annotation() {
        let samples = vec![Sample::new(
            "s1",
            junctions(&[
                ("1", 100, 500, Strand::Plus, 2),
                ("1", 100, 300, Strand::Plus, 6),
                ("1", 400, 500, Strand::Plus, 6),
            ]),
        )];
        let idx = annotation();

        let records = detect_events(&samples, Some(&idx), None, &config()).unwrap();
        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert_eq!(rec.event.kind, EventKind::SkippedExon);
        assert!(!rec.event.is_novel);
        assert_eq!(rec.event.subtype, "graph+reference");
        assert_eq!(rec.exons[0].exon_id, "E2");
        assert!(rec.sample_psi.is_empty());
    }

    #[test]
    fn unstranded_junctions_use_annotation_of_either_strand() {
        let samples = vec![Sample::new(
            "s1",
            junctions(&[
                ("1", 100, 500, Strand::Unknown, 2),
                ("1", 100, 300, Strand::Unknown, 6),
                ("1", 400, 500, Strand::Unknown, 6),
            ]),
        )];
        let idx = annotation();

        let records = detect_events(&samples, Some(&idx), None, &config()).unwrap();
        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert_eq!(rec.event.kind, EventKind::SkippedExon);
        assert_eq!(rec.event.strand, Strand::Unknown);
        assert!(!rec.event.is_novel);
        assert_eq!(rec.event.subtype, "graph+reference");
        assert_eq!(rec.exons[0].exon_id, "E2");
    }

    #[test]
    fn unannotated_chromosome_stays_novel() {
        let samples = vec![Sample::new(
            "s1",
            junctions(&[
                ("5", 100, 200, Strand::Plus, 10),
                ("5", 100, 300, Strand::Plus, 5),
                ("5", 1100, 1500, Strand::Plus, 1),
                ("5", 1100, 1300, Strand::Plus, 1),
                ("5", 1400, 1500, Strand::Plus, 1),
            ]),
        )];
        let idx = annotation();

        let records = detect_events(&samples, Some(&idx), None, &config()).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.event.is_novel && r.exons.is_empty()));
        for row in render_rows(&records, &["s1".to_string()]) {
            let cols: Vec<&str> = row.split('\t').collect();
            assert_eq!((cols[5], cols[6]), ("", ""));
        }
    }

    #[test]
    fn per_sample_psi_for_several_samples() {
        let samples = vec![
            Sample::new(
                "a",
                junctions(&[("1", 100, 200, Strand::Plus, 9), ("1", 100, 300, Strand::Plus, 1)]),
            ),
            Sample::new(
                "b",
                junctions(&[("1", 100, 200, Strand::Plus, 1), ("1", 100, 300, Strand::Plus, 4)]),
            ),
        ];
        let records = detect_events(&samples, None, None, &config()).unwrap();
        assert_eq!(records.len(), 1);
        let rec = &records[0];
        // pooled 10 of 15
        assert!((rec.event.psi.unwrap() - 10.0 / 15.0).abs() < 1e-9);
        assert_eq!(rec.sample_psi.len(), 2);
        assert!((rec.sample_psi[0].unwrap() - 0.9).abs() < 1e-9);
        assert!((rec.sample_psi[1].unwrap() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn output_does_not_depend_on_thread_count() {
        let samples = vec![Sample::new(
            "s1",
            junctions(&[
                ("1", 100, 500, Strand::Plus, 2),
                ("1", 100, 300, Strand::Plus, 6),
                ("1", 400, 500, Strand::Plus, 6),
                ("2", 100, 200, Strand::Minus, 3),
                ("2", 100, 300, Strand::Minus, 3),
                ("3", 10, 90, Strand::Unknown, 3),
                ("3", 40, 90, Strand::Unknown, 7),
            ]),
        )];
        let idx = annotation();
        let names = vec!["s1".to_string()];

        let run = |threads: usize| {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .unwrap();
            pool.install(|| detect_events(&samples, Some(&idx), None, &config()).unwrap())
        };
        assert_eq!(render_rows(&run(1), &names), render_rows(&run(4), &names));
    }

    #[test]
    fn reads_are_coupled_and_analysed_per_gene() {
        let idx = annotation();
        let read = |id: &str, exons: &[(i64, i64)]| {
            let (start, end) = exons[0];
            let mut t = Transcript::new("1", start, end, Strand::Plus, id, Some(id)).unwrap();
            for &(s, e) in exons {
                t.add_exon(Exon::new("1", s, e, Strand::Plus, format!("{id}:{s}")).unwrap());
            }
            t
        };
        let reads = vec![
            read("r1", &[(60, 99), (301, 399), (501, 550)]),
            read("r2", &[(70, 99), (301, 399), (501, 560)]),
            read("r3", &[(80, 99), (301, 399), (501, 570)]),
            // skips E2, still shares E1 and E3 boundaries with T1
            read("r4", &[(60, 99), (501, 580)]),
        ];

        let records = detect_read_events(reads, &idx, &config()).unwrap();
        let se: Vec<_> = records
            .iter()
            .filter(|r| r.event.kind == EventKind::SkippedExon)
            .collect();
        assert_eq!(se.len(), 1);
        assert_eq!(se[0].event.splice_sites(), &[100, 300, 400, 500]);
        assert!(!se[0].event.is_novel);
        assert!((se[0].event.psi.unwrap() - 0.75).abs() < 1e-9);
    }
}
