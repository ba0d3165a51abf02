use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{info, Level};

use splice_events::{
    coverage::{CoverageSource, PileupCoverage},
    junctions::read_junctions_from_path,
    output::{write_events, EventRecord},
    pipeline::{detect_events, detect_read_events, Sample},
    AnnotationIndex, Config, IdNameKeys,
};

/// Detect alternative splicing events from junctions or spliced reads.
#[derive(Parser, Debug)]
#[command(name = "splice-events")]
#[command(author, version, about)]
struct Cli {
    /// Debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build an annotation index from a GTF/GFF annotation and write it to disk
    Index(IndexArgs),

    /// Load an annotation index from disk and print summary stats
    Stats(StatsArgs),

    /// Detect events in one or more junction tables
    Detect(DetectArgs),

    /// Couple spliced reads (GTF) to the annotation and detect events per gene
    Reads(ReadsArgs),
}

#[derive(Args, Debug)]
struct StatsArgs {
    /// Serialized index file
    #[arg(long, short)]
    index: PathBuf,
}

#[derive(Args, Debug)]
struct KeyArgs {
    /// Attribute keys to use for gene ID (repeatable)
    #[arg(long = "gene-id-key", value_name = "KEY", num_args = 1..)]
    gene_id_keys: Option<Vec<String>>,

    /// Attribute keys to use for gene name (repeatable)
    #[arg(long = "gene-name-key", value_name = "KEY", num_args = 1..)]
    gene_name_keys: Option<Vec<String>>,

    /// Attribute keys to use for transcript ID (repeatable)
    #[arg(long = "transcript-id-key", value_name = "KEY", num_args = 1..)]
    transcript_id_keys: Option<Vec<String>>,

    /// GFF3 exon->transcript linkage keys (repeatable)
    #[arg(long = "parent-key", value_name = "KEY", num_args = 1..)]
    parent_keys: Option<Vec<String>>,

    /// Feature types that count as exon blocks (repeatable)
    #[arg(long = "exon-feature-type", value_name = "TYPE", num_args = 1..)]
    exon_feature_types: Option<Vec<String>>,
}

impl KeyArgs {
    fn keys(&self) -> IdNameKeys {
        let mut keys = IdNameKeys::default();
        let pick = |target: &mut Vec<String>, given: &Option<Vec<String>>| {
            if let Some(v) = given {
                *target = v.clone();
            }
        };
        pick(&mut keys.gene_id_keys, &self.gene_id_keys);
        pick(&mut keys.gene_name_keys, &self.gene_name_keys);
        pick(&mut keys.transcript_id_keys, &self.transcript_id_keys);
        pick(&mut keys.parent_keys, &self.parent_keys);
        pick(&mut keys.exon_feature_types, &self.exon_feature_types);
        keys
    }
}

#[derive(Args, Debug)]
struct IndexArgs {
    /// Input annotation file (.gtf/.gff/.gff3, optionally .gz)
    #[arg(long, short)]
    annotation: PathBuf,

    /// Output serialized index file
    #[arg(long, short)]
    index: PathBuf,

    #[command(flatten)]
    keys: KeyArgs,
}

/// Options shared by the detection subcommands.
#[derive(Args, Debug)]
struct RunArgs {
    /// Reference annotation (.gtf/.gff/.gff3, optionally .gz)
    #[arg(long, short)]
    annotation: Option<PathBuf>,

    /// Serialized annotation index (instead of --annotation)
    #[arg(long, conflicts_with = "annotation")]
    index: Option<PathBuf>,

    /// Output TSV (stdout if omitted)
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// JSON config file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Worker threads (default: config value, else all cores)
    #[arg(long, short)]
    threads: Option<usize>,

    /// Minimum distance between alternative sites
    #[arg(long)]
    min_gap: Option<u64>,

    #[command(flatten)]
    keys: KeyArgs,
}

#[derive(Args, Debug)]
struct DetectArgs {
    /// Junction tables, one per sample (repeatable)
    #[arg(long, short, num_args = 1.., required = true)]
    junctions: Vec<PathBuf>,

    /// Coverage bedGraph for intron retention PSI
    #[arg(long)]
    coverage: Option<PathBuf>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Args, Debug)]
struct ReadsArgs {
    /// Spliced reads as GTF/GFF exon records
    #[arg(long, short)]
    reads: PathBuf,

    #[command(flatten)]
    run: RunArgs,
}

fn load_config(run: &RunArgs) -> Result<Config> {
    let mut config = match &run.config {
        Some(p) => Config::from_path(p)?,
        None => Config::default(),
    };
    if let Some(t) = run.threads {
        config.threads = t;
    }
    if let Some(g) = run.min_gap {
        config.graph.min_gap = g;
    }
    Ok(config)
}

fn load_annotation(run: &RunArgs) -> Result<Option<AnnotationIndex>> {
    if let Some(p) = &run.index {
        let idx = AnnotationIndex::load(p)
            .with_context(|| format!("reading index {}", p.display()))?;
        return Ok(Some(idx));
    }
    match &run.annotation {
        Some(p) => {
            let idx = AnnotationIndex::from_path(p, run.keys.keys())
                .with_context(|| format!("building index from {}", p.display()))?;
            Ok(Some(idx))
        }
        None => Ok(None),
    }
}

fn sample_name(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    name.trim_end_matches(".gz").to_string()
}

fn write_output(path: Option<&Path>, records: &[EventRecord], samples: &[String]) -> Result<()> {
    let out: Box<dyn Write> = match path {
        Some(p) => Box::new(BufWriter::new(
            File::create(p).with_context(|| format!("create {}", p.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    let n = write_events(out, records, samples).context("writing events")?;
    info!("{} events written", n);
    Ok(())
}

fn build_pool(config: &Config) -> Result<rayon::ThreadPool> {
    let threads = config.effective_threads();
    info!("using {} worker threads", threads);
    Ok(rayon::ThreadPoolBuilder::new().num_threads(threads).build()?)
}

fn main() -> Result<()> {
    let start = Instant::now();
    let cli = Cli::parse();
    let level = if cli.verbose { Level::Debug } else { Level::Info };
    simple_logger::init_with_level(level)?;

    match cli.cmd {
        Command::Index(args) => {
            let idx = AnnotationIndex::from_path(&args.annotation, args.keys.keys())
                .with_context(|| format!("building index from {}", args.annotation.display()))?;

            println!("{idx}");

            idx.save(&args.index)
                .with_context(|| format!("writing index to {}", args.index.display()))?;

            info!("Index written to {}", args.index.display());
        }

        Command::Stats(args) => {
            let idx = AnnotationIndex::load(&args.index)
                .with_context(|| format!("reading index {}", args.index.display()))?;
            println!("{idx}");
        }

        Command::Detect(args) => {
            let config = load_config(&args.run)?;
            let annotation = load_annotation(&args.run)?;
            if annotation.is_none() {
                info!("no annotation given, every event is reported as novel");
            }

            let mut samples = Vec::with_capacity(args.junctions.len());
            for p in &args.junctions {
                let junctions = read_junctions_from_path(p)
                    .with_context(|| format!("reading junctions {}", p.display()))?;
                info!("{}: {} junctions", p.display(), junctions.len());
                samples.push(Sample::new(sample_name(p), junctions));
            }

            let coverage = match &args.coverage {
                Some(p) => Some(
                    PileupCoverage::from_bedgraph_path(p)
                        .with_context(|| format!("reading coverage {}", p.display()))?,
                ),
                None => None,
            };

            let pool = build_pool(&config)?;
            let records = pool.install(|| {
                detect_events(
                    &samples,
                    annotation.as_ref(),
                    coverage.as_ref().map(|c| c as &dyn CoverageSource),
                    &config,
                )
            })?;

            let names: Vec<String> = samples.iter().map(|s| s.name.clone()).collect();
            write_output(args.run.output.as_deref(), &records, &names)?;
        }

        Command::Reads(args) => {
            let config = load_config(&args.run)?;
            let Some(annotation) = load_annotation(&args.run)? else {
                bail!("the reads subcommand needs --annotation or --index");
            };

            let reads: Vec<_> = AnnotationIndex::from_path(&args.reads, IdNameKeys::default())
                .with_context(|| format!("reading reads {}", args.reads.display()))?
                .transcripts()
                .cloned()
                .collect();
            info!("{}: {} reads", args.reads.display(), reads.len());

            let pool = build_pool(&config)?;
            let records = pool.install(|| detect_read_events(reads, &annotation, &config))?;
            write_output(args.run.output.as_deref(), &records, &[sample_name(&args.reads)])?;
        }
    }

    info!("Elapsed time: {:?}", start.elapsed());
    Ok(())
}
