//! splice_events
//!
//! Alternative splicing event detection from splice junction counts.
//! Junctions (1-based, closed intron coordinates) are grouped into a
//! per-chromosome/strand graph, enumerated into skipped exon, alternative
//! 3'/5' site and mutually exclusive exon events, and matched against a
//! GTF/GFF annotation. Spliced reads can be coupled to reference transcripts
//! and analysed gene by gene.

pub mod annotation;
pub mod config;
pub mod coupler;
pub mod coverage;
pub mod error;
pub mod event;
pub mod graph;
pub mod index;
pub mod input;
pub mod junctions;
pub mod matcher;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod reference;
pub mod types;

pub use index::{AnnotationIndex, IdNameKeys};

pub use annotation::AnnotationBuilder;

pub use config::Config;
pub use error::{PartialFailure, Result, SpliceError};

pub use event::{Detection, EventKind, SpliceEvent};
pub use graph::JunctionGraph;
pub use junctions::Junction;
pub use output::EventRecord;
pub use pipeline::Sample;

pub use types::{GenomicInterval, OverlapMode, Strand};

pub use model::exon::Exon;
pub use model::gene::Gene;
pub use model::transcript::Transcript;
pub use model::types::{GeneId, TranscriptId};
