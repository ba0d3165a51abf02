pub mod exon;
pub mod gene;
pub mod site;
pub mod transcript;
pub mod types;

pub use exon::Exon;
pub use gene::Gene;
pub use site::{Site, SiteGroup};
pub use transcript::Transcript;
pub use types::{GeneId, Source, TranscriptId};
