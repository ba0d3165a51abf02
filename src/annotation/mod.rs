pub mod builder;
pub mod io;

pub use builder::AnnotationBuilder;
pub use io::{parse_attributes, parse_record_line, AnnotationReader, AnnotationRecord, Dialect};
